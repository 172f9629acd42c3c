use std::error::Error;
use rand::rngs::StdRng;
use url::Url;
use crate::auction::{AuctionOutcome, AuctionRunner};
use crate::auction_config::AuctionConfig;
use crate::browser_state::BrowserState;
use crate::config::HostConfig;
use crate::errors::ContractResult;
use crate::host::WorkletHost;
use crate::interest_group::{Ad, InterestGroup};
use crate::logger::{Logger, LogEvent};
use crate::origin::Origin;
use crate::resources::ResourceStore;
use crate::utils::seeded_rng;
use crate::{errln, logln};

/// What every scenario run gets: its name, the host config and the run seed
pub struct ScenarioContext<'a> {
    pub name: &'a str,
    pub config: &'a HostConfig,
    pub seed: u64,
}

/// Function type for scenario entry functions
pub type ScenarioFn = fn(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn Error>>;

/// Entry in the scenario catalog
#[derive(Clone)]
pub struct ScenarioEntry {
    pub short_name: &'static str,
    pub run: ScenarioFn,
}

// Create an inventory collection for scenario entries
inventory::collect!(ScenarioEntry);

/// Get all registered scenarios from the catalog, sorted by name
pub fn get_scenario_catalog() -> Vec<ScenarioEntry> {
    let mut entries: Vec<ScenarioEntry> = inventory::iter::<ScenarioEntry>
        .into_iter()
        .cloned()
        .collect();
    entries.sort_by_key(|entry| entry.short_name);
    entries
}

/// Collects ✓/✗ validations and turns the failures into the scenario's error
pub struct Checks {
    errors: Vec<String>,
}

impl Checks {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn check(&mut self, logger: &mut Logger, passed: bool, msg: String) {
        if passed {
            logln!(logger, LogEvent::Scenario, "✓ {}", msg);
        } else {
            errln!(logger, LogEvent::Scenario, "✗ {}", msg);
            self.errors.push(msg);
        }
    }

    pub fn finish(self, scenario_name: &str) -> Result<(), Box<dyn Error>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(format!("Scenario '{}' validation failed:\n{}", scenario_name, self.errors.join("\n")).into())
        }
    }
}

/// A browser, the servers it talks to, and a host to run worklets on
pub struct World<'a> {
    pub config: HostConfig,
    pub browser: BrowserState,
    pub resources: ResourceStore,
    pub host: WorkletHost,
    rng: StdRng,
    ctx: &'a ScenarioContext<'a>,
}

impl<'a> World<'a> {
    pub fn new(ctx: &'a ScenarioContext<'a>) -> Self {
        Self {
            config: ctx.config.clone(),
            browser: BrowserState::new(),
            resources: ResourceStore::new(),
            host: WorkletHost::new(),
            rng: seeded_rng(ctx.seed, 0),
            ctx,
        }
    }

    pub fn seed(&self) -> u64 {
        self.ctx.seed
    }

    /// Run one auction, logging its outcome under the Scenario event
    pub fn run_auction(&mut self, auction: &AuctionConfig, logger: &mut Logger) -> ContractResult<AuctionOutcome> {
        let runner = AuctionRunner::new(&self.config, &self.resources, &self.host);
        let outcome = runner.run(&mut self.browser, auction, &mut self.rng, logger)?;
        match &outcome.winner {
            Some(winner) => logln!(logger, LogEvent::Scenario, "{}: {} '{}' won with {}", self.ctx.name, winner.owner, winner.group_name, winner.bid),
            None => logln!(logger, LogEvent::Scenario, "{}: no winner", self.ctx.name),
        }
        Ok(outcome)
    }
}

pub fn origin(s: &str) -> Result<Origin, Box<dyn Error>> {
    Ok(Origin::parse(s)?)
}

pub fn url(s: &str) -> Result<Url, Box<dyn Error>> {
    Ok(Url::parse(s)?)
}

/// Group bidding with `<owner>/<script>` on one ad at `<owner>/ads/<name>`
pub fn group(owner: &Origin, name: &str, script: &str) -> Result<InterestGroup, Box<dyn Error>> {
    let mut group = InterestGroup::new(owner.clone(), name);
    group.bidding_logic_url = Some(url(&format!("{}/{}", owner, script))?);
    group.ads.push(Ad::new(url(&format!("{}/ads/{}", owner, name))?));
    group.validate()?;
    Ok(group)
}

/// Auction run by `seller` with `<seller>/<script>` over `buyers`
pub fn auction(seller: &Origin, script: &str, buyers: &[&Origin]) -> Result<AuctionConfig, Box<dyn Error>> {
    let config = AuctionConfig::new(seller.clone(), url(&format!("{}/{}", seller, script))?)
        .with_buyers(buyers.iter().map(|b| (*b).clone()).collect());
    Ok(config)
}

// Scenario modules
pub mod argument_validation;
pub mod basic_auction;
pub mod stop_bidding_after_win;
pub mod multibid;
pub mod wasm_bidding;
pub mod currency_conversion;
pub mod component_auction;
pub mod reporting_timeout;
pub mod debug_report_lockout;
pub mod competitive_auction;
