/// Repeated auctions between several buyers with random bids.
///
/// Each round every group rejoins with a fresh log-normal bid. One buyer has
/// three prioritized groups but a group limit of 2, and one group filters
/// itself out with a negative priority. Every auction has to be won by the
/// highest bid with the second highest reported as highestScoringOtherBid.

use crate::logger::{Logger, LogEvent};
use crate::per_buyer::PerBuyer;
use crate::scenarios::{auction, group, origin, Checks, ScenarioContext, World};
use crate::utils::{lognormal_dist, seeded_rng};
use crate::logln;
use rand::distributions::Distribution;
use serde_json::json;
use std::time::Duration;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "competitive_auction",
    run,
});

const AUCTIONS: usize = 10;
const GROUP_LIMIT: usize = 2;

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let seller = origin("https://seller.example")?;
    let buyers = [origin("https://dsp-1.example")?, origin("https://dsp-2.example")?, origin("https://dsp-3.example")?];
    let limited = origin("https://limited.example")?;
    let bid_dist = lognormal_dist(5.0, 2.0).ok_or("invalid bid distribution")?;

    let mut world = World::new(ctx);
    let mut rng = seeded_rng(world.seed(), 1);
    let mut all_buyers: Vec<&crate::origin::Origin> = buyers.iter().collect();
    all_buyers.push(&limited);
    let mut config = auction(&seller, "decision_logic.js", &all_buyers)?;
    config.per_buyer_group_limits = PerBuyer::new().with_entry(limited.clone(), GROUP_LIMIT);

    let mut checks = Checks::new();
    for round in 0..AUCTIONS {
        for buyer in &buyers {
            let mut g = group(buyer, "main", "bidding_logic_currency.js")?;
            g.user_bidding_signals = Some(json!({ "bid": bid_dist.sample(&mut rng) }));
            world.browser.join(g);
        }
        let mut muted = group(&buyers[0], "muted", "bidding_logic_currency.js")?;
        muted.priority = -1.0;
        muted.user_bidding_signals = Some(json!({ "bid": 1000.0 }));
        world.browser.join(muted);
        for (name, priority) in [("gold", 3.0), ("silver", 2.0), ("bronze", 1.0)] {
            let mut g = group(&limited, name, "bidding_logic_currency.js")?;
            g.priority = priority;
            g.user_bidding_signals = Some(json!({ "bid": bid_dist.sample(&mut rng) }));
            world.browser.join(g);
        }

        let outcome = world.run_auction(&config, logger)?;
        let mut bids: Vec<f64> = outcome.candidates.iter().map(|c| c.offered_bid).collect();
        bids.sort_by(|a, b| b.total_cmp(a));
        let winner = outcome.winner.as_ref();
        checks.check(
            logger,
            winner.map(|w| w.bid) == bids.first().copied(),
            format!("Auction {}: highest bid wins: {:?} of {:?}", round, winner.map(|w| w.bid), bids),
        );
        checks.check(
            logger,
            winner.map(|w| w.highest_scoring_other_bid) == bids.get(1).copied(),
            format!("Auction {}: highestScoringOtherBid is the runner-up: {:?}", round, winner.map(|w| w.highest_scoring_other_bid)),
        );
        let limited_names: Vec<&str> = outcome.candidates.iter().filter(|c| c.owner == limited).map(|c| c.group_name.as_str()).collect();
        checks.check(
            logger,
            limited_names.len() == GROUP_LIMIT && !limited_names.contains(&"bronze"),
            format!("Auction {}: only the top {} groups of the limited buyer bid: {:?}", round, GROUP_LIMIT, limited_names),
        );
        checks.check(
            logger,
            outcome.candidates.iter().all(|c| c.group_name != "muted"),
            format!("Auction {}: the negative-priority group never bids", round),
        );
        world.browser.advance(Duration::from_secs(30));
    }
    logln!(logger, LogEvent::Scenario, "");
    checks.finish(ctx.name)
}
