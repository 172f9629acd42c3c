//! Auction coordinator.
//!
//! Drives every bid through `NotBid -> Bid -> Scored -> Won|Lost`: runs the
//! buyers' generateBid concurrently through the worklet host, validates the
//! bids, has the seller score them, picks a winner (per component auction and
//! then at the top level), and finally runs reporting, debug reports and
//! private aggregation for everyone involved.

use crate::auction_config::AuctionConfig;
use crate::bid::{validate_output, BidRules, GenerateBidOutput, ValidatedBid};
use crate::browser_signals::{
    AuctionNesting, BidBrowserSignals, RenderUrlField, ReportResultBrowserSignals, ReportWinBrowserSignals, ScoreBrowserSignals,
    DEFAULT_MULTI_BID_LIMIT,
};
use crate::browser_state::BrowserState;
use crate::config::HostConfig;
use crate::currency::{check_currency, Currency};
use crate::errors::{ContractResult, WorkletError, WorkletResult};
use crate::host::{Invocation, WorkletHost};
use crate::interest_group::{ExecutionMode, InterestGroup};
use crate::logger::{LogEvent, Logger};
use crate::origin::Origin;
use crate::reporting::{
    substitute_debug_macros, AggregationEvent, AggregationOutcome, Contribution, DebugReportContext, Phase, RealTimeContribution,
    ReportEffects, ResolvedContribution,
};
use crate::resources::ResourceStore;
use crate::score::{judge_score, AdMetadata, ModifiedBid, RejectReason, ScoreAdOutput, ScoreRules, ScoreVerdict};
use crate::wasm_helper::WasmHelper;
use crate::worklet::{
    load_bidding_logic, load_decision_logic, BiddingLogic, DecisionLogic, GenerateBidArgs, ReportResultArgs, ReportWinArgs, ScoreAdArgs,
};
use crate::{errln, logln, warnln};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use url::Url;

/// Where a bid stands; groups that never bid have no candidate at all
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandidateState {
    /// Returned by generateBid and passed validation
    Bid,
    Scored { desirability: f64, bid_in_seller_currency: f64 },
    /// Eliminated by the seller or by a contract violation while scoring
    Rejected(RejectReason),
    Won { desirability: f64, bid_in_seller_currency: f64 },
    Lost { desirability: f64, bid_in_seller_currency: f64 },
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub group_index: usize,
    pub owner: Origin,
    pub group_name: String,
    /// Seller of the auction the bid was made in
    pub seller: Origin,
    pub bid: ValidatedBid,
    /// Bid and currency as offered to the scoring seller
    pub offered_bid: f64,
    pub offered_currency: Option<Currency>,
    pub modified_bid: Option<ModifiedBid>,
    pub bidding_duration: Duration,
    pub bidding_data_version: Option<u32>,
    pub scoring_data_version: Option<u32>,
    pub state: CandidateState,
}

impl Candidate {
    fn apply_verdict(&mut self, verdict: ScoreVerdict) {
        if self.state != CandidateState::Bid {
            return;
        }
        self.state = match verdict {
            ScoreVerdict::Accepted { desirability, bid_in_seller_currency, modified_bid } => {
                self.modified_bid = modified_bid;
                CandidateState::Scored { desirability, bid_in_seller_currency }
            }
            ScoreVerdict::Rejected(reason) => CandidateState::Rejected(reason),
        };
    }

    fn settle(&mut self, won: bool) {
        if let CandidateState::Scored { desirability, bid_in_seller_currency } = self.state {
            self.state = if won {
                CandidateState::Won { desirability, bid_in_seller_currency }
            } else {
                CandidateState::Lost { desirability, bid_in_seller_currency }
            };
        }
    }

    pub fn desirability(&self) -> Option<f64> {
        match self.state {
            CandidateState::Scored { desirability, .. } | CandidateState::Won { desirability, .. } | CandidateState::Lost { desirability, .. } => {
                Some(desirability)
            }
            _ => None,
        }
    }

    pub fn bid_in_seller_currency(&self) -> Option<f64> {
        match self.state {
            CandidateState::Scored { bid_in_seller_currency, .. }
            | CandidateState::Won { bid_in_seller_currency, .. }
            | CandidateState::Lost { bid_in_seller_currency, .. } => Some(bid_in_seller_currency),
            _ => None,
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self.state {
            CandidateState::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// What a component winner carries into the top-level auction
    fn forwarded_bid(&self) -> (f64, Option<Currency>) {
        match self.modified_bid {
            Some(modified) => (modified.bid, modified.bid_currency),
            None => (self.offered_bid, self.offered_currency),
        }
    }
}

/// The runner-up of one seller's auction
#[derive(Debug, Clone, PartialEq)]
struct OtherBid {
    bid: f64,
    currency: Option<Currency>,
    owner: Origin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Winner {
    pub owner: Origin,
    pub group_name: String,
    /// Seller of the auction the bid was made in
    pub seller: Origin,
    pub top_level_seller: Option<Origin>,
    pub render_url: Url,
    /// Resolved pixel size of the winning ad, when the bid named one
    pub render_size: Option<(u32, u32)>,
    pub bid: f64,
    pub bid_currency: Option<Currency>,
    pub desirability: f64,
    pub bid_in_seller_currency: f64,
    pub modified_bid: Option<ModifiedBid>,
    pub highest_scoring_other_bid: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentReport {
    pub origin: Origin,
    pub phase: Phase,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    pub origin: Origin,
    pub event: String,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantError {
    pub origin: Origin,
    pub phase: Phase,
    pub error: WorkletError,
}

/// Everything an auction produced
#[derive(Debug, Clone, Default)]
pub struct AuctionOutcome {
    pub winner: Option<Winner>,
    /// Every validated bid with its final state
    pub candidates: Vec<Candidate>,
    pub reports: Vec<SentReport>,
    pub beacons: Vec<Beacon>,
    pub debug_reports: Vec<Url>,
    pub private_aggregation: Vec<(Origin, ResolvedContribution)>,
    /// Contributions waiting for a custom event of the winning ad
    pub deferred_aggregation: Vec<(Origin, String, Contribution)>,
    pub real_time: Vec<(Origin, RealTimeContribution)>,
    pub errors: Vec<ParticipantError>,
    /// What the winner's seller returned from reportResult
    pub signals_for_winner: Option<Value>,
    /// `sellerSignals` as handed to the winner's reportWin
    pub report_win_seller_signals: Option<Value>,
}

impl AuctionOutcome {
    pub fn errors_in(&self, phase: Phase) -> impl Iterator<Item = &ParticipantError> {
        self.errors.iter().filter(move |e| e.phase == phase)
    }

    pub fn reports_from(&self, origin: &Origin) -> impl Iterator<Item = &SentReport> + '_ {
        let origin = origin.clone();
        self.reports.iter().filter(move |r| r.origin == origin)
    }
}

struct BiddingContext {
    url: Url,
    logic: Option<Box<dyn BiddingLogic>>,
}

impl BiddingContext {
    fn new(url: Url) -> Self {
        Self { url, logic: None }
    }

    fn logic(&mut self) -> WorkletResult<&mut (dyn BiddingLogic + 'static)> {
        if self.logic.is_none() {
            self.logic = Some(load_bidding_logic(&self.url)?);
        }
        self.logic.as_deref_mut().ok_or_else(|| WorkletError::UnknownScript(self.url.to_string()))
    }
}

struct DecisionContext {
    url: Url,
    logic: Option<Box<dyn DecisionLogic>>,
}

impl DecisionContext {
    fn new(url: Url) -> Self {
        Self { url, logic: None }
    }

    fn logic(&mut self) -> WorkletResult<&mut (dyn DecisionLogic + 'static)> {
        if self.logic.is_none() {
            self.logic = Some(load_decision_logic(&self.url)?);
        }
        self.logic.as_deref_mut().ok_or_else(|| WorkletError::UnknownScript(self.url.to_string()))
    }
}

/// One seller's auction: a component auction, a single-seller auction, or
/// the top level of a multi-tier auction
struct SellerRound {
    config: AuctionConfig,
    /// How this seller's auction is seen by its bidders
    nesting: AuctionNesting,
    top_level: bool,
    candidates: Vec<Candidate>,
    /// Top level only: (component round, candidate) each candidate came from
    sources: Vec<(usize, usize)>,
    bidder_effects: Vec<(usize, Origin, ReportEffects)>,
    seller_effects: Vec<(usize, ReportEffects)>,
    winner: Option<usize>,
    highest_other: Option<OtherBid>,
}

impl SellerRound {
    fn new(config: AuctionConfig, nesting: AuctionNesting, top_level: bool) -> Self {
        Self {
            config,
            nesting,
            top_level,
            candidates: Vec::new(),
            sources: Vec::new(),
            bidder_effects: Vec::new(),
            seller_effects: Vec::new(),
            winner: None,
            highest_other: None,
        }
    }

    /// Nesting shown to the seller when scoring `candidate`
    fn scoring_nesting(&self, candidate: &Candidate) -> AuctionNesting {
        if self.top_level {
            AuctionNesting::TopLevel { component_seller: candidate.seller.clone() }
        } else {
            self.nesting.clone()
        }
    }

    /// Highest desirability wins; ties are broken uniformly at random
    fn pick_winner(&mut self, rng: &mut StdRng) {
        self.winner = pick_best(&self.candidates, None, rng);
        self.highest_other = self.winner.and_then(|winner| {
            let other = pick_best(&self.candidates, Some(winner), rng)?;
            let candidate = &self.candidates[other];
            let bid = match self.config.seller_currency {
                Some(_) => candidate.bid_in_seller_currency().unwrap_or(candidate.offered_bid),
                None => candidate.offered_bid,
            };
            Some(OtherBid {
                bid,
                currency: self.config.seller_currency.or(candidate.offered_currency),
                owner: candidate.owner.clone(),
            })
        });
    }

    fn winning_bid(&self) -> f64 {
        self.winner.map(|w| self.candidates[w].offered_bid).unwrap_or(0.0)
    }

    fn winning_owner(&self) -> Option<&Origin> {
        self.winner.map(|w| &self.candidates[w].owner)
    }
}

fn pick_best(candidates: &[Candidate], exclude: Option<usize>, rng: &mut StdRng) -> Option<usize> {
    let scored = candidates.iter().enumerate().filter(|(i, _)| Some(*i) != exclude).filter_map(|(i, c)| c.desirability().map(|d| (i, d)));
    let mut best: Vec<usize> = Vec::new();
    let mut best_score = f64::NEG_INFINITY;
    for (index, desirability) in scored {
        match desirability.partial_cmp(&best_score) {
            Some(Ordering::Greater) => {
                best_score = desirability;
                best.clear();
                best.push(index);
            }
            Some(Ordering::Equal) => best.push(index),
            _ => {}
        }
    }
    match best.len() {
        0 => None,
        1 => Some(best[0]),
        n => Some(best[rng.gen_range(0..n)]),
    }
}

struct BidJob {
    group_index: usize,
    args: GenerateBidArgs,
}

/// Final winner: round index and candidate index in that round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WinnerRef {
    round: usize,
    candidate: usize,
}

pub struct AuctionRunner<'a> {
    config: &'a HostConfig,
    resources: &'a ResourceStore,
    host: &'a WorkletHost,
}

impl<'a> AuctionRunner<'a> {
    pub fn new(config: &'a HostConfig, resources: &'a ResourceStore, host: &'a WorkletHost) -> Self {
        Self { config, resources, host }
    }

    /// Run one complete auction, including reporting, and update the browser state
    pub fn run(&self, browser: &mut BrowserState, auction: &AuctionConfig, rng: &mut StdRng, logger: &mut Logger) -> ContractResult<AuctionOutcome> {
        auction.validate()?;
        let mut outcome = AuctionOutcome::default();
        let mut rounds: Vec<SellerRound> = Vec::new();

        if auction.is_multi_tier() {
            for component in &auction.component_auctions {
                let nesting = AuctionNesting::Component { top_level_seller: auction.seller.clone() };
                let round = self.run_seller_round(browser, component.clone(), nesting, rng, logger, &mut outcome);
                rounds.push(round);
            }
            let mut top = SellerRound::new(auction.clone(), AuctionNesting::SingleSeller, true);
            self.collect_component_winners(&rounds, &mut top, logger, &mut outcome);
            self.score_round(browser, &mut top, logger, &mut outcome);
            top.pick_winner(rng);
            rounds.push(top);
        } else {
            let round = self.run_seller_round(browser, auction.clone(), AuctionNesting::SingleSeller, rng, logger, &mut outcome);
            rounds.push(round);
        }

        let winner = final_winner(&rounds);
        settle(&mut rounds, winner);
        if let Some(winner) = winner {
            outcome.winner = Some(describe_winner(&rounds, winner));
            if let Some(w) = &outcome.winner {
                logln!(logger, LogEvent::Auction, "winner {} '{}' bid {} desirability {} via {}", w.owner, w.group_name, w.bid, w.desirability, w.seller);
                if let Some((width, height)) = w.render_size {
                    logln!(logger, LogEvent::Auction, "winning ad size {}x{}", width, height);
                }
            }
            self.run_reporting(&rounds, winner, browser, logger, &mut outcome);
        } else {
            logln!(logger, LogEvent::Auction, "no winner");
        }

        self.emit_debug_reports(&rounds, winner, browser, rng, logger, &mut outcome);
        resolve_aggregation(&rounds, winner, &mut outcome);
        collect_real_time(&rounds, &mut outcome);

        if let Some(winner) = winner {
            let (round, index) = origin_of(&rounds, winner);
            let candidate = &rounds[round].candidates[index];
            let metadata = browser
                .stored(candidate.group_index)
                .and_then(|g| g.group.find_ad(candidate.bid.bid.render.url()))
                .and_then(|ad| ad.metadata.clone());
            browser.record_win(candidate.group_index, candidate.bid.bid.render.url(), metadata.as_ref());
        }

        for round in rounds.into_iter().filter(|r| !r.top_level) {
            outcome.candidates.extend(round.candidates);
        }
        Ok(outcome)
    }

    fn run_seller_round(
        &self,
        browser: &mut BrowserState,
        config: AuctionConfig,
        nesting: AuctionNesting,
        rng: &mut StdRng,
        logger: &mut Logger,
        outcome: &mut AuctionOutcome,
    ) -> SellerRound {
        let mut round = SellerRound::new(config, nesting, false);
        self.generate_bids(browser, &mut round, logger, outcome);
        self.score_round(browser, &mut round, logger, outcome);
        round.pick_winner(rng);
        round
    }

    /// Groups allowed to bid for `buyer`, best priority first
    fn prioritized_groups(&self, browser: &BrowserState, config: &AuctionConfig, buyer: &Origin, logger: &mut Logger) -> Vec<usize> {
        let mut signals: BTreeMap<String, f64> = config.per_buyer_priority_signals.wildcard().cloned().unwrap_or_default();
        if let Some(exact) = config.per_buyer_priority_signals.exact(buyer) {
            signals.extend(exact.iter().map(|(k, v)| (k.clone(), *v)));
        }
        let mut ranked: Vec<(usize, f64)> = Vec::new();
        for index in browser.bidding_groups(buyer) {
            let Some(stored) = browser.stored(index) else { continue };
            let priority = stored.group.effective_priority(&signals);
            if priority < 0.0 {
                logln!(logger, LogEvent::Auction, "{} '{}' filtered out with priority {}", buyer, stored.group.name, priority);
                continue;
            }
            ranked.push((index, priority));
        }
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        if let Some(limit) = config.per_buyer_group_limits.lookup(buyer) {
            ranked.truncate(*limit);
        }
        ranked.into_iter().map(|(index, _)| index).collect()
    }

    fn wasm_helper(&self, group: &InterestGroup) -> WorkletResult<Option<WasmHelper>> {
        let Some(url) = &group.bidding_wasm_helper_url else {
            return Ok(None);
        };
        let bytes = self.resources.wasm_module(url).ok_or_else(|| WorkletError::Wasm(format!("no module served at {}", url)))?;
        WasmHelper::compile(bytes, self.config.wasm_fuel).map(Some)
    }

    fn bid_job(&self, browser: &BrowserState, round: &SellerRound, index: usize) -> WorkletResult<Option<BidJob>> {
        let Some(stored) = browser.stored(index) else { return Ok(None) };
        let config = &round.config;
        let owner = &stored.group.owner;
        let trusted = self.resources.bidding_signals(&stored.group);
        let mut signals = BidBrowserSignals::new(self.config.top_window_hostname.clone(), config.seller.clone());
        signals.nesting = round.nesting.clone();
        signals.requested_size = config.requested_size;
        signals.join_count = stored.join_count;
        signals.bid_count = stored.bid_count;
        signals.recency = browser.recency_ms(index);
        signals.prev_wins = browser.prev_wins(index);
        signals.multi_bid_limit = config.per_buyer_multi_bid_limits.lookup(owner).copied().unwrap_or(DEFAULT_MULTI_BID_LIMIT);
        signals.for_debugging_only_in_cooldown_or_lockout = browser.debug_suppressed(owner);
        signals.data_version = trusted.as_ref().and_then(|t| t.data_version);
        signals.wasm_helper = self.wasm_helper(&stored.group)?;
        let args = GenerateBidArgs {
            interest_group: stored.group.clone(),
            auction_signals: config.auction_signals.clone(),
            per_buyer_signals: config.per_buyer_signals.lookup(owner).cloned(),
            trusted_bidding_signals: trusted.map(|t| t.value),
            browser_signals: signals,
            direct_from_seller_signals: config.direct_from_seller_signals.as_ref().map(|b| b.for_buyer(owner)).unwrap_or_default(),
        };
        Ok(Some(BidJob { group_index: index, args }))
    }

    fn generate_bids(&self, browser: &mut BrowserState, round: &mut SellerRound, logger: &mut Logger, outcome: &mut AuctionOutcome) {
        let config = round.config.clone();
        let mut batches: Vec<(Origin, Url, Vec<BidJob>)> = Vec::new();
        for buyer in config.buyers() {
            for index in self.prioritized_groups(browser, &config, buyer, logger) {
                let job = match self.bid_job(browser, round, index) {
                    Ok(Some(job)) => job,
                    Ok(None) => continue,
                    Err(error) => {
                        warnln!(logger, LogEvent::Auction, "{} cannot bid: {}", buyer, error);
                        outcome.errors.push(ParticipantError { origin: buyer.clone(), phase: Phase::GenerateBid, error });
                        continue;
                    }
                };
                let group = &job.args.interest_group;
                let Some(url) = group.bidding_logic_url.clone() else { continue };
                let shared = group.execution_mode == ExecutionMode::GroupByOrigin;
                let existing = batches.iter_mut().find(|(owner, batch_url, jobs)| {
                    shared
                        && owner == buyer
                        && batch_url == &url
                        && jobs.first().map(|j| j.args.interest_group.execution_mode) == Some(ExecutionMode::GroupByOrigin)
                });
                match existing {
                    Some((_, _, jobs)) => jobs.push(job),
                    None => batches.push((buyer.clone(), url, vec![job])),
                }
            }
        }

        let started = Instant::now();
        let mut pending = Vec::with_capacity(batches.len());
        for (owner, url, jobs) in batches {
            let timeout = self.config.buyer_timeout(config.per_buyer_timeouts.lookup(&owner).copied());
            let items: Vec<GenerateBidArgs> = jobs.iter().map(|j| j.args.clone()).collect();
            let batch = self.host.spawn_batch(Phase::GenerateBid, timeout, BiddingContext::new(url), items, |ctx, args, scope| {
                ctx.logic()?.generate_bid(&args, scope)
            });
            let deadline = config.per_buyer_cumulative_timeouts.lookup(&owner).map(|ms| started + Duration::from_millis(*ms));
            pending.push((owner, jobs, batch, deadline));
        }

        for (owner, jobs, batch, deadline) in pending {
            let invocations = batch.wait(deadline);
            for (job, invocation) in jobs.into_iter().zip(invocations) {
                self.accept_bids(browser, round, &owner, job, invocation, logger, outcome);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn accept_bids(
        &self,
        browser: &mut BrowserState,
        round: &mut SellerRound,
        owner: &Origin,
        job: BidJob,
        invocation: Invocation<GenerateBidOutput>,
        logger: &mut Logger,
        outcome: &mut AuctionOutcome,
    ) {
        forward_console(logger, owner, Phase::GenerateBid, &invocation.effects);
        round.bidder_effects.push((job.group_index, owner.clone(), invocation.effects));
        let group = &job.args.interest_group;
        let output = match invocation.result {
            Ok(output) => output,
            Err(error) => {
                warnln!(logger, LogEvent::Auction, "{} '{}' generateBid: {}", owner, group.name, error);
                outcome.errors.push(ParticipantError { origin: owner.clone(), phase: Phase::GenerateBid, error });
                return;
            }
        };
        let rules = BidRules {
            group,
            signals: &job.args.browser_signals,
            required_currency: round.config.per_buyer_currencies.lookup(owner).copied(),
            screen: self.config.screen(),
        };
        let bids = match validate_output(&output, &rules) {
            Ok(bids) => bids,
            Err(error) => {
                warnln!(logger, LogEvent::Auction, "{} '{}' bid rejected: {}", owner, group.name, error);
                outcome.errors.push(ParticipantError { origin: owner.clone(), phase: Phase::GenerateBid, error: error.into() });
                return;
            }
        };
        if bids.is_empty() {
            logln!(logger, LogEvent::Auction, "{} '{}' did not bid", owner, group.name);
            return;
        }
        browser.record_bid(job.group_index);
        for bid in bids {
            logln!(
                logger,
                LogEvent::Auction,
                "{} '{}' bids {} {} on {}",
                owner,
                group.name,
                bid.bid.bid,
                crate::currency::currency_label(bid.bid.bid_currency),
                bid.render_url
            );
            round.candidates.push(Candidate {
                group_index: job.group_index,
                owner: owner.clone(),
                group_name: group.name.clone(),
                seller: round.config.seller.clone(),
                offered_bid: bid.bid.bid,
                offered_currency: bid.bid.bid_currency,
                bid,
                modified_bid: None,
                bidding_duration: invocation.elapsed,
                bidding_data_version: job.args.browser_signals.data_version,
                scoring_data_version: None,
                state: CandidateState::Bid,
            });
        }
    }

    /// Top-level candidates are the component winners, as modified by their seller
    fn collect_component_winners(&self, rounds: &[SellerRound], top: &mut SellerRound, logger: &mut Logger, outcome: &mut AuctionOutcome) {
        for (round_index, round) in rounds.iter().enumerate() {
            let Some(winner) = round.winner else { continue };
            let mut candidate = round.candidates[winner].clone();
            let (bid, currency) = candidate.forwarded_bid();
            let required = top.config.per_buyer_currencies.lookup(&round.config.seller).copied();
            if let Err(error) = check_currency(required, currency) {
                warnln!(logger, LogEvent::Auction, "component winner of {} dropped: {}", round.config.seller, error);
                outcome.errors.push(ParticipantError { origin: round.config.seller.clone(), phase: Phase::ScoreAd, error: error.into() });
                continue;
            }
            candidate.offered_bid = bid;
            candidate.offered_currency = currency;
            candidate.modified_bid = None;
            candidate.scoring_data_version = None;
            candidate.state = CandidateState::Bid;
            top.candidates.push(candidate);
            top.sources.push((round_index, winner));
        }
    }

    fn score_args(&self, browser: &BrowserState, round: &SellerRound, candidate: &Candidate) -> ScoreAdArgs {
        let config = &round.config;
        let trusted = self.resources.scoring_signals(config.trusted_scoring_signals_url.as_ref(), &candidate.bid.render_url, &candidate.bid.ad_components);
        ScoreAdArgs {
            ad_metadata: AdMetadata::new(candidate.bid.render_url.clone(), candidate.bid.bid.ad.clone()),
            bid: candidate.offered_bid,
            auction_config: config.clone(),
            browser_signals: ScoreBrowserSignals {
                top_window_hostname: self.config.top_window_hostname.clone(),
                interest_group_owner: candidate.owner.clone(),
                render_url: RenderUrlField(candidate.bid.render_url.clone()),
                ad_components: candidate.bid.ad_components.clone(),
                bidding_duration_msec: candidate.bidding_duration.as_millis() as u64,
                bid_currency: candidate.offered_currency,
                nesting: round.scoring_nesting(candidate),
                data_version: trusted.as_ref().and_then(|t| t.data_version),
                for_debugging_only_in_cooldown_or_lockout: browser.debug_suppressed(&config.seller),
            },
            trusted_scoring_signals: trusted.map(|t| t.value),
            direct_from_seller_signals: config.direct_from_seller_signals.as_ref().map(|b| b.for_seller()).unwrap_or_default(),
        }
    }

    fn score_round(&self, browser: &BrowserState, round: &mut SellerRound, logger: &mut Logger, outcome: &mut AuctionOutcome) {
        if round.candidates.is_empty() {
            return;
        }
        let items: Vec<ScoreAdArgs> = {
            let view: &SellerRound = round;
            view.candidates.iter().map(|c| self.score_args(browser, view, c)).collect()
        };
        let data_versions: Vec<Option<u32>> = items.iter().map(|a| a.browser_signals.data_version).collect();
        let timeout = self.config.seller_timeout(round.config.seller_timeout);
        let context = DecisionContext::new(round.config.decision_logic_url.clone());
        let batch = self.host.spawn_batch(Phase::ScoreAd, timeout, context, items, |ctx, args, scope| ctx.logic()?.score_ad(&args, scope));
        let seller = round.config.seller.clone();
        let rules_base = ScoreRules {
            bid: 0.0,
            bid_currency: None,
            seller_currency: round.config.seller_currency,
            component_seller: round.nesting.is_component(),
        };
        for (index, invocation) in batch.wait(None).into_iter().enumerate() {
            forward_console(logger, &seller, Phase::ScoreAd, &invocation.effects);
            round.seller_effects.push((index, invocation.effects));
            let candidate = &mut round.candidates[index];
            candidate.scoring_data_version = data_versions[index];
            let rules = ScoreRules { bid: candidate.offered_bid, bid_currency: candidate.offered_currency, ..rules_base };
            let verdict = match invocation.result.and_then(|output: ScoreAdOutput| judge_score(&output, &rules).map_err(WorkletError::from)) {
                Ok(verdict) => verdict,
                Err(error) => {
                    errln!(logger, LogEvent::Auction, "{} scoreAd for {} '{}': {}", seller, candidate.owner, candidate.group_name, error);
                    let reason = match error {
                        WorkletError::Contract(_) => RejectReason::InvalidBid,
                        _ => RejectReason::NotAvailable,
                    };
                    outcome.errors.push(ParticipantError { origin: seller.clone(), phase: Phase::ScoreAd, error });
                    ScoreVerdict::Rejected(reason)
                }
            };
            logln!(logger, LogEvent::Auction, "{} scores {} '{}': {:?}", seller, candidate.owner, candidate.group_name, verdict);
            candidate.apply_verdict(verdict);
        }
    }

    fn run_reporting(&self, rounds: &[SellerRound], winner: WinnerRef, browser: &BrowserState, logger: &mut Logger, outcome: &mut AuctionOutcome) {
        let (bid_round_index, bid_index) = origin_of(rounds, winner);
        let bid_round = &rounds[bid_round_index];
        let candidate = &bid_round.candidates[bid_index];

        if winner.round != bid_round_index {
            let top = &rounds[winner.round];
            let top_candidate = &top.candidates[winner.candidate];
            let args = self.report_result_args(top, top_candidate, None);
            self.report_result(top, args, logger, outcome);
        }

        let args = self.report_result_args(bid_round, candidate, candidate.modified_bid.map(|m| m.bid));
        let signals_for_winner = self.report_result(bid_round, args, logger, outcome);
        outcome.signals_for_winner = signals_for_winner.clone();

        let config = &bid_round.config;
        let Some(stored) = browser.stored(candidate.group_index) else { return };
        let Some(bidding_url) = stored.group.bidding_logic_url.clone() else { return };
        let other = bid_round.highest_other.as_ref();
        let ad = stored.group.find_ad(candidate.bid.bid.render.url());
        let args = ReportWinArgs {
            auction_signals: config.auction_signals.clone(),
            per_buyer_signals: config.per_buyer_signals.lookup(&candidate.owner).cloned(),
            seller_signals: signals_for_winner,
            browser_signals: ReportWinBrowserSignals {
                top_window_hostname: self.config.top_window_hostname.clone(),
                interest_group_owner: candidate.owner.clone(),
                interest_group_name: candidate.group_name.clone(),
                render_url: RenderUrlField(candidate.bid.render_url.clone()),
                bid: candidate.bid.bid.bid,
                bid_currency: candidate.bid.bid.bid_currency,
                highest_scoring_other_bid: other.map(|o| o.bid).unwrap_or(0.0),
                highest_scoring_other_bid_currency: other.and_then(|o| o.currency),
                made_highest_scoring_other_bid: other.map(|o| o.owner == candidate.owner).unwrap_or(false),
                ad_cost: candidate.bid.bid.ad_cost,
                seller: config.seller.clone(),
                nesting: bid_round.nesting.clone(),
                modeling_signals: candidate.bid.modeling_signals,
                join_count: stored.join_count,
                recency: browser.recency_ms(candidate.group_index),
                buyer_reporting_id: ad.and_then(|a| a.buyer_reporting_id.clone()),
                data_version: candidate.bidding_data_version,
                reporting_timeout: self.config.reporting_timeout(config.reporting_timeout).as_millis() as u64,
            },
            direct_from_seller_signals: config.direct_from_seller_signals.as_ref().map(|b| b.for_buyer(&candidate.owner)).unwrap_or_default(),
        };
        outcome.report_win_seller_signals = args.seller_signals.clone();
        let timeout = self.config.reporting_timeout(config.reporting_timeout);
        let owner = candidate.owner.clone();
        let invocation = self.host.run(Phase::ReportWin, timeout, BiddingContext::new(bidding_url), move |ctx, scope| {
            ctx.logic()?.report_win(&args, scope)
        });
        self.collect_report_effects(&owner, Phase::ReportWin, invocation.effects, logger, outcome);
        if let Err(error) = invocation.result {
            warnln!(logger, LogEvent::Report, "{} reportWin: {}", owner, error);
            outcome.errors.push(ParticipantError { origin: owner, phase: Phase::ReportWin, error });
        }
    }

    fn report_result_args(&self, round: &SellerRound, candidate: &Candidate, modified_bid: Option<f64>) -> ReportResultArgs {
        let config = &round.config;
        let other = round.highest_other.as_ref();
        ReportResultArgs {
            auction_config: config.clone(),
            browser_signals: ReportResultBrowserSignals {
                top_window_hostname: self.config.top_window_hostname.clone(),
                interest_group_owner: candidate.owner.clone(),
                render_url: RenderUrlField(candidate.bid.render_url.clone()),
                bid: candidate.offered_bid,
                bid_currency: candidate.offered_currency,
                desirability: candidate.desirability().unwrap_or(0.0),
                highest_scoring_other_bid: other.map(|o| o.bid).unwrap_or(0.0),
                highest_scoring_other_bid_currency: other.and_then(|o| o.currency),
                nesting: round.scoring_nesting(candidate),
                modified_bid,
                buyer_and_seller_reporting_id: None,
                data_version: candidate.scoring_data_version,
                reporting_timeout: self.config.reporting_timeout(config.reporting_timeout).as_millis() as u64,
            },
            direct_from_seller_signals: config.direct_from_seller_signals.as_ref().map(|b| b.for_seller()).unwrap_or_default(),
        }
    }

    fn report_result(&self, round: &SellerRound, args: ReportResultArgs, logger: &mut Logger, outcome: &mut AuctionOutcome) -> Option<Value> {
        let seller = round.config.seller.clone();
        let timeout = self.config.reporting_timeout(round.config.reporting_timeout);
        let context = DecisionContext::new(round.config.decision_logic_url.clone());
        let invocation = self.host.run(Phase::ReportResult, timeout, context, move |ctx, scope| ctx.logic()?.report_result(&args, scope));
        self.collect_report_effects(&seller, Phase::ReportResult, invocation.effects, logger, outcome);
        match invocation.result {
            Ok(signals) => signals,
            Err(error) => {
                warnln!(logger, LogEvent::Report, "{} reportResult: {}", seller, error);
                outcome.errors.push(ParticipantError { origin: seller, phase: Phase::ReportResult, error });
                None
            }
        }
    }

    fn collect_report_effects(&self, origin: &Origin, phase: Phase, effects: ReportEffects, logger: &mut Logger, outcome: &mut AuctionOutcome) {
        forward_console(logger, origin, phase, &effects);
        if let Some(url) = effects.report_url {
            logln!(logger, LogEvent::Report, "{} {} sends report to {}", origin, phase.name(), url);
            outcome.reports.push(SentReport { origin: origin.clone(), phase, url });
        }
        for (event, url) in effects.ad_beacons {
            logln!(logger, LogEvent::Report, "{} registers beacon '{}' -> {}", origin, event, url);
            outcome.beacons.push(Beacon { origin: origin.clone(), event, url });
        }
        let won = AggregationOutcome { won: true, ..AggregationOutcome::default() };
        for pending in effects.private_aggregation {
            match &pending.event {
                AggregationEvent::Custom(name) => outcome.deferred_aggregation.push((origin.clone(), name.clone(), pending.contribution)),
                _ => {
                    if let Some(resolved) = pending.resolve(&won) {
                        outcome.private_aggregation.push((origin.clone(), resolved));
                    }
                }
            }
        }
    }

    fn emit_debug_reports(
        &self,
        rounds: &[SellerRound],
        winner: Option<WinnerRef>,
        browser: &mut BrowserState,
        rng: &mut StdRng,
        logger: &mut Logger,
        outcome: &mut AuctionOutcome,
    ) {
        let winning_owner = winner.map(|w| rounds[w.round].candidates[w.candidate].owner.clone());
        let winning_source = winner.map(|w| origin_of(rounds, w));
        let top_winning_bid = winner.filter(|w| rounds[w.round].top_level).map(|w| rounds[w.round].candidates[w.candidate].offered_bid);
        let mut queued: Vec<(Origin, Url, DebugReportContext)> = Vec::new();

        for (round_index, round) in rounds.iter().enumerate() {
            let other = round.highest_other.as_ref();
            let base = DebugReportContext {
                winning_bid: round.winning_bid(),
                highest_scoring_other_bid: other.map(|o| o.bid).unwrap_or(0.0),
                top_level_winning_bid: if round.nesting.is_component() { Some(top_winning_bid.unwrap_or(0.0)) } else { None },
                ..DebugReportContext::default()
            };
            for (group_index, owner, effects) in &round.bidder_effects {
                let mine: Vec<(usize, &Candidate)> = round.candidates.iter().enumerate().filter(|(_, c)| c.group_index == *group_index).collect();
                let won = mine.iter().any(|(i, _)| winning_source == Some((round_index, *i)));
                let context = DebugReportContext {
                    made_winning_bid: round.winning_owner() == Some(owner),
                    made_highest_scoring_other_bid: other.map(|o| &o.owner == owner).unwrap_or(false),
                    top_level_made_winning_bid: base.top_level_winning_bid.map(|_| winning_owner.as_ref() == Some(owner)),
                    reject_reason: mine.iter().find_map(|(_, c)| c.reject_reason()),
                    ..base
                };
                let url = if won { &effects.debug_win_url } else { &effects.debug_loss_url };
                if let Some(url) = url {
                    queued.push((owner.clone(), url.clone(), context));
                }
            }
            for (index, effects) in &round.seller_effects {
                let won = is_winner(winner, winning_source, round_index, *index);
                let context = DebugReportContext { reject_reason: round.candidates[*index].reject_reason(), ..base };
                let url = if won { &effects.debug_win_url } else { &effects.debug_loss_url };
                if let Some(url) = url {
                    queued.push((round.config.seller.clone(), url.clone(), context));
                }
            }
        }

        let mut sent_any = false;
        for (origin, url, context) in queued {
            if browser.debug_suppressed(&origin) {
                logln!(logger, LogEvent::Report, "debug report from {} suppressed", origin);
                continue;
            }
            if rng.gen::<f64>() >= self.config.debug_report_sampling_rate {
                browser.add_debug_cooldown(origin, self.config.debug_cooldown());
                continue;
            }
            match substitute_debug_macros(&url, &context) {
                Ok(url) => {
                    logln!(logger, LogEvent::Report, "{} debug report {}", origin, url);
                    outcome.debug_reports.push(url);
                    sent_any = true;
                }
                Err(error) => warnln!(logger, LogEvent::Report, "{} debug report dropped: {}", origin, error),
            }
        }
        if sent_any && self.config.debug_lockout_after_report {
            browser.set_debug_lockout(self.config.debug_lockout());
        }
    }
}

/// Round and candidate index where the bid was originally made
fn origin_of(rounds: &[SellerRound], winner: WinnerRef) -> (usize, usize) {
    let round = &rounds[winner.round];
    if round.top_level {
        round.sources.get(winner.candidate).copied().unwrap_or((winner.round, winner.candidate))
    } else {
        (winner.round, winner.candidate)
    }
}

fn final_winner(rounds: &[SellerRound]) -> Option<WinnerRef> {
    let round = rounds.len().checked_sub(1)?;
    rounds[round].winner.map(|candidate| WinnerRef { round, candidate })
}

/// True for the final winner and, in a multi-tier auction, for the component bid it was forwarded from
fn is_winner(winner: Option<WinnerRef>, source: Option<(usize, usize)>, round: usize, candidate: usize) -> bool {
    source == Some((round, candidate)) || winner == Some(WinnerRef { round, candidate })
}

fn settle(rounds: &mut [SellerRound], winner: Option<WinnerRef>) {
    let source = winner.map(|w| origin_of(rounds, w));
    for (round_index, round) in rounds.iter_mut().enumerate() {
        for (index, candidate) in round.candidates.iter_mut().enumerate() {
            candidate.settle(is_winner(winner, source, round_index, index));
        }
    }
}

fn describe_winner(rounds: &[SellerRound], winner: WinnerRef) -> Winner {
    let (round_index, index) = origin_of(rounds, winner);
    let round = &rounds[round_index];
    let candidate = &round.candidates[index];
    let final_round = &rounds[winner.round];
    let final_candidate = &final_round.candidates[winner.candidate];
    Winner {
        owner: candidate.owner.clone(),
        group_name: candidate.group_name.clone(),
        seller: round.config.seller.clone(),
        top_level_seller: round.nesting.top_level_seller().cloned(),
        render_url: candidate.bid.render_url.clone(),
        render_size: candidate.bid.render_size,
        bid: candidate.bid.bid.bid,
        bid_currency: candidate.bid.bid.bid_currency,
        desirability: final_candidate.desirability().unwrap_or(0.0),
        bid_in_seller_currency: final_candidate.bid_in_seller_currency().unwrap_or(final_candidate.offered_bid),
        modified_bid: candidate.modified_bid,
        highest_scoring_other_bid: final_round.highest_other.as_ref().map(|o| o.bid).unwrap_or(0.0),
    }
}

/// Resolve generateBid/scoreAd contributions against the auction result
fn resolve_aggregation(rounds: &[SellerRound], winner: Option<WinnerRef>, outcome: &mut AuctionOutcome) {
    let winning_source = winner.map(|w| origin_of(rounds, w));
    let winning_bid = winner.map(|w| rounds[w.round].candidates[w.candidate].offered_bid).unwrap_or(0.0);
    for (round_index, round) in rounds.iter().enumerate() {
        let highest_other = round.highest_other.as_ref().map(|o| o.bid).unwrap_or(0.0);
        for (group_index, owner, effects) in &round.bidder_effects {
            let mine: Vec<(usize, &Candidate)> = round.candidates.iter().enumerate().filter(|(_, c)| c.group_index == *group_index).collect();
            let result = AggregationOutcome {
                won: mine.iter().any(|(i, _)| winning_source == Some((round_index, *i))),
                winning_bid,
                highest_scoring_other_bid: highest_other,
                reject_reason: mine.iter().find_map(|(_, c)| c.reject_reason()),
            };
            push_contributions(owner, effects, &result, outcome);
        }
        for (index, effects) in &round.seller_effects {
            let result = AggregationOutcome {
                won: is_winner(winner, winning_source, round_index, *index),
                winning_bid,
                highest_scoring_other_bid: highest_other,
                reject_reason: round.candidates[*index].reject_reason(),
            };
            push_contributions(&round.config.seller, effects, &result, outcome);
        }
    }
}

fn push_contributions(origin: &Origin, effects: &ReportEffects, result: &AggregationOutcome, outcome: &mut AuctionOutcome) {
    for pending in &effects.private_aggregation {
        if let AggregationEvent::Custom(name) = &pending.event {
            if result.won {
                outcome.deferred_aggregation.push((origin.clone(), name.clone(), pending.contribution));
            }
        } else if let Some(resolved) = pending.resolve(result) {
            outcome.private_aggregation.push((origin.clone(), resolved));
        }
    }
}

fn collect_real_time(rounds: &[SellerRound], outcome: &mut AuctionOutcome) {
    for round in rounds {
        for (_, owner, effects) in &round.bidder_effects {
            outcome.real_time.extend(effects.real_time.iter().map(|c| (owner.clone(), *c)));
        }
        for (_, effects) in &round.seller_effects {
            outcome.real_time.extend(effects.real_time.iter().map(|c| (round.config.seller.clone(), *c)));
        }
    }
}

fn forward_console(logger: &mut Logger, origin: &Origin, phase: Phase, effects: &ReportEffects) {
    for line in &effects.console {
        logln!(logger, LogEvent::Worklet, "[{} {}] {}", origin, phase.name(), line);
    }
}
