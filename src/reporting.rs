//! Side-effect APIs available inside worklets and what they leave behind.
//!
//! A worklet only ever writes into its own `WorkletScope`. The host collects
//! the scope's `ReportEffects` when the invocation returns and drops them if
//! it times out.

use crate::errors::{ContractError, ContractResult};
use crate::origin::parse_https_url;
use crate::score::RejectReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// Beacon keys under `reserved.` that may be registered
pub const RESERVED_BEACON_EVENTS: [&str; 3] = ["reserved.top_navigation", "reserved.top_navigation_start", "reserved.top_navigation_commit"];
/// Exclusive upper bound of real-time reporting buckets
pub const REAL_TIME_BUCKETS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    GenerateBid,
    ScoreAd,
    ReportResult,
    ReportWin,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::GenerateBid => "generateBid",
            Phase::ScoreAd => "scoreAd",
            Phase::ReportResult => "reportResult",
            Phase::ReportWin => "reportWin",
        }
    }

    fn is_reporting(self) -> bool {
        matches!(self, Phase::ReportResult | Phase::ReportWin)
    }
}

/// Base value a private aggregation bucket or value can be derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalBase {
    WinningBid,
    HighestScoringOtherBid,
    BidRejectReason,
}

/// `{baseValue, scale, offset}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalValue {
    pub base_value: SignalBase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketSpec {
    Literal(u128),
    Signal(SignalValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Literal(u64),
    Signal(SignalValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub bucket: BucketSpec,
    pub value: ValueSpec,
}

impl Contribution {
    pub fn literal(bucket: u128, value: u64) -> Self {
        Self { bucket: BucketSpec::Literal(bucket), value: ValueSpec::Literal(value) }
    }

    fn validate(&self) -> ContractResult<()> {
        for signal in [self.bucket_signal(), self.value_signal()].into_iter().flatten() {
            if let Some(scale) = signal.scale {
                if !scale.is_finite() {
                    return Err(ContractError::malformed("privateAggregation", "scale must be finite"));
                }
            }
        }
        Ok(())
    }

    fn bucket_signal(&self) -> Option<SignalValue> {
        match self.bucket {
            BucketSpec::Signal(signal) => Some(signal),
            BucketSpec::Literal(_) => None,
        }
    }

    fn value_signal(&self) -> Option<SignalValue> {
        match self.value {
            ValueSpec::Signal(signal) => Some(signal),
            ValueSpec::Literal(_) => None,
        }
    }
}

/// When a contribution is reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationEvent {
    Always,
    Win,
    Loss,
    /// Kept for a later fenced-frame trigger, never resolved by the auction
    Custom(String),
}

impl AggregationEvent {
    pub fn parse(name: &str) -> ContractResult<Self> {
        match name {
            "reserved.always" => Ok(AggregationEvent::Always),
            "reserved.win" => Ok(AggregationEvent::Win),
            "reserved.loss" => Ok(AggregationEvent::Loss),
            other if other.starts_with("reserved.") => Err(ContractError::malformed("event", format!("unknown reserved event '{}'", other))),
            other => Ok(AggregationEvent::Custom(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingContribution {
    pub event: AggregationEvent,
    pub contribution: Contribution,
}

/// Auction outcome a pending contribution is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregationOutcome {
    pub won: bool,
    pub winning_bid: f64,
    pub highest_scoring_other_bid: f64,
    pub reject_reason: Option<RejectReason>,
}

/// A contribution as finally sent to the aggregation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedContribution {
    pub bucket: u128,
    pub value: u64,
}

impl PendingContribution {
    /// Resolve signal-based parts; None when the event does not apply
    pub fn resolve(&self, outcome: &AggregationOutcome) -> Option<ResolvedContribution> {
        match &self.event {
            AggregationEvent::Always => {}
            AggregationEvent::Win if outcome.won => {}
            AggregationEvent::Loss if !outcome.won => {}
            _ => return None,
        }
        let bucket = match self.contribution.bucket {
            BucketSpec::Literal(bucket) => bucket,
            BucketSpec::Signal(signal) => signal_amount(signal, outcome).max(0.0) as u128,
        };
        let value = match self.contribution.value {
            ValueSpec::Literal(value) => value,
            ValueSpec::Signal(signal) => signal_amount(signal, outcome).max(0.0) as u64,
        };
        Some(ResolvedContribution { bucket, value })
    }
}

fn signal_amount(signal: SignalValue, outcome: &AggregationOutcome) -> f64 {
    let base = match signal.base_value {
        SignalBase::WinningBid => outcome.winning_bid,
        SignalBase::HighestScoringOtherBid => outcome.highest_scoring_other_bid,
        SignalBase::BidRejectReason => outcome.reject_reason.map(|r| f64::from(r.index())).unwrap_or(0.0),
    };
    (base * signal.scale.unwrap_or(1.0)).trunc() + signal.offset.unwrap_or(0) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeContribution {
    pub bucket: u32,
    pub priority_weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_threshold: Option<u32>,
}

/// Everything an invocation asked the host to do on its behalf
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportEffects {
    pub report_url: Option<Url>,
    pub ad_beacons: BTreeMap<String, Url>,
    pub debug_win_url: Option<Url>,
    pub debug_loss_url: Option<Url>,
    pub private_aggregation: Vec<PendingContribution>,
    pub real_time: Vec<RealTimeContribution>,
    pub console: Vec<String>,
}

/// Per-invocation context handed to a worklet
#[derive(Debug)]
pub struct WorkletScope {
    phase: Phase,
    cancelled: Arc<AtomicBool>,
    beacons_registered: bool,
    effects: ReportEffects,
}

impl WorkletScope {
    pub fn new(phase: Phase, cancelled: Arc<AtomicBool>) -> Self {
        Self { phase, cancelled, beacons_registered: false, effects: ReportEffects::default() }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Set by the host once the invocation ran out of time
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn into_effects(self) -> ReportEffects {
        self.effects
    }

    pub fn effects(&self) -> &ReportEffects {
        &self.effects
    }

    pub fn console_log(&mut self, message: impl Into<String>) {
        self.effects.console.push(message.into());
    }

    fn require_phase(&self, api: &'static str, allowed: bool) -> ContractResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(ContractError::ApiUnavailable { api, phase: self.phase.name() })
        }
    }

    pub fn send_report_to(&mut self, url: &str) -> ContractResult<()> {
        self.require_phase("sendReportTo", self.phase.is_reporting())?;
        if self.effects.report_url.is_some() {
            return Err(ContractError::CalledTwice { api: "sendReportTo" });
        }
        self.effects.report_url = Some(parse_https_url("sendReportTo", url)?);
        Ok(())
    }

    /// Register beacons keyed by event type; `reserved.*` keys are restricted
    pub fn register_ad_beacon<'a>(&mut self, beacons: impl IntoIterator<Item = (&'a str, &'a str)>) -> ContractResult<()> {
        self.require_phase("registerAdBeacon", self.phase.is_reporting())?;
        if self.beacons_registered {
            return Err(ContractError::CalledTwice { api: "registerAdBeacon" });
        }
        let mut registered = BTreeMap::new();
        for (event, url) in beacons {
            if event.starts_with("reserved.") && !RESERVED_BEACON_EVENTS.contains(&event) {
                return Err(ContractError::malformed("registerAdBeacon", format!("'{}' is not a known reserved event", event)));
            }
            registered.insert(event.to_string(), parse_https_url("registerAdBeacon", url)?);
        }
        self.beacons_registered = true;
        self.effects.ad_beacons = registered;
        Ok(())
    }

    pub fn for_debugging_only(&mut self) -> ForDebuggingOnly<'_> {
        ForDebuggingOnly { scope: self }
    }

    pub fn private_aggregation(&mut self) -> PrivateAggregation<'_> {
        PrivateAggregation { scope: self }
    }

    pub fn real_time_reporting(&mut self) -> RealTimeReporting<'_> {
        RealTimeReporting { scope: self }
    }
}

/// `forDebuggingOnly.*`; the last url of each kind wins
pub struct ForDebuggingOnly<'a> {
    scope: &'a mut WorkletScope,
}

impl ForDebuggingOnly<'_> {
    fn allowed(&self) -> ContractResult<()> {
        let phase = self.scope.phase;
        self.scope.require_phase("forDebuggingOnly", matches!(phase, Phase::GenerateBid | Phase::ScoreAd))
    }

    pub fn report_ad_auction_win(&mut self, url: &str) -> ContractResult<()> {
        self.allowed()?;
        self.scope.effects.debug_win_url = Some(parse_https_url("reportAdAuctionWin", url)?);
        Ok(())
    }

    pub fn report_ad_auction_loss(&mut self, url: &str) -> ContractResult<()> {
        self.allowed()?;
        self.scope.effects.debug_loss_url = Some(parse_https_url("reportAdAuctionLoss", url)?);
        Ok(())
    }
}

/// `privateAggregation.*`, available in every phase
pub struct PrivateAggregation<'a> {
    scope: &'a mut WorkletScope,
}

impl PrivateAggregation<'_> {
    pub fn contribute_to_histogram(&mut self, contribution: Contribution) -> ContractResult<()> {
        if contribution.bucket_signal().is_some() || contribution.value_signal().is_some() {
            return Err(ContractError::malformed("contributeToHistogram", "signal values need an event"));
        }
        self.push(AggregationEvent::Always, contribution)
    }

    pub fn contribute_to_histogram_on_event(&mut self, event: &str, contribution: Contribution) -> ContractResult<()> {
        self.push(AggregationEvent::parse(event)?, contribution)
    }

    /// Older name of `contribute_to_histogram_on_event`
    pub fn report_contribution_for_event(&mut self, event: &str, contribution: Contribution) -> ContractResult<()> {
        self.contribute_to_histogram_on_event(event, contribution)
    }

    fn push(&mut self, event: AggregationEvent, contribution: Contribution) -> ContractResult<()> {
        contribution.validate()?;
        self.scope.effects.private_aggregation.push(PendingContribution { event, contribution });
        Ok(())
    }
}

/// `realTimeReporting.contributeToHistogram`
pub struct RealTimeReporting<'a> {
    scope: &'a mut WorkletScope,
}

impl RealTimeReporting<'_> {
    pub fn contribute_to_histogram(&mut self, bucket: u32, priority_weight: f64, latency_threshold: Option<u32>) -> ContractResult<()> {
        let phase = self.scope.phase;
        self.scope.require_phase("realTimeReporting", matches!(phase, Phase::GenerateBid | Phase::ScoreAd))?;
        if bucket >= REAL_TIME_BUCKETS {
            return Err(ContractError::malformed("bucket", format!("{} is not below {}", bucket, REAL_TIME_BUCKETS)));
        }
        if !priority_weight.is_finite() || priority_weight <= 0.0 {
            return Err(ContractError::malformed("priorityWeight", "must be finite and positive"));
        }
        self.scope.effects.real_time.push(RealTimeContribution { bucket, priority_weight, latency_threshold });
        Ok(())
    }
}

/// Auction outcome visible through debug report url macros
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DebugReportContext {
    pub winning_bid: f64,
    pub made_winning_bid: bool,
    pub highest_scoring_other_bid: f64,
    pub made_highest_scoring_other_bid: bool,
    /// Only set for component auction participants
    pub top_level_winning_bid: Option<f64>,
    pub top_level_made_winning_bid: Option<bool>,
    pub reject_reason: Option<RejectReason>,
}

/// Substitute `${winningBid}` style macros in a debug report url
pub fn substitute_debug_macros(url: &Url, context: &DebugReportContext) -> ContractResult<Url> {
    let mut values: Vec<(&str, String)> = vec![
        ("winningBid", context.winning_bid.to_string()),
        ("madeWinningBid", context.made_winning_bid.to_string()),
        ("highestScoringOtherBid", context.highest_scoring_other_bid.to_string()),
        ("madeHighestScoringOtherBid", context.made_highest_scoring_other_bid.to_string()),
        ("rejectReason", context.reject_reason.unwrap_or(RejectReason::NotAvailable).to_string()),
    ];
    if let Some(bid) = context.top_level_winning_bid {
        values.push(("topLevelWinningBid", bid.to_string()));
    }
    if let Some(made) = context.top_level_made_winning_bid {
        values.push(("topLevelMadeWinningBid", made.to_string()));
    }
    let mut out = url.as_str().to_string();
    for (name, value) in values {
        out = out.replace(&format!("${{{}}}", name), &value);
        out = out.replace(&format!("$%7B{}%7D", name), &value);
    }
    parse_https_url("forDebuggingOnly", &out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn scope(phase: Phase) -> WorkletScope {
        WorkletScope::new(phase, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_send_report_to_only_once_and_only_when_reporting() {
        let mut bid_scope = scope(Phase::GenerateBid);
        assert_eq!(
            bid_scope.send_report_to("https://r.test/a"),
            Err(ContractError::ApiUnavailable { api: "sendReportTo", phase: "generateBid" })
        );
        let mut report_scope = scope(Phase::ReportWin);
        report_scope.send_report_to("https://r.test/a").unwrap();
        assert_eq!(report_scope.send_report_to("https://r.test/b"), Err(ContractError::CalledTwice { api: "sendReportTo" }));
        assert!(scope(Phase::ReportResult).send_report_to("http://r.test/a").is_err());
        assert_eq!(report_scope.into_effects().report_url.unwrap().as_str(), "https://r.test/a");
    }

    #[test]
    fn test_register_ad_beacon_rules() {
        let mut s = scope(Phase::ReportResult);
        assert!(s.register_ad_beacon([("reserved.bogus", "https://b.test/")]).is_err());
        s.register_ad_beacon([("click", "https://b.test/click"), ("reserved.top_navigation", "https://b.test/nav")]).unwrap();
        assert_eq!(s.effects().ad_beacons.len(), 2);
        assert_eq!(s.register_ad_beacon([("view", "https://b.test/view")]), Err(ContractError::CalledTwice { api: "registerAdBeacon" }));
    }

    #[test]
    fn test_debug_reports_gated_to_bid_and_score() {
        let mut s = scope(Phase::ScoreAd);
        s.for_debugging_only().report_ad_auction_loss("https://d.test/loss1").unwrap();
        s.for_debugging_only().report_ad_auction_loss("https://d.test/loss2").unwrap();
        assert_eq!(s.effects().debug_loss_url.as_ref().unwrap().as_str(), "https://d.test/loss2");
        let mut r = scope(Phase::ReportWin);
        assert!(r.for_debugging_only().report_ad_auction_win("https://d.test/win").is_err());
    }

    #[test]
    fn test_private_aggregation_contribution_shapes() {
        let contribution: Contribution = serde_json::from_value(json!({
            "bucket": {"baseValue": "winning-bid", "scale": 2.0, "offset": 5},
            "value": 1,
        }))
        .unwrap();
        let mut s = scope(Phase::ReportWin);
        s.private_aggregation().contribute_to_histogram_on_event("reserved.win", contribution).unwrap();
        assert!(s.private_aggregation().contribute_to_histogram(contribution).is_err());
        assert!(s.private_aggregation().contribute_to_histogram_on_event("reserved.nope", contribution).is_err());
        let pending = &s.effects().private_aggregation[0];
        let won = AggregationOutcome { won: true, winning_bid: 3.0, ..AggregationOutcome::default() };
        assert_eq!(pending.resolve(&won), Some(ResolvedContribution { bucket: 11, value: 1 }));
        assert_eq!(pending.resolve(&AggregationOutcome::default()), None);
    }

    #[test]
    fn test_literal_bucket_is_not_resolved() {
        let contribution = Contribution::literal(1u128 << 100, 3);
        let pending = PendingContribution { event: AggregationEvent::Always, contribution };
        assert_eq!(pending.resolve(&AggregationOutcome::default()), Some(ResolvedContribution { bucket: 1u128 << 100, value: 3 }));
    }

    #[test]
    fn test_reject_reason_signal_and_custom_events() {
        let contribution = Contribution {
            bucket: BucketSpec::Signal(SignalValue { base_value: SignalBase::BidRejectReason, scale: None, offset: Some(100) }),
            value: ValueSpec::Literal(1),
        };
        let pending = PendingContribution { event: AggregationEvent::Loss, contribution };
        let lost = AggregationOutcome { reject_reason: Some(RejectReason::BlockedByPublisher), ..AggregationOutcome::default() };
        assert_eq!(pending.resolve(&lost), Some(ResolvedContribution { bucket: 105, value: 1 }));
        let custom = PendingContribution { event: AggregationEvent::parse("click").unwrap(), contribution };
        assert_eq!(custom.resolve(&lost), None);
    }

    #[test]
    fn test_real_time_reporting_bounds() {
        let mut s = scope(Phase::GenerateBid);
        s.real_time_reporting().contribute_to_histogram(1023, 0.5, None).unwrap();
        assert!(s.real_time_reporting().contribute_to_histogram(1024, 0.5, None).is_err());
        assert!(s.real_time_reporting().contribute_to_histogram(3, 0.0, None).is_err());
        assert!(scope(Phase::ReportWin).real_time_reporting().contribute_to_histogram(3, 1.0, None).is_err());
    }

    #[test]
    fn test_debug_macros() {
        let url = Url::parse("https://d.test/win?bid=${winningBid}&made=${madeWinningBid}&reason=${rejectReason}").unwrap();
        let context = DebugReportContext { winning_bid: 2.5, made_winning_bid: true, ..DebugReportContext::default() };
        let out = substitute_debug_macros(&url, &context).unwrap();
        assert_eq!(out.as_str(), "https://d.test/win?bid=2.5&made=true&reason=not-available");
    }
}
