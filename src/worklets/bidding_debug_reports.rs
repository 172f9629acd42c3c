use super::{first_ad, number_field};
use crate::bid::{Bid, GenerateBidOutput};
use crate::errors::WorkletResult;
use crate::reporting::{BucketSpec, Contribution, SignalBase, SignalValue, ValueSpec, WorkletScope};
use crate::worklet::{BiddingLogic, GenerateBidArgs, ReportWinArgs, WorkletEntry, WorkletKind};

inventory::submit!(WorkletEntry { script: "bidding_logic_debug_reports.js", kind: WorkletKind::Bidding(debug_reporting_bidder) });

fn debug_reporting_bidder() -> Box<dyn BiddingLogic> {
    Box::new(DebugReportingBidder)
}

/// Private aggregation bucket for the bidder's own win/loss histogram
pub const WIN_BUCKET: u128 = 1 << 64;
pub const REAL_TIME_BUCKET: u32 = 100;
/// Loss buckets are the reject reason index shifted by this
pub const REJECT_REASON_OFFSET: i64 = 1000;

/// Bids `userBiddingSignals.bid` (default 1) and registers every kind of
/// after-the-fact report the bidding phase allows
pub struct DebugReportingBidder;

impl BiddingLogic for DebugReportingBidder {
    fn generate_bid(&mut self, args: &GenerateBidArgs, scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        let group = &args.interest_group;
        let owner = &group.owner;
        let mut debug = scope.for_debugging_only();
        debug.report_ad_auction_win(&format!(
            "{}/debug_win?name={}&bid=${{winningBid}}&made=${{madeWinningBid}}&hsob=${{highestScoringOtherBid}}",
            owner, group.name
        ))?;
        debug.report_ad_auction_loss(&format!(
            "{}/debug_loss?name={}&bid=${{winningBid}}&reason=${{rejectReason}}",
            owner, group.name
        ))?;

        let mut aggregation = scope.private_aggregation();
        aggregation.contribute_to_histogram(Contribution::literal(WIN_BUCKET - 1, 1))?;
        aggregation.contribute_to_histogram_on_event(
            "reserved.win",
            Contribution {
                bucket: BucketSpec::Literal(WIN_BUCKET),
                value: ValueSpec::Signal(SignalValue { base_value: SignalBase::WinningBid, scale: Some(10.0), offset: None }),
            },
        )?;
        aggregation.contribute_to_histogram_on_event(
            "reserved.loss",
            Contribution {
                bucket: BucketSpec::Signal(SignalValue { base_value: SignalBase::BidRejectReason, scale: None, offset: Some(REJECT_REASON_OFFSET) }),
                value: ValueSpec::Literal(1),
            },
        )?;
        aggregation.contribute_to_histogram_on_event("click", Contribution::literal(WIN_BUCKET + 1, 1))?;
        scope.real_time_reporting().contribute_to_histogram(REAL_TIME_BUCKET, 0.5, None)?;

        let value = number_field(group.user_bidding_signals.as_ref(), "bid").unwrap_or(1.0);
        let ad = first_ad(group)?;
        Ok(GenerateBidOutput::Single(Bid::new(value, ad.render_url.clone())))
    }

    fn report_win(&mut self, args: &ReportWinArgs, scope: &mut WorkletScope) -> WorkletResult<()> {
        let owner = &args.browser_signals.interest_group_owner;
        scope.register_ad_beacon([
            ("click", format!("{}/beacon?click", owner).as_str()),
            ("reserved.top_navigation", format!("{}/beacon?navigation", owner).as_str()),
        ])?;
        scope.private_aggregation().contribute_to_histogram(Contribution::literal(WIN_BUCKET + 2, 1))?;
        scope.send_report_to(&format!("{}/echo?bidder_report", owner))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkletError;
    use crate::reporting::Phase;
    use crate::worklets::testing::{bid_args, group};
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_registers_reports_without_sending_them() {
        let mut g = group();
        g.user_bidding_signals = Some(json!({"bid": 4}));
        let mut scope = WorkletScope::new(Phase::GenerateBid, Arc::new(AtomicBool::new(false)));
        let output = DebugReportingBidder.generate_bid(&bid_args(g), &mut scope).unwrap();
        assert_eq!(output.bids()[0].bid, 4.0);
        let effects = scope.into_effects();
        assert!(effects.debug_win_url.unwrap().as_str().starts_with("https://buyer.test/debug_win?name=cars"));
        assert!(effects.debug_loss_url.is_some());
        assert_eq!(effects.private_aggregation.len(), 4);
        assert_eq!(effects.real_time.len(), 1);
        assert!(effects.report_url.is_none());
    }

    #[test]
    fn test_report_win_cannot_send_debug_reports() {
        let mut scope = WorkletScope::new(Phase::ReportWin, Arc::new(AtomicBool::new(false)));
        let result = scope.for_debugging_only().report_ad_auction_win("https://buyer.test/x");
        assert!(matches!(WorkletError::from(result.unwrap_err()), WorkletError::Contract(_)));
    }
}
