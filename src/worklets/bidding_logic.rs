//! The plain bidders: a fixed bid, a bidder that stops after its first win,
//! and the multi-bid bidder.

use super::{ensure, first_ad};
use crate::bid::{Bid, GenerateBidOutput};
use crate::errors::WorkletResult;
use crate::reporting::WorkletScope;
use crate::worklet::{BiddingLogic, GenerateBidArgs, ReportWinArgs, WorkletEntry, WorkletKind};
use serde_json::json;

inventory::submit!(WorkletEntry { script: "bidding_logic.js", kind: WorkletKind::Bidding(fixed_bidder) });
inventory::submit!(WorkletEntry { script: "bidding_logic_stop_bidding_after_win.js", kind: WorkletKind::Bidding(stop_after_win_bidder) });
inventory::submit!(WorkletEntry { script: "bidding_logic_multibid_feature.js", kind: WorkletKind::Bidding(multi_bidder) });

fn fixed_bidder() -> Box<dyn BiddingLogic> {
    Box::new(FixedBidder)
}

fn stop_after_win_bidder() -> Box<dyn BiddingLogic> {
    Box::new(StopAfterWinBidder)
}

fn multi_bidder() -> Box<dyn BiddingLogic> {
    Box::new(MultiBidder)
}

/// Sends the winner's report to `<owner>/echo?bidder_report`
pub(crate) fn echo_bidder_report(args: &ReportWinArgs, scope: &mut WorkletScope) -> WorkletResult<()> {
    scope.send_report_to(&format!("{}/echo?bidder_report", args.browser_signals.interest_group_owner))?;
    Ok(())
}

/// Bids 1 on the group's first ad; the bid may enter a top-level auction only when made in a component auction
pub struct FixedBidder;

impl BiddingLogic for FixedBidder {
    fn generate_bid(&mut self, args: &GenerateBidArgs, _scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        let ad = first_ad(&args.interest_group)?;
        let mut bid = Bid::new(1.0, ad.render_url.clone()).with_ad(json!("example"));
        bid.allow_component_auction = args.browser_signals.nesting.is_component();
        Ok(GenerateBidOutput::Single(bid))
    }

    fn report_win(&mut self, args: &ReportWinArgs, scope: &mut WorkletScope) -> WorkletResult<()> {
        echo_bidder_report(args, scope)
    }
}

/// Bids 2 until the group has won once, then 0
pub struct StopAfterWinBidder;

impl BiddingLogic for StopAfterWinBidder {
    fn generate_bid(&mut self, args: &GenerateBidArgs, _scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        let ad = first_ad(&args.interest_group)?;
        let value = if args.browser_signals.prev_wins.0.is_empty() { 2.0 } else { 0.0 };
        Ok(GenerateBidOutput::Single(Bid::new(value, ad.render_url.clone()).with_ad(json!("example"))))
    }

    fn report_win(&mut self, args: &ReportWinArgs, scope: &mut WorkletScope) -> WorkletResult<()> {
        echo_bidder_report(args, scope)
    }
}

/// Needs a multi-bid limit of 3 and answers with a one-element bid list
pub struct MultiBidder;

impl BiddingLogic for MultiBidder {
    fn generate_bid(&mut self, args: &GenerateBidArgs, _scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        let limit = args.browser_signals.multi_bid_limit;
        ensure(limit == 3, || format!("wrong multiBidLimit {}", limit))?;
        let ad = first_ad(&args.interest_group)?;
        Ok(GenerateBidOutput::Multi(vec![Bid::new(3.0, ad.render_url.clone())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser_signals::{PrevWin, PrevWins};
    use crate::errors::WorkletError;
    use crate::reporting::Phase;
    use crate::worklets::testing::{bid_args, group, RENDER};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn scope() -> WorkletScope {
        WorkletScope::new(Phase::GenerateBid, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_fixed_bidder() {
        let output = FixedBidder.generate_bid(&bid_args(group()), &mut scope()).unwrap();
        let bid = &output.bids()[0];
        assert_eq!(bid.bid, 1.0);
        assert_eq!(bid.render.url().as_str(), RENDER);
        assert!(!bid.allow_component_auction);
        assert_eq!(bid.ad, Some(json!("example")));
    }

    #[test]
    fn test_stop_bidding_after_win() {
        let mut args = bid_args(group());
        assert_eq!(StopAfterWinBidder.generate_bid(&args, &mut scope()).unwrap().bids()[0].bid, 2.0);
        args.browser_signals.prev_wins = PrevWins(vec![PrevWin { elapsed: Duration::from_secs(1), ad: json!({}) }]);
        assert_eq!(StopAfterWinBidder.generate_bid(&args, &mut scope()).unwrap().bids()[0].bid, 0.0);
    }

    #[test]
    fn test_multibid_needs_limit_of_three() {
        let mut args = bid_args(group());
        assert!(matches!(MultiBidder.generate_bid(&args, &mut scope()), Err(WorkletError::Thrown(_))));
        args.browser_signals.multi_bid_limit = 3;
        let output = MultiBidder.generate_bid(&args, &mut scope()).unwrap();
        assert!(matches!(output, GenerateBidOutput::Multi(ref bids) if bids.len() == 1 && bids[0].bid == 3.0));
    }
}
