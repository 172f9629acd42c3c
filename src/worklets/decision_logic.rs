//! Plain sellers: desirability is the bid; the component seller may scale the
//! bid it forwards to the top-level auction.

use super::number_field;
use crate::errors::WorkletResult;
use crate::reporting::WorkletScope;
use crate::score::{ScoreAdOutput, ScoreDetails};
use crate::worklet::{DecisionLogic, ReportResultArgs, ScoreAdArgs, WorkletEntry, WorkletKind};
use serde_json::{json, Value};

inventory::submit!(WorkletEntry { script: "decision_logic.js", kind: WorkletKind::Decision(bid_is_desirability) });
inventory::submit!(WorkletEntry { script: "decision_logic_component.js", kind: WorkletKind::Decision(component_seller) });

fn bid_is_desirability() -> Box<dyn DecisionLogic> {
    Box::new(BidIsDesirability)
}

fn component_seller() -> Box<dyn DecisionLogic> {
    Box::new(ComponentSeller)
}

/// Scores every bid by its value
pub struct BidIsDesirability;

impl DecisionLogic for BidIsDesirability {
    fn score_ad(&mut self, args: &ScoreAdArgs, _scope: &mut WorkletScope) -> WorkletResult<ScoreAdOutput> {
        Ok(ScoreAdOutput::Bare(args.bid))
    }

    fn report_result(&mut self, args: &ReportResultArgs, scope: &mut WorkletScope) -> WorkletResult<Option<Value>> {
        scope.send_report_to(&format!("{}/echo?seller_report", args.auction_config.seller))?;
        Ok(Some(json!({ "signalForWinner": 1 })))
    }
}

/// Lets every bid through to the top level, multiplied by
/// `sellerSignals.bidMultiplier` when the seller sets one
pub struct ComponentSeller;

impl DecisionLogic for ComponentSeller {
    fn score_ad(&mut self, args: &ScoreAdArgs, scope: &mut WorkletScope) -> WorkletResult<ScoreAdOutput> {
        let seller = &args.auction_config.seller;
        let mut debug = scope.for_debugging_only();
        debug.report_ad_auction_win(&format!("{}/debug_win?bid=${{winningBid}}&topLevelBid=${{topLevelWinningBid}}", seller))?;
        debug.report_ad_auction_loss(&format!("{}/debug_loss?reason=${{rejectReason}}", seller))?;

        let multiplier = number_field(args.auction_config.seller_signals.as_ref(), "bidMultiplier");
        let is_component = args.browser_signals.nesting.top_level_seller().is_some();
        Ok(ScoreAdOutput::Detailed(ScoreDetails {
            desirability: args.bid,
            allow_component_auction: true,
            bid: multiplier.filter(|_| is_component).map(|m| args.bid * m),
            ..ScoreDetails::default()
        }))
    }

    fn report_result(&mut self, args: &ReportResultArgs, scope: &mut WorkletScope) -> WorkletResult<Option<Value>> {
        let signals = &args.browser_signals;
        let mut report = format!("{}/echo?seller_report&bid={}", args.auction_config.seller, signals.bid);
        if let Some(modified) = signals.modified_bid {
            report.push_str(&format!("&modifiedBid={}", modified));
        }
        scope.send_report_to(&report)?;
        scope.register_ad_beacon([("click", format!("{}/beacon?click", args.auction_config.seller).as_str())])?;
        Ok(Some(json!({
            "seller": args.auction_config.seller.as_str(),
            "componentSeller": signals.nesting.top_level_seller().is_some(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser_signals::AuctionNesting;
    use crate::reporting::Phase;
    use crate::worklets::testing::{score_args, seller};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn scope() -> WorkletScope {
        WorkletScope::new(Phase::ScoreAd, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_bare_desirability() {
        assert_eq!(BidIsDesirability.score_ad(&score_args(2.5), &mut scope()).unwrap(), ScoreAdOutput::Bare(2.5));
    }

    #[test]
    fn test_component_seller_modifies_bid_only_inside_component_auction() {
        let mut args = score_args(10.0);
        args.auction_config.seller_signals = Some(json!({"bidMultiplier": 0.5}));
        let top_level = ComponentSeller.score_ad(&args, &mut scope()).unwrap();
        assert_eq!(top_level.details().and_then(|d| d.bid), None);

        args.browser_signals.nesting = AuctionNesting::Component { top_level_seller: seller() };
        let component = ComponentSeller.score_ad(&args, &mut scope()).unwrap();
        assert!(component.allow_component_auction());
        assert_eq!(component.details().and_then(|d| d.bid), Some(5.0));
    }
}
