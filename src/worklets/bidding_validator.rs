//! Bidder that checks the shape of everything it is handed, in script terms,
//! and throws on the first surprise.

use super::bidding_logic::echo_bidder_report;
use super::{as_script_object, ensure, ensure_aliases, first_ad};
use crate::bid::{Bid, GenerateBidOutput};
use crate::browser_signals::DEFAULT_AD_COMPONENTS_LIMIT;
use crate::errors::WorkletResult;
use crate::reporting::WorkletScope;
use crate::worklet::{BiddingLogic, GenerateBidArgs, ReportWinArgs, WorkletEntry, WorkletKind};
use serde_json::Value;

inventory::submit!(WorkletEntry { script: "bidding_argument_validator.js", kind: WorkletKind::Bidding(bidding_validator) });

fn bidding_validator() -> Box<dyn BiddingLogic> {
    Box::new(BiddingArgumentValidator)
}

pub struct BiddingArgumentValidator;

fn validate_interest_group(group: &Value) -> WorkletResult<()> {
    ensure(group["name"].is_string(), || "interestGroup.name missing".to_string())?;
    ensure(group["owner"].is_string(), || "interestGroup.owner missing".to_string())?;
    ensure_aliases(group, "biddingLogicURL", "biddingLogicUrl")?;
    let ads = group["ads"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    ensure(!ads.is_empty(), || "interestGroup.ads is empty".to_string())?;
    for ad in ads {
        ensure_aliases(ad, "renderURL", "renderUrl")?;
    }
    Ok(())
}

fn validate_bid_signals(signals: &Value) -> WorkletResult<()> {
    ensure(signals["topWindowHostname"].as_str().is_some_and(|h| !h.is_empty()), || "topWindowHostname missing".to_string())?;
    ensure(signals["seller"].is_string(), || "seller missing".to_string())?;
    ensure(signals.get("componentSeller").is_none(), || "componentSeller is not shown to bidders".to_string())?;
    ensure(signals["joinCount"].as_u64().is_some_and(|c| c >= 1), || format!("joinCount {}", signals["joinCount"]))?;
    ensure(signals["bidCount"].is_u64(), || "bidCount missing".to_string())?;
    ensure(signals["adComponentsLimit"].as_u64() == Some(DEFAULT_AD_COMPONENTS_LIMIT as u64), || {
        format!("adComponentsLimit {}", signals["adComponentsLimit"])
    })?;
    ensure(signals["multiBidLimit"].as_u64().is_some_and(|l| l >= 1), || format!("multiBidLimit {}", signals["multiBidLimit"]))?;
    ensure(signals["forDebuggingOnlyInCooldownOrLockout"].is_boolean(), || "forDebuggingOnlyInCooldownOrLockout missing".to_string())?;
    let wins = signals["prevWins"].as_array().map(Vec::len);
    let wins_ms = signals["prevWinsMs"].as_array().map(Vec::len);
    ensure(wins.is_some() && wins == wins_ms, || format!("prevWins has {:?} entries but prevWinsMs {:?}", wins, wins_ms))
}

impl BiddingLogic for BiddingArgumentValidator {
    fn generate_bid(&mut self, args: &GenerateBidArgs, scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        validate_interest_group(&as_script_object(&args.interest_group)?)?;
        validate_bid_signals(&as_script_object(&args.browser_signals)?)?;

        let direct = as_script_object(&args.direct_from_seller_signals)?;
        ensure(direct["sellerSignals"].is_null(), || "bidders must not see directFromSellerSignals.sellerSignals".to_string())?;

        let keys = &args.interest_group.trusted_bidding_signals_keys;
        if let Some(trusted) = &args.trusted_bidding_signals {
            for key in keys {
                ensure(trusted.get(key).is_some(), || format!("trustedBiddingSignals lacks key '{}'", key))?;
            }
        }
        scope.console_log(format!("validated generateBid for '{}'", args.interest_group.name));

        let ad = first_ad(&args.interest_group)?;
        let mut bid = Bid::new(1.0, ad.render_url.clone());
        bid.ad = ad.metadata.clone();
        bid.allow_component_auction = args.browser_signals.nesting.is_component();
        Ok(GenerateBidOutput::Single(bid))
    }

    fn report_win(&mut self, args: &ReportWinArgs, scope: &mut WorkletScope) -> WorkletResult<()> {
        let signals = as_script_object(&args.browser_signals)?;
        ensure_aliases(&signals, "renderURL", "renderUrl")?;
        ensure(signals["bid"].as_f64().is_some_and(|b| b > 0.0), || format!("reportWin bid {}", signals["bid"]))?;
        ensure(signals["bidCurrency"].is_string(), || "bidCurrency missing".to_string())?;
        ensure(signals["highestScoringOtherBid"].is_number(), || "highestScoringOtherBid missing".to_string())?;
        ensure(signals["madeHighestScoringOtherBid"].is_boolean(), || "madeHighestScoringOtherBid missing".to_string())?;
        ensure(signals["reportingTimeout"].as_u64().is_some_and(|t| t > 0), || "reportingTimeout missing".to_string())?;
        ensure(args.seller_signals.is_some(), || "reportWin expects the seller's signalsForWinner".to_string())?;
        echo_bidder_report(args, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser_signals::AuctionNesting;
    use crate::errors::WorkletError;
    use crate::reporting::Phase;
    use crate::worklets::testing::{bid_args, group, seller};
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn run(args: &GenerateBidArgs) -> WorkletResult<GenerateBidOutput> {
        let mut scope = WorkletScope::new(Phase::GenerateBid, Arc::new(AtomicBool::new(false)));
        BiddingArgumentValidator.generate_bid(args, &mut scope)
    }

    #[test]
    fn test_accepts_well_formed_arguments() {
        assert_eq!(run(&bid_args(group())).unwrap().bids().len(), 1);
    }

    #[test]
    fn test_rejects_unknown_join_count() {
        let mut args = bid_args(group());
        args.browser_signals.join_count = 0;
        assert!(matches!(run(&args), Err(WorkletError::Thrown(message)) if message.contains("joinCount")));
    }

    #[test]
    fn test_requires_trusted_keys() {
        let mut g = group();
        g.trusted_bidding_signals_keys = vec!["a".to_string(), "b".to_string()];
        let mut args = bid_args(g);
        args.trusted_bidding_signals = Some(json!({"a": 1}));
        assert!(run(&args).is_err());
        args.trusted_bidding_signals = Some(json!({"a": 1, "b": null}));
        assert!(run(&args).is_ok());
    }

    #[test]
    fn test_component_bid_may_enter_top_level() {
        let mut args = bid_args(group());
        args.browser_signals.nesting = AuctionNesting::Component { top_level_seller: seller() };
        assert!(run(&args).unwrap().bids()[0].allow_component_auction);
    }
}
