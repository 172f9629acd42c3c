//! Seller that checks the shape of its arguments and converts bids into its
//! own currency from a fixed rate table.

use super::{as_script_object, ensure, ensure_aliases};
use crate::currency::Currency;
use crate::errors::{WorkletError, WorkletResult};
use crate::reporting::WorkletScope;
use crate::score::{ScoreAdOutput, ScoreDetails};
use crate::worklet::{DecisionLogic, ReportResultArgs, ScoreAdArgs, WorkletEntry, WorkletKind};
use serde_json::{json, Value};

inventory::submit!(WorkletEntry { script: "decision_argument_validator.js", kind: WorkletKind::Decision(decision_validator) });

fn decision_validator() -> Box<dyn DecisionLogic> {
    Box::new(DecisionArgumentValidator)
}

/// (from, to, rate)
const RATES: &[(&str, &str, f64)] = &[("USD", "EUR", 0.91), ("EUR", "USD", 1.1), ("CAD", "USD", 0.73)];

fn rate(from: Currency, to: Currency) -> Option<f64> {
    RATES.iter().find(|(f, t, _)| *f == from.as_str() && *t == to.as_str()).map(|(_, _, rate)| *rate)
}

pub struct DecisionArgumentValidator;

impl DecisionLogic for DecisionArgumentValidator {
    fn score_ad(&mut self, args: &ScoreAdArgs, scope: &mut WorkletScope) -> WorkletResult<ScoreAdOutput> {
        let metadata = as_script_object(&args.ad_metadata)?;
        ensure_aliases(&metadata, "renderURL", "renderUrl")?;
        let config = as_script_object(&args.auction_config)?;
        ensure_aliases(&config, "decisionLogicURL", "decisionLogicUrl")?;

        let signals = as_script_object(&args.browser_signals)?;
        ensure_aliases(&signals, "renderURL", "renderUrl")?;
        ensure(signals["topWindowHostname"].is_string(), || "topWindowHostname missing".to_string())?;
        ensure(signals["biddingDurationMsec"].is_u64(), || "biddingDurationMsec missing".to_string())?;
        ensure(signals["bidCurrency"].is_string(), || "bidCurrency missing".to_string())?;
        ensure(signals["forDebuggingOnlyInCooldownOrLockout"].is_boolean(), || "forDebuggingOnlyInCooldownOrLockout missing".to_string())?;
        ensure(signals.get("topLevelSeller").is_none() || signals.get("componentSeller").is_none(), || {
            "topLevelSeller and componentSeller are exclusive".to_string()
        })?;
        let owner = &args.browser_signals.interest_group_owner;
        let buyers = args.auction_config.buyers();
        ensure(buyers.is_empty() || buyers.contains(owner), || format!("{} is not one of interestGroupBuyers", owner))?;

        let mut details = ScoreDetails { desirability: args.bid, allow_component_auction: true, ..ScoreDetails::default() };
        match (args.browser_signals.bid_currency, args.auction_config.seller_currency) {
            (Some(bid_currency), Some(seller_currency)) if bid_currency != seller_currency => {
                let rate = rate(bid_currency, seller_currency)
                    .ok_or_else(|| WorkletError::thrown(format!("no conversion from {} to {}", bid_currency, seller_currency)))?;
                details.incoming_bid_in_seller_currency = Some(args.bid * rate);
                scope.console_log(format!("converted {} {} at {}", args.bid, bid_currency, rate));
            }
            _ => {}
        }
        Ok(ScoreAdOutput::Detailed(details))
    }

    fn report_result(&mut self, args: &ReportResultArgs, scope: &mut WorkletScope) -> WorkletResult<Option<Value>> {
        let signals = as_script_object(&args.browser_signals)?;
        ensure_aliases(&signals, "renderURL", "renderUrl")?;
        ensure(signals["desirability"].as_f64().is_some_and(|d| d > 0.0), || format!("desirability {}", signals["desirability"]))?;
        ensure(signals["bid"].is_number(), || "bid missing".to_string())?;
        ensure(signals["bidCurrency"].is_string(), || "bidCurrency missing".to_string())?;
        ensure(signals["highestScoringOtherBid"].is_number(), || "highestScoringOtherBid missing".to_string())?;
        ensure(signals["highestScoringOtherBidCurrency"].is_string(), || "highestScoringOtherBidCurrency missing".to_string())?;
        ensure(signals["reportingTimeout"].as_u64().is_some_and(|t| t > 0), || "reportingTimeout missing".to_string())?;
        scope.send_report_to(&format!("{}/echo?seller_report", args.auction_config.seller))?;
        Ok(Some(json!({ "validatedBy": "decision_argument_validator", "bid": args.browser_signals.bid })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::Phase;
    use crate::worklets::testing::score_args;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn run(bid_currency: Option<&str>, seller_currency: Option<&str>) -> WorkletResult<ScoreAdOutput> {
        let mut args = score_args(10.0);
        args.browser_signals.bid_currency = bid_currency.map(|c| Currency::parse(c).unwrap());
        args.auction_config.seller_currency = seller_currency.map(|c| Currency::parse(c).unwrap());
        let mut scope = WorkletScope::new(Phase::ScoreAd, Arc::new(AtomicBool::new(false)));
        DecisionArgumentValidator.score_ad(&args, &mut scope)
    }

    #[test]
    fn test_usd_bid_converted_to_eur() {
        let output = run(Some("USD"), Some("EUR")).unwrap();
        let details = output.details().unwrap();
        assert_eq!(details.desirability, 10.0);
        assert!((details.incoming_bid_in_seller_currency.unwrap() - 9.1).abs() < 1e-9);
    }

    #[test]
    fn test_same_or_unspecified_currency_needs_no_conversion() {
        assert_eq!(run(Some("EUR"), Some("EUR")).unwrap().details().unwrap().incoming_bid_in_seller_currency, None);
        assert_eq!(run(None, Some("EUR")).unwrap().details().unwrap().incoming_bid_in_seller_currency, None);
        assert_eq!(run(Some("USD"), None).unwrap().details().unwrap().incoming_bid_in_seller_currency, None);
    }

    #[test]
    fn test_unknown_rate_throws() {
        assert!(matches!(run(Some("JPY"), Some("EUR")), Err(WorkletError::Thrown(_))));
    }
}
