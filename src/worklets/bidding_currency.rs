use super::{first_ad, number_field};
use crate::bid::{Bid, GenerateBidOutput};
use crate::currency::Currency;
use crate::errors::WorkletResult;
use crate::reporting::WorkletScope;
use crate::worklet::{BiddingLogic, GenerateBidArgs, ReportWinArgs, WorkletEntry, WorkletKind};

inventory::submit!(WorkletEntry { script: "bidding_logic_currency.js", kind: WorkletKind::Bidding(currency_bidder) });

fn currency_bidder() -> Box<dyn BiddingLogic> {
    Box::new(CurrencyBidder)
}

/// Bids `userBiddingSignals.bid` in `userBiddingSignals.currency`.
///
/// Without a currency the bid is left unspecified, which every currency
/// check accepts.
pub struct CurrencyBidder;

impl BiddingLogic for CurrencyBidder {
    fn generate_bid(&mut self, args: &GenerateBidArgs, _scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        let signals = args.interest_group.user_bidding_signals.as_ref();
        let ad = first_ad(&args.interest_group)?;
        let mut bid = Bid::new(number_field(signals, "bid").unwrap_or(1.0), ad.render_url.clone());
        if let Some(code) = signals.and_then(|s| s.get("currency")).and_then(|c| c.as_str()) {
            bid = bid.with_currency(Currency::parse(code)?);
        }
        bid.ad_cost = number_field(signals, "adCost");
        bid.allow_component_auction = true;
        Ok(GenerateBidOutput::Single(bid))
    }

    fn report_win(&mut self, args: &ReportWinArgs, scope: &mut WorkletScope) -> WorkletResult<()> {
        let signals = &args.browser_signals;
        scope.send_report_to(&format!(
            "{}/echo?bidder_report&bid={}&currency={}&hsob={}&hsobCurrency={}",
            signals.interest_group_owner,
            signals.bid,
            crate::currency::currency_label(signals.bid_currency),
            signals.highest_scoring_other_bid,
            crate::currency::currency_label(signals.highest_scoring_other_bid_currency),
        ))?;
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

    fn run(signals: serde_json::Value) -> WorkletResult<GenerateBidOutput> {
        let mut g = group();
        g.user_bidding_signals = Some(signals);
        let mut scope = WorkletScope::new(Phase::GenerateBid, Arc::new(AtomicBool::new(false)));
        CurrencyBidder.generate_bid(&bid_args(g), &mut scope)
    }

    #[test]
    fn test_bid_carries_currency() {
        let output = run(json!({"bid": 5, "currency": "USD", "adCost": 0.5})).unwrap();
        let bid = &output.bids()[0];
        assert_eq!(bid.bid, 5.0);
        assert_eq!(bid.bid_currency, Some(Currency::parse("USD").unwrap()));
        assert_eq!(bid.ad_cost, Some(0.5));
    }

    #[test]
    fn test_bad_currency_code_throws() {
        assert!(matches!(run(json!({"currency": "usd"})), Err(WorkletError::Contract(_))));
    }
}
