//! Worklet entry points and the registry mapping script urls to implementations.
//!
//! A worklet is a Rust type behind one of two traits. Returning `Err` is the
//! equivalent of the script throwing; the host never lets one invocation see
//! another's state except through the instance reuse of `groupByOrigin`.

use crate::auction_config::{AuctionConfig, DirectFromSellerSignals};
use crate::bid::GenerateBidOutput;
use crate::browser_signals::{BidBrowserSignals, ReportResultBrowserSignals, ReportWinBrowserSignals, ScoreBrowserSignals};
use crate::errors::{WorkletError, WorkletResult};
use crate::interest_group::InterestGroup;
use crate::reporting::WorkletScope;
use crate::score::{AdMetadata, ScoreAdOutput};
use serde_json::Value;
use url::Url;

/// Arguments of `generateBid(interestGroup, auctionSignals, perBuyerSignals,
/// trustedBiddingSignals, browserSignals, directFromSellerSignals)`
#[derive(Debug, Clone)]
pub struct GenerateBidArgs {
    pub interest_group: InterestGroup,
    pub auction_signals: Option<Value>,
    pub per_buyer_signals: Option<Value>,
    pub trusted_bidding_signals: Option<Value>,
    pub browser_signals: BidBrowserSignals,
    pub direct_from_seller_signals: DirectFromSellerSignals,
}

/// Arguments of `scoreAd(adMetadata, bid, auctionConfig, trustedScoringSignals,
/// browserSignals, directFromSellerSignals)`
#[derive(Debug, Clone)]
pub struct ScoreAdArgs {
    pub ad_metadata: AdMetadata,
    pub bid: f64,
    pub auction_config: AuctionConfig,
    pub trusted_scoring_signals: Option<Value>,
    pub browser_signals: ScoreBrowserSignals,
    pub direct_from_seller_signals: DirectFromSellerSignals,
}

#[derive(Debug, Clone)]
pub struct ReportResultArgs {
    pub auction_config: AuctionConfig,
    pub browser_signals: ReportResultBrowserSignals,
    pub direct_from_seller_signals: DirectFromSellerSignals,
}

#[derive(Debug, Clone)]
pub struct ReportWinArgs {
    pub auction_signals: Option<Value>,
    pub per_buyer_signals: Option<Value>,
    /// Whatever reportResult returned
    pub seller_signals: Option<Value>,
    pub browser_signals: ReportWinBrowserSignals,
    pub direct_from_seller_signals: DirectFromSellerSignals,
}

/// Buyer script: `generateBid` and `reportWin`
pub trait BiddingLogic: Send {
    fn generate_bid(&mut self, args: &GenerateBidArgs, scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput>;

    fn report_win(&mut self, _args: &ReportWinArgs, _scope: &mut WorkletScope) -> WorkletResult<()> {
        Ok(())
    }
}

/// Seller script: `scoreAd` and `reportResult`
pub trait DecisionLogic: Send {
    fn score_ad(&mut self, args: &ScoreAdArgs, scope: &mut WorkletScope) -> WorkletResult<ScoreAdOutput>;

    /// The returned value becomes `sellerSignals` of the winner's reportWin
    fn report_result(&mut self, _args: &ReportResultArgs, _scope: &mut WorkletScope) -> WorkletResult<Option<Value>> {
        Ok(None)
    }
}

pub type BiddingFactory = fn() -> Box<dyn BiddingLogic>;
pub type DecisionFactory = fn() -> Box<dyn DecisionLogic>;

#[derive(Clone, Copy)]
pub enum WorkletKind {
    Bidding(BiddingFactory),
    Decision(DecisionFactory),
}

/// Entry in the worklet registry, keyed by the script file name
#[derive(Clone)]
pub struct WorkletEntry {
    pub script: &'static str,
    pub kind: WorkletKind,
}

inventory::collect!(WorkletEntry);

/// File name part of a script url, which is what worklets are registered under
pub fn script_name(url: &Url) -> &str {
    url.path_segments().and_then(|mut segments| segments.next_back()).unwrap_or("")
}

fn find_entry(url: &Url) -> WorkletResult<&'static WorkletEntry> {
    let name = script_name(url);
    inventory::iter::<WorkletEntry>
        .into_iter()
        .find(|entry| entry.script == name)
        .ok_or_else(|| WorkletError::UnknownScript(url.to_string()))
}

/// Fresh instance of the bidding script at `url`
pub fn load_bidding_logic(url: &Url) -> WorkletResult<Box<dyn BiddingLogic>> {
    match find_entry(url)?.kind {
        WorkletKind::Bidding(factory) => Ok(factory()),
        WorkletKind::Decision(_) => Err(WorkletError::UnknownScript(format!("{} is not a bidding script", url))),
    }
}

/// Fresh instance of the decision script at `url`
pub fn load_decision_logic(url: &Url) -> WorkletResult<Box<dyn DecisionLogic>> {
    match find_entry(url)?.kind {
        WorkletKind::Decision(factory) => Ok(factory()),
        WorkletKind::Bidding(_) => Err(WorkletError::UnknownScript(format!("{} is not a decision script", url))),
    }
}

/// Names of every registered script
pub fn registered_scripts() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<WorkletEntry>.into_iter().map(|entry| entry.script).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_name_is_last_path_segment() {
        let url = Url::parse("https://buyer.test/path/bidding_logic.js?v=2").unwrap();
        assert_eq!(script_name(&url), "bidding_logic.js");
    }

    #[test]
    fn test_lookup_checks_script_kind() {
        let bidding = Url::parse("https://buyer.test/bidding_logic.js").unwrap();
        let decision = Url::parse("https://seller.test/decision_logic.js").unwrap();
        assert!(load_bidding_logic(&bidding).is_ok());
        assert!(load_decision_logic(&decision).is_ok());
        assert!(load_decision_logic(&bidding).is_err());
        let missing = Url::parse("https://buyer.test/nope.js").unwrap();
        assert!(matches!(load_bidding_logic(&missing), Err(WorkletError::UnknownScript(_))));
    }

    #[test]
    fn test_registry_lists_reference_worklets() {
        let scripts = registered_scripts();
        for expected in ["bidding_logic.js", "decision_logic.js", "report_win_loop_forever.js"] {
            assert!(scripts.contains(&expected), "{} not registered", expected);
        }
    }
}
