//! `browserSignals` objects the host builds for each worklet phase.

use crate::ad_size::AdSize;
use crate::aliases::require_aliases;
use crate::currency::{currency_label, parse_currency_label, Currency};
use crate::errors::{ContractError, ContractResult};
use crate::origin::Origin;
use crate::wasm_helper::WasmHelper;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Default cap on `adComponents` in one bid
pub const DEFAULT_AD_COMPONENTS_LIMIT: usize = 40;
/// Default cap on the number of bids one generateBid call may return
pub const DEFAULT_MULTI_BID_LIMIT: usize = 1;

/// Position of the current seller in a possibly multi-tier auction.
///
/// Only one of `topLevelSeller` / `componentSeller` can ever be shown to a worklet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "NestingWire", into = "NestingWire")]
pub enum AuctionNesting {
    #[default]
    SingleSeller,
    /// Running inside a component auction; shows `topLevelSeller`
    Component { top_level_seller: Origin },
    /// Top-level seller scoring a component winner; shows `componentSeller`
    TopLevel { component_seller: Origin },
}

impl AuctionNesting {
    pub fn is_component(&self) -> bool {
        matches!(self, AuctionNesting::Component { .. })
    }

    pub fn top_level_seller(&self) -> Option<&Origin> {
        match self {
            AuctionNesting::Component { top_level_seller } => Some(top_level_seller),
            _ => None,
        }
    }

    pub fn component_seller(&self) -> Option<&Origin> {
        match self {
            AuctionNesting::TopLevel { component_seller } => Some(component_seller),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NestingWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_level_seller: Option<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component_seller: Option<Origin>,
}

impl TryFrom<NestingWire> for AuctionNesting {
    type Error = ContractError;

    fn try_from(wire: NestingWire) -> Result<Self, Self::Error> {
        match (wire.top_level_seller, wire.component_seller) {
            (None, None) => Ok(AuctionNesting::SingleSeller),
            (Some(top_level_seller), None) => Ok(AuctionNesting::Component { top_level_seller }),
            (None, Some(component_seller)) => Ok(AuctionNesting::TopLevel { component_seller }),
            (Some(_), Some(_)) => Err(ContractError::malformed(
                "browserSignals",
                "topLevelSeller and componentSeller are mutually exclusive",
            )),
        }
    }
}

impl From<AuctionNesting> for NestingWire {
    fn from(nesting: AuctionNesting) -> Self {
        match nesting {
            AuctionNesting::SingleSeller => NestingWire { top_level_seller: None, component_seller: None },
            AuctionNesting::Component { top_level_seller } => NestingWire { top_level_seller: Some(top_level_seller), component_seller: None },
            AuctionNesting::TopLevel { component_seller } => NestingWire { top_level_seller: None, component_seller: Some(component_seller) },
        }
    }
}

/// `renderURL` / `renderUrl` pair flattened into signal objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RenderUrlWire", into = "RenderUrlWire")]
pub struct RenderUrlField(pub Url);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RenderUrlWire {
    #[serde(rename = "renderURL", default, skip_serializing_if = "Option::is_none")]
    upper: Option<Url>,
    #[serde(rename = "renderUrl", default, skip_serializing_if = "Option::is_none")]
    lower: Option<Url>,
}

impl TryFrom<RenderUrlWire> for RenderUrlField {
    type Error = ContractError;

    fn try_from(wire: RenderUrlWire) -> Result<Self, Self::Error> {
        require_aliases(vec![("renderURL", wire.upper), ("renderUrl", wire.lower)]).map(RenderUrlField)
    }
}

impl From<RenderUrlField> for RenderUrlWire {
    fn from(field: RenderUrlField) -> Self {
        RenderUrlWire { upper: Some(field.0.clone()), lower: Some(field.0) }
    }
}

/// One earlier win of the interest group
#[derive(Debug, Clone, PartialEq)]
pub struct PrevWin {
    pub elapsed: Duration,
    pub ad: Value,
}

/// `prevWins` (seconds, deprecated) and `prevWinsMs` carried together
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "PrevWinsWire", into = "PrevWinsWire")]
pub struct PrevWins(pub Vec<PrevWin>);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrevWinsWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_wins: Option<Vec<(u64, Value)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_wins_ms: Option<Vec<(u64, Value)>>,
}

impl TryFrom<PrevWinsWire> for PrevWins {
    type Error = ContractError;

    fn try_from(wire: PrevWinsWire) -> Result<Self, Self::Error> {
        let from_ms = wire.prev_wins_ms.map(|wins| {
            wins.into_iter().map(|(ms, ad)| PrevWin { elapsed: Duration::from_millis(ms), ad }).collect::<Vec<_>>()
        });
        let from_secs = wire.prev_wins.map(|wins| {
            wins.into_iter().map(|(secs, ad)| PrevWin { elapsed: Duration::from_secs(secs), ad }).collect::<Vec<_>>()
        });
        match (from_ms, from_secs) {
            (Some(ms), Some(secs)) => {
                let consistent = ms.len() == secs.len()
                    && ms.iter().zip(secs.iter()).all(|(a, b)| a.elapsed.as_secs() == b.elapsed.as_secs() && a.ad == b.ad);
                if !consistent {
                    return Err(ContractError::malformed("prevWins", "does not describe the same wins as prevWinsMs"));
                }
                Ok(PrevWins(ms))
            }
            (Some(wins), None) | (None, Some(wins)) => Ok(PrevWins(wins)),
            (None, None) => Ok(PrevWins::default()),
        }
    }
}

impl From<PrevWins> for PrevWinsWire {
    fn from(wins: PrevWins) -> Self {
        PrevWinsWire {
            prev_wins: Some(wins.0.iter().map(|w| (w.elapsed.as_secs(), w.ad.clone())).collect()),
            prev_wins_ms: Some(wins.0.into_iter().map(|w| (w.elapsed.as_millis() as u64, w.ad)).collect()),
        }
    }
}

/// Currency shown as a 3-letter code or `"???"` when unspecified
pub mod currency_label_serde {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(currency: &Option<Currency>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&currency_label(*currency))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Currency>, D::Error> {
        let label = String::deserialize(deserializer)?;
        parse_currency_label(&label).map_err(D::Error::custom)
    }
}

/// browserSignals passed to generateBid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidBrowserSignals {
    pub top_window_hostname: String,
    pub seller: Origin,
    #[serde(flatten)]
    pub nesting: AuctionNesting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_size: Option<AdSize>,
    pub join_count: u32,
    pub bid_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency: Option<u64>,
    #[serde(flatten)]
    pub prev_wins: PrevWins,
    pub ad_components_limit: usize,
    pub multi_bid_limit: usize,
    pub for_debugging_only_in_cooldown_or_lockout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<u32>,
    /// Compiled `biddingWasmHelperURL` module, not part of the JSON form
    #[serde(skip)]
    pub wasm_helper: Option<WasmHelper>,
}

impl BidBrowserSignals {
    pub fn new(top_window_hostname: impl Into<String>, seller: Origin) -> Self {
        Self {
            top_window_hostname: top_window_hostname.into(),
            seller,
            nesting: AuctionNesting::SingleSeller,
            requested_size: None,
            join_count: 1,
            bid_count: 0,
            recency: None,
            prev_wins: PrevWins::default(),
            ad_components_limit: DEFAULT_AD_COMPONENTS_LIMIT,
            multi_bid_limit: DEFAULT_MULTI_BID_LIMIT,
            for_debugging_only_in_cooldown_or_lockout: false,
            data_version: None,
            wasm_helper: None,
        }
    }

    /// A bidder never sits at the top level of a multi-tier auction
    pub fn validate(&self) -> ContractResult<()> {
        if let AuctionNesting::TopLevel { .. } = self.nesting {
            return Err(ContractError::malformed("browserSignals", "componentSeller is not shown to bidders"));
        }
        if self.multi_bid_limit == 0 {
            return Err(ContractError::malformed("multiBidLimit", "must be at least 1"));
        }
        Ok(())
    }
}

/// browserSignals passed to scoreAd
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBrowserSignals {
    pub top_window_hostname: String,
    pub interest_group_owner: Origin,
    #[serde(flatten)]
    pub render_url: RenderUrlField,
    #[serde(default)]
    pub ad_components: Vec<Url>,
    pub bidding_duration_msec: u64,
    #[serde(with = "currency_label_serde")]
    pub bid_currency: Option<Currency>,
    #[serde(flatten)]
    pub nesting: AuctionNesting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<u32>,
    pub for_debugging_only_in_cooldown_or_lockout: bool,
}

/// browserSignals passed to reportResult
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResultBrowserSignals {
    pub top_window_hostname: String,
    pub interest_group_owner: Origin,
    #[serde(flatten)]
    pub render_url: RenderUrlField,
    pub bid: f64,
    #[serde(with = "currency_label_serde")]
    pub bid_currency: Option<Currency>,
    pub desirability: f64,
    pub highest_scoring_other_bid: f64,
    #[serde(with = "currency_label_serde")]
    pub highest_scoring_other_bid_currency: Option<Currency>,
    #[serde(flatten)]
    pub nesting: AuctionNesting,
    /// Bid as modified by the component seller, shown to the top-level seller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_and_seller_reporting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<u32>,
    pub reporting_timeout: u64,
}

/// browserSignals passed to reportWin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWinBrowserSignals {
    pub top_window_hostname: String,
    pub interest_group_owner: Origin,
    pub interest_group_name: String,
    #[serde(flatten)]
    pub render_url: RenderUrlField,
    pub bid: f64,
    #[serde(with = "currency_label_serde")]
    pub bid_currency: Option<Currency>,
    pub highest_scoring_other_bid: f64,
    #[serde(with = "currency_label_serde")]
    pub highest_scoring_other_bid_currency: Option<Currency>,
    pub made_highest_scoring_other_bid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_cost: Option<f64>,
    pub seller: Origin,
    #[serde(flatten)]
    pub nesting: AuctionNesting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modeling_signals: Option<u16>,
    pub join_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_reporting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<u32>,
    pub reporting_timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn origin(s: &str) -> Origin {
        Origin::parse(s).unwrap()
    }

    #[test]
    fn test_bid_signals_defaults_and_shape() {
        let mut signals = BidBrowserSignals::new("publisher.test", origin("https://seller.test"));
        signals.prev_wins = PrevWins(vec![PrevWin { elapsed: Duration::from_millis(2500), ad: json!({"id": 1}) }]);
        let value = serde_json::to_value(&signals).unwrap();
        assert_eq!(value["adComponentsLimit"], 40);
        assert_eq!(value["multiBidLimit"], 1);
        assert_eq!(value["prevWins"], json!([[2, {"id": 1}]]));
        assert_eq!(value["prevWinsMs"], json!([[2500, {"id": 1}]]));
        assert!(value.get("topLevelSeller").is_none());
        assert!(value.get("componentSeller").is_none());
        assert!(value.get("wasmHelper").is_none());
    }

    #[test]
    fn test_component_nesting_shows_only_top_level_seller() {
        let mut signals = BidBrowserSignals::new("publisher.test", origin("https://component.test"));
        signals.nesting = AuctionNesting::Component { top_level_seller: origin("https://top.test") };
        let value = serde_json::to_value(&signals).unwrap();
        assert_eq!(value["topLevelSeller"], "https://top.test");
        assert!(value.get("componentSeller").is_none());
    }

    #[test]
    fn test_both_sellers_are_rejected() {
        let result: Result<AuctionNesting, _> = serde_json::from_value(json!({
            "topLevelSeller": "https://top.test",
            "componentSeller": "https://component.test",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_prev_wins_secs_only_is_accepted() {
        let wins: PrevWins = serde_json::from_value(json!({"prevWins": [[3, "ad"]]})).unwrap();
        assert_eq!(wins.0[0].elapsed, Duration::from_secs(3));
    }

    #[test]
    fn test_inconsistent_prev_wins_are_rejected() {
        let result: Result<PrevWins, _> = serde_json::from_value(json!({
            "prevWins": [[3, "ad"]],
            "prevWinsMs": [[9000, "ad"]],
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_score_signals_show_unspecified_currency() {
        let signals = ScoreBrowserSignals {
            top_window_hostname: "publisher.test".to_string(),
            interest_group_owner: origin("https://buyer.test"),
            render_url: RenderUrlField(Url::parse("https://ads.test/1").unwrap()),
            ad_components: Vec::new(),
            bidding_duration_msec: 3,
            bid_currency: None,
            nesting: AuctionNesting::SingleSeller,
            data_version: None,
            for_debugging_only_in_cooldown_or_lockout: false,
        };
        let value = serde_json::to_value(&signals).unwrap();
        assert_eq!(value["bidCurrency"], "???");
        assert_eq!(value["renderURL"], value["renderUrl"]);
        let back: ScoreBrowserSignals = serde_json::from_value(value).unwrap();
        assert_eq!(back, signals);
    }

    #[test]
    fn test_bidder_may_not_see_component_seller() {
        let mut signals = BidBrowserSignals::new("publisher.test", origin("https://seller.test"));
        signals.nesting = AuctionNesting::TopLevel { component_seller: origin("https://c.test") };
        assert!(signals.validate().is_err());
    }
}
