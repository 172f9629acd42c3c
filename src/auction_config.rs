//! Seller-side auction configuration, including multi-tier auctions.

use crate::ad_size::AdSize;
use crate::aliases::{merge_aliases, require_aliases};
use crate::currency::Currency;
use crate::errors::{ContractError, ContractResult};
use crate::origin::{require_https, Origin};
use crate::per_buyer::PerBuyer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Signals from seller-hosted signed bundles, kept apart from `auctionSignals`/`sellerSignals`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFromSellerSignalsBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_signals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_signals: Option<Value>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    pub per_buyer_signals: PerBuyer<Value>,
}

/// The `directFromSellerSignals` argument; each member is independently null
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectFromSellerSignals {
    pub seller_signals: Option<Value>,
    pub auction_signals: Option<Value>,
    pub per_buyer_signals: Option<Value>,
}

impl DirectFromSellerSignalsBundle {
    /// View handed to a buyer: never includes the seller's own signals
    pub fn for_buyer(&self, buyer: &Origin) -> DirectFromSellerSignals {
        DirectFromSellerSignals {
            seller_signals: None,
            auction_signals: self.auction_signals.clone(),
            per_buyer_signals: self.per_buyer_signals.lookup(buyer).cloned(),
        }
    }

    /// View handed to the seller: never includes per-buyer signals
    pub fn for_seller(&self) -> DirectFromSellerSignals {
        DirectFromSellerSignals {
            seller_signals: self.seller_signals.clone(),
            auction_signals: self.auction_signals.clone(),
            per_buyer_signals: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AuctionConfigWire", into = "AuctionConfigWire")]
pub struct AuctionConfig {
    pub seller: Origin,
    pub decision_logic_url: Url,
    pub trusted_scoring_signals_url: Option<Url>,
    /// Absent for a top-level auction made of component auctions
    pub interest_group_buyers: Option<Vec<Origin>>,
    pub auction_signals: Option<Value>,
    pub seller_signals: Option<Value>,
    pub seller_timeout: Option<u64>,
    pub seller_currency: Option<Currency>,
    pub per_buyer_signals: PerBuyer<Value>,
    pub per_buyer_timeouts: PerBuyer<u64>,
    pub per_buyer_cumulative_timeouts: PerBuyer<u64>,
    pub per_buyer_currencies: PerBuyer<Currency>,
    pub per_buyer_priority_signals: PerBuyer<BTreeMap<String, f64>>,
    pub per_buyer_group_limits: PerBuyer<usize>,
    pub per_buyer_multi_bid_limits: PerBuyer<usize>,
    pub reporting_timeout: Option<u64>,
    pub requested_size: Option<AdSize>,
    pub direct_from_seller_signals: Option<DirectFromSellerSignalsBundle>,
    pub component_auctions: Vec<AuctionConfig>,
}

impl AuctionConfig {
    pub fn new(seller: Origin, decision_logic_url: Url) -> Self {
        Self {
            seller,
            decision_logic_url,
            trusted_scoring_signals_url: None,
            interest_group_buyers: None,
            auction_signals: None,
            seller_signals: None,
            seller_timeout: None,
            seller_currency: None,
            per_buyer_signals: PerBuyer::new(),
            per_buyer_timeouts: PerBuyer::new(),
            per_buyer_cumulative_timeouts: PerBuyer::new(),
            per_buyer_currencies: PerBuyer::new(),
            per_buyer_priority_signals: PerBuyer::new(),
            per_buyer_group_limits: PerBuyer::new(),
            per_buyer_multi_bid_limits: PerBuyer::new(),
            reporting_timeout: None,
            requested_size: None,
            direct_from_seller_signals: None,
            component_auctions: Vec::new(),
        }
    }

    pub fn with_buyers(mut self, buyers: Vec<Origin>) -> Self {
        self.interest_group_buyers = Some(buyers);
        self
    }

    pub fn is_multi_tier(&self) -> bool {
        !self.component_auctions.is_empty()
    }

    pub fn buyers(&self) -> &[Origin] {
        self.interest_group_buyers.as_deref().unwrap_or(&[])
    }

    pub fn validate(&self) -> ContractResult<()> {
        self.validate_at_depth(0)
    }

    fn validate_at_depth(&self, depth: usize) -> ContractResult<()> {
        require_https("decisionLogicURL", &self.decision_logic_url)?;
        self.seller.require_same_origin("decisionLogicURL", &self.decision_logic_url)?;
        if let Some(url) = &self.trusted_scoring_signals_url {
            require_https("trustedScoringSignalsURL", url)?;
        }
        if self.is_multi_tier() {
            if depth > 0 {
                return Err(ContractError::malformed("componentAuctions", "component auctions cannot nest further"));
            }
            if self.interest_group_buyers.is_some() {
                return Err(ContractError::malformed(
                    "interestGroupBuyers",
                    "not allowed together with componentAuctions",
                ));
            }
        }
        let limits = self.per_buyer_group_limits.wildcard().into_iter();
        if limits.chain(self.buyers().iter().filter_map(|b| self.per_buyer_group_limits.exact(b))).any(|limit| *limit == 0) {
            return Err(ContractError::malformed("perBuyerGroupLimits", "limits must be positive"));
        }
        let multi = self.per_buyer_multi_bid_limits.wildcard().into_iter();
        if multi.chain(self.buyers().iter().filter_map(|b| self.per_buyer_multi_bid_limits.exact(b))).any(|limit| *limit == 0) {
            return Err(ContractError::malformed("perBuyerMultiBidLimits", "limits must be positive"));
        }
        for component in &self.component_auctions {
            component.validate_at_depth(depth + 1)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuctionConfigWire {
    seller: Origin,
    #[serde(rename = "decisionLogicURL", default, skip_serializing_if = "Option::is_none")]
    decision_logic_url_upper: Option<Url>,
    #[serde(rename = "decisionLogicUrl", default, skip_serializing_if = "Option::is_none")]
    decision_logic_url_lower: Option<Url>,
    #[serde(rename = "trustedScoringSignalsURL", default, skip_serializing_if = "Option::is_none")]
    trusted_scoring_signals_url_upper: Option<Url>,
    #[serde(rename = "trustedScoringSignalsUrl", default, skip_serializing_if = "Option::is_none")]
    trusted_scoring_signals_url_lower: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interest_group_buyers: Option<Vec<Origin>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auction_signals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seller_signals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seller_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seller_currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    per_buyer_signals: PerBuyer<Value>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    per_buyer_timeouts: PerBuyer<u64>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    per_buyer_cumulative_timeouts: PerBuyer<u64>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    per_buyer_currencies: PerBuyer<Currency>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    per_buyer_priority_signals: PerBuyer<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    per_buyer_group_limits: PerBuyer<usize>,
    #[serde(default, skip_serializing_if = "PerBuyer::is_empty")]
    per_buyer_multi_bid_limits: PerBuyer<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reporting_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    requested_size: Option<AdSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    direct_from_seller_signals: Option<DirectFromSellerSignalsBundle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    component_auctions: Vec<AuctionConfig>,
}

impl TryFrom<AuctionConfigWire> for AuctionConfig {
    type Error = ContractError;

    fn try_from(wire: AuctionConfigWire) -> Result<Self, Self::Error> {
        let config = AuctionConfig {
            seller: wire.seller,
            decision_logic_url: require_aliases(vec![
                ("decisionLogicURL", wire.decision_logic_url_upper),
                ("decisionLogicUrl", wire.decision_logic_url_lower),
            ])?,
            trusted_scoring_signals_url: merge_aliases(vec![
                ("trustedScoringSignalsURL", wire.trusted_scoring_signals_url_upper),
                ("trustedScoringSignalsUrl", wire.trusted_scoring_signals_url_lower),
            ])?,
            interest_group_buyers: wire.interest_group_buyers,
            auction_signals: wire.auction_signals,
            seller_signals: wire.seller_signals,
            seller_timeout: wire.seller_timeout,
            seller_currency: wire.seller_currency,
            per_buyer_signals: wire.per_buyer_signals,
            per_buyer_timeouts: wire.per_buyer_timeouts,
            per_buyer_cumulative_timeouts: wire.per_buyer_cumulative_timeouts,
            per_buyer_currencies: wire.per_buyer_currencies,
            per_buyer_priority_signals: wire.per_buyer_priority_signals,
            per_buyer_group_limits: wire.per_buyer_group_limits,
            per_buyer_multi_bid_limits: wire.per_buyer_multi_bid_limits,
            reporting_timeout: wire.reporting_timeout,
            requested_size: wire.requested_size,
            direct_from_seller_signals: wire.direct_from_seller_signals,
            component_auctions: wire.component_auctions,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<AuctionConfig> for AuctionConfigWire {
    fn from(config: AuctionConfig) -> Self {
        AuctionConfigWire {
            seller: config.seller,
            decision_logic_url_upper: Some(config.decision_logic_url.clone()),
            decision_logic_url_lower: Some(config.decision_logic_url),
            trusted_scoring_signals_url_upper: config.trusted_scoring_signals_url.clone(),
            trusted_scoring_signals_url_lower: config.trusted_scoring_signals_url,
            interest_group_buyers: config.interest_group_buyers,
            auction_signals: config.auction_signals,
            seller_signals: config.seller_signals,
            seller_timeout: config.seller_timeout,
            seller_currency: config.seller_currency,
            per_buyer_signals: config.per_buyer_signals,
            per_buyer_timeouts: config.per_buyer_timeouts,
            per_buyer_cumulative_timeouts: config.per_buyer_cumulative_timeouts,
            per_buyer_currencies: config.per_buyer_currencies,
            per_buyer_priority_signals: config.per_buyer_priority_signals,
            per_buyer_group_limits: config.per_buyer_group_limits,
            per_buyer_multi_bid_limits: config.per_buyer_multi_bid_limits,
            reporting_timeout: config.reporting_timeout,
            requested_size: config.requested_size,
            direct_from_seller_signals: config.direct_from_seller_signals,
            component_auctions: config.component_auctions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(value: Value) -> Result<AuctionConfig, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_minimal_config_and_aliases() {
        let config = parse(json!({
            "seller": "https://seller.test",
            "decisionLogicUrl": "https://seller.test/decision_logic.js",
            "interestGroupBuyers": ["https://buyer.test"],
            "perBuyerCurrencies": {"https://buyer.test": "USD", "*": "EUR"},
        }))
        .unwrap();
        let buyer = Origin::parse("https://buyer.test").unwrap();
        let other = Origin::parse("https://other.test").unwrap();
        assert_eq!(config.per_buyer_currencies.lookup(&buyer).map(|c| c.as_str()), Some("USD"));
        assert_eq!(config.per_buyer_currencies.lookup(&other).map(|c| c.as_str()), Some("EUR"));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["decisionLogicURL"], value["decisionLogicUrl"]);
    }

    #[test]
    fn test_decision_logic_must_be_same_origin() {
        let result = parse(json!({
            "seller": "https://seller.test",
            "decisionLogicURL": "https://other.test/decision_logic.js",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_component_auctions_exclude_buyers() {
        let result = parse(json!({
            "seller": "https://top.test",
            "decisionLogicURL": "https://top.test/decision_logic.js",
            "interestGroupBuyers": ["https://buyer.test"],
            "componentAuctions": [{
                "seller": "https://component.test",
                "decisionLogicURL": "https://component.test/decision_logic.js",
            }],
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_component_auctions_cannot_nest() {
        let result = parse(json!({
            "seller": "https://top.test",
            "decisionLogicURL": "https://top.test/decision_logic.js",
            "componentAuctions": [{
                "seller": "https://component.test",
                "decisionLogicURL": "https://component.test/decision_logic.js",
                "componentAuctions": [{
                    "seller": "https://deep.test",
                    "decisionLogicURL": "https://deep.test/decision_logic.js",
                }],
            }],
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_direct_from_seller_views() {
        let buyer = Origin::parse("https://buyer.test").unwrap();
        let bundle = DirectFromSellerSignalsBundle {
            seller_signals: Some(json!("s")),
            auction_signals: Some(json!("a")),
            per_buyer_signals: PerBuyer::new().with_entry(buyer.clone(), json!("b")),
        };
        let for_buyer = serde_json::to_value(bundle.for_buyer(&buyer)).unwrap();
        assert_eq!(for_buyer, json!({"sellerSignals": null, "auctionSignals": "a", "perBuyerSignals": "b"}));
        let for_seller = serde_json::to_value(bundle.for_seller()).unwrap();
        assert_eq!(for_seller, json!({"sellerSignals": "s", "auctionSignals": "a", "perBuyerSignals": null}));
    }

    #[test]
    fn test_zero_group_limit_is_rejected() {
        let result = parse(json!({
            "seller": "https://seller.test",
            "decisionLogicURL": "https://seller.test/decision_logic.js",
            "perBuyerGroupLimits": {"*": 0},
        }));
        assert!(result.is_err());
    }
}
