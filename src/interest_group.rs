//! Buyer-registered interest group and its ads.
//!
//! The in-memory form has one canonical field per concept. The JSON form
//! (`InterestGroupWire`, `AdWire`) carries every historical casing variant
//! of the url fields; reading accepts any subset of them as long as they
//! agree, writing emits all of them with the same value.

use crate::ad_size::AdSize;
use crate::aliases::{merge_aliases, require_aliases};
use crate::errors::{ContractError, ContractResult};
use crate::origin::{require_https, Origin};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Prefix of priority signal keys that only the browser may provide
pub const BROWSER_PRIORITY_SIGNAL_PREFIX: &str = "browserSignals.";

/// How the host may reuse script contexts across the owner's groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    #[default]
    #[serde(rename = "compatibility")]
    Compatibility,
    #[serde(rename = "groupByOrigin", alias = "group-by-origin")]
    GroupByOrigin,
    #[serde(rename = "frozenContext", alias = "frozen-context")]
    FrozenContext,
}

/// Which slot sizes are sent along with the trusted bidding signals request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotSizeMode {
    #[default]
    None,
    SlotSize,
    AllSlotsRequestedSizes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AdWire", into = "AdWire")]
pub struct Ad {
    pub render_url: Url,
    pub metadata: Option<Value>,
    pub size_group: Option<String>,
    pub buyer_reporting_id: Option<String>,
    pub buyer_and_seller_reporting_id: Option<String>,
}

impl Ad {
    pub fn new(render_url: Url) -> Self {
        Self {
            render_url,
            metadata: None,
            size_group: None,
            buyer_reporting_id: None,
            buyer_and_seller_reporting_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdWire {
    #[serde(rename = "renderURL", default, skip_serializing_if = "Option::is_none")]
    render_url_upper: Option<Url>,
    #[serde(rename = "renderUrl", default, skip_serializing_if = "Option::is_none")]
    render_url_lower: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buyer_reporting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buyer_and_seller_reporting_id: Option<String>,
}

impl TryFrom<AdWire> for Ad {
    type Error = ContractError;

    fn try_from(wire: AdWire) -> Result<Self, Self::Error> {
        let render_url = require_aliases(vec![("renderURL", wire.render_url_upper), ("renderUrl", wire.render_url_lower)])?;
        require_https("renderURL", &render_url)?;
        Ok(Ad {
            render_url,
            metadata: wire.metadata,
            size_group: wire.size_group,
            buyer_reporting_id: wire.buyer_reporting_id,
            buyer_and_seller_reporting_id: wire.buyer_and_seller_reporting_id,
        })
    }
}

impl From<Ad> for AdWire {
    fn from(ad: Ad) -> Self {
        AdWire {
            render_url_upper: Some(ad.render_url.clone()),
            render_url_lower: Some(ad.render_url),
            metadata: ad.metadata,
            size_group: ad.size_group,
            buyer_reporting_id: ad.buyer_reporting_id,
            buyer_and_seller_reporting_id: ad.buyer_and_seller_reporting_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InterestGroupWire", into = "InterestGroupWire")]
pub struct InterestGroup {
    pub owner: Origin,
    pub name: String,
    pub priority: f64,
    /// Stored and serialized only; in-memory signals servers return no `priorityVector`
    pub enable_bidding_signals_prioritization: bool,
    pub priority_vector: BTreeMap<String, f64>,
    pub priority_signals_overrides: BTreeMap<String, f64>,
    pub execution_mode: ExecutionMode,
    pub bidding_logic_url: Option<Url>,
    pub bidding_wasm_helper_url: Option<Url>,
    pub update_url: Option<Url>,
    pub trusted_bidding_signals_url: Option<Url>,
    pub trusted_bidding_signals_keys: Vec<String>,
    /// Stored and serialized only; in-memory signals lookups are keyed by name alone
    pub trusted_bidding_signals_slot_size_mode: SlotSizeMode,
    pub user_bidding_signals: Option<Value>,
    pub ads: Vec<Ad>,
    pub ad_components: Vec<Ad>,
    pub ad_sizes: BTreeMap<String, AdSize>,
    pub size_groups: BTreeMap<String, Vec<String>>,
}

impl InterestGroup {
    /// Minimal group: everything else takes its default
    pub fn new(owner: Origin, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            priority: 0.0,
            enable_bidding_signals_prioritization: false,
            priority_vector: BTreeMap::new(),
            priority_signals_overrides: BTreeMap::new(),
            execution_mode: ExecutionMode::default(),
            bidding_logic_url: None,
            bidding_wasm_helper_url: None,
            update_url: None,
            trusted_bidding_signals_url: None,
            trusted_bidding_signals_keys: Vec::new(),
            trusted_bidding_signals_slot_size_mode: SlotSizeMode::default(),
            user_bidding_signals: None,
            ads: Vec::new(),
            ad_components: Vec::new(),
            ad_sizes: BTreeMap::new(),
            size_groups: BTreeMap::new(),
        }
    }

    /// Check cross-field rules that single fields cannot express
    pub fn validate(&self) -> ContractResult<()> {
        if !self.priority.is_finite() {
            return Err(ContractError::malformed("priority", "must be finite"));
        }
        for (field, url) in [
            ("biddingLogicURL", &self.bidding_logic_url),
            ("biddingWasmHelperURL", &self.bidding_wasm_helper_url),
            ("updateURL", &self.update_url),
        ] {
            if let Some(url) = url {
                require_https(field, url)?;
                self.owner.require_same_origin(field, url)?;
            }
        }
        if let Some(url) = &self.trusted_bidding_signals_url {
            require_https("trustedBiddingSignalsURL", url)?;
        }
        for (key, value) in self.priority_vector.iter().chain(self.priority_signals_overrides.iter()) {
            if !value.is_finite() {
                return Err(ContractError::malformed("priorityVector", format!("'{}' is not finite", key)));
            }
        }
        for (group, sizes) in &self.size_groups {
            for size in sizes {
                if !self.ad_sizes.contains_key(size) {
                    return Err(ContractError::malformed("sizeGroups", format!("group '{}' references unknown size '{}'", group, size)));
                }
            }
        }
        for ad in self.ads.iter().chain(self.ad_components.iter()) {
            if let Some(group) = &ad.size_group {
                if !self.size_groups.contains_key(group) {
                    return Err(ContractError::malformed("ads", format!("unknown sizeGroup '{}'", group)));
                }
            }
        }
        Ok(())
    }

    /// A group can only bid with a script and at least one ad
    pub fn can_bid(&self) -> bool {
        self.bidding_logic_url.is_some() && !self.ads.is_empty()
    }

    pub fn find_ad(&self, render_url: &Url) -> Option<&Ad> {
        self.ads.iter().find(|ad| &ad.render_url == render_url)
    }

    pub fn find_ad_component(&self, render_url: &Url) -> Option<&Ad> {
        self.ad_components.iter().find(|ad| &ad.render_url == render_url)
    }

    /// Priority after applying the seller's priority signals.
    ///
    /// Without a priority vector the base priority is used as is. Otherwise the
    /// priority is the dot product of the vector with the merged signals; the
    /// group's own overrides win over the seller, and `browserSignals.*` keys
    /// are only taken from the browser.
    pub fn effective_priority(&self, seller_signals: &BTreeMap<String, f64>) -> f64 {
        if self.priority_vector.is_empty() {
            return self.priority;
        }
        let mut signals: BTreeMap<&str, f64> = BTreeMap::new();
        for (key, value) in seller_signals.iter().chain(self.priority_signals_overrides.iter()) {
            if !key.starts_with(BROWSER_PRIORITY_SIGNAL_PREFIX) {
                signals.insert(key, *value);
            }
        }
        signals.insert("browserSignals.one", 1.0);
        signals.insert("browserSignals.basePriority", self.priority);
        self.priority_vector
            .iter()
            .filter_map(|(key, weight)| signals.get(key.as_str()).map(|signal| weight * signal))
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterestGroupWire {
    owner: Origin,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enable_bidding_signals_prioritization: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    use_bidding_signals_prioritization: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority_vector: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority_signals_overrides: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_mode: Option<ExecutionMode>,
    #[serde(rename = "biddingLogicURL", default, skip_serializing_if = "Option::is_none")]
    bidding_logic_url_upper: Option<Url>,
    #[serde(rename = "biddingLogicUrl", default, skip_serializing_if = "Option::is_none")]
    bidding_logic_url_lower: Option<Url>,
    #[serde(rename = "biddingWasmHelperURL", default, skip_serializing_if = "Option::is_none")]
    bidding_wasm_helper_url_upper: Option<Url>,
    #[serde(rename = "biddingWasmHelperUrl", default, skip_serializing_if = "Option::is_none")]
    bidding_wasm_helper_url_lower: Option<Url>,
    #[serde(rename = "updateURL", default, skip_serializing_if = "Option::is_none")]
    update_url_upper: Option<Url>,
    #[serde(rename = "updateUrl", default, skip_serializing_if = "Option::is_none")]
    update_url_lower: Option<Url>,
    #[serde(rename = "dailyUpdateUrl", default, skip_serializing_if = "Option::is_none")]
    daily_update_url: Option<Url>,
    #[serde(rename = "trustedBiddingSignalsURL", default, skip_serializing_if = "Option::is_none")]
    trusted_bidding_signals_url_upper: Option<Url>,
    #[serde(rename = "trustedBiddingSignalsUrl", default, skip_serializing_if = "Option::is_none")]
    trusted_bidding_signals_url_lower: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trusted_bidding_signals_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trusted_bidding_signals_slot_size_mode: Option<SlotSizeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_bidding_signals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ads: Option<Vec<Ad>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ad_components: Option<Vec<Ad>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ad_sizes: Option<BTreeMap<String, AdSize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size_groups: Option<BTreeMap<String, Vec<String>>>,
}

impl TryFrom<InterestGroupWire> for InterestGroup {
    type Error = ContractError;

    fn try_from(wire: InterestGroupWire) -> Result<Self, Self::Error> {
        let group = InterestGroup {
            owner: wire.owner,
            name: wire.name,
            priority: wire.priority.unwrap_or(0.0),
            enable_bidding_signals_prioritization: merge_aliases(vec![
                ("enableBiddingSignalsPrioritization", wire.enable_bidding_signals_prioritization),
                ("useBiddingSignalsPrioritization", wire.use_bidding_signals_prioritization),
            ])?
            .unwrap_or(false),
            priority_vector: wire.priority_vector.unwrap_or_default(),
            priority_signals_overrides: wire.priority_signals_overrides.unwrap_or_default(),
            execution_mode: wire.execution_mode.unwrap_or_default(),
            bidding_logic_url: merge_aliases(vec![
                ("biddingLogicURL", wire.bidding_logic_url_upper),
                ("biddingLogicUrl", wire.bidding_logic_url_lower),
            ])?,
            bidding_wasm_helper_url: merge_aliases(vec![
                ("biddingWasmHelperURL", wire.bidding_wasm_helper_url_upper),
                ("biddingWasmHelperUrl", wire.bidding_wasm_helper_url_lower),
            ])?,
            update_url: merge_aliases(vec![
                ("updateURL", wire.update_url_upper),
                ("updateUrl", wire.update_url_lower),
                ("dailyUpdateUrl", wire.daily_update_url),
            ])?,
            trusted_bidding_signals_url: merge_aliases(vec![
                ("trustedBiddingSignalsURL", wire.trusted_bidding_signals_url_upper),
                ("trustedBiddingSignalsUrl", wire.trusted_bidding_signals_url_lower),
            ])?,
            trusted_bidding_signals_keys: wire.trusted_bidding_signals_keys.unwrap_or_default(),
            trusted_bidding_signals_slot_size_mode: wire.trusted_bidding_signals_slot_size_mode.unwrap_or_default(),
            user_bidding_signals: wire.user_bidding_signals,
            ads: wire.ads.unwrap_or_default(),
            ad_components: wire.ad_components.unwrap_or_default(),
            ad_sizes: wire.ad_sizes.unwrap_or_default(),
            size_groups: wire.size_groups.unwrap_or_default(),
        };
        group.validate()?;
        Ok(group)
    }
}

impl From<InterestGroup> for InterestGroupWire {
    fn from(group: InterestGroup) -> Self {
        fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
            if items.is_empty() { None } else { Some(items) }
        }
        fn non_empty_map<K, V>(map: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
            if map.is_empty() { None } else { Some(map) }
        }
        InterestGroupWire {
            owner: group.owner,
            name: group.name,
            priority: Some(group.priority),
            enable_bidding_signals_prioritization: Some(group.enable_bidding_signals_prioritization),
            use_bidding_signals_prioritization: Some(group.enable_bidding_signals_prioritization),
            priority_vector: non_empty_map(group.priority_vector),
            priority_signals_overrides: non_empty_map(group.priority_signals_overrides),
            execution_mode: Some(group.execution_mode),
            bidding_logic_url_upper: group.bidding_logic_url.clone(),
            bidding_logic_url_lower: group.bidding_logic_url,
            bidding_wasm_helper_url_upper: group.bidding_wasm_helper_url.clone(),
            bidding_wasm_helper_url_lower: group.bidding_wasm_helper_url,
            update_url_upper: group.update_url.clone(),
            update_url_lower: group.update_url.clone(),
            daily_update_url: group.update_url,
            trusted_bidding_signals_url_upper: group.trusted_bidding_signals_url.clone(),
            trusted_bidding_signals_url_lower: group.trusted_bidding_signals_url,
            trusted_bidding_signals_keys: non_empty(group.trusted_bidding_signals_keys),
            trusted_bidding_signals_slot_size_mode: Some(group.trusted_bidding_signals_slot_size_mode),
            user_bidding_signals: group.user_bidding_signals,
            ads: non_empty(group.ads),
            ad_components: non_empty(group.ad_components),
            ad_sizes: non_empty_map(group.ad_sizes),
            size_groups: non_empty_map(group.size_groups),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ContractResult<InterestGroup> {
        serde_json::from_value(value).map_err(|e| ContractError::malformed("interestGroup", e.to_string()))
    }

    #[test]
    fn test_lower_case_alias_is_accepted() {
        let group = parse(json!({
            "owner": "https://buyer.test",
            "name": "cars",
            "biddingLogicUrl": "https://buyer.test/bidding_logic.js",
            "ads": [{"renderUrl": "https://ads.test/1", "metadata": {"k": 1}}],
        }))
        .unwrap();
        assert_eq!(group.bidding_logic_url.unwrap().as_str(), "https://buyer.test/bidding_logic.js");
        assert_eq!(group.ads[0].render_url.as_str(), "https://ads.test/1");
    }

    #[test]
    fn test_conflicting_aliases_are_rejected() {
        let err = parse(json!({
            "owner": "https://buyer.test",
            "name": "cars",
            "biddingLogicURL": "https://buyer.test/a.js",
            "biddingLogicUrl": "https://buyer.test/b.js",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("biddingLogicURL"));
    }

    #[test]
    fn test_daily_update_url_alias() {
        let group = parse(json!({
            "owner": "https://buyer.test",
            "name": "cars",
            "dailyUpdateUrl": "https://buyer.test/update",
        }))
        .unwrap();
        assert_eq!(group.update_url.unwrap().as_str(), "https://buyer.test/update");
    }

    #[test]
    fn test_serialization_emits_identical_aliases() {
        let mut group = InterestGroup::new(Origin::parse("https://buyer.test").unwrap(), "cars");
        group.bidding_logic_url = Some(Url::parse("https://buyer.test/bidding_logic.js").unwrap());
        group.update_url = Some(Url::parse("https://buyer.test/update").unwrap());
        group.trusted_bidding_signals_url = Some(Url::parse("https://kv.test/signals").unwrap());
        group.ads.push(Ad::new(Url::parse("https://ads.test/1").unwrap()));
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["biddingLogicURL"], json["biddingLogicUrl"]);
        assert_eq!(json["updateURL"], json["updateUrl"]);
        assert_eq!(json["updateURL"], json["dailyUpdateUrl"]);
        assert_eq!(json["trustedBiddingSignalsURL"], json["trustedBiddingSignalsUrl"]);
        assert_eq!(json["ads"][0]["renderURL"], json["ads"][0]["renderUrl"]);
        assert_eq!(json["useBiddingSignalsPrioritization"], json["enableBiddingSignalsPrioritization"]);
        let back: InterestGroup = serde_json::from_value(json).unwrap();
        assert_eq!(back, group);
    }

    #[test]
    fn test_user_bidding_signals_keep_key_order() {
        let group = parse(json!({
            "owner": "https://buyer.test",
            "name": "cars",
            "userBiddingSignals": {"zeta": 1, "alpha": 2, "mid": 3},
        }))
        .unwrap();
        let text = serde_json::to_string(&group.user_bidding_signals).unwrap();
        assert_eq!(text, r#"{"zeta":1,"alpha":2,"mid":3}"#);
    }

    #[test]
    fn test_cross_origin_bidding_logic_is_rejected() {
        let err = parse(json!({
            "owner": "https://buyer.test",
            "name": "cars",
            "biddingLogicURL": "https://elsewhere.test/bidding_logic.js",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("same-origin"));
    }

    #[test]
    fn test_unknown_size_group_is_rejected() {
        let err = parse(json!({
            "owner": "https://buyer.test",
            "name": "cars",
            "ads": [{"renderURL": "https://ads.test/1", "sizeGroup": "missing"}],
        }))
        .unwrap_err();
        assert!(err.to_string().contains("sizeGroup"));
    }

    #[test]
    fn test_execution_mode_accepts_both_spellings() {
        for (text, mode) in [
            ("compatibility", ExecutionMode::Compatibility),
            ("group-by-origin", ExecutionMode::GroupByOrigin),
            ("groupByOrigin", ExecutionMode::GroupByOrigin),
            ("frozenContext", ExecutionMode::FrozenContext),
        ] {
            let parsed: ExecutionMode = serde_json::from_value(json!(text)).unwrap();
            assert_eq!(parsed, mode);
        }
        assert_eq!(serde_json::to_value(ExecutionMode::GroupByOrigin).unwrap(), json!("groupByOrigin"));
        assert_eq!(serde_json::to_value(ExecutionMode::FrozenContext).unwrap(), json!("frozenContext"));
    }

    #[test]
    fn test_effective_priority_dot_product() {
        let mut group = InterestGroup::new(Origin::parse("https://buyer.test").unwrap(), "cars");
        group.priority = 2.0;
        assert_eq!(group.effective_priority(&BTreeMap::new()), 2.0);

        group.priority_vector.insert("foo".to_string(), 3.0);
        group.priority_vector.insert("browserSignals.basePriority".to_string(), 1.0);
        let mut seller = BTreeMap::new();
        seller.insert("foo".to_string(), 2.0);
        // Seller may not spoof browser signals
        seller.insert("browserSignals.basePriority".to_string(), 100.0);
        assert_eq!(group.effective_priority(&seller), 3.0 * 2.0 + 2.0);

        group.priority_signals_overrides.insert("foo".to_string(), -5.0);
        assert_eq!(group.effective_priority(&seller), 3.0 * -5.0 + 2.0);
    }
}
