//! In-memory stand-ins for what the host would fetch over the network:
//! trusted key-value signals and wasm helper modules.

use crate::interest_group::InterestGroup;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// One trusted key-value server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValueServer {
    pub data_version: Option<u32>,
    pub values: BTreeMap<String, Value>,
}

impl KeyValueServer {
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with_data_version(mut self, version: u32) -> Self {
        self.data_version = Some(version);
        self
    }

    /// Look up `keys` in order; unknown keys map to null
    fn lookup<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Map<String, Value> {
        keys.into_iter()
            .map(|key| (key.to_string(), self.values.get(key).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

/// Trusted bidding signals as handed to generateBid
#[derive(Debug, Clone, PartialEq)]
pub struct TrustedSignals {
    pub value: Value,
    pub data_version: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    bidding_signals: BTreeMap<Url, KeyValueServer>,
    scoring_signals: BTreeMap<Url, KeyValueServer>,
    wasm_modules: BTreeMap<Url, Arc<[u8]>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bidding_signals(&mut self, url: Url, server: KeyValueServer) {
        self.bidding_signals.insert(url, server);
    }

    pub fn add_scoring_signals(&mut self, url: Url, server: KeyValueServer) {
        self.scoring_signals.insert(url, server);
    }

    pub fn add_wasm_module(&mut self, url: Url, bytes: impl Into<Arc<[u8]>>) {
        self.wasm_modules.insert(url, bytes.into());
    }

    pub fn wasm_module(&self, url: &Url) -> Option<Arc<[u8]>> {
        self.wasm_modules.get(url).cloned()
    }

    /// Values of the group's `trustedBiddingSignalsKeys`, or None without a server
    pub fn bidding_signals(&self, group: &InterestGroup) -> Option<TrustedSignals> {
        let url = group.trusted_bidding_signals_url.as_ref()?;
        let server = self.bidding_signals.get(url)?;
        let keys = group.trusted_bidding_signals_keys.iter().map(String::as_str);
        Some(TrustedSignals { value: Value::Object(server.lookup(keys)), data_version: server.data_version })
    }

    /// Scoring signals keyed by the render url and by each component url
    pub fn scoring_signals(&self, url: Option<&Url>, render_url: &Url, ad_components: &[Url]) -> Option<TrustedSignals> {
        let server = self.scoring_signals.get(url?)?;
        let render = server.lookup(std::iter::once(render_url.as_str()));
        let components = server.lookup(ad_components.iter().map(Url::as_str));
        let mut value = Map::new();
        value.insert("renderURL".to_string(), Value::Object(render.clone()));
        value.insert("renderUrl".to_string(), Value::Object(render));
        if !ad_components.is_empty() {
            value.insert("adComponentRenderURLs".to_string(), Value::Object(components.clone()));
            value.insert("adComponentRenderUrls".to_string(), Value::Object(components));
        }
        Some(TrustedSignals { value: Value::Object(value), data_version: server.data_version })
    }
}
