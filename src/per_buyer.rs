use crate::errors::ContractResult;
use crate::origin::Origin;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Key of the default entry applied to buyers without their own entry
pub const WILDCARD: &str = "*";

/// Seller-supplied mapping keyed by buyer origin, with `'*'` as fallback.
///
/// Lookup is exact match first, wildcard second; absence means "no setting".
#[derive(Debug, Clone, PartialEq)]
pub struct PerBuyer<T> {
    entries: BTreeMap<Origin, T>,
    wildcard: Option<T>,
}

impl<T> Default for PerBuyer<T> {
    fn default() -> Self {
        Self { entries: BTreeMap::new(), wildcard: None }
    }
}

impl<T> PerBuyer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, buyer: Origin, value: T) -> Self {
        self.entries.insert(buyer, value);
        self
    }

    pub fn with_wildcard(mut self, value: T) -> Self {
        self.wildcard = Some(value);
        self
    }

    pub fn insert(&mut self, key: &str, value: T) -> ContractResult<()> {
        if key == WILDCARD {
            self.wildcard = Some(value);
        } else {
            self.entries.insert(Origin::parse(key)?, value);
        }
        Ok(())
    }

    pub fn lookup(&self, buyer: &Origin) -> Option<&T> {
        self.entries.get(buyer).or(self.wildcard.as_ref())
    }

    /// Value configured for exactly this buyer, ignoring the wildcard
    pub fn exact(&self, buyer: &Origin) -> Option<&T> {
        self.entries.get(buyer)
    }

    pub fn wildcard(&self) -> Option<&T> {
        self.wildcard.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.wildcard.is_none()
    }
}

impl<T: Serialize> Serialize for PerBuyer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.entries.len() + usize::from(self.wildcard.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (buyer, value) in &self.entries {
            map.serialize_entry(buyer.as_str(), value)?;
        }
        if let Some(value) = &self.wildcard {
            map.serialize_entry(WILDCARD, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for PerBuyer<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, T>::deserialize(deserializer)?;
        let mut per_buyer = PerBuyer::new();
        for (key, value) in raw {
            per_buyer.insert(&key, value).map_err(D::Error::custom)?;
        }
        Ok(per_buyer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Origin::parse(s).unwrap()
    }

    #[test]
    fn test_exact_match_wins_over_wildcard() {
        let map = PerBuyer::new().with_entry(origin("https://a.test"), 1).with_wildcard(9);
        assert_eq!(map.lookup(&origin("https://a.test")), Some(&1));
        assert_eq!(map.lookup(&origin("https://b.test")), Some(&9));
        assert_eq!(map.exact(&origin("https://b.test")), None);
    }

    #[test]
    fn test_absent_means_no_setting() {
        let map: PerBuyer<u64> = PerBuyer::new().with_entry(origin("https://a.test"), 1);
        assert_eq!(map.lookup(&origin("https://b.test")), None);
    }

    #[test]
    fn test_deserialize_wildcard_and_origins() {
        let map: PerBuyer<String> = serde_json::from_str(r#"{"https://a.test": "USD", "*": "EUR"}"#).unwrap();
        assert_eq!(map.lookup(&origin("https://a.test")).map(String::as_str), Some("USD"));
        assert_eq!(map.wildcard().map(String::as_str), Some("EUR"));
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["*"], "EUR");
    }

    #[test]
    fn test_deserialize_rejects_non_origin_keys() {
        let result: Result<PerBuyer<u64>, _> = serde_json::from_str(r#"{"buyer": 1}"#);
        assert!(result.is_err());
    }
}
