use crate::errors::{ContractError, ContractResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Serialized https origin such as `https://buyer.test`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin(String);

impl Origin {
    pub fn parse(input: &str) -> ContractResult<Self> {
        let url = parse_https_url("origin", input)?;
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(ContractError::InvalidUrl {
                field: "origin".to_string(),
                reason: format!("'{}' is not a bare origin", input),
            });
        }
        Ok(Self::of(&url))
    }

    /// Origin of an already validated url
    pub fn of(url: &Url) -> Self {
        Origin(url.origin().ascii_serialization())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn host(&self) -> &str {
        self.0.trim_start_matches("https://")
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin().ascii_serialization() == self.0
    }

    /// Check that `url`, found in `field`, belongs to this origin
    pub fn require_same_origin(&self, field: &str, url: &Url) -> ContractResult<()> {
        if self.is_same_origin(url) {
            Ok(())
        } else {
            Err(ContractError::CrossOrigin {
                field: field.to_string(),
                origin: self.0.clone(),
                url: url.to_string(),
            })
        }
    }
}

impl TryFrom<String> for Origin {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Origin::parse(&value)
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a url that must use the https scheme
pub fn parse_https_url(field: &str, input: &str) -> ContractResult<Url> {
    let url = Url::parse(input).map_err(|e| ContractError::InvalidUrl {
        field: field.to_string(),
        reason: format!("'{}': {}", input, e),
    })?;
    require_https(field, &url)?;
    Ok(url)
}

pub fn require_https(field: &str, url: &Url) -> ContractResult<()> {
    if url.scheme() != "https" {
        return Err(ContractError::InvalidUrl {
            field: field.to_string(),
            reason: format!("'{}' is not https", url),
        });
    }
    if url.host_str().is_none() {
        return Err(ContractError::InvalidUrl {
            field: field.to_string(),
            reason: format!("'{}' has no host", url),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin_normalizes_trailing_slash() {
        let origin = Origin::parse("https://Buyer.test/").unwrap();
        assert_eq!(origin.as_str(), "https://buyer.test");
        assert_eq!(origin.host(), "buyer.test");
    }

    #[test]
    fn test_parse_origin_rejects_paths_and_http() {
        assert!(Origin::parse("https://buyer.test/script.js").is_err());
        assert!(Origin::parse("http://buyer.test").is_err());
        assert!(Origin::parse("not a url").is_err());
    }

    #[test]
    fn test_same_origin_check() {
        let origin = Origin::parse("https://buyer.test").unwrap();
        let same = Url::parse("https://buyer.test/bidding_logic.js").unwrap();
        let other = Url::parse("https://other.test/bidding_logic.js").unwrap();
        assert!(origin.require_same_origin("biddingLogicURL", &same).is_ok());
        assert!(matches!(
            origin.require_same_origin("biddingLogicURL", &other),
            Err(ContractError::CrossOrigin { .. })
        ));
    }

    #[test]
    fn test_origin_deserialize_validates() {
        let ok: Result<Origin, _> = serde_json::from_str("\"https://seller.test\"");
        assert!(ok.is_ok());
        let bad: Result<Origin, _> = serde_json::from_str("\"ftp://seller.test\"");
        assert!(bad.is_err());
    }
}
