//! scoreAd arguments and results, and how a score turns into a ranked candidate.

use crate::browser_signals::RenderUrlField;
use crate::currency::{bid_in_seller_currency, check_currency, Currency};
use crate::errors::{ContractError, ContractResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use url::Url;

/// Reasons a seller may give for rejecting a bid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    NotAvailable,
    InvalidBid,
    BidBelowAuctionFloor,
    PendingApprovalByExchange,
    DisapprovedByExchange,
    BlockedByPublisher,
    LanguageExclusions,
    CategoryExclusions,
}

impl RejectReason {
    /// Numeric form used as the `bid-reject-reason` aggregation signal
    pub fn index(self) -> u32 {
        match self {
            RejectReason::NotAvailable => 0,
            RejectReason::InvalidBid => 1,
            RejectReason::BidBelowAuctionFloor => 2,
            RejectReason::PendingApprovalByExchange => 3,
            RejectReason::DisapprovedByExchange => 4,
            RejectReason::BlockedByPublisher => 5,
            RejectReason::LanguageExclusions => 6,
            RejectReason::CategoryExclusions => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NotAvailable => "not-available",
            RejectReason::InvalidBid => "invalid-bid",
            RejectReason::BidBelowAuctionFloor => "bid-below-auction-floor",
            RejectReason::PendingApprovalByExchange => "pending-approval-by-exchange",
            RejectReason::DisapprovedByExchange => "disapproved-by-exchange",
            RejectReason::BlockedByPublisher => "blocked-by-publisher",
            RejectReason::LanguageExclusions => "language-exclusions",
            RejectReason::CategoryExclusions => "category-exclusions",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First scoreAd argument: what the seller may see of the ad
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdMetadata {
    #[serde(flatten)]
    pub render_url: RenderUrlField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AdMetadata {
    pub fn new(render_url: Url, metadata: Option<Value>) -> Self {
        Self { render_url: RenderUrlField(render_url), metadata }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDetails {
    pub desirability: f64,
    #[serde(default)]
    pub allow_component_auction: bool,
    /// Modified bid; only honored for a component seller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_bid_in_seller_currency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
}

/// What scoreAd returned: a bare desirability or the detailed object
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreAdOutput {
    Bare(f64),
    Detailed(ScoreDetails),
}

impl ScoreAdOutput {
    pub fn desirability(&self) -> f64 {
        match self {
            ScoreAdOutput::Bare(desirability) => *desirability,
            ScoreAdOutput::Detailed(details) => details.desirability,
        }
    }

    /// A bare number never allows the bid into the top-level auction
    pub fn allow_component_auction(&self) -> bool {
        match self {
            ScoreAdOutput::Bare(_) => false,
            ScoreAdOutput::Detailed(details) => details.allow_component_auction,
        }
    }

    pub fn details(&self) -> Option<&ScoreDetails> {
        match self {
            ScoreAdOutput::Bare(_) => None,
            ScoreAdOutput::Detailed(details) => Some(details),
        }
    }
}

impl Serialize for ScoreAdOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScoreAdOutput::Bare(desirability) => serializer.serialize_f64(*desirability),
            ScoreAdOutput::Detailed(details) => details.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ScoreAdOutput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_f64()
                .map(ScoreAdOutput::Bare)
                .ok_or_else(|| D::Error::custom("desirability is not representable as f64")),
            other @ Value::Object(_) => serde_json::from_value(other).map(ScoreAdOutput::Detailed).map_err(D::Error::custom),
            other => Err(D::Error::custom(format!("scoreAd must return a number or an object, got {}", other))),
        }
    }
}

/// What the seller side knows about the bid being scored
#[derive(Debug, Clone, Copy)]
pub struct ScoreRules {
    pub bid: f64,
    pub bid_currency: Option<Currency>,
    pub seller_currency: Option<Currency>,
    /// The scoring seller runs a component auction of a multi-tier auction
    pub component_seller: bool,
}

/// Bid value after a component seller's modification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModifiedBid {
    pub bid: f64,
    pub bid_currency: Option<Currency>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreVerdict {
    /// The bid stays in the auction
    Accepted {
        desirability: f64,
        bid_in_seller_currency: f64,
        modified_bid: Option<ModifiedBid>,
    },
    /// Eliminated; to the bidder this looks the same as being outscored
    Rejected(RejectReason),
}

/// Turn a scoreAd output into a verdict on the bid.
///
/// Contract violations (non-finite numbers, a missing or inconsistent currency
/// conversion, an ill-typed modified bid) are errors; a low desirability or a
/// component bid that is not allowed through is a rejection.
pub fn judge_score(output: &ScoreAdOutput, rules: &ScoreRules) -> ContractResult<ScoreVerdict> {
    let desirability = output.desirability();
    if !desirability.is_finite() {
        return Err(ContractError::malformed("desirability", format!("{} is not finite", desirability)));
    }
    if desirability <= 0.0 {
        let reason = output.details().and_then(|d| d.reject_reason).unwrap_or(RejectReason::NotAvailable);
        return Ok(ScoreVerdict::Rejected(reason));
    }
    if rules.component_seller && !output.allow_component_auction() {
        return Ok(ScoreVerdict::Rejected(RejectReason::NotAvailable));
    }
    let incoming = output.details().and_then(|d| d.incoming_bid_in_seller_currency);
    let bid_in_seller_currency = bid_in_seller_currency(rules.bid, rules.bid_currency, rules.seller_currency, incoming)?;

    let mut modified_bid = None;
    if rules.component_seller {
        if let Some(details) = output.details() {
            if let Some(bid) = details.bid {
                if !bid.is_finite() || bid <= 0.0 {
                    return Err(ContractError::malformed("bid", format!("modified bid {} must be positive", bid)));
                }
                check_currency(rules.seller_currency, details.bid_currency)?;
                modified_bid = Some(ModifiedBid { bid, bid_currency: details.bid_currency.or(rules.seller_currency) });
            }
        }
    }
    Ok(ScoreVerdict::Accepted { desirability, bid_in_seller_currency, modified_bid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn usd() -> Option<Currency> {
        Some(Currency::parse("USD").unwrap())
    }

    fn eur() -> Option<Currency> {
        Some(Currency::parse("EUR").unwrap())
    }

    fn rules(bid_currency: Option<Currency>, seller_currency: Option<Currency>) -> ScoreRules {
        ScoreRules { bid: 10.0, bid_currency, seller_currency, component_seller: false }
    }

    #[test]
    fn test_output_shapes() {
        let bare: ScoreAdOutput = serde_json::from_value(json!(3.5)).unwrap();
        assert_eq!(bare, ScoreAdOutput::Bare(3.5));
        assert!(!bare.allow_component_auction());
        let detailed: ScoreAdOutput = serde_json::from_value(json!({
            "desirability": 2,
            "allowComponentAuction": true,
            "rejectReason": "blocked-by-publisher",
        }))
        .unwrap();
        assert!(detailed.allow_component_auction());
        assert_eq!(detailed.details().unwrap().reject_reason, Some(RejectReason::BlockedByPublisher));
        assert!(serde_json::from_value::<ScoreAdOutput>(json!("high")).is_err());
        assert!(serde_json::from_value::<ScoreAdOutput>(json!({"desirability": 1, "rejectReason": "bogus"})).is_err());
    }

    #[test]
    fn test_zero_desirability_rejects_with_reason() {
        let output = ScoreAdOutput::Detailed(ScoreDetails {
            desirability: 0.0,
            reject_reason: Some(RejectReason::BidBelowAuctionFloor),
            ..ScoreDetails::default()
        });
        assert_eq!(judge_score(&output, &rules(None, None)).unwrap(), ScoreVerdict::Rejected(RejectReason::BidBelowAuctionFloor));
        assert_eq!(judge_score(&ScoreAdOutput::Bare(-1.0), &rules(None, None)).unwrap(), ScoreVerdict::Rejected(RejectReason::NotAvailable));
    }

    #[test]
    fn test_foreign_bid_needs_conversion() {
        let bare = ScoreAdOutput::Bare(5.0);
        assert!(matches!(
            judge_score(&bare, &rules(usd(), eur())),
            Err(ContractError::MissingCurrencyConversion { .. })
        ));
        let converted = ScoreAdOutput::Detailed(ScoreDetails {
            desirability: 10.0,
            incoming_bid_in_seller_currency: Some(9.1),
            ..ScoreDetails::default()
        });
        match judge_score(&converted, &rules(usd(), eur())).unwrap() {
            ScoreVerdict::Accepted { bid_in_seller_currency, .. } => assert_eq!(bid_in_seller_currency, 9.1),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_component_seller_must_allow_and_may_modify() {
        let mut rules = rules(None, eur());
        rules.component_seller = true;
        assert_eq!(judge_score(&ScoreAdOutput::Bare(1.0), &rules).unwrap(), ScoreVerdict::Rejected(RejectReason::NotAvailable));

        let modified = ScoreAdOutput::Detailed(ScoreDetails {
            desirability: 1.0,
            allow_component_auction: true,
            bid: Some(7.0),
            bid_currency: usd(),
            ..ScoreDetails::default()
        });
        assert!(matches!(judge_score(&modified, &rules), Err(ContractError::CurrencyMismatch { .. })));

        let modified = ScoreAdOutput::Detailed(ScoreDetails {
            desirability: 1.0,
            allow_component_auction: true,
            bid: Some(7.0),
            ..ScoreDetails::default()
        });
        match judge_score(&modified, &rules).unwrap() {
            ScoreVerdict::Accepted { modified_bid, .. } => {
                assert_eq!(modified_bid, Some(ModifiedBid { bid: 7.0, bid_currency: eur() }))
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_ad_metadata_shows_both_casings() {
        let meta = AdMetadata::new(Url::parse("https://ads.test/1").unwrap(), Some(json!({"k": 1})));
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, json!({"renderURL": "https://ads.test/1", "renderUrl": "https://ads.test/1", "metadata": {"k": 1}}));
    }
}
