use thiserror::Error;

/// Violations of the worklet argument/return contract.
///
/// These never abort an auction: the coordinator turns them into a rejection
/// of the single bid, score or report they were raised for.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractError {
    /// A required field is missing or has the wrong shape
    #[error("malformed {field}: {reason}")]
    Malformed { field: String, reason: String },

    /// Two casing variants of the same field carry different values
    #[error("'{first}' and '{second}' must be identical ('{first_value}' != '{second_value}')")]
    AliasConflict {
        first: &'static str,
        second: &'static str,
        first_value: String,
        second_value: String,
    },

    #[error("invalid url for {field}: {reason}")]
    InvalidUrl { field: String, reason: String },

    #[error("{field} must be same-origin with {origin}, got {url}")]
    CrossOrigin { field: String, origin: String, url: String },

    #[error("invalid currency code '{0}'")]
    InvalidCurrency(String),

    /// Bid currency does not match the currency configured for the buyer or seller
    #[error("bid currency {actual} does not match required currency {expected}")]
    CurrencyMismatch { expected: String, actual: String },

    /// scoreAd must provide incomingBidInSellerCurrency for a bid in a foreign currency
    #[error("bid in {bid_currency} needs incomingBidInSellerCurrency to be scored in {seller_currency}")]
    MissingCurrencyConversion { bid_currency: String, seller_currency: String },

    #[error("incomingBidInSellerCurrency {converted} changes bid {bid} already in seller currency")]
    ConversionOfNativeBid { bid: f64, converted: f64 },

    #[error("invalid ad size '{0}'")]
    InvalidSize(String),

    #[error("{what} count {count} exceeds limit {limit}")]
    LimitExceeded { what: &'static str, count: usize, limit: usize },

    #[error("render url {0} does not match any ad of the interest group")]
    UnknownRender(String),

    #[error("bid made in a component auction must set allowComponentAuction")]
    ComponentAuctionNotAllowed,

    /// A side-effect API was called from a phase that does not expose it
    #[error("{api} is not available in {phase}")]
    ApiUnavailable { api: &'static str, phase: &'static str },

    #[error("{api} may only be called once per invocation")]
    CalledTwice { api: &'static str },
}

impl ContractError {
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ContractError::Malformed { field: field.into(), reason: reason.into() }
    }
}

/// Why a worklet invocation produced no contribution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkletError {
    /// The worklet threw, e.g. an argument validator found an unexpected value
    #[error("worklet threw: {0}")]
    Thrown(String),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("{phase} timed out after {timeout_ms} ms")]
    Timeout { phase: &'static str, timeout_ms: u64 },

    #[error("no worklet registered for {0}")]
    UnknownScript(String),

    #[error("wasm helper failed: {0}")]
    Wasm(String),
}

impl WorkletError {
    /// Shorthand used by worklets to "throw" a descriptive message
    pub fn thrown(message: impl Into<String>) -> Self {
        WorkletError::Thrown(message.into())
    }
}

pub type ContractResult<T> = Result<T, ContractError>;
pub type WorkletResult<T> = Result<T, WorkletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_converts_into_worklet_error() {
        let err: WorkletError = ContractError::ComponentAuctionNotAllowed.into();
        assert_eq!(err.to_string(), "bid made in a component auction must set allowComponentAuction");
    }

    #[test]
    fn test_alias_conflict_message_names_both_fields() {
        let err = ContractError::AliasConflict {
            first: "biddingLogicURL",
            second: "biddingLogicUrl",
            first_value: "https://a.test/x.js".to_string(),
            second_value: "https://a.test/y.js".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("biddingLogicURL"));
        assert!(message.contains("biddingLogicUrl"));
    }
}
