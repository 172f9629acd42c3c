use crate::errors::{ContractError, ContractResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an unspecified currency is shown to worklets in browserSignals
pub const UNSPECIFIED_CURRENCY: &str = "???";

/// ISO-4217 style currency tag: exactly three uppercase ASCII letters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn parse(code: &str) -> ContractResult<Self> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(ContractError::InvalidCurrency(code.to_string()));
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn as_str(&self) -> &str {
        // parse() only admits ASCII uppercase letters
        std::str::from_utf8(&self.0).unwrap_or(UNSPECIFIED_CURRENCY)
    }
}

impl TryFrom<String> for Currency {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.as_str().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// browserSignals rendering of an optional currency
pub fn currency_label(currency: Option<Currency>) -> String {
    currency.map(|c| c.to_string()).unwrap_or_else(|| UNSPECIFIED_CURRENCY.to_string())
}

/// Parse a browserSignals currency label back, mapping "???" to unspecified
pub fn parse_currency_label(label: &str) -> ContractResult<Option<Currency>> {
    if label == UNSPECIFIED_CURRENCY {
        Ok(None)
    } else {
        Currency::parse(label).map(Some)
    }
}

/// A bid currency satisfies a constraint unless both are specified and differ.
/// An unspecified side makes the comparison permissive.
pub fn check_currency(expected: Option<Currency>, actual: Option<Currency>) -> ContractResult<()> {
    match (expected, actual) {
        (Some(expected), Some(actual)) if expected != actual => Err(ContractError::CurrencyMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Value of a bid in the seller's currency, as used for ranking and reporting.
///
/// - no sellerCurrency: the bid as is, any conversion is ignored
/// - bid explicitly in sellerCurrency: a supplied conversion must not change the value
/// - bid currency unspecified: the conversion is used when supplied, else the bid
/// - bid in another currency: the conversion is required
pub fn bid_in_seller_currency(
    bid: f64,
    bid_currency: Option<Currency>,
    seller_currency: Option<Currency>,
    incoming_bid_in_seller_currency: Option<f64>,
) -> ContractResult<f64> {
    if let Some(converted) = incoming_bid_in_seller_currency {
        if !converted.is_finite() || converted < 0.0 {
            return Err(ContractError::malformed(
                "incomingBidInSellerCurrency",
                format!("{} is not a non-negative number", converted),
            ));
        }
    }
    let Some(seller_currency) = seller_currency else {
        return Ok(bid);
    };
    match bid_currency {
        Some(currency) if currency == seller_currency => match incoming_bid_in_seller_currency {
            Some(converted) if converted != bid => Err(ContractError::ConversionOfNativeBid { bid, converted }),
            _ => Ok(bid),
        },
        None => Ok(incoming_bid_in_seller_currency.unwrap_or(bid)),
        Some(currency) => incoming_bid_in_seller_currency.ok_or_else(|| ContractError::MissingCurrencyConversion {
            bid_currency: currency.to_string(),
            seller_currency: seller_currency.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency::parse("USD").unwrap()
    }

    fn eur() -> Currency {
        Currency::parse("EUR").unwrap()
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(usd().as_str(), "USD");
        assert!(Currency::parse("usd").is_err());
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("USDX").is_err());
        assert!(Currency::parse("???").is_err());
    }

    #[test]
    fn test_currency_label_round_trip_for_unspecified() {
        assert_eq!(currency_label(None), "???");
        assert_eq!(parse_currency_label("???").unwrap(), None);
        assert_eq!(parse_currency_label("EUR").unwrap(), Some(eur()));
    }

    #[test]
    fn test_check_currency_is_permissive_when_unspecified() {
        assert!(check_currency(Some(usd()), None).is_ok());
        assert!(check_currency(None, Some(usd())).is_ok());
        assert!(check_currency(Some(usd()), Some(usd())).is_ok());
        assert!(matches!(
            check_currency(Some(usd()), Some(eur())),
            Err(ContractError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_foreign_bid_requires_conversion() {
        let err = bid_in_seller_currency(10.0, Some(usd()), Some(eur()), None).unwrap_err();
        assert!(matches!(err, ContractError::MissingCurrencyConversion { .. }));
        let converted = bid_in_seller_currency(10.0, Some(usd()), Some(eur()), Some(9.1)).unwrap();
        assert_eq!(converted, 9.1);
    }

    #[test]
    fn test_native_bid_conversion_must_not_change_value() {
        assert_eq!(bid_in_seller_currency(10.0, Some(eur()), Some(eur()), None).unwrap(), 10.0);
        assert_eq!(bid_in_seller_currency(10.0, Some(eur()), Some(eur()), Some(10.0)).unwrap(), 10.0);
        assert!(matches!(
            bid_in_seller_currency(10.0, Some(eur()), Some(eur()), Some(9.0)),
            Err(ContractError::ConversionOfNativeBid { .. })
        ));
    }

    #[test]
    fn test_unspecified_bid_currency_is_permissive() {
        assert_eq!(bid_in_seller_currency(10.0, None, Some(eur()), None).unwrap(), 10.0);
        assert_eq!(bid_in_seller_currency(10.0, None, Some(eur()), Some(8.0)).unwrap(), 8.0);
    }

    #[test]
    fn test_no_seller_currency_ignores_conversion() {
        assert_eq!(bid_in_seller_currency(10.0, Some(usd()), None, Some(3.0)).unwrap(), 10.0);
        assert!(bid_in_seller_currency(10.0, Some(usd()), None, Some(-3.0)).is_err());
    }
}
