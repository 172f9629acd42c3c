use crate::errors::{ContractError, ContractResult};
use std::fmt::Display;

/// Collapse casing variants of one field (`fooURL`, `fooUrl`, ...) into a single value.
///
/// Any subset of the variants may be present; present variants must agree.
pub fn merge_aliases<T: PartialEq + Display>(variants: Vec<(&'static str, Option<T>)>) -> ContractResult<Option<T>> {
    let mut merged: Option<(&'static str, T)> = None;
    for (name, value) in variants {
        let Some(value) = value else { continue };
        match &merged {
            None => merged = Some((name, value)),
            Some((first, existing)) => {
                if *existing != value {
                    return Err(ContractError::AliasConflict {
                        first: *first,
                        second: name,
                        first_value: existing.to_string(),
                        second_value: value.to_string(),
                    });
                }
            }
        }
    }
    Ok(merged.map(|(_, value)| value))
}

/// Like `merge_aliases`, but at least one variant has to be present
pub fn require_aliases<T: PartialEq + Display>(variants: Vec<(&'static str, Option<T>)>) -> ContractResult<T> {
    let field = variants.first().map(|(name, _)| *name).unwrap_or("field");
    merge_aliases(variants)?.ok_or_else(|| ContractError::malformed(field, "missing"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_takes_any_present_variant() {
        let merged = merge_aliases(vec![("fooURL", None), ("fooUrl", Some("x".to_string()))]).unwrap();
        assert_eq!(merged.as_deref(), Some("x"));
    }

    #[test]
    fn test_merge_accepts_identical_variants() {
        let merged = merge_aliases(vec![("a", Some(1)), ("b", Some(1)), ("c", None)]).unwrap();
        assert_eq!(merged, Some(1));
    }

    #[test]
    fn test_merge_rejects_conflicting_variants() {
        let err = merge_aliases(vec![("updateURL", Some("u1")), ("dailyUpdateUrl", Some("u2"))]).unwrap_err();
        assert!(matches!(err, ContractError::AliasConflict { first: "updateURL", second: "dailyUpdateUrl", .. }));
    }

    #[test]
    fn test_require_reports_missing_field() {
        let err = require_aliases::<String>(vec![("renderURL", None), ("renderUrl", None)]).unwrap_err();
        assert_eq!(err, ContractError::malformed("renderURL", "missing"));
    }
}
