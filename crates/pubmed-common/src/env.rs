//! Environment variable helpers used by configuration loaders

use crate::error::{CommonError, Result};
use std::str::FromStr;

/// Value of `name`, or `default` when unset or blank
pub fn var_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

/// Optional value of `name`; blank counts as unset
pub fn var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `name` into `T`, falling back to `default` when unset
///
/// A value that is set but does not parse is an error rather than a silent
/// fallback.
pub fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match var_opt(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CommonError::invalid_env(name, &raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_uses_default_when_unset() {
        let value: u32 = parse_or("PUBMED_COMMON_TEST_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        std::env::set_var("PUBMED_COMMON_TEST_BAD_VAR", "seven");
        let result: Result<u32> = parse_or("PUBMED_COMMON_TEST_BAD_VAR", 7);
        assert!(matches!(result, Err(CommonError::Config(_))));
        std::env::remove_var("PUBMED_COMMON_TEST_BAD_VAR");
    }

    #[test]
    fn test_var_or_treats_blank_as_unset() {
        std::env::set_var("PUBMED_COMMON_TEST_BLANK_VAR", "  ");
        assert_eq!(var_or("PUBMED_COMMON_TEST_BLANK_VAR", "fallback"), "fallback");
        std::env::remove_var("PUBMED_COMMON_TEST_BLANK_VAR");
    }
}
