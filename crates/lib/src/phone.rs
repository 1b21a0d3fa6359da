//! Phone number normalization to a canonical digit string.
//!
//! Callers and WhatsApp senders arrive in mixed formats (`+33 6 12 34 56 78`,
//! `0612345678`, `33612345678`). Store lookups join on exact string equality,
//! so every identifier is normalized before it enters the store, the message
//! log, or an outbound send.

use serde::{Deserialize, Serialize};

/// Rewrite rule for local-format numbers: a leading trunk prefix is replaced
/// by the international country code (e.g. `0612345678` -> `33612345678`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryRule {
    /// Local trunk prefix (default "0").
    #[serde(default = "default_trunk_prefix")]
    pub trunk_prefix: String,

    /// International country code as digits, no "+" (default "33").
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_trunk_prefix() -> String {
    "0".to_string()
}

fn default_country_code() -> String {
    "33".to_string()
}

impl Default for CountryRule {
    fn default() -> Self {
        Self {
            trunk_prefix: default_trunk_prefix(),
            country_code: default_country_code(),
        }
    }
}

/// Normalize a raw contact identifier: keep digits only, then rewrite a
/// leading trunk prefix to the country code. Pure function.
pub fn normalize(raw: &str, rule: &CountryRule) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !rule.trunk_prefix.is_empty() && digits.starts_with(&rule.trunk_prefix) {
        format!("{}{}", rule.country_code, &digits[rule.trunk_prefix.len()..])
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn international_and_local_forms_agree() {
        let rule = CountryRule::default();
        assert_eq!(normalize("+33612345678", &rule), "33612345678");
        assert_eq!(normalize("0612345678", &rule), "33612345678");
        assert_eq!(normalize("33612345678", &rule), "33612345678");
    }

    #[test]
    fn strips_separators_and_spaces() {
        let rule = CountryRule::default();
        assert_eq!(normalize("+33 6 12-34.56.78", &rule), "33612345678");
    }

    #[test]
    fn empty_input_stays_empty() {
        let rule = CountryRule::default();
        assert_eq!(normalize("", &rule), "");
        assert_eq!(normalize("+", &rule), "");
    }

    #[test]
    fn custom_rule_applies() {
        let rule = CountryRule {
            trunk_prefix: "0".to_string(),
            country_code: "44".to_string(),
        };
        assert_eq!(normalize("07700900123", &rule), "447700900123");
    }
}
