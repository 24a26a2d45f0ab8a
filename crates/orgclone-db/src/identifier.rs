//! Identifier validation for table and column names interpolated into SQL.
//!
//! Entity types and their fields come from the registry, not from users,
//! but every name is still checked before it reaches a query string.

use orgclone_core::{Error, Result};

/// PostgreSQL truncates identifiers longer than this.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or column name.
///
/// A valid identifier is non-empty, at most 63 bytes, starts with a letter
/// or underscore and contains only ASCII alphanumerics and underscores.
///
/// ```
/// use orgclone_db::validate_identifier;
///
/// assert!(validate_identifier("pricingplan_features").is_ok());
/// assert!(validate_identifier("1table").is_err());
/// assert!(validate_identifier("product; DROP TABLE product").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("Identifier cannot be empty".to_string()));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidInput(format!(
            "Identifier exceeds {} character limit: {}",
            MAX_IDENTIFIER_LEN, name
        )));
    }

    if let Some(first) = name.chars().next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(Error::InvalidInput(format!(
                "Identifier must start with a letter or underscore: {}",
                name
            )));
        }
    }

    if let Some(ch) = name
        .chars()
        .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '_')
    {
        return Err(Error::InvalidInput(format!(
            "Identifier {:?} contains invalid character '{}'",
            name, ch
        )));
    }

    Ok(())
}

/// Validate and double-quote an identifier.
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["product", "pricing_plan_id", "_private", "Website_Hero2", "a"] {
            assert!(validate_identifier(name).is_ok(), "{name}");
        }
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_empty_and_too_long() {
        assert!(matches!(validate_identifier(""), Err(Error::InvalidInput(m)) if m.contains("empty")));
        assert!(
            matches!(validate_identifier(&"a".repeat(64)), Err(Error::InvalidInput(m)) if m.contains("63"))
        );
    }

    #[test]
    fn test_rejects_injection_attempts() {
        let attempts = [
            "product\"; DROP TABLE product; --",
            "product name",
            "product.id",
            "product'",
            "9lives",
            "prod-uct",
        ];
        for name in attempts {
            assert!(validate_identifier(name).is_err(), "{name}");
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("faq").unwrap(), "\"faq\"");
        assert!(quote_identifier("faq\"").is_err());
    }
}
