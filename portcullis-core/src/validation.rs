use crate::error::ValidationError;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

/// Centralized validation utilities for login attempt input
///
/// Everything that becomes a counter key passes through here first, so a
/// malformed identifier or address is rejected before any counter is touched.
/// Lazy-loaded email validation regex
///
/// This regex validates email addresses according to a practical subset of RFC 5322.
/// It's loaded once at runtime and reused for all email validation operations.
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("Invalid email regex pattern")
});

/// Longest accepted account identifier, matching the practical email limit.
pub const MAX_ACCOUNT_ID_LEN: usize = 254;

/// Validates an email address
///
/// # Examples
///
/// ```rust
/// use portcullis_core::validation::validate_email;
///
/// assert!(validate_email("user@example.com").is_ok());
/// assert!(validate_email("invalid-email").is_err());
/// ```
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::MissingField(
            "Email is required".to_string(),
        ));
    }

    if email.len() > MAX_ACCOUNT_ID_LEN {
        return Err(ValidationError::InvalidEmail(
            "Email is too long".to_string(),
        ));
    }

    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail(format!(
            "Invalid email format: {email}"
        )))
    }
}

/// Normalizes and validates an account identifier
///
/// Identifiers are trimmed and lowercased so `Alice@Example.com ` and
/// `alice@example.com` share one counter. The normalized form must be
/// non-empty, at most [`MAX_ACCOUNT_ID_LEN`] characters, and free of
/// whitespace and control characters.
///
/// # Examples
///
/// ```rust
/// use portcullis_core::validation::normalize_account_id;
///
/// assert_eq!(normalize_account_id(" Alice@Example.com ").unwrap(), "alice@example.com");
/// assert!(normalize_account_id("   ").is_err());
/// ```
pub fn normalize_account_id(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(
            "Account identifier is required".to_string(),
        ));
    }

    if trimmed.chars().count() > MAX_ACCOUNT_ID_LEN {
        return Err(ValidationError::InvalidAccount(
            "Account identifier is too long".to_string(),
        ));
    }

    if trimmed
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::InvalidAccount(
            "Account identifier contains whitespace or control characters".to_string(),
        ));
    }

    Ok(trimmed.to_lowercase())
}

/// Parses a source network address
///
/// IPv4-mapped IPv6 addresses (`::ffff:10.0.0.1`) are folded into their IPv4
/// form so a dual-stack listener cannot split one client across two counters.
///
/// # Examples
///
/// ```rust
/// use portcullis_core::validation::parse_address;
///
/// assert_eq!(parse_address("::ffff:10.0.0.1").unwrap().to_string(), "10.0.0.1");
/// assert!(parse_address("10.0.0").is_err());
/// ```
pub fn parse_address(raw: &str) -> Result<IpAddr, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(
            "Source address is required".to_string(),
        ));
    }

    trimmed
        .parse::<IpAddr>()
        .map(|addr| addr.to_canonical())
        .map_err(|_| ValidationError::InvalidAddress(trimmed.to_string()))
}
