//! Secret stripping for log and error text
//!
//! Stream URLs carry credentials as query parameters (`api_key`, tokens), and
//! decoder/network errors frequently echo the full URL back. Everything that
//! is logged or surfaced to a caller goes through [`sanitize_message`] first.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement text for stripped secrets
pub const REDACTED: &str = "***";

static QUERY_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(api_key|apikey|access_token|token|x-emby-token|password|secret)=[^&\s"'#]+"#)
        .expect("query secret pattern is valid")
});

static HEADER_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(authorization|x-emby-authorization|x-emby-token)(\s*:\s*)[^\r\n,]+")
        .expect("header secret pattern is valid")
});

static BEARER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*").expect("bearer pattern is valid")
});

/// Strip embedded credentials from a message
///
/// # Examples
///
/// ```
/// use yaytsa_common::sanitize_message;
///
/// let msg = "failed to open http://host/Audio/1/stream?api_key=abc123&deviceId=x";
/// assert_eq!(
///     sanitize_message(msg),
///     "failed to open http://host/Audio/1/stream?api_key=***&deviceId=x"
/// );
/// ```
pub fn sanitize_message(message: &str) -> String {
    let stripped = QUERY_SECRET.replace_all(message, |caps: &regex::Captures| {
        format!("{}={}", &caps[1], REDACTED)
    });
    let stripped = HEADER_SECRET.replace_all(&stripped, |caps: &regex::Captures| {
        format!("{}{}{}", &caps[1], &caps[2], REDACTED)
    });
    BEARER
        .replace_all(&stripped, format!("Bearer {}", REDACTED).as_str())
        .into_owned()
}
