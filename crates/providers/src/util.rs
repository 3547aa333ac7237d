//! Shared helpers for provider adapters.

use bs_domain::Error;

/// Convert a [`reqwest::Error`] into the domain error type. Timeouts map to
/// [`Error::Timeout`]; connection-level failures are transient (eligible for
/// the fallback chain).
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Transient(e.to_string())
    }
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message so raw secrets never reach logs or audit rows.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}
