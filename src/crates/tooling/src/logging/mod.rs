//! Logging utilities
//!
//! Structured logs for provider attempts carry a credential identity, but
//! never the credential itself. [`mask_secret`] produces the display form.

use std::time::{Duration, Instant};

/// Mask an opaque token for display, keeping the first and last four characters
///
/// ```rust
/// use tooling::logging::mask_secret;
///
/// assert_eq!(mask_secret("sk-abcdef123456"), "sk-a…3456");
/// assert_eq!(mask_secret("short"), "****");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Milliseconds elapsed since `start`, saturating at `u64::MAX`
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Format duration in human-readable form
///
/// ```rust
/// use tooling::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.2}s", millis as f64 / 1000.0)
    } else {
        let seconds = millis / 1000;
        format!("{}m{}s", seconds / 60, seconds % 60)
    }
}

/// Redact bearer tokens and `key=` query parameters from a provider message
///
/// Provider error bodies occasionally echo the request URL or headers.
pub fn redact_provider_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for (i, word) in message.split(' ').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if let Some(idx) = word.find("key=") {
            out.push_str(&word[..idx + 4]);
            out.push_str("****");
        } else if word.starts_with("sk-") || word.starts_with("AIza") {
            out.push_str(&mask_secret(word));
        } else {
            out.push_str(word);
        }
    }
    out
}
