//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Traces are safe to share for debugging. These functions ensure no
//! sensitive data (upload paths, credentials embedded in endpoint URLs,
//! API keys passed as query parameters) leaks into spans.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo and the query string from a backend endpoint URL.
///
/// - `https://user:pw@llm.internal/v1/chat` → `https://****@llm.internal/v1/chat`
/// - `https://api.example.com/v1/messages?key=abc` → `https://api.example.com/v1/messages?****`
/// - `https://api.deepseek.com/v1/chat/completions` → unchanged
pub fn redact_endpoint(url: &str) -> String {
    let (base, has_query) = match url.find('?') {
        Some(pos) => (&url[..pos], true),
        None => (url, false),
    };

    let mut redacted = match base.find("://") {
        Some(scheme_end) => {
            let after_scheme = &base[scheme_end + 3..];
            let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
            match after_scheme[..authority_end].rfind('@') {
                Some(at_pos) => format!(
                    "{}****@{}",
                    &base[..scheme_end + 3],
                    &after_scheme[at_pos + 1..]
                ),
                None => base.to_string(),
            }
        }
        None => base.to_string(),
    };

    if has_query {
        redacted.push_str("?****");
    }
    redacted
}
