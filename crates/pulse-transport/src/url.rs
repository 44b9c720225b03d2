//! Target URL construction.

use pulse_core::TransportError;
use reqwest::Url;

/// Parse `raw` and append the credential as the `token` query parameter.
///
/// An empty token leaves the URL untouched. Existing query parameters are kept.
pub fn with_token(raw: &str, token: &str, schemes: &[&str]) -> Result<Url, TransportError> {
    let mut url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(TransportError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("scheme must be one of {}", schemes.join(", ")),
        });
    }
    if !token.is_empty() {
        let _ = url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Render `url` for logs with the token value masked.
pub fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return shown.to_string();
    }
    let _ = shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
