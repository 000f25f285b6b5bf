// Telemetry server URL derivation.
//
// The server is configured by a single WebSocket base URL. The per-match
// socket URL and the REST base are both derived from it.

use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid telemetry server URL `{url}`: {reason}")]
pub struct EndpointError {
    pub url: String,
    pub reason: String,
}

/// Normalize a configured server URL into a WebSocket base.
///
/// `ws://` and `wss://` bases are kept as-is, `http(s)://` is mapped to
/// `ws(s)://`, and a bare host is assumed to be `ws://`. Trailing slashes
/// are trimmed so paths can be appended directly.
pub fn normalize_ws_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{trimmed}")
    }
}

/// Derive the REST base from a WebSocket base (`ws`->`http`, `wss`->`https`).
pub fn http_base(ws_base: &str) -> String {
    let base = normalize_ws_base(ws_base);
    if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base
    }
}

/// `{ws_base}/ws?match={match_id}`, with the identifier query-encoded.
pub fn socket_url(ws_base: &str, match_id: &str) -> Result<String, EndpointError> {
    let raw = format!("{}/ws", normalize_ws_base(ws_base));
    let mut url = parse(&raw)?;
    url.query_pairs_mut().append_pair("match", match_id);
    Ok(url.to_string())
}

/// `GET {http_base}/api/matches`
pub fn matches_url(http_base: &str) -> Result<String, EndpointError> {
    api_url(http_base, &["api", "matches"])
}

/// `GET {http_base}/api/match/{id}`
pub fn match_url(http_base: &str, match_id: &str) -> Result<String, EndpointError> {
    api_url(http_base, &["api", "match", match_id])
}

fn api_url(http_base: &str, segments: &[&str]) -> Result<String, EndpointError> {
    let mut url = parse(http_base.trim_end_matches('/'))?;
    url.path_segments_mut()
        .map_err(|_| EndpointError {
            url: http_base.to_string(),
            reason: "URL cannot carry a path".into(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

fn parse(raw: &str) -> Result<Url, EndpointError> {
    Url::parse(raw).map_err(|e| EndpointError {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
