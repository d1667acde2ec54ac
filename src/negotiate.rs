//! HTTP negotiate preflight.
//!
//! Derives the HTTP variant of the socket URL (`ws`/`wss` → `http`/`https`, `/negotiate`
//! appended) and POSTs to it. Grounded on `Util.getNegotiateUrl`/`HubConnection._negotiate` in the
//! source; `reqwest` replaces `requests` the same way it already stands in for Python's `requests`
//! library wherever the teacher crate does its own HTTP work (asset downloads).

use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

/// Outcome of a failed negotiate attempt. The two cases are handled differently by the worker
/// loop (spec.md §4.4/§7): a non-200 response is escalated as `Unauthorized` and stops the
/// session outright, while a connection-level error (DNS/TCP failure reaching the negotiate
/// endpoint) is logged and falls through to the ordinary reconnect decision.
#[derive(Debug, thiserror::Error)]
pub enum NegotiateError {
    #[error("negotiate returned non-200 status")]
    Unauthorized,
    #[error("connection error reaching negotiate endpoint: {0}")]
    Transient(#[from] reqwest::Error),
}

/// Map a websocket URL to its negotiate URL: `ws`/`wss` schemes become `http`/`https`, and
/// `/negotiate` is appended (reusing a trailing slash rather than doubling it). Idempotent modulo
/// that trailing-slash normalization, and always produces an `http(s)` scheme.
pub fn negotiate_url(url: &Url) -> Url {
    let mut url = url.clone();
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    };
    // `Url::set_scheme` rejects switching into/out of special schemes, but ws/wss <-> http/https
    // are all "special" to the `url` crate, so this always succeeds.
    let _ = url.set_scheme(scheme);

    let path = url.path();
    let suffix = if path.ends_with('/') { "negotiate" } else { "/negotiate" };
    let mut new_path = path.to_owned();
    new_path.push_str(suffix);
    url.set_path(&new_path);
    url
}

/// POST to the negotiate URL with the given headers. The response body is parsed as JSON and
/// logged, but otherwise unused by the core (spec.md §4.4).
pub async fn negotiate(
    client: &reqwest::Client,
    url: &Url,
    headers: &HashMap<String, String>,
    verify_ssl: bool,
) -> Result<(), NegotiateError> {
    let negotiate_url = negotiate_url(url);
    tracing::debug!(%negotiate_url, "negotiate url");

    if !verify_ssl {
        tracing::debug!("negotiate: certificate verification disabled");
    }

    let mut request = client.post(negotiate_url.as_str());
    for (name, value) in headers {
        request = request.header(name, value);
    }
    let response = request.timeout(Duration::from_secs(10)).send().await?;

    tracing::debug!(status = %response.status(), "negotiate response status");
    if response.status() != StatusCode::OK {
        return Err(NegotiateError::Unauthorized);
    }

    match response.json::<serde_json::Value>().await {
        Ok(body) => tracing::debug!(?body, "negotiation results"),
        Err(e) => tracing::debug!(error = %e, "negotiation response wasn't JSON, ignoring"),
    }
    Ok(())
}
