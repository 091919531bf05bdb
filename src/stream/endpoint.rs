//! Endpoint selection for stream connection attempts.
//!
//! The request shape depends on two inputs: whether the configuration prefers
//! REPORT requests, and whether the platform transport can issue them.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use secrecy::ExposeSecret;
use serde_json::Value;
use url::Url;

use crate::stream::config::StreamConfig;

/// HTTP method used to open the stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamMethod {
    /// Plain GET without a body.
    Get,
    /// Body-bearing REPORT carrying the identity as JSON.
    Report,
}

impl StreamMethod {
    /// Returns the method token as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Report => "REPORT",
        }
    }
}

impl fmt::Display for StreamMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved request for one connection attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    /// Target URL including query parameters.
    pub url: Url,
    /// Request method.
    pub method: StreamMethod,
    /// JSON body, present only for REPORT requests.
    pub body: Option<String>,
}

/// Computes the stream request for `identity`.
///
/// Rules, first match wins:
/// 1. REPORT preferred and supported: `<base>/eval/<env>` with the identity as
///    the JSON body.
/// 2. REPORT preferred but unsupported: `<base>/ping/<env>`, no identity sent.
/// 3. Otherwise: `<base>/eval/<env>/<base64url(identity)>`, plus `h=<hash>`
///    when a secure-mode hash is configured.
pub fn select_endpoint(
    config: &StreamConfig,
    supports_report: bool,
    identity: &Value,
) -> StreamRequest {
    if config.use_report && supports_report {
        let mut url = endpoint_url(config, &["eval", &config.environment_id]);
        append_query(&mut url, &eval_query(config, false));
        return StreamRequest {
            url,
            method: StreamMethod::Report,
            body: Some(identity.to_string()),
        };
    }

    if config.use_report {
        return StreamRequest {
            url: endpoint_url(config, &["ping", &config.environment_id]),
            method: StreamMethod::Get,
            body: None,
        };
    }

    let encoded = URL_SAFE_NO_PAD.encode(identity.to_string());
    let mut url = endpoint_url(config, &["eval", &config.environment_id, &encoded]);
    append_query(&mut url, &eval_query(config, true));
    StreamRequest {
        url,
        method: StreamMethod::Get,
        body: None,
    }
}

fn endpoint_url(config: &StreamConfig, segments: &[&str]) -> Url {
    let mut url = config.base_url.clone();
    // StreamConfig rejects cannot-be-a-base URLs, so this always succeeds.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn eval_query(config: &StreamConfig, include_hash: bool) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if include_hash {
        if let Some(hash) = config.secure_mode_hash.as_ref() {
            pairs.push(("h", hash.expose_secret().clone()));
        }
    }
    if config.evaluation_reasons {
        pairs.push(("withReasons", "true".to_string()));
    }
    pairs
}

fn append_query(url: &mut Url, pairs: &[(&'static str, String)]) {
    if pairs.is_empty() {
        return;
    }
    let mut query = url.query_pairs_mut();
    for (key, value) in pairs {
        query.append_pair(key, value);
    }
}
