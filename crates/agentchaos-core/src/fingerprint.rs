//! Deterministic request fingerprinting for tape matching.
//!
//! A fingerprint is a 4-tuple of lower-cased method, normalized URL, body
//! hash and stable-headers hash. The same normalization runs at record and
//! playback time, so a fingerprint computed from a live request matches the
//! one stored on tape byte for byte.

use crate::flow::{FlowRequest, Headers};
use crate::json_path::JsonPath;
use crate::plan::ReplayConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Headers excluded from the stable-headers hash. These vary per request
/// without changing request semantics.
pub const VOLATILE_HEADERS: &[&str] = &[
    "date",
    "if-modified-since",
    "if-none-match",
    "x-request-id",
    "x-correlation-id",
    "user-agent",
    "authorization",
];

/// Sentinel written over ignored JSON body paths before hashing.
const MASK_SENTINEL: &str = "<ignored>";

/// Deterministic identifier for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    /// Lower-cased HTTP method
    pub method: String,
    /// Scheme, host, path and sorted filtered query
    pub normalized_url: String,
    /// SHA-256 hex of the (masked) request body
    pub body_hash: String,
    /// SHA-256 hex of the sorted non-volatile headers
    pub stable_headers_hash: String,
}

impl RequestFingerprint {
    /// Compute the fingerprint for a request under the plan's replay config.
    pub fn compute(request: &FlowRequest, replay: &ReplayConfig) -> Self {
        Self {
            method: request.method.to_ascii_lowercase(),
            normalized_url: normalize_url(&request.url, &replay.ignore_params),
            body_hash: hash_body(request, replay),
            stable_headers_hash: hash_stable_headers(&request.headers),
        }
    }

    /// Full index key: all four components.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.method, self.normalized_url, self.body_hash, self.stable_headers_hash
        )
    }

    /// Partial index key: method and normalized URL only.
    pub fn partial_key(&self) -> String {
        format!("{}|{}", self.method, self.normalized_url)
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Scheme + host(+port) + path + sorted query with ignored keys removed.
/// Unparseable URLs are used verbatim so the fingerprint stays total.
fn normalize_url(raw: &str, ignore_params: &[String]) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };

    let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(k, _)| !ignore_params.iter().any(|ignored| ignored == k))
        .collect();
    pairs.sort();

    if !pairs.is_empty() {
        out.push('?');
        let query =
            pairs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        out.push_str(&query);
    }
    out
}

/// SHA-256 over the raw body, or over the body with ignored JSON paths
/// masked to a sentinel when `ignore_paths` applies.
fn hash_body(request: &FlowRequest, replay: &ReplayConfig) -> String {
    if request.body.is_empty() {
        return sha256_hex(b"");
    }

    if !replay.ignore_paths.is_empty() {
        if let Some(mut value) = request.body_json() {
            let mut masked = false;
            for expr in &replay.ignore_paths {
                if let Ok(path) = JsonPath::parse(expr) {
                    path.for_each_mut(&mut value, &mut |leaf| {
                        *leaf = Value::String(MASK_SENTINEL.to_string());
                        masked = true;
                    });
                }
            }
            if masked {
                return sha256_hex(&serde_json::to_vec(&value).unwrap_or_default());
            }
        }
    }

    sha256_hex(&request.body)
}

/// `\n`-joined `key:value` pairs sorted by lower-cased key, volatile headers
/// excluded, hashed with SHA-256.
fn hash_stable_headers(headers: &Headers) -> String {
    let joined = headers
        .iter()
        .filter(|(key, _)| !VOLATILE_HEADERS.contains(&key.as_str()))
        .map(|(key, value)| format!("{key}:{value}"))
        .collect::<Vec<_>>()
        .join("\n");
    sha256_hex(joined.as_bytes())
}
