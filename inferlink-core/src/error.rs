//! Error types for the request layer.
//!
//! Three categories are surfaced to callers:
//! - [`ConfigError`] - ambiguous or missing credential material, bad URLs.
//!   Raised at construction, never retried and never counted as a failure.
//! - [`RequestFailure`] - a call whose retry budget was exhausted. Carries
//!   the URL, method and upstream response so callers never need to inspect
//!   transport internals.
//! - [`ClientError`] - the aggregate returned by every network-path operation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Method;
use thiserror::Error;

/// Configuration errors, detected before any network call is made.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Neither a private key file nor an inline key was supplied.
    #[error("either a private key file or an inline private key must be provided")]
    MissingPrivateKey,

    /// Both a private key file and an inline key were supplied.
    #[error("a private key file and an inline private key cannot both be provided")]
    ConflictingPrivateKeys,

    /// The private key file could not be read.
    #[error("failed to read private key from {path:?}: {source}")]
    PrivateKeyUnreadable {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The key material is not a usable RSA private key.
    #[error("invalid private key: {message}")]
    InvalidPrivateKey { message: String },

    /// The base URL could not be parsed.
    #[error("invalid base URL {url:?}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    /// Any other out-of-range setting.
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {message}")]
    HttpClient { message: String },
}

/// A terminal request failure.
///
/// Produced once the retry budget of a single call is exhausted. Holds the
/// response of the last attempt (if the server answered at all) together
/// with the transport error text.
#[derive(Debug, Clone)]
pub struct RequestFailure {
    /// Fully qualified URL of the failed call.
    pub url: String,

    /// HTTP method of the failed call.
    pub method: Method,

    /// Status code of the last response, `None` for transport errors.
    pub status: Option<u16>,

    /// Raw body of the last response.
    pub body: Option<String>,

    /// The server's `detail` message, or the raw body when it is not JSON.
    pub detail: Option<String>,

    /// Underlying error text.
    pub error: String,

    /// Number of attempts made before giving up.
    pub attempts: u32,
}

impl RequestFailure {
    /// Whether the server answered with the given status on the last attempt.
    pub fn has_status(&self, status: u16) -> bool {
        self.status == Some(status)
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "{} {} returned a status code of {} with error: {}",
                self.method,
                self.url,
                status,
                self.detail.as_deref().unwrap_or(&self.error)
            ),
            None => write!(f, "{} {} failed: {}", self.method, self.url, self.error),
        }
    }
}

impl std::error::Error for RequestFailure {}

/// Extract the human readable error from a response body.
///
/// Prefers a JSON `detail` field and falls back to the raw text.
pub(crate) fn extract_detail(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(body.to_string()),
        },
        Err(_) => Some(body.to_string()),
    }
}

/// Top-level error type for the request layer.
///
/// `Clone` so the outcome of one credential acquisition can be handed to
/// every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Configuration error; fatal and never retried.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Minting a signing assertion failed.
    #[error("failed to sign assertion: {message}")]
    Signing { message: String },

    /// A call failed after its retry budget was exhausted.
    #[error("request failed: {0}")]
    Request(Box<RequestFailure>),

    /// A successful response carried a body that could not be understood.
    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl ClientError {
    /// The structured failure, if this error came from the network path.
    pub fn request_failure(&self) -> Option<&RequestFailure> {
        match self {
            ClientError::Request(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<RequestFailure> for ClientError {
    fn from(failure: RequestFailure) -> Self {
        ClientError::Request(Box::new(failure))
    }
}
