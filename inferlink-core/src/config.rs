//! Client configuration.
//!
//! A [`ClientConfig`] is produced by [`ClientConfigBuilder::build`], which
//! validates everything that can be checked without touching the network:
//! exactly one private key source, a parseable base URL, and sane retry and
//! threshold values.
//!
//! # Example
//!
//! ```rust,no_run
//! use inferlink_core::ClientConfig;
//!
//! let config = ClientConfig::builder("datashare-admin")
//!     .private_key_file("private_key.pem")
//!     .base_url("https://api.example.com/")
//!     .retry_count(5)
//!     .build()?;
//! # Ok::<(), inferlink_core::ConfigError>(())
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::secret::Secret;

/// Default platform URL.
pub const DEFAULT_BASE_URL: &str = "https://api.bunkerhillhealth.com/";

/// Default path of the token-issuing endpoint, relative to the base URL.
pub const DEFAULT_AUTH_PATH: &str = "api/auth/jwt_login/";

/// Consecutive terminal failures after which the credential is considered stale.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default per-attempt HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `iss` claim of signing assertions.
pub const DEFAULT_ISSUER: &str = "inferlink";

/// Where the caller's RSA private key comes from.
#[derive(Debug, Clone)]
pub enum PrivateKeySource {
    /// A PEM file on disk.
    File(PathBuf),
    /// PEM text supplied directly.
    Pem(Secret),
}

impl PrivateKeySource {
    /// Read the PEM text.
    pub fn load(&self) -> Result<Secret, ConfigError> {
        match self {
            PrivateKeySource::File(path) => std::fs::read_to_string(path)
                .map(Secret::new)
                .map_err(|source| ConfigError::PrivateKeyUnreadable {
                    path: path.clone(),
                    source: Arc::new(source),
                }),
            PrivateKeySource::Pem(pem) => Ok(pem.clone()),
        }
    }
}

/// Validated configuration for a client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity declared in the signing assertion (`username` claim).
    pub identity: String,

    /// Private key used to sign assertions.
    pub private_key: PrivateKeySource,

    /// Base URL, always ending in `/`.
    pub base_url: Url,

    /// Auth endpoint path, relative to `base_url`.
    pub auth_path: String,

    /// Per-call retry budget.
    pub retry: RetryPolicy,

    /// Terminal failures tolerated before the credential is refreshed.
    pub failure_threshold: u32,

    /// Timeout applied to each HTTP attempt.
    pub request_timeout: Duration,

    /// `iss` claim of signing assertions.
    pub issuer: String,
}

impl ClientConfig {
    /// Start building a configuration for the given identity.
    pub fn builder(identity: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(identity)
    }

    /// Resolve a resource path against the base URL.
    ///
    /// Leading slashes are ignored so the base URL's own path is preserved.
    pub fn url_for(&self, path: &str) -> Result<Url, ConfigError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ConfigError::Invalid {
                message: format!("cannot resolve path {:?}: {}", path, e),
            })
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    identity: String,
    private_key_file: Option<PathBuf>,
    private_key_pem: Option<Secret>,
    base_url: String,
    auth_path: String,
    retry: RetryPolicy,
    failure_threshold: u32,
    request_timeout: Duration,
    issuer: String,
}

impl ClientConfigBuilder {
    /// Create a builder with default settings.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            private_key_file: None,
            private_key_pem: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_path: DEFAULT_AUTH_PATH.to_string(),
            retry: RetryPolicy::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Read the private key from a PEM file.
    pub fn private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_file = Some(path.into());
        self
    }

    /// Use PEM text as the private key.
    pub fn private_key_pem(mut self, pem: impl Into<String>) -> Self {
        self.private_key_pem = Some(Secret::new(pem));
        self
    }

    /// Set the platform base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the auth endpoint path.
    pub fn auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    /// Set the number of attempts per call.
    pub fn retry_count(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Set the delay before the first retry.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    /// Set the backoff multiplier (`1.0` for a fixed delay).
    pub fn retry_backoff(mut self, backoff: f64) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Replace the whole retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the failure threshold that triggers a credential refresh.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the per-attempt HTTP timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the `iss` claim of signing assertions.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let private_key = select_private_key(self.private_key_file, self.private_key_pem)?;

        if self.identity.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "identity must not be empty".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "retry count must be at least 1".to_string(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure threshold must be at least 1".to_string(),
            });
        }

        Ok(ClientConfig {
            identity: self.identity,
            private_key,
            base_url: parse_base_url(&self.base_url)?,
            auth_path: self.auth_path,
            retry: self.retry,
            failure_threshold: self.failure_threshold,
            request_timeout: self.request_timeout,
            issuer: self.issuer,
        })
    }
}

/// Exactly one key source must be present; empty values count as absent.
fn select_private_key(
    file: Option<PathBuf>,
    pem: Option<Secret>,
) -> Result<PrivateKeySource, ConfigError> {
    let file = file.filter(|p| !p.as_os_str().is_empty());
    let pem = pem.filter(|s| !s.is_empty());

    match (file, pem) {
        (Some(_), Some(_)) => Err(ConfigError::ConflictingPrivateKeys),
        (None, None) => Err(ConfigError::MissingPrivateKey),
        (Some(path), None) => Ok(PrivateKeySource::File(path)),
        (None, Some(pem)) => Ok(PrivateKeySource::Pem(pem)),
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };

    let url = Url::parse(&normalized).map_err(|e| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidBaseUrl {
            url: raw.to_string(),
            message: "URL cannot be used as a base".to_string(),
        });
    }

    Ok(url)
}
