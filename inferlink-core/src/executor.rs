//! Resilient Request Executor.
//!
//! Every outbound call goes through [`RequestExecutor::execute`]:
//!
//! 1. Unless the call is the auth call, a bearer token is obtained from the
//!    [`CredentialManager`] and attached as `Authorization: Bearer <token>`.
//! 2. The call is driven by the configured [`RetryPolicy`](crate::RetryPolicy).
//!    Any non-2xx response or transport error fails the attempt.
//! 3. A success (even after retried attempts) resets the failure counter.
//! 4. An exhausted budget is a terminal failure and increments the counter.
//!    Once the counter reaches the threshold on a non-auth call, the
//!    credential is invalidated and re-acquired before the original
//!    [`RequestFailure`] is returned. The failing call is not replayed.
//!
//! The failure counter is shared by all endpoints of the instance, so a run
//! of terminal failures anywhere is treated as a sign of a stale credential.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::assertion::AssertionSigner;
use crate::config::ClientConfig;
use crate::credential::{CredentialManager, CredentialState, TokenExchange};
use crate::error::{ClientError, ConfigError, RequestFailure, extract_detail};
use crate::retry::{Attempt, AttemptFailure};
use crate::secret::Secret;

/// Path, method, headers and optional JSON body of an outbound call.
///
/// Immutable once built; the executor only adds the `Authorization` header.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    path: String,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    auth: bool,
}

impl RequestDescriptor {
    /// A request with the given method and path relative to the base URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: Vec::new(),
            body: None,
            auth: false,
        }
    }

    /// A `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A `POST` request with a JSON body.
    pub fn post_json(path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut descriptor = Self::new(Method::POST, path);
        descriptor.body = Some(body);
        descriptor
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Mark this as the auth call: no bearer token, never escalates.
    pub(crate) fn auth(mut self) -> Self {
        self.auth = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn is_auth(&self) -> bool {
        self.auth
    }
}

/// A successful (2xx) response with its body read into memory.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// URL that produced the response.
    pub url: String,

    /// HTTP status code.
    pub status: u16,

    /// Raw response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::InvalidResponse {
            url: self.url.clone(),
            message: format!("error parsing JSON response: {}", e),
        })
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// State of a client instance.
///
/// `NoCredential -> Acquiring -> Credentialed`, dropping to `Degraded` while
/// a stale credential is being replaced, then back to `NoCredential` /
/// `Acquiring`. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoCredential,
    Acquiring,
    Credentialed,
    Degraded,
}

#[derive(Debug, Default)]
struct FailureState {
    count: u32,
    escalating: bool,
}

/// Terminal failures since the last success.
///
/// Increment, reset and the threshold check share one lock so concurrent
/// failures can never both decide to invalidate the credential.
#[derive(Debug, Default)]
struct FailureCounter {
    state: Mutex<FailureState>,
}

impl FailureCounter {
    fn count(&self) -> u32 {
        self.state.lock().count
    }

    fn is_escalating(&self) -> bool {
        self.state.lock().escalating
    }

    fn record_success(&self) {
        self.state.lock().count = 0;
    }

    /// Count a terminal failure. Returns `true` when the caller should
    /// refresh the credential.
    fn record_failure(&self, threshold: u32, may_escalate: bool) -> bool {
        let mut state = self.state.lock();
        state.count = state.count.saturating_add(1);

        if may_escalate && state.count >= threshold && !state.escalating {
            state.escalating = true;
            true
        } else {
            false
        }
    }

    fn finish_escalation(&self) {
        self.state.lock().escalating = false;
    }
}

/// Clears the escalation flag even if the refresh future is dropped.
struct Escalation<'a>(&'a FailureCounter);

impl Drop for Escalation<'_> {
    fn drop(&mut self) {
        self.0.finish_escalation();
    }
}

/// A call that exhausted its retry budget.
struct Terminal {
    failure: RequestFailure,
    escalate: bool,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

/// Wraps every outbound call with credentials, bounded retry and failure
/// tracking.
#[derive(Debug)]
pub struct RequestExecutor {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: CredentialManager,
    failures: FailureCounter,
}

impl RequestExecutor {
    /// Build an executor. Performs no network I/O.
    pub fn new(config: ClientConfig, signer: AssertionSigner) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self::with_http_client(config, signer, http))
    }

    /// Build an executor around an existing HTTP client.
    pub fn with_http_client(
        config: ClientConfig,
        signer: AssertionSigner,
        http: reqwest::Client,
    ) -> Self {
        let credentials = CredentialManager::new(config.identity.clone(), signer);
        Self {
            http,
            config,
            credentials,
            failures: FailureCounter::default(),
        }
    }

    /// Configuration of this executor.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The credential manager owning this executor's token.
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// The plain HTTP client, for calls outside the platform API.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Terminal failures since the last success.
    pub fn failure_count(&self) -> u32 {
        self.failures.count()
    }

    /// Current state of the instance.
    pub fn state(&self) -> SessionState {
        if self.failures.is_escalating() {
            return SessionState::Degraded;
        }
        match self.credentials.state() {
            CredentialState::NoCredential => SessionState::NoCredential,
            CredentialState::Acquiring => SessionState::Acquiring,
            CredentialState::Credentialed => SessionState::Credentialed,
        }
    }

    /// Obtain a bearer token, acquiring one if none is held.
    pub async fn ensure_credential(&self) -> Result<Secret, ClientError> {
        self.credentials.ensure_credential(self).await
    }

    /// Execute a call with credentials, retry and failure tracking.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, ClientError> {
        let url = self.config.url_for(descriptor.path())?;

        let bearer = if descriptor.is_auth() {
            None
        } else {
            Some(self.ensure_credential().await?)
        };

        match self.dispatch(&descriptor, &url, bearer.as_ref()).await {
            Ok(response) => Ok(response),
            Err(Terminal { failure, escalate }) => {
                if escalate {
                    self.refresh_credential().await;
                }
                Err(failure.into())
            }
        }
    }

    /// Execute a call and decode the JSON body.
    ///
    /// The failure counter is reset by the 2xx status alone; a body that
    /// fails to decode yields `InvalidResponse` without counting.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<T, ClientError> {
        self.execute(descriptor).await?.json()
    }

    /// `GET` a path and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute_json(RequestDescriptor::get(path)).await
    }

    /// Replace a credential presumed stale. Refresh errors are logged; the
    /// caller still reports the failure that triggered the refresh.
    async fn refresh_credential(&self) {
        let _escalation = Escalation(&self.failures);
        tracing::warn!(
            failures = self.failures.count(),
            threshold = self.config.failure_threshold,
            "failure threshold reached, refreshing credential"
        );

        self.credentials.invalidate();
        if let Err(e) = self.ensure_credential().await {
            tracing::warn!("credential refresh failed: {}", e);
        }
    }

    /// Run the retry loop for one call and update the failure counter.
    async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        bearer: Option<&Secret>,
    ) -> Result<ApiResponse, Terminal> {
        let outcome = self
            .config
            .retry
            .run(|_| self.attempt(descriptor, url, bearer))
            .await;

        match outcome {
            Ok((response, attempts)) => {
                if attempts > 1 {
                    tracing::debug!(attempts, "{} {} succeeded after retry", descriptor.method(), url);
                }
                self.failures.record_success();
                Ok(response)
            }
            Err((last, attempts)) => {
                let escalate = self
                    .failures
                    .record_failure(self.config.failure_threshold, !descriptor.is_auth());

                let failure = RequestFailure {
                    url: url.to_string(),
                    method: descriptor.method().clone(),
                    detail: last.body.as_deref().and_then(extract_detail),
                    status: last.status,
                    body: last.body,
                    error: last.error,
                    attempts,
                };

                tracing::warn!(
                    attempts,
                    failures = self.failures.count(),
                    "{}",
                    failure
                );
                Err(Terminal { failure, escalate })
            }
        }
    }

    async fn attempt(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        bearer: Option<&Secret>,
    ) -> Attempt<ApiResponse> {
        let mut request = self.http.request(descriptor.method().clone(), url.clone());
        for (name, value) in descriptor.headers() {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token.expose());
        }
        if let Some(body) = descriptor.body() {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Failed(AttemptFailure::transport(e.to_string())),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                return Attempt::Failed(AttemptFailure::transport(format!(
                    "failed to read response body: {}",
                    e
                )));
            }
        };

        if status.is_success() {
            Attempt::Success(ApiResponse {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            })
        } else {
            Attempt::Failed(AttemptFailure::status(
                status.as_u16(),
                String::from_utf8_lossy(&body),
                status.canonical_reason().unwrap_or("unexpected status"),
            ))
        }
    }
}

#[async_trait]
impl TokenExchange for RequestExecutor {
    /// `POST {"jwt": <assertion>}` to the auth path and read the `token` field.
    async fn exchange(&self, assertion: &Secret) -> Result<Secret, ClientError> {
        let descriptor = RequestDescriptor::post_json(
            self.config.auth_path.clone(),
            serde_json::json!({ "jwt": assertion.expose() }),
        )
        .auth();
        let url = self.config.url_for(descriptor.path())?;

        let response: AuthResponse = self
            .dispatch(&descriptor, &url, None)
            .await
            .map_err(|terminal| ClientError::from(terminal.failure))?
            .json()?;

        if response.token.is_empty() {
            return Err(ClientError::InvalidResponse {
                url: url.to_string(),
                message: "auth response contained an empty token".to_string(),
            });
        }
        Ok(Secret::new(response.token))
    }
}
