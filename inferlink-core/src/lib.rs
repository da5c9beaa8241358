//! # Inferlink Core
//!
//! Authenticated, self-healing request layer for the inference platform API.
//!
//! This crate provides:
//! - [`CredentialManager`] - owns the bearer token, mints signing assertions
//!   and exchanges them at the auth endpoint, one acquisition at a time
//! - [`RequestExecutor`] - bounded retry, failure classification, and the
//!   failure counter that triggers credential refresh
//! - [`ClientConfig`] - validated configuration with fail-fast key checks
//! - [`RequestFailure`] / [`ClientError`] - structured failures carrying URL,
//!   method and upstream response
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use inferlink_core::{ClientConfig, Session};
//!
//! async fn list(session: &Session) -> Result<serde_json::Value, inferlink_core::ClientError> {
//!     session.get_json("api/models/m1/patients/p1/inferences/").await
//! }
//! ```

pub mod assertion;
pub mod config;
pub mod credential;
pub mod error;
pub mod executor;
pub mod retry;
pub mod secret;
pub mod session;

// Re-export commonly used types at crate root
pub use assertion::{AssertionClaims, AssertionSigner};

pub use config::{
    ClientConfig,
    ClientConfigBuilder,
    PrivateKeySource,
};

pub use credential::{
    CredentialManager,
    CredentialState,
    TokenExchange,
};

pub use error::{
    ClientError,
    ConfigError,
    RequestFailure,
};

pub use executor::{
    ApiResponse,
    RequestDescriptor,
    RequestExecutor,
    SessionState,
};

pub use retry::RetryPolicy;

pub use secret::Secret;

pub use session::Session;
