//! Signing assertions exchanged for bearer tokens.
//!
//! An assertion is a short-lived RS256 JWT that proves possession of the
//! caller's private key. A new one is minted for every acquisition and is
//! never cached.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, ConfigError};
use crate::secret::Secret;

/// How long a minted assertion stays valid.
pub const ASSERTION_VALIDITY_MINUTES: i64 = 30;

/// Algorithm used for every assertion.
pub const ASSERTION_ALGORITHM: Algorithm = Algorithm::RS256;

/// Claim set of a signing assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer of the assertion.
    pub iss: String,

    /// Expiry, seconds since the epoch.
    pub exp: i64,

    /// Issue time, seconds since the epoch.
    pub iat: i64,

    /// Unique assertion id.
    pub jti: String,

    /// Declared identity of the caller.
    pub username: String,
}

impl AssertionClaims {
    /// Claims for `identity`, valid from now for [`ASSERTION_VALIDITY_MINUTES`].
    pub fn new(issuer: &str, identity: &str) -> Self {
        let now = Utc::now();
        Self {
            iss: issuer.to_string(),
            exp: (now + Duration::minutes(ASSERTION_VALIDITY_MINUTES)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            username: identity.to_string(),
        }
    }
}

/// Mints signing assertions with the caller's RSA key.
#[derive(Clone)]
pub struct AssertionSigner {
    key: EncodingKey,
    issuer: String,
}

impl AssertionSigner {
    /// Parse a PEM encoded RSA private key (PKCS#1 or PKCS#8).
    ///
    /// A malformed key is a configuration error and is never retried.
    pub fn from_pem(pem: &Secret, issuer: impl Into<String>) -> Result<Self, ConfigError> {
        let key = EncodingKey::from_rsa_pem(pem.expose().as_bytes()).map_err(|e| {
            ConfigError::InvalidPrivateKey {
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            key,
            issuer: issuer.into(),
        })
    }

    /// Mint a fresh assertion for `identity`.
    pub fn mint(&self, identity: &str) -> Result<Secret, ClientError> {
        let claims = AssertionClaims::new(&self.issuer, identity);
        let header = Header::new(ASSERTION_ALGORITHM);

        let token = jsonwebtoken::encode(&header, &claims, &self.key).map_err(|e| {
            ClientError::Signing {
                message: e.to_string(),
            }
        })?;

        tracing::debug!(jti = %claims.jti, "minted signing assertion for {}", identity);
        Ok(Secret::new(token))
    }
}

impl std::fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionSigner")
            .field("issuer", &self.issuer)
            .field("algorithm", &ASSERTION_ALGORITHM)
            .finish_non_exhaustive()
    }
}
