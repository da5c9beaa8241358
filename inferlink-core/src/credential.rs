//! Credential Manager.
//!
//! Owns the single bearer token of a client instance. The token is acquired
//! lazily by minting a signing assertion and exchanging it through a
//! [`TokenExchange`], and is cleared by [`CredentialManager::invalidate`]
//! when the executor decides it has gone stale.
//!
//! # Single-flight acquisition
//!
//! Each acquisition attempt owns a slot (`Arc<OnceCell<Outcome>>`) holding
//! its outcome, success or failure. Callers that find the slot empty all
//! wait on the same cell, so only one exchange runs per missing-credential
//! state and every waiter observes its result, including its error.
//! A failed slot is replaced by a fresh empty one, but only if it is still
//! the current slot, so a later acquisition is never discarded.
//! Invalidation swaps in a fresh empty slot; callers already waiting on the
//! old one still receive the outcome it resolves to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::assertion::AssertionSigner;
use crate::error::ClientError;
use crate::secret::Secret;

/// Exchanges a signing assertion for a bearer token.
///
/// Implemented by the request executor, which sends the assertion to the
/// auth endpoint through its retry path. Can be mocked for testing.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Exchange `assertion` for a bearer token.
    async fn exchange(&self, assertion: &Secret) -> Result<Secret, ClientError>;
}

/// Credential lifecycle as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// No token held and no acquisition running.
    NoCredential,
    /// An exchange is in flight.
    Acquiring,
    /// A token is held.
    Credentialed,
}

/// Result of one acquisition, shared by everyone who waited on it.
type Outcome = Result<Secret, ClientError>;

type Slot = Arc<OnceCell<Outcome>>;

/// Owns the bearer token of one client instance.
#[derive(Debug)]
pub struct CredentialManager {
    identity: String,
    signer: AssertionSigner,
    slot: Mutex<Slot>,
    acquiring: AtomicBool,
    acquisitions: AtomicU64,
}

impl CredentialManager {
    /// Create a manager that signs assertions for `identity`.
    pub fn new(identity: impl Into<String>, signer: AssertionSigner) -> Self {
        Self {
            identity: identity.into(),
            signer,
            slot: Mutex::new(Slot::default()),
            acquiring: AtomicBool::new(false),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Identity declared in assertions.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Return the held token, acquiring one first if none is held.
    ///
    /// Concurrent callers share a single in-flight acquisition and all
    /// receive its outcome. A failed acquisition is not retried on behalf of
    /// the callers that waited on it.
    pub async fn ensure_credential<E>(&self, exchange: &E) -> Result<Secret, ClientError>
    where
        E: TokenExchange + ?Sized,
    {
        let mut slot = self.current_slot();

        if let Some(Ok(token)) = slot.get() {
            tracing::debug!("using cached credential for {}", self.identity);
            return Ok(token.clone());
        }
        if matches!(slot.get(), Some(Err(_))) {
            slot = self.clear_failed(&slot);
        }

        match slot.get_or_init(|| self.acquire(exchange)).await {
            Ok(token) => Ok(token.clone()),
            Err(e) => {
                self.clear_failed(&slot);
                Err(e.clone())
            }
        }
    }

    /// Drop the held token. The next [`ensure_credential`](Self::ensure_credential)
    /// performs a fresh exchange.
    pub fn invalidate(&self) {
        *self.slot.lock() = Slot::default();
        tracing::info!("invalidated credential for {}", self.identity);
    }

    /// The held token, without acquiring.
    pub fn current_token(&self) -> Option<Secret> {
        match self.current_slot().get() {
            Some(Ok(token)) => Some(token.clone()),
            _ => None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CredentialState {
        if self.current_token().is_some() {
            CredentialState::Credentialed
        } else if self.acquiring.load(Ordering::SeqCst) {
            CredentialState::Acquiring
        } else {
            CredentialState::NoCredential
        }
    }

    /// Number of successful exchanges performed so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn current_slot(&self) -> Slot {
        Arc::clone(&self.slot.lock())
    }

    /// Replace `failed` with an empty slot if it is still current. Returns
    /// the slot current afterwards.
    fn clear_failed(&self, failed: &Slot) -> Slot {
        let mut current = self.slot.lock();
        if Arc::ptr_eq(&current, failed) {
            *current = Slot::default();
        }
        Arc::clone(&current)
    }

    async fn acquire<E>(&self, exchange: &E) -> Result<Secret, ClientError>
    where
        E: TokenExchange + ?Sized,
    {
        let _in_flight = InFlight::enter(&self.acquiring);
        tracing::info!("acquiring credential for {}", self.identity);

        let assertion = self.signer.mint(&self.identity)?;
        let token = exchange.exchange(&assertion).await.inspect_err(|e| {
            tracing::error!("credential exchange failed for {}: {}", self.identity, e);
        })?;

        let count = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(acquisitions = count, "acquired credential for {}", self.identity);
        Ok(token)
    }
}

/// Marks an acquisition as running until dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
