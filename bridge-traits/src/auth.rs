//! Authentication Abstraction
//!
//! The core never acquires OAuth tokens itself. Hosts hand them over through
//! [`AuthProvider`], which is also the side-channel used to ask for a
//! credential refresh when the remote service reports a stale session.

use async_trait::async_trait;
use std::sync::RwLock;

use crate::error::{BridgeError, Result};

/// Token source for remote calls.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::auth::AuthProvider;
///
/// async fn token_for_sync(auth: &dyn AuthProvider) -> Option<String> {
///     auth.get_token(false, "periodic sync").await.ok().flatten()
/// }
/// ```
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Get an access token.
    ///
    /// `interactive` allows the host to prompt the user. `reason` is a short
    /// label for host-side diagnostics. Returns `Ok(None)` when the user is
    /// not signed in.
    async fn get_token(&self, interactive: bool, reason: &str) -> Result<Option<String>>;

    /// Ask the host to refresh the session credentials for `user_id`.
    ///
    /// Must not block on the refresh itself.
    async fn request_session_refresh(&self, _user_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Provider returning a fixed token that can be swapped at runtime.
///
/// Handy for hosts that obtain tokens out of band and for tests.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Replace the current token (`None` signs the user out).
    pub fn set_token(&self, token: Option<String>) -> Result<()> {
        let mut guard = self
            .token
            .write()
            .map_err(|_| BridgeError::OperationFailed("token lock poisoned".to_string()))?;
        *guard = token;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_token(&self, _interactive: bool, _reason: &str) -> Result<Option<String>> {
        let guard = self
            .token
            .read()
            .map_err(|_| BridgeError::OperationFailed("token lock poisoned".to_string()))?;
        Ok(guard.clone())
    }
}
