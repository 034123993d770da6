//! Seams between the token lifecycle and its collaborators.

use super::model::{Identity, IssuedToken};
use crate::error::Result;
use async_trait::async_trait;

/// The external service that mints identity tokens.
///
/// Implementations report a not-yet-provisioned backend identity as
/// [`BazaarError::TokenNotProvisioned`](crate::error::BazaarError::TokenNotProvisioned)
/// so the caller can apply its single delayed retry.
#[async_trait]
pub trait CredentialEndpoint: Send + Sync {
    async fn get_token(&self, identity: &Identity) -> Result<IssuedToken>;
}

/// What an authenticated caller needs from the token lifecycle.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The last known token, possibly expired. `None` while signed out.
    fn current_token(&self) -> Option<String>;

    /// Fetches a fresh token out of band.
    async fn refresh_token(&self) -> Result<IssuedToken>;
}
