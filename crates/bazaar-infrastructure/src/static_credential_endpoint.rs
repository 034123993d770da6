//! Locally minted tokens for offline mode and wiring tests.

use async_trait::async_trait;
use bazaar_core::error::Result;
use bazaar_core::session::{CredentialEndpoint, Identity, IssuedToken};
use chrono::{Duration, Utc};
use uuid::Uuid;

/// Issues a fresh random token with a fixed lifetime on every request.
#[derive(Debug, Clone)]
pub struct StaticCredentialEndpoint {
    lifetime: Duration,
}

impl StaticCredentialEndpoint {
    pub fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }
}

impl Default for StaticCredentialEndpoint {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}

#[async_trait]
impl CredentialEndpoint for StaticCredentialEndpoint {
    async fn get_token(&self, identity: &Identity) -> Result<IssuedToken> {
        Ok(IssuedToken {
            token: format!("local-{}-{}", identity.uid, Uuid::new_v4()),
            expires_at: Utc::now() + self.lifetime,
        })
    }
}
