//! HTTP client for the credential-issuing endpoint.
//!
//! The endpoint answers a `POST { "uid": .. }` with either
//! `{ "token": .., "expiresAt": .. }` or `{ "errorCode": .. }`. `expiresAt`
//! may be an RFC 3339 timestamp or epoch milliseconds.

use async_trait::async_trait;
use bazaar_core::config::CredentialSettings;
use bazaar_core::error::{BazaarError, Result};
use bazaar_core::session::{CredentialEndpoint, Identity, IssuedToken};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NOT_PROVISIONED: &str = "NotProvisioned";

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    uid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresAt {
    Millis(i64),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Issued {
        token: String,
        #[serde(rename = "expiresAt")]
        expires_at: ExpiresAt,
    },
    Failed {
        #[serde(rename = "errorCode")]
        error_code: String,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Credential endpoint reached over HTTPS.
#[derive(Clone)]
pub struct HttpCredentialEndpoint {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpCredentialEndpoint {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout,
        }
    }

    /// Builds the endpoint from configuration; fails if no URL is configured.
    pub fn from_settings(settings: &CredentialSettings) -> Result<Self> {
        let url = settings
            .endpoint_url
            .clone()
            .ok_or_else(|| BazaarError::config("credential.endpoint_url is not set"))?;
        Ok(Self::new(url, Duration::from_secs(settings.timeout_secs)))
    }
}

fn transport_error(err: reqwest::Error) -> BazaarError {
    if err.is_timeout() {
        BazaarError::network(format!("credential endpoint timed out: {}", err))
    } else {
        BazaarError::network(format!("credential endpoint unreachable: {}", err))
    }
}

/// Interprets a response body (and its status) from the endpoint.
fn parse_token_response(status: StatusCode, body: &str) -> Result<IssuedToken> {
    match serde_json::from_str::<TokenResponse>(body) {
        Ok(TokenResponse::Issued { token, expires_at }) if status.is_success() => {
            let expires_at = match expires_at {
                ExpiresAt::Timestamp(at) => at,
                ExpiresAt::Millis(ms) => Utc
                    .timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| BazaarError::unknown(format!("invalid expiresAt {}", ms)))?,
            };
            Ok(IssuedToken { token, expires_at })
        }
        Ok(TokenResponse::Failed { error_code, .. }) if error_code == NOT_PROVISIONED => {
            Err(BazaarError::TokenNotProvisioned)
        }
        Ok(TokenResponse::Failed {
            error_code,
            message,
        }) => Err(BazaarError::unknown(format!(
            "credential endpoint error {}: {}",
            error_code,
            message.unwrap_or_default()
        ))),
        _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => Err(
            BazaarError::permission_denied(format!("credential endpoint returned {}", status)),
        ),
        _ if !status.is_success() => Err(BazaarError::network(format!(
            "credential endpoint returned {}",
            status
        ))),
        Ok(TokenResponse::Issued { .. }) => {
            Err(BazaarError::unknown("token issued with a non-success status"))
        }
        Err(e) => Err(BazaarError::Serialization {
            format: "JSON".to_string(),
            message: e.to_string(),
        }),
    }
}

#[async_trait]
impl CredentialEndpoint for HttpCredentialEndpoint {
    async fn get_token(&self, identity: &Identity) -> Result<IssuedToken> {
        tracing::debug!("[CredentialEndpoint] Requesting token for uid {}", identity.uid);

        let response = self
            .client
            .post(&self.url)
            .json(&TokenRequest {
                uid: &identity.uid,
                email: identity.email.as_deref(),
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        parse_token_response(status, &body)
    }
}
