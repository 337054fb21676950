//! Channel token issuance client

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::EngineRole;
use crate::config::EngineCredentials;
use crate::error::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Issued channel token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    app_id: &'a str,
    channel_name: &'a str,
    uid: &'a str,
    role: EngineRole,
    expire_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default, alias = "expireSeconds", alias = "expire_seconds")]
    expires_in: Option<u64>,
}

/// Client for the configured token-issuance endpoint
pub struct TokenClient {
    client: reqwest::Client,
    endpoint: String,
    app_id: String,
    ttl_secs: u64,
}

impl TokenClient {
    /// `None` when no endpoint is configured
    pub fn from_credentials(credentials: &EngineCredentials) -> Result<Option<Self>> {
        let Some(endpoint) = credentials.token_endpoint.as_deref() else {
            return Ok(None);
        };

        reqwest::Url::parse(endpoint).map_err(|e| {
            AppError::MisconfiguredCredentials(format!("Invalid token endpoint: {}", e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            endpoint: endpoint.to_string(),
            app_id: credentials.app_id.clone(),
            ttl_secs: credentials.token_ttl_secs,
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request a token for `uid` on `channel_name`
    pub async fn fetch_token(
        &self,
        channel_name: &str,
        uid: &str,
        role: EngineRole,
    ) -> Result<ChannelToken> {
        debug!("Requesting {} token for {} on {}", role, uid, channel_name);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&TokenRequest {
                app_id: &self.app_id,
                channel_name,
                uid,
                role,
                expire_seconds: self.ttl_secs,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        if body.token.is_empty() {
            return Err(AppError::Internal(
                "Token endpoint returned an empty token".to_string(),
            ));
        }

        let ttl = body.expires_in.unwrap_or(self.ttl_secs);
        let expires_at = Utc::now() + ChronoDuration::seconds(ttl as i64);
        info!("Issued {} token for {} (valid {}s)", role, channel_name, ttl);

        Ok(ChannelToken {
            token: body.token,
            expires_at,
        })
    }
}
