//! Environment-provided credentials for the managed RTC engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};

pub const ENV_APP_ID: &str = "LIVECAST_RTC_APP_ID";
pub const ENV_APP_CERTIFICATE: &str = "LIVECAST_RTC_APP_CERTIFICATE";
pub const ENV_TOKEN_ENDPOINT: &str = "LIVECAST_RTC_TOKEN_ENDPOINT";
pub const ENV_TOKEN_TTL_SECS: &str = "LIVECAST_RTC_TOKEN_TTL_SECS";

/// Default token validity (1 hour)
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Application identity used to create the managed engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCredentials {
    pub app_id: String,
    pub app_certificate: Option<String>,
    pub token_endpoint: Option<String>,
    pub token_ttl_secs: u64,
}

impl EngineCredentials {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_certificate: None,
            token_endpoint: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }

    /// Read credentials from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let token_ttl_secs = match non_empty(ENV_TOKEN_TTL_SECS) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    tracing::warn!(
                        "Ignoring invalid {}={:?}, using {}s",
                        ENV_TOKEN_TTL_SECS,
                        raw,
                        DEFAULT_TOKEN_TTL_SECS
                    );
                    DEFAULT_TOKEN_TTL_SECS
                }
            },
            None => DEFAULT_TOKEN_TTL_SECS,
        };

        Self {
            app_id: non_empty(ENV_APP_ID).unwrap_or_default(),
            app_certificate: non_empty(ENV_APP_CERTIFICATE),
            token_endpoint: non_empty(ENV_TOKEN_ENDPOINT),
            token_ttl_secs,
        }
    }

    /// Fail fast when the application identity is missing
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(AppError::MisconfiguredCredentials(format!(
                "{} is not set; the managed engine cannot be created without an application id",
                ENV_APP_ID
            )));
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_app_id_is_misconfigured() {
        let creds = EngineCredentials::from_lookup(lookup(&[(ENV_APP_ID, "   ")]));
        assert!(matches!(
            creds.validate(),
            Err(AppError::MisconfiguredCredentials(_))
        ));
    }

    #[test]
    fn test_full_environment() {
        let creds = EngineCredentials::from_lookup(lookup(&[
            (ENV_APP_ID, "app-123"),
            (ENV_APP_CERTIFICATE, "secret"),
            (ENV_TOKEN_ENDPOINT, "https://tokens.example.com/rtc"),
            (ENV_TOKEN_TTL_SECS, "600"),
        ]));
        creds.validate().unwrap();
        assert_eq!(creds.app_id, "app-123");
        assert_eq!(creds.app_certificate.as_deref(), Some("secret"));
        assert_eq!(creds.token_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_ttl_falls_back_to_default() {
        let creds = EngineCredentials::from_lookup(lookup(&[
            (ENV_APP_ID, "app"),
            (ENV_TOKEN_TTL_SECS, "soon"),
        ]));
        assert_eq!(creds.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
        assert!(creds.token_endpoint.is_none());
    }
}
