use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session is no longer active: {0}")]
    NoLongerActive(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Misconfigured credentials: {0}")]
    MisconfiguredCredentials(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport teardown failed [{target}]: {reason}")]
    TransportTeardown { target: String, reason: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a failure should be presented to the end user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserNotice {
    /// "Stream not found" / "stream ended" - can simply be dismissed
    Dismissible,
    /// Permission prompt - the user can fix it
    Actionable,
    /// "Couldn't start/join stream"
    Generic,
}

impl AppError {
    pub fn transport_teardown(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::TransportTeardown {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::NoLongerActive(_) => "no_longer_active",
            AppError::NotInitialized(_) => "not_initialized",
            AppError::AlreadyInitialized(_) => "already_initialized",
            AppError::MisconfiguredCredentials(_) => "misconfigured_credentials",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::TransportTeardown { .. } => "transport_teardown",
            AppError::BadRequest(_) => "bad_request",
            AppError::Database(_) => "database",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
            AppError::WebRtcError(_) => "webrtc",
            AppError::Http(_) => "http",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn user_notice(&self) -> UserNotice {
        match self {
            AppError::NotFound(_) | AppError::NoLongerActive(_) => UserNotice::Dismissible,
            AppError::PermissionDenied(_) => UserNotice::Actionable,
            _ => UserNotice::Generic,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoLongerActive(_) => StatusCode::GONE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::AlreadyInitialized(_) => StatusCode::CONFLICT,
            AppError::MisconfiguredCredentials(_) | AppError::NotInitialized(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub notice: UserNotice,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            code: self.code(),
            notice: self.user_notice(),
            message: self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(
                error_code = body.code,
                error_message = %body.message,
                "Request failed"
            );
        } else {
            tracing::debug!(
                error_code = body.code,
                error_message = %body.message,
                "Request rejected"
            );
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
