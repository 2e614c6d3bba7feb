//! Error types for the relay.
//!
//! Every failure that crosses the library boundary is a [`RelayError`], which
//! carries an HTTP status and a machine-readable code alongside its message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Failed to read response body: {message}")]
    ReadFailed { message: String },

    #[error("Failed to close response body: {message}")]
    CloseFailed { message: String },

    #[error("Failed to decode response body: {message}")]
    DecodeFailed { message: String },

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RelayError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed {
            message: msg.into(),
        }
    }

    pub fn close_failed(msg: impl Into<String>) -> Self {
        Self::CloseFailed {
            message: msg.into(),
        }
    }

    pub fn decode_failed(msg: impl Into<String>) -> Self {
        Self::DecodeFailed {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// HTTP status the error should be reported with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::Upstream { status, .. } => *status,
            Self::Http(_) => 502,
            Self::ReadFailed { .. }
            | Self::CloseFailed { .. }
            | Self::DecodeFailed { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_) => 500,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::ReadFailed { .. } => "read_response_body_failed",
            Self::CloseFailed { .. } => "close_response_body_failed",
            Self::DecodeFailed { .. } => "unmarshal_response_body_failed",
            Self::Upstream { .. } => "bad_response_status_code",
            Self::Config { .. } => "config_error",
            Self::Http(_) => "do_request_failed",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Toml(_) => "config_error",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::Upstream { .. } => "upstream_error",
            _ => "relay_error",
        }
    }

    /// Render as the unified error body.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                message: self.to_string(),
                error_type: self.error_type().to_string(),
                code: self.code().to_string(),
            },
        }
    }
}

/// Unified (OpenAI-style) error body: `{"error": {"message", "type", "code"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
}

pub type Result<T> = std::result::Result<T, RelayError>;
