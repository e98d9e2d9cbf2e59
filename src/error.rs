//! # Error Handling
//!
//! Defines the crate-wide error type and how each failure class is surfaced.
//!
//! ## Error Categories:
//! - **Config**: missing/invalid credentials or settings; fatal at startup
//! - **Input**: malformed client request; the remote service is never contacted
//! - **Transcode**: the external ffmpeg step failed
//! - **Auth**: connection URL signing failed
//! - **Transport**: remote WebSocket connect/send failure, no automatic retry
//! - **Protocol**: the remote service reported an error code, a message failed
//!   to parse, or the stream closed before a terminal result
//! - **Timeout**: the overall session deadline elapsed
//! - **Internal**: anything unexpected on our side
//!
//! Every failure inside an evaluation is collapsed into exactly one of these
//! at the session boundary; the gateway turns it into a single client-visible
//! `{error}` message and never crashes the process on a per-request failure.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Missing or invalid configuration
    Config(String),

    /// Client sent malformed audio or text; rejected before any remote call
    Input(String),

    /// External transcoding step failed
    Transcode(String),

    /// Connection URL signing failed
    Auth(String),

    /// Remote WebSocket connect/open/send failure
    Transport(String),

    /// Remote protocol failure. `code` carries the remote-reported error code
    /// when the service returned one; parse failures and unexpected closes
    /// have no code.
    Protocol {
        code: Option<i32>,
        message: String,
    },

    /// Overall session deadline exceeded
    Timeout,

    /// Unexpected server-side failure
    Internal(String),
}

impl AppError {
    /// The human-readable message relayed to the gateway client in the
    /// `{ "error": ... }` payload. Remote-reported errors pass through the
    /// service's own description verbatim.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Config(msg) => format!("Server misconfigured: {}", msg),
            AppError::Input(msg) => msg.clone(),
            AppError::Transcode(msg) => format!("Audio conversion failed: {}", msg),
            AppError::Auth(msg) => format!("Authorization failed: {}", msg),
            AppError::Transport(msg) => format!("Evaluation service unreachable: {}", msg),
            AppError::Protocol { message, .. } => message.clone(),
            AppError::Timeout => "Evaluation timed out".to_string(),
            AppError::Internal(msg) => format!("Internal error: {}", msg),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Input(msg) => write!(f, "Input error: {}", msg),
            AppError::Transcode(msg) => write!(f, "Transcode error: {}", msg),
            AppError::Auth(msg) => write!(f, "Auth error: {}", msg),
            AppError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AppError::Protocol { code: Some(code), message } => {
                write!(f, "Protocol error {}: {}", code, message)
            }
            AppError::Protocol { code: None, message } => {
                write!(f, "Protocol error: {}", message)
            }
            AppError::Timeout => write!(f, "Session deadline exceeded"),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// HTTP mapping for the supplemental REST surface. The WebSocket gateway
/// path does not use this; it relays `client_message()` instead.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = match self {
            AppError::Input(_) => (actix_web::http::StatusCode::BAD_REQUEST, "input_error"),
            AppError::Config(_) => {
                (actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "config_error")
            }
            AppError::Auth(_) => {
                (actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "auth_error")
            }
            AppError::Transcode(_) => {
                (actix_web::http::StatusCode::BAD_GATEWAY, "transcode_error")
            }
            AppError::Transport(_) => {
                (actix_web::http::StatusCode::BAD_GATEWAY, "transport_error")
            }
            AppError::Protocol { .. } => {
                (actix_web::http::StatusCode::BAD_GATEWAY, "protocol_error")
            }
            AppError::Timeout => {
                (actix_web::http::StatusCode::GATEWAY_TIMEOUT, "timeout_error")
            }
            AppError::Internal(_) => {
                (actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": self.client_message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Client request bodies are JSON; a parse failure there is the client's
/// fault, not ours.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Input(format!("Invalid JSON: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
