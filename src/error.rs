//! Error types for the SDK.

use thiserror::Error;

/// Errors raised to a caller by the facade (H) and lifecycle manager (G).
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("beacon-telemetry is already initialized")]
    AlreadyInitialized,

    #[error("beacon-telemetry has not been initialized; call init() first")]
    NotInitialized,

    #[error("beacon-telemetry failed to initialize: {0}")]
    UnexpectedFailure(String),
}

/// Outcome of a single HTTP Sender (component B) request.
///
/// This is not a caller-facing error: it is the classification a batcher or
/// the aggregator uses internally to decide whether to abandon further
/// sends (spec §7 `InvalidToken`) or simply drop this flush and continue.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Ok,
    InvalidToken,
    ServerError { status: u16, message: String },
    NetworkError(String),
}

impl SendOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SendOutcome::Ok)
    }

    /// Whether this outcome should permanently stop further sends for the
    /// lifetime of the owning batcher (spec §7: `InvalidToken` is fatal,
    /// not retried).
    pub fn is_fatal(&self) -> bool {
        matches!(self, SendOutcome::InvalidToken)
    }

    /// Classify an HTTP status code per spec §4.B.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => SendOutcome::InvalidToken,
            200..=299 => SendOutcome::Ok,
            other => SendOutcome::ServerError {
                status: other,
                message: format!("unexpected status {other}"),
            },
        }
    }
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendOutcome::Ok => write!(f, "ok"),
            SendOutcome::InvalidToken => write!(f, "invalid token (401)"),
            SendOutcome::ServerError { status, message } => {
                write!(f, "server error {status}: {message}")
            }
            SendOutcome::NetworkError(msg) => write!(f, "network error: {msg}"),
        }
    }
}
