//! Error types for preread runs
//!
//! Two layers:
//! - `CollaboratorError`: a single call to an external collaborator failed.
//!   Inside a meeting's pipeline these are recoverable and become a
//!   `SummarizationFailed` outcome.
//! - `ExecutionError`: the run as a whole could not proceed. No digest is
//!   produced and delivery state is left untouched.

use std::time::Duration;

use thiserror::Error;

/// Failure of one call to a calendar, mailbox, summarizer or mail transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("credentials expired or revoked")]
    Unauthorized,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    /// Transient transport failures get one immediate retry. Timeouts,
    /// rate limits and client errors do not.
    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::Transport(_) => true,
            CollaboratorError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Short human-readable reason for the digest's "couldn't summarize" line.
    pub fn short_reason(&self) -> String {
        match self {
            CollaboratorError::Timeout(d) => format!("timed out after {}s", d.as_secs()),
            CollaboratorError::Transport(_) => "service unreachable".to_string(),
            CollaboratorError::RateLimited => "rate limited".to_string(),
            CollaboratorError::Unauthorized => "not authorized".to_string(),
            CollaboratorError::Api { status, .. } => format!("service error {}", status),
            CollaboratorError::Malformed(_) => "unreadable response".to_string(),
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollaboratorError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            CollaboratorError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            CollaboratorError::Transport(err.to_string())
        }
    }
}

/// Run-level failures surfaced to the trigger caller.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(CollaboratorError),

    #[error("Run exceeded its {0}s deadline")]
    RunTimeout(u64),

    #[error("Digest delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl ExecutionError {
    /// Returns true if triggering the run again may succeed without changes
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::CalendarUnavailable(inner) => {
                !matches!(inner, CollaboratorError::Unauthorized)
            }
            ExecutionError::RunTimeout(_) | ExecutionError::DeliveryFailed(_) => true,
            ExecutionError::ConfigurationError(_) | ExecutionError::IoError(_) => false,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ExecutionError::CalendarUnavailable(CollaboratorError::Unauthorized) => {
                "Refresh the Google access token and run again."
            }
            ExecutionError::CalendarUnavailable(_) => {
                "Check your internet connection and run again."
            }
            ExecutionError::RunTimeout(_) => {
                "The run took too long. Try again or raise timeouts.runSecs."
            }
            ExecutionError::DeliveryFailed(_) => {
                "Check the mail account and run again with `preread run`."
            }
            ExecutionError::ConfigurationError(_) => "Check your configuration in ~/.preread/config.json",
            ExecutionError::IoError(_) => "Check file permissions and disk space.",
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::IoError(err.to_string())
    }
}
