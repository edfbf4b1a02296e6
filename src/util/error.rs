//! Error classification for provider calls and the normalized error shape
//! collaborators hand back to the orchestrator.
use std::{io, time::Duration};

use anyhow::Error;
use reqwest::StatusCode;
use thiserror::Error as ThisError;

/// Failure of a single collaborator call after its retry policy gave up.
///
/// The orchestrator only ever sees this type; raw provider errors are
/// flattened into it by [`crate::util::retry::CallPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum StageError {
    #[error("{provider} timed out after {}ms", .after.as_millis())]
    Timeout {
        provider: &'static str,
        after: Duration,
    },
    #[error("{provider} failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl StageError {
    #[must_use]
    pub fn provider(provider: &'static str, error: &Error) -> Self {
        Self::Provider {
            provider,
            message: format!("{error:#}"),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// Transient: timeouts, connection failures, 5xx, rate limiting.
    Retryable,
    /// Bad request, not found, unparseable payloads.
    NonRetryable,
    /// Credentials rejected or a local tool missing.
    Fatal,
}

/// Walks the error chain and decides whether another attempt can help.
#[must_use]
pub(crate) fn classify_error(error: &Error) -> ErrorKind {
    for cause in error.chain() {
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() || reqwest_err.is_connect() {
                return ErrorKind::Retryable;
            }

            if let Some(status) = reqwest_err.status() {
                return classify_status(status);
            }
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionAborted => return ErrorKind::Retryable,
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    return ErrorKind::Fatal;
                }
                _ => {}
            }
        }
    }

    ErrorKind::NonRetryable
}

fn classify_status(status: StatusCode) -> ErrorKind {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return ErrorKind::Retryable;
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Fatal,
        _ => ErrorKind::NonRetryable,
    }
}

#[must_use]
pub(crate) fn is_retryable(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Retryable)
}
