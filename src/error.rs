use thiserror::Error;
use crate::types::series::ProviderId;

#[derive(Error, Debug)]
pub enum Error {
    // Acquisition Errors
    #[error("Incomplete price data: got {hours} hours (need {required}), next day present: {has_next_day}")]
    Incomplete {
        hours: usize,
        required: usize,
        has_next_day: bool,
    },

    // Storage Errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task failure: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single provider request.
///
/// Clients report every failure through this type and never retry on their own;
/// the acquisition scheduler decides what happens next from [`FetchError::retry_class`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure, timeout, rate limiting or a server-side error.
    #[error("{provider}: transient failure: {reason}")]
    Transient { provider: ProviderId, reason: String },

    /// Rejected credentials or a request the provider will never accept.
    #[error("{provider}: permanent failure: {reason}")]
    Permanent { provider: ProviderId, reason: String },

    /// The response body could not be decoded. Nothing from it is trusted.
    #[error("{provider}: malformed response: {reason}")]
    Parse { provider: ProviderId, reason: String },

    /// The provider answered well-formed but reported an error in the payload.
    #[error("{provider}: provider reported error: {reason}")]
    Provider { provider: ProviderId, reason: String },
}

/// How the scheduler should react to a [`FetchError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Retry after the configured interval, until the deadline.
    Retry,
    /// Retrying will not help. Only honoured when fail-fast is enabled.
    Permanent,
}

impl FetchError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Permanent { .. } => RetryClass::Permanent,
            // Payload errors are usually "not published yet"; a later attempt may succeed.
            Self::Transient { .. } | Self::Parse { .. } | Self::Provider { .. } => RetryClass::Retry,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(provider: ProviderId, status: reqwest::StatusCode, body: &str) -> Self {
        let reason = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
        match status.as_u16() {
            401 | 403 => FetchError::Permanent { provider, reason },
            _ => FetchError::Transient { provider, reason },
        }
    }

    /// Classify a transport-level `reqwest` failure.
    pub fn from_transport(provider: ProviderId, err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse { provider, reason: err.to_string() }
        } else {
            FetchError::Transient { provider, reason: err.to_string() }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
