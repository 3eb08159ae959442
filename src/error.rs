//! Error types for the flight search core.
//!
//! Nothing in here is fatal. Validation errors are reported before any I/O,
//! business and transport errors land in the session's `Error` phase, and
//! storage errors are recovered by the history store.

use thiserror::Error;

/// Fallback shown when a transport fault carries no usable text.
pub const GENERIC_FAULT: &str = "Failed to search flights";

/// Rejected search input. Raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("departure city is required")]
    MissingOrigin,

    #[error("arrival city is required")]
    MissingDestination,

    #[error("departure date is required")]
    MissingDate,

    #[error("city code must be three letters, got {0:?}")]
    InvalidCityCode(String),

    #[error("date must be YYYY-MM-DD, got {0:?}")]
    InvalidDate(String),

    #[error("departure and arrival cities must differ ({0})")]
    SameCity(String),

    #[error("return date must not be before the departure date")]
    ReturnBeforeDeparture,
}

/// Network-level failure talking to the flight provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("provider returned HTTP {status}")]
    Status { status: u16, detail: Option<String> },

    #[error("{0}")]
    Request(String),

    #[error("invalid provider response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Human-readable message for the session's error state.
    pub fn fault_message(&self) -> String {
        match self {
            TransportError::Status {
                detail: Some(detail),
                ..
            } if !detail.trim().is_empty() => detail.clone(),
            TransportError::Request(msg) | TransportError::Decode(msg) if msg.trim().is_empty() => {
                GENERIC_FAULT.to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Outcome of a submit that did not produce results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{reason}")]
    Business { code: i64, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A newer submit or a clear took over while this request was in flight.
    #[error("request {token} was superseded")]
    Superseded { token: u64 },

    #[error("no history entry with id {0}")]
    UnknownHistoryEntry(uuid::Uuid),
}

/// Failure of the durable key-value surface.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bad value in the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
