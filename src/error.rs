//! Error types shared by the codec, the connection manager and the facade.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Input rejected before anything is encoded or sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A color channel outside 0..=255 was used to build an `RgbColor`
    #[error("{channel} component {value} is outside 0..=255")]
    InvalidComponent { channel: &'static str, value: i32 },

    /// A codec or facade input outside its accepted range
    #[error("{field} value {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
}

/// Broad class of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Link supervision or connection timeout reported by the radio stack
    Timeout,
    Other,
}

/// Failure reported by the BLE transport for a connect, discovery or write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Timeout => write!(f, "timeout: {}", self.message),
            TransportErrorKind::Other => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No writable channel to the LED strip
    #[error("not connected to an LED device")]
    NotConnected,

    #[error("connection attempt timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("BLE transport error: {0}")]
    Transport(#[from] TransportError),

    /// A saved record could not be decoded
    #[error("persisted record is malformed: {0}")]
    PersistenceCorruption(String),

    /// The connection manager task is gone
    #[error("connection manager has stopped")]
    ControllerStopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_kind() {
        assert!(TransportError::timeout("link lost").is_timeout());
        assert!(!TransportError::other("gatt failure").is_timeout());
        assert_eq!(
            TransportError::timeout("link lost").to_string(),
            "timeout: link lost"
        );
    }

    #[test]
    fn test_validation_message() {
        let err = ValidationError::InvalidComponent {
            channel: "red",
            value: 300,
        };
        assert_eq!(err.to_string(), "red component 300 is outside 0..=255");
    }
}
