//! Error types for telemetry operations.

use thiserror::Error;

/// Errors reported by configuration, transports, and the session manager.
///
/// None of these are fatal: callers get the error back, the offending event
/// or session start is dropped, and the manager stays usable.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("failed to resolve host {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },
    #[error("failed to connect to {host}:{port}: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("failed to open sink {path}: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("called out of order: {0}")]
    CalledOutOfOrder(String),
}

impl TelemetryError {
    /// True for failures that happen while opening a transport.
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::ResolutionFailed { .. } | Self::ConnectFailed { .. } | Self::OpenFailed { .. }
        )
    }
}

/// Convenience result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failures_are_classified() {
        let err = TelemetryError::ResolutionFailed {
            host: "collector.invalid".into(),
            reason: "timed out".into(),
        };
        assert!(err.is_open_failure());
        assert!(!TelemetryError::WriteFailed("broken pipe".into()).is_open_failure());
    }

    #[test]
    fn connect_failure_message_names_endpoint() {
        let err = TelemetryError::ConnectFailed {
            host: "127.0.0.1".into(),
            port: 7000,
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to 127.0.0.1:7000: connection refused"
        );
    }
}
