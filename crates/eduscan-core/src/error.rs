//! Error types for scanning sessions

use thiserror::Error;

/// Result type for scanning session operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while driving a scanning session
///
/// Every variant renders to a human-readable message suitable for showing
/// to the person operating the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// Exam or template identifier not set
    #[error("Please select both an exam and an answer template before scanning ({0} is missing)")]
    MissingContext(&'static str),

    /// Capture attempted outside an active scanning session
    #[error("Scanning session not started")]
    SessionNotStarted,

    /// Capture attempted while the previous frame is still being recognised
    #[error("Frame {0} is still being processed")]
    FrameInFlight(u64),

    /// Save attempted without a recognition result
    #[error("No recognition result to save")]
    NoResult,

    /// No authentication token available
    #[error("Not authenticated: no access token available")]
    MissingToken,

    /// Message could not be sent because the connection is not open
    #[error("Not connected to scanning service")]
    NotConnected,

    /// Remote service rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthRejected(String),

    /// Connection could not be established or was lost
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid service URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Timed out waiting for the connection or an acknowledgement
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Remote service reported a processing error
    #[error("{0}")]
    Remote(String),

    /// Malformed message on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Coarse classification of a [`ScanError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any network traffic
    Validation,
    /// Handshake failure, dropped connection or timeout
    Connection,
    /// Credentials rejected or missing
    Authentication,
    /// Remote processing failure during an active session
    Remote,
    /// Send attempted without an open connection
    NotConnected,
}

impl ScanError {
    /// Returns the error class
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::MissingContext(_) => ErrorKind::Validation,
            ScanError::SessionNotStarted => ErrorKind::Validation,
            ScanError::FrameInFlight(_) => ErrorKind::Validation,
            ScanError::NoResult => ErrorKind::Validation,
            ScanError::MissingToken => ErrorKind::Authentication,
            ScanError::AuthRejected(_) => ErrorKind::Authentication,
            ScanError::NotConnected => ErrorKind::NotConnected,
            ScanError::ConnectionFailed(_) => ErrorKind::Connection,
            ScanError::InvalidUrl(_) => ErrorKind::Connection,
            ScanError::Timeout(_) => ErrorKind::Connection,
            ScanError::Protocol(_) => ErrorKind::Connection,
            ScanError::Remote(_) => ErrorKind::Remote,
        }
    }

    /// Whether a reconnect attempt could succeed without new credentials
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::ConnectionFailed(_) | ScanError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(e: serde_json::Error) -> Self {
        ScanError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_local() {
        assert_eq!(
            ScanError::MissingContext("exam").kind(),
            ErrorKind::Validation
        );
        assert_eq!(ScanError::SessionNotStarted.kind(), ErrorKind::Validation);
        assert_eq!(ScanError::NoResult.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_auth_errors_are_not_retryable() {
        let err = ScanError::AuthRejected("Invalid token".into());
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!err.is_retryable());
        assert!(ScanError::ConnectionFailed("refused".into()).is_retryable());
    }

    #[test]
    fn test_remote_message_is_shown_verbatim() {
        let err = ScanError::Remote("Sheet is upside down".into());
        assert_eq!(err.to_string(), "Sheet is upside down");
    }
}
