// Error types for the drum trainer core
//
// This module defines the control-surface error type with numeric error
// codes suitable for embedding hosts. The correlation pipeline itself has
// no fatal conditions: it degrades (no-reference timing, unresolved hand)
// instead of raising.

use log::error;
use std::fmt;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// host boundaries.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Session error code constants
///
/// Error code range: 2001-2005
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// BPM value is outside the supported range (40-240)
    pub const BPM_OUT_OF_RANGE: i32 = 2001;

    /// Subdivision is not one of 1, 2, or 4
    pub const SUBDIVISION_INVALID: i32 = 2002;

    /// A session is already running
    pub const ALREADY_RUNNING: i32 = 2003;

    /// No session is running
    pub const NOT_RUNNING: i32 = 2004;

    /// Session state mutex was poisoned
    pub const LOCK_POISONED: i32 = 2005;
}

/// Control-surface errors
///
/// These cover misuse of the session lifecycle and parameter updates.
/// Error code range: 2001-2005
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// BPM value is outside the supported range (40-240)
    BpmOutOfRange { bpm: u32 },

    /// Subdivision is not one of 1, 2, or 4
    SubdivisionInvalid { subdivision: u32 },

    /// A session is already running
    AlreadyRunning,

    /// No session is running
    NotRunning,

    /// Session state mutex was poisoned
    LockPoisoned { component: String },
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::BpmOutOfRange { .. } => SessionErrorCodes::BPM_OUT_OF_RANGE,
            SessionError::SubdivisionInvalid { .. } => SessionErrorCodes::SUBDIVISION_INVALID,
            SessionError::AlreadyRunning => SessionErrorCodes::ALREADY_RUNNING,
            SessionError::NotRunning => SessionErrorCodes::NOT_RUNNING,
            SessionError::LockPoisoned { .. } => SessionErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::BpmOutOfRange { bpm } => {
                format!("BPM must be between 40 and 240 (got {})", bpm)
            }
            SessionError::SubdivisionInvalid { subdivision } => {
                format!("Subdivision must be 1, 2, or 4 (got {})", subdivision)
            }
            SessionError::AlreadyRunning => {
                "Session already running. Call stop_session() first.".to_string()
            }
            SessionError::NotRunning => {
                "Session not running. Call start_session() first.".to_string()
            }
            SessionError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for SessionError {}

/// Log a session error with structured context
///
/// Logs with the error code, the component, and the message. Non-blocking;
/// never panics.
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=TrainerHandle, message={}",
        context,
        err.code(),
        err.message()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_codes() {
        assert_eq!(
            SessionError::BpmOutOfRange { bpm: 0 }.code(),
            SessionErrorCodes::BPM_OUT_OF_RANGE
        );
        assert_eq!(
            SessionError::SubdivisionInvalid { subdivision: 3 }.code(),
            SessionErrorCodes::SUBDIVISION_INVALID
        );
        assert_eq!(
            SessionError::AlreadyRunning.code(),
            SessionErrorCodes::ALREADY_RUNNING
        );
        assert_eq!(SessionError::NotRunning.code(), SessionErrorCodes::NOT_RUNNING);
        assert_eq!(
            SessionError::LockPoisoned {
                component: "test".to_string()
            }
            .code(),
            SessionErrorCodes::LOCK_POISONED
        );
    }

    #[test]
    fn test_session_error_messages() {
        let err = SessionError::BpmOutOfRange { bpm: 300 };
        assert_eq!(err.message(), "BPM must be between 40 and 240 (got 300)");

        let err = SessionError::SubdivisionInvalid { subdivision: 3 };
        assert!(err.message().contains("1, 2, or 4"));

        let err = SessionError::AlreadyRunning;
        assert!(err.message().contains("already running"));

        let err = SessionError::NotRunning;
        assert!(err.message().contains("not running"));
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::NotRunning;
        let display = format!("{}", err);
        assert!(display.contains("SessionError"));
        assert!(display.contains(&err.code().to_string()));
    }
}
