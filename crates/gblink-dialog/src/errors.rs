//! Error types for the signaling engines.
//!
//! Errors never cross the component boundary as panics; terminal session
//! states carry one of these with a human-readable reason. Timeout and
//! Rejected stay distinct so callers can tell a silent peer from an
//! explicit refusal.

use gblink_core::CodecError;

/// Result type for dialog operations.
pub type DialogResult<T> = Result<T, DialogError>;

#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("timed out: {message}")]
    Timeout { message: String },

    #[error("rejected with {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("no session for handle {handle}")]
    SessionNotFound { handle: u64 },

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DialogError {
    pub fn protocol(message: impl Into<String>) -> Self {
        DialogError::Protocol { message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        DialogError::Timeout { message: message.into() }
    }

    pub fn rejected(code: u16, message: impl Into<String>) -> Self {
        DialogError::Rejected { code, message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        DialogError::Transport { message: message.into() }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        DialogError::InvalidState { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DialogError::Internal { message: message.into() }
    }

    /// The SIP code to answer with when this error surfaces at an inbound
    /// dispatch boundary.
    pub fn rejection_code(&self) -> u16 {
        match self {
            DialogError::Protocol { .. } => 400,
            DialogError::SessionNotFound { .. } => 481,
            DialogError::Timeout { .. } => 408,
            DialogError::Rejected { code, .. } => *code,
            _ => 500,
        }
    }
}

impl From<CodecError> for DialogError {
    fn from(err: CodecError) -> Self {
        DialogError::Protocol { message: err.to_string() }
    }
}
