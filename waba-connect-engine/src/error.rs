//! Error handling for the synchronization engine
//!
//! All errors are contained within the engine: fetch failures are logged and
//! retried on the next cycle, send rejections are surfaced to the caller
//! together with a corrective refresh, and malformed records are dropped
//! during aggregation. Nothing here ever stops the polling scheduler.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during engine operations
///
/// # Examples
///
/// ```rust
/// use waba_connect_engine::EngineError;
///
/// let error = EngineError::SendRejected("quota exceeded".to_string());
/// assert_eq!(error.to_string(), "Send rejected: quota exceeded");
///
/// let error = EngineError::InvalidPhone("???".to_string());
/// assert_eq!(error.to_string(), "Invalid phone number: ???");
/// ```
#[derive(Error, Debug)]
pub enum EngineError {
    /// JSON decoding error for provider message records
    ///
    /// Automatically converted from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport layer error (fetch or send round trip failed)
    ///
    /// Fetch-side transport errors are transient: the engine logs them and
    /// keeps the previous state until the next cycle.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider rejected an outbound message
    ///
    /// Carries the human-readable rejection reason. The optimistic append
    /// has already been rolled back when this is returned.
    #[error("Send rejected: {0}")]
    SendRejected(String),

    /// A phone number with no resolvable digits
    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    /// Operation attempted after the engine was stopped
    #[error("Engine stopped")]
    Stopped,
}

impl EngineError {
    /// Check if this error is recoverable (transient error that can be retried)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use waba_connect_engine::EngineError;
    ///
    /// let error = EngineError::Transport("connection reset".to_string());
    /// assert!(error.is_recoverable());
    ///
    /// let error = EngineError::InvalidPhone("abc".to_string());
    /// assert!(!error.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }

    /// Get a user-friendly error message suitable for display in UI
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Json(e) => {
                format!("Data format error: {}.", e)
            }
            EngineError::Transport(msg) => {
                format!("Network error: {}. The next refresh will retry.", msg)
            }
            EngineError::SendRejected(reason) => {
                format!("Message could not be sent: {}.", reason)
            }
            EngineError::InvalidPhone(phone) => {
                format!("'{}' is not a valid phone number.", phone)
            }
            EngineError::Stopped => "The engine has been stopped.".to_string(),
        }
    }
}
