//! Error types for the reminder engine.
//!
//! Nothing in here is ever fatal to the host application: callers log and
//! degrade (skip a task, skip a delivery, fall back to in-memory state).

/// Errors raised by the reminder engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    /// The notification sink is unavailable or the user denied permission.
    #[error("notification permission denied: {0}")]
    PermissionDenied(String),

    /// The ledger's persistence backend cannot be read or written.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// A task record failed validation (missing id, malformed date).
    #[error("invalid task {id:?}: {reason}")]
    InvalidTask { id: Option<String>, reason: String },

    /// The sink accepted the reminder but failed to surface it.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// A due date could not be parsed.
    #[error("invalid due date '{value}': {reason}")]
    InvalidDate { value: String, reason: String },

    /// Unknown IANA timezone name.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

impl ReminderError {
    pub(crate) fn invalid_task(id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            id: id.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ReminderError>;
