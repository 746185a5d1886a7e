//! Courier error taxonomy.
//!
//! Timezone resolution failures are deliberately absent: they degrade to
//! fail-open behavior inside the clock and never propagate as errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CourierError>;

#[derive(Debug, Error)]
pub enum CourierError {
    /// Sender or receiver id could not be resolved. No side effects occurred.
    #[error("invalid participant: {0}")]
    InvalidParticipant(String),

    /// A schedule-at input could not be parsed as a timestamp.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Status query or rule evaluation on an unknown message id.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// The backing store rejected a read or write. Fatal to the caller.
    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
