//! Error taxonomy for the reminder engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("task text is empty")]
    EmptyText,

    #[error("invalid date: {0}")]
    InvalidDateFormat(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error("no weekdays selected")]
    EmptySelection,

    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("no task number {0}")]
    BadIndex(String),

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("corrupt task record {id}: {reason}")]
    CorruptRecord { id: i64, reason: String },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}
