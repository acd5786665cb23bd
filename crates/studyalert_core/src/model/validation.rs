//! Validation errors raised at the write and ingestion boundaries.
//!
//! # Responsibility
//! - Describe why a record or a scan argument was rejected.
//!
//! # Invariants
//! - Validation never touches storage; it is a pure check over input values.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Rejection reason for malformed records, timestamps or durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field is empty after trimming.
    MissingField(&'static str),
    /// Date/time text could not be normalized into one canonical timestamp.
    MalformedTimestamp { field: &'static str, value: String },
    /// Event ends before it starts.
    InvalidEventWindow { start: i64, end: i64 },
    /// Scan duration is zero or does not fit the millisecond timestamp range.
    InvalidDuration { field: &'static str, millis: u128 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "`{field}` must not be empty"),
            Self::MalformedTimestamp { field, value } => write!(
                f,
                "`{field}` value `{value}` is not a valid `YYYY-MM-DD HH:MM` timestamp"
            ),
            Self::InvalidEventWindow { start, end } => {
                write!(f, "end_at ({end}) must be >= start_at ({start})")
            }
            Self::InvalidDuration { field, millis } => {
                write!(f, "`{field}` duration of {millis}ms is out of range")
            }
        }
    }
}

impl Error for ValidationError {}

/// Rejects blank required text.
pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

/// Converts a scan duration into positive epoch milliseconds.
///
/// # Errors
/// - `InvalidDuration` when `value` is zero or larger than `i64::MAX` milliseconds.
pub fn duration_millis(field: &'static str, value: Duration) -> Result<i64, ValidationError> {
    let millis = value.as_millis();
    if millis == 0 {
        return Err(ValidationError::InvalidDuration { field, millis });
    }
    i64::try_from(millis).map_err(|_| ValidationError::InvalidDuration { field, millis })
}
