//! Email delivery capability consumed by the engine.
//!
//! Transport mechanics (SMTP, MIME) live outside this crate; the engine only
//! needs "send this, tell me whether it worked".

use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Delivery failure reported by a notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Recipient or content rejected by the transport.
    Rejected(String),
    /// Transport could not be reached; delivery may succeed later.
    Unavailable(String),
}

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(message) => write!(f, "delivery rejected: {message}"),
            Self::Unavailable(message) => write!(f, "transport unavailable: {message}"),
        }
    }
}

impl Error for NotifyError {}

/// Send-email capability. Implementations hold no state the engine shares.
pub trait Notifier: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Fallback used when no mail transport is configured: records the delivery
/// in the log and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(
            "event=mock_email module=notifier status=ok to={to} subject={subject:?} body_chars={}",
            body.chars().count()
        );
        Ok(())
    }
}
