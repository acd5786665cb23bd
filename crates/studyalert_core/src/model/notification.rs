//! Notification records raised by the engine.
//!
//! # Invariants
//! - At most one notification exists per (`reference_id`, `kind`).
//! - `emailed` only ever goes from `false` to `true`.

use super::validation::{require_text, ValidationError};
use super::work_item::RecordId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A task deadline is inside the due window.
    TaskDue,
    /// An event start is inside the due window.
    EventStart,
}

impl NotificationKind {
    /// Stored tag, also used as the dedup key component.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskDue => "TASK_DUE",
            Self::EventStart => "EVENT_START",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: RecordId,
    pub owner_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Id of the task or event this notification was raised about.
    pub reference_id: String,
    pub read: bool,
    pub emailed: bool,
    /// UTC epoch milliseconds; assigned by the gateway when zero.
    pub created_at: i64,
}

impl Notification {
    /// Builds an unread, not-yet-emailed notification.
    pub fn pending(
        owner_id: impl Into<String>,
        kind: NotificationKind,
        reference_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            owner_id: owner_id.into(),
            message: message.into(),
            kind,
            reference_id: reference_id.into(),
            read: false,
            emailed: false,
            created_at: 0,
        }
    }

    /// Whether the stale-unread scan may still pick this record up.
    pub fn awaits_email(&self) -> bool {
        !self.read && !self.emailed
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("owner_id", &self.owner_id)?;
        require_text("reference_id", &self.reference_id)?;
        require_text("message", &self.message)?;
        Ok(())
    }
}
