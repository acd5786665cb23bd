//! Persistence gateway contract and its two backends.
//!
//! # Responsibility
//! - Define one explicit contract for work items, users and notifications.
//! - Share window/staleness arithmetic so both backends answer time queries
//!   with the same boundaries.
//!
//! # Invariants
//! - Backends own their synchronization; callers share one gateway freely.
//! - A missing record is always `GatewayError::NotFound`, never a transport error.
//! - Due window is `(now, now + within]`; staleness cutoff is `created_at < now - older_than`.
//! - The gateway does not enforce notification dedup; callers check
//!   `find_notification` before `create_notification`.

use crate::model::notification::{Notification, NotificationKind};
use crate::model::user::{User, UserUpdate};
use crate::model::validation::{duration_millis, ValidationError};
use crate::model::work_item::{Event, Task, WorkItem, WorkItemKind};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use uuid::Uuid;

pub mod memory;
pub mod mongo;
mod open;

pub use open::{open_gateway, StoreConfig, StoreOpenError};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Record collection named in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Task,
    Event,
    User,
    Notification,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Event => "event",
            Self::User => "user",
            Self::Notification => "notification",
        }
    }
}

/// Error outcomes shared by every backend.
#[derive(Debug)]
pub enum GatewayError {
    /// No record matches the requested key.
    NotFound { entity: EntityKind, key: String },
    /// Input rejected before reaching storage.
    Validation(ValidationError),
    /// A record with the same id already exists.
    Conflict { entity: EntityKind, id: String },
    /// Timeout, connectivity or driver failure. Safe to retry later.
    Transient { op: &'static str, message: String },
    /// Persisted state could not be decoded.
    InvalidData(String),
}

impl GatewayError {
    pub fn not_found(entity: EntityKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn transient(op: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            op,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short stable code used in log records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Conflict { .. } => "conflict",
            Self::Transient { .. } => "transient",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{} not found: {key}", entity.as_str()),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conflict { entity, id } => {
                write!(f, "{} already exists: {id}", entity.as_str())
            }
            Self::Transient { op, message } => write!(f, "store call `{op}` failed: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for GatewayError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Storage contract used by the engine and the API layer.
///
/// Implementations must produce identical results for identical state.
/// Listing order is part of the contract where documented.
pub trait PersistenceGateway: Send + Sync {
    /// Backend label for log records.
    fn backend_name(&self) -> &'static str;

    fn create_task(&self, task: Task) -> GatewayResult<Task>;
    fn get_task(&self, id: &str) -> GatewayResult<Task>;
    /// Tasks of one owner, deadline ascending then id ascending.
    fn list_tasks(&self, owner_id: &str) -> GatewayResult<Vec<Task>>;
    /// Replaces the stored task; the stored id is kept.
    fn update_task(&self, id: &str, task: Task) -> GatewayResult<Task>;
    fn delete_task(&self, id: &str) -> GatewayResult<()>;

    fn create_event(&self, event: Event) -> GatewayResult<Event>;
    fn get_event(&self, id: &str) -> GatewayResult<Event>;
    /// Events of one owner, start ascending then id ascending.
    fn list_events(&self, owner_id: &str) -> GatewayResult<Vec<Event>>;
    fn update_event(&self, id: &str, event: Event) -> GatewayResult<Event>;
    fn delete_event(&self, id: &str) -> GatewayResult<()>;

    fn create_user(&self, user: User) -> GatewayResult<User>;
    fn get_user(&self, id: &str) -> GatewayResult<User>;
    fn get_user_by_email(&self, email: &str) -> GatewayResult<User>;
    fn get_user_by_verification_token(&self, token: &str) -> GatewayResult<User>;
    fn update_user(&self, id: &str, update: &UserUpdate) -> GatewayResult<User>;
    fn update_user_password(&self, id: &str, password_hash: &str) -> GatewayResult<User>;
    /// Sets `is_verified` and clears the pending token.
    fn mark_user_verified(&self, id: &str) -> GatewayResult<()>;

    /// Notifications of one owner, newest first, ties by id ascending.
    fn list_notifications(&self, owner_id: &str) -> GatewayResult<Vec<Notification>>;
    /// Active notification for a dedup key, or `NotFound`.
    fn find_notification(
        &self,
        reference_id: &str,
        kind: NotificationKind,
    ) -> GatewayResult<Notification>;
    /// Persists `notification`, assigning id and `created_at` when absent.
    fn create_notification(&self, notification: Notification) -> GatewayResult<Notification>;
    fn mark_notification_read(&self, id: &str) -> GatewayResult<()>;
    /// Sets `emailed`; repeating the call is a successful no-op.
    fn mark_emailed(&self, id: &str) -> GatewayResult<()>;
    /// Unread, not-yet-emailed notifications created before `now - older_than`,
    /// oldest first, optionally for one owner.
    fn list_stale_unread(
        &self,
        older_than: Duration,
        owner_id: Option<&str>,
    ) -> GatewayResult<Vec<Notification>>;

    /// Open work items of `kind` whose deadline is in `(now, now + within]`,
    /// deadline ascending then id ascending. Completed tasks are excluded.
    fn list_due_work_items(
        &self,
        kind: WorkItemKind,
        within: Duration,
    ) -> GatewayResult<Vec<WorkItem>>;
}

/// Half-open deadline window `(after, until]` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueWindow {
    pub after: i64,
    pub until: i64,
}

impl DueWindow {
    pub fn starting_at(now_ms: i64, within: Duration) -> Result<Self, ValidationError> {
        let span = duration_millis("within", within)?;
        Ok(Self {
            after: now_ms,
            until: now_ms.saturating_add(span),
        })
    }

    pub fn contains(&self, deadline: i64) -> bool {
        deadline > self.after && deadline <= self.until
    }
}

/// Exclusive `created_at` upper bound for stale-unread queries.
pub fn stale_cutoff(now_ms: i64, older_than: Duration) -> Result<i64, ValidationError> {
    let span = duration_millis("older_than", older_than)?;
    Ok(now_ms.saturating_sub(span))
}

/// Returns `id` unchanged, or a fresh UUID string when it is blank.
pub(crate) fn assign_id(id: &str) -> String {
    if id.trim().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        id.to_string()
    }
}
