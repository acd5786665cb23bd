//! Work item domain model: tasks and events with one canonical deadline.
//!
//! # Responsibility
//! - Define `Task` and `Event` records and the `WorkItem` view the engine scans.
//! - Normalize `YYYY-MM-DD` + `HH:MM` text into epoch milliseconds at ingestion.
//!
//! # Invariants
//! - A deadline is stored once, as UTC epoch milliseconds (`Task::due_at`,
//!   `Event::start_at`). It is never re-parsed from text after ingestion.
//! - `Event::end_at` is never earlier than `Event::start_at`.
//! - `Task::completed_at` is `Some` only while `completed == true`.

use super::notification::NotificationKind;
use super::validation::{require_text, ValidationError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Opaque record identifier. Writers generate one when it is empty.
pub type RecordId = String;

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parses separate date and time text into UTC epoch milliseconds.
///
/// # Errors
/// - `MalformedTimestamp` when the joined text is not `YYYY-MM-DD HH:MM`.
pub fn deadline_from_parts(
    field: &'static str,
    date: &str,
    time: &str,
) -> Result<i64, ValidationError> {
    let joined = format!("{} {}", date.trim(), time.trim());
    NaiveDateTime::parse_from_str(&joined, DATE_TIME_FORMAT)
        .map(|value| value.and_utc().timestamp_millis())
        .map_err(|_| ValidationError::MalformedTimestamp {
            field,
            value: joined,
        })
}

/// Actionable item with a due deadline and a completion flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: RecordId,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub course_id: Option<String>,
    /// UTC epoch milliseconds.
    pub due_at: i64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub has_reminder: bool,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl Task {
    /// Creates an open task; the id is assigned by the gateway on create.
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>, due_at: i64) -> Self {
        Self {
            id: String::new(),
            owner_id: owner_id.into(),
            title: title.into(),
            description: String::new(),
            course_id: None,
            due_at,
            completed: false,
            has_reminder: false,
            completed_at: None,
        }
    }

    /// Builds a task from the date/time text pair accepted by the API layer.
    pub fn from_parts(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        due_date: &str,
        due_time: &str,
    ) -> Result<Self, ValidationError> {
        let due_at = deadline_from_parts("due_at", due_date, due_time)?;
        Ok(Self::new(owner_id, title, due_at))
    }

    /// Flips completion and keeps `completed_at` in step with it.
    pub fn set_completed(&mut self, completed: bool, now_ms: i64) {
        self.completed = completed;
        self.completed_at = if completed { Some(now_ms) } else { None };
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("owner_id", &self.owner_id)?;
        require_text("title", &self.title)?;
        Ok(())
    }
}

/// Calendar entry; its deadline is the start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: RecordId,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub course_id: Option<String>,
    /// Free-form tag such as `class`, `exam` or `study`.
    #[serde(rename = "type")]
    pub kind: String,
    /// UTC epoch milliseconds.
    pub start_at: i64,
    /// UTC epoch milliseconds, `>= start_at`.
    pub end_at: i64,
}

impl Event {
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        kind: impl Into<String>,
        start_at: i64,
        end_at: i64,
    ) -> Self {
        Self {
            id: String::new(),
            owner_id: owner_id.into(),
            title: title.into(),
            description: String::new(),
            course_id: None,
            kind: kind.into(),
            start_at,
            end_at,
        }
    }

    /// Builds an event from one date and separate start/end clock times.
    pub fn from_parts(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        date: &str,
        start_time: &str,
        end_time: &str,
        kind: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let start_at = deadline_from_parts("start_at", date, start_time)?;
        let end_at = deadline_from_parts("end_at", date, end_time)?;
        let event = Self::new(owner_id, title, kind, start_at, end_at);
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("owner_id", &self.owner_id)?;
        require_text("title", &self.title)?;
        if self.end_at < self.start_at {
            return Err(ValidationError::InvalidEventWindow {
                start: self.start_at,
                end: self.end_at,
            });
        }
        Ok(())
    }
}

/// Which work item collection a due scan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkItemKind {
    Task,
    Event,
}

impl WorkItemKind {
    /// Notification kind raised for items of this kind.
    pub fn notification_kind(self) -> NotificationKind {
        match self {
            Self::Task => NotificationKind::TaskDue,
            Self::Event => NotificationKind::EventStart,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Event => "event",
        }
    }
}

/// Anything with a deadline that can trigger a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Task(Task),
    Event(Event),
}

impl WorkItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Task(task) => &task.id,
            Self::Event(event) => &event.id,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            Self::Task(task) => &task.owner_id,
            Self::Event(event) => &event.owner_id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Task(task) => &task.title,
            Self::Event(event) => &event.title,
        }
    }

    /// Canonical deadline in UTC epoch milliseconds.
    pub fn deadline(&self) -> i64 {
        match self {
            Self::Task(task) => task.due_at,
            Self::Event(event) => event.start_at,
        }
    }

    pub fn kind(&self) -> WorkItemKind {
        match self {
            Self::Task(_) => WorkItemKind::Task,
            Self::Event(_) => WorkItemKind::Event,
        }
    }
}
