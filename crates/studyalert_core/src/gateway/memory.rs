//! In-process gateway backend.
//!
//! # Responsibility
//! - Keep every collection in process memory behind one reader/writer lock.
//! - Answer the same queries as the document-store backend, with the same
//!   boundaries and ordering.
//!
//! # Invariants
//! - One `RwLock` guards the whole store; no operation holds it across calls.
//! - A poisoned lock surfaces as `GatewayError::Transient`, never a panic.

use super::{
    assign_id, stale_cutoff, DueWindow, EntityKind, GatewayError, GatewayResult,
    PersistenceGateway,
};
use crate::clock::{Clock, SystemClock};
use crate::model::notification::{Notification, NotificationKind};
use crate::model::user::{User, UserUpdate};
use crate::model::work_item::{Event, Task, WorkItem, WorkItemKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<String, Task>,
    events: HashMap<String, Event>,
    users: HashMap<String, User>,
    notifications: HashMap<String, Notification>,
}

/// Gateway backed by in-process maps.
pub struct InMemoryGateway {
    state: RwLock<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// Creates an empty store using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store reading "now" from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            clock,
        }
    }

    fn read(&self, op: &'static str) -> GatewayResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| GatewayError::transient(op, "store lock poisoned"))
    }

    fn write(&self, op: &'static str) -> GatewayResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| GatewayError::transient(op, "store lock poisoned"))
    }
}

fn insert_new<T>(
    map: &mut HashMap<String, T>,
    entity: EntityKind,
    id: String,
    record: T,
) -> GatewayResult<()> {
    if map.contains_key(&id) {
        return Err(GatewayError::Conflict { entity, id });
    }
    map.insert(id, record);
    Ok(())
}

fn sort_notifications_newest_first(items: &mut [Notification]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn sort_notifications_oldest_first(items: &mut [Notification]) {
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

impl PersistenceGateway for InMemoryGateway {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn create_task(&self, mut task: Task) -> GatewayResult<Task> {
        task.validate()?;
        task.id = assign_id(&task.id);
        let mut state = self.write("create_task")?;
        insert_new(&mut state.tasks, EntityKind::Task, task.id.clone(), task.clone())?;
        Ok(task)
    }

    fn get_task(&self, id: &str) -> GatewayResult<Task> {
        self.read("get_task")?
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(EntityKind::Task, id))
    }

    fn list_tasks(&self, owner_id: &str) -> GatewayResult<Vec<Task>> {
        let state = self.read("list_tasks")?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.owner_id == owner_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.due_at.cmp(&b.due_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    fn update_task(&self, id: &str, mut task: Task) -> GatewayResult<Task> {
        task.validate()?;
        task.id = id.to_string();
        let mut state = self.write("update_task")?;
        let slot = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::Task, id))?;
        *slot = task.clone();
        Ok(task)
    }

    fn delete_task(&self, id: &str) -> GatewayResult<()> {
        self.write("delete_task")?
            .tasks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::not_found(EntityKind::Task, id))
    }

    fn create_event(&self, mut event: Event) -> GatewayResult<Event> {
        event.validate()?;
        event.id = assign_id(&event.id);
        let mut state = self.write("create_event")?;
        insert_new(
            &mut state.events,
            EntityKind::Event,
            event.id.clone(),
            event.clone(),
        )?;
        Ok(event)
    }

    fn get_event(&self, id: &str) -> GatewayResult<Event> {
        self.read("get_event")?
            .events
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(EntityKind::Event, id))
    }

    fn list_events(&self, owner_id: &str) -> GatewayResult<Vec<Event>> {
        let state = self.read("list_events")?;
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|event| event.owner_id == owner_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.start_at
                .cmp(&b.start_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(events)
    }

    fn update_event(&self, id: &str, mut event: Event) -> GatewayResult<Event> {
        event.validate()?;
        event.id = id.to_string();
        let mut state = self.write("update_event")?;
        let slot = state
            .events
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::Event, id))?;
        *slot = event.clone();
        Ok(event)
    }

    fn delete_event(&self, id: &str) -> GatewayResult<()> {
        self.write("delete_event")?
            .events
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::not_found(EntityKind::Event, id))
    }

    fn create_user(&self, mut user: User) -> GatewayResult<User> {
        user.validate()?;
        user.id = assign_id(&user.id);
        let mut state = self.write("create_user")?;
        insert_new(&mut state.users, EntityKind::User, user.id.clone(), user.clone())?;
        Ok(user)
    }

    fn get_user(&self, id: &str) -> GatewayResult<User> {
        self.read("get_user")?
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(EntityKind::User, id))
    }

    fn get_user_by_email(&self, email: &str) -> GatewayResult<User> {
        self.read("get_user_by_email")?
            .users
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(EntityKind::User, email))
    }

    fn get_user_by_verification_token(&self, token: &str) -> GatewayResult<User> {
        self.read("get_user_by_verification_token")?
            .users
            .values()
            .find(|user| user.verification_token.as_deref() == Some(token))
            .cloned()
            .ok_or_else(|| GatewayError::not_found(EntityKind::User, token))
    }

    fn update_user(&self, id: &str, update: &UserUpdate) -> GatewayResult<User> {
        update.validate()?;
        let mut state = self.write("update_user")?;
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::User, id))?;
        update.apply_to(user);
        Ok(user.clone())
    }

    fn update_user_password(&self, id: &str, password_hash: &str) -> GatewayResult<User> {
        let mut state = self.write("update_user_password")?;
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::User, id))?;
        user.password_hash = password_hash.to_string();
        Ok(user.clone())
    }

    fn mark_user_verified(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.write("mark_user_verified")?;
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::User, id))?;
        user.is_verified = true;
        user.verification_token = None;
        Ok(())
    }

    fn list_notifications(&self, owner_id: &str) -> GatewayResult<Vec<Notification>> {
        let state = self.read("list_notifications")?;
        let mut items: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.owner_id == owner_id)
            .cloned()
            .collect();
        sort_notifications_newest_first(&mut items);
        Ok(items)
    }

    fn find_notification(
        &self,
        reference_id: &str,
        kind: NotificationKind,
    ) -> GatewayResult<Notification> {
        let state = self.read("find_notification")?;
        let mut matches: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.reference_id == reference_id && n.kind == kind)
            .cloned()
            .collect();
        sort_notifications_oldest_first(&mut matches);
        matches.into_iter().next().ok_or_else(|| {
            GatewayError::not_found(
                EntityKind::Notification,
                format!("{reference_id}/{}", kind.as_str()),
            )
        })
    }

    fn create_notification(&self, mut notification: Notification) -> GatewayResult<Notification> {
        notification.validate()?;
        notification.id = assign_id(&notification.id);
        if notification.created_at == 0 {
            notification.created_at = self.clock.now_ms();
        }
        let mut state = self.write("create_notification")?;
        insert_new(
            &mut state.notifications,
            EntityKind::Notification,
            notification.id.clone(),
            notification.clone(),
        )?;
        Ok(notification)
    }

    fn mark_notification_read(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.write("mark_notification_read")?;
        let notification = state
            .notifications
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::Notification, id))?;
        notification.read = true;
        Ok(())
    }

    fn mark_emailed(&self, id: &str) -> GatewayResult<()> {
        let mut state = self.write("mark_emailed")?;
        let notification = state
            .notifications
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::Notification, id))?;
        notification.emailed = true;
        Ok(())
    }

    fn list_stale_unread(
        &self,
        older_than: Duration,
        owner_id: Option<&str>,
    ) -> GatewayResult<Vec<Notification>> {
        let cutoff = stale_cutoff(self.clock.now_ms(), older_than)?;
        let state = self.read("list_stale_unread")?;
        let mut items: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.awaits_email() && n.created_at < cutoff)
            .filter(|n| owner_id.map_or(true, |owner| n.owner_id == owner))
            .cloned()
            .collect();
        sort_notifications_oldest_first(&mut items);
        Ok(items)
    }

    fn list_due_work_items(
        &self,
        kind: WorkItemKind,
        within: Duration,
    ) -> GatewayResult<Vec<WorkItem>> {
        let window = DueWindow::starting_at(self.clock.now_ms(), within)?;
        let state = self.read("list_due_work_items")?;
        let mut items: Vec<WorkItem> = match kind {
            WorkItemKind::Task => state
                .tasks
                .values()
                .filter(|task| !task.completed && window.contains(task.due_at))
                .cloned()
                .map(WorkItem::Task)
                .collect(),
            WorkItemKind::Event => state
                .events
                .values()
                .filter(|event| window.contains(event.start_at))
                .cloned()
                .map(WorkItem::Event)
                .collect(),
        };
        items.sort_by(|a, b| {
            a.deadline()
                .cmp(&b.deadline())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(items)
    }
}
