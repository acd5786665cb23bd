//! Document-store gateway backend on MongoDB.
//!
//! # Responsibility
//! - Map every contract operation onto exactly one bounded MongoDB round trip.
//! - Translate driver outcomes into the shared `GatewayError` taxonomy.
//!
//! # Invariants
//! - Each call is wrapped in `call_timeout`; an elapsed timeout is `Transient`.
//! - "No matching document" is `NotFound`, the same outcome as the in-process store.
//! - Records are addressed by their `id` field (unique index), never by `_id`.
//! - Window and staleness bounds come from the shared gateway helpers.

use super::open::StoreOpenError;
use super::{
    assign_id, stale_cutoff, DueWindow, EntityKind, GatewayError, GatewayResult,
    PersistenceGateway,
};
use crate::clock::{Clock, SystemClock};
use crate::model::notification::{Notification, NotificationKind};
use crate::model::user::{User, UserUpdate};
use crate::model::work_item::{Event, Task, WorkItem, WorkItemKind};
use futures_util::TryStreamExt;
use log::{info, warn};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as DriverError, ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions,
    ReturnDocument,
};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

pub const DEFAULT_DATABASE: &str = "studybuddy";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

const TASKS: &str = "tasks";
const EVENTS: &str = "events";
const USERS: &str = "users";
const NOTIFICATIONS: &str = "notifications";
const DUPLICATE_KEY_CODE: i32 = 11000;
const APP_NAME: &str = "studyalert";

/// Connection target and per-call bound for the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    /// Upper bound for one logical operation, including server selection.
    pub call_timeout: Duration,
}

impl MongoConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: DEFAULT_DATABASE.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Gateway backed by a MongoDB database.
///
/// Owns a private tokio runtime that drives the async driver, so callers stay
/// synchronous. Calls block the current thread: from async code, run them on
/// `tokio::task::spawn_blocking`, never directly on a runtime worker. Dropping
/// the gateway is safe anywhere; the private runtime shuts down in the background.
pub struct MongoGateway {
    /// `None` only while dropping.
    runtime: Option<Runtime>,
    db: Database,
    tasks: Collection<Task>,
    events: Collection<Event>,
    users: Collection<User>,
    notifications: Collection<Notification>,
    call_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl MongoGateway {
    /// Connects using the wall clock.
    pub fn connect(config: &MongoConfig) -> Result<Self, StoreOpenError> {
        Self::connect_with_clock(config, Arc::new(SystemClock))
    }

    /// Connects, pings the database and ensures indexes.
    ///
    /// # Errors
    /// - `StoreOpenError::Runtime` when the driver runtime cannot start.
    /// - `StoreOpenError::Connect` when the URI is invalid, the server is
    ///   unreachable within `call_timeout`, or index creation fails.
    pub fn connect_with_clock(
        config: &MongoConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreOpenError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("studyalert-mongo")
            .enable_all()
            .build()
            .map_err(StoreOpenError::Runtime)?;

        let connect_failed = |message: String| StoreOpenError::Connect {
            target: redact_uri(&config.uri),
            message,
        };

        let call_timeout = config.call_timeout;
        let client = runtime
            .block_on(async {
                let mut options = ClientOptions::parse(&config.uri).await?;
                options.app_name = Some(APP_NAME.to_string());
                options.server_selection_timeout = Some(call_timeout);
                options.connect_timeout = Some(call_timeout);
                Ok::<Client, DriverError>(Client::with_options(options)?)
            })
            .map_err(|err| connect_failed(err.to_string()))?;

        let db = client.database(&config.database);
        let gateway = Self {
            tasks: db.collection(TASKS),
            events: db.collection(EVENTS),
            users: db.collection(USERS),
            notifications: db.collection(NOTIFICATIONS),
            db,
            runtime: Some(runtime),
            call_timeout,
            clock,
        };

        gateway
            .round_trip("ping", async {
                gateway
                    .db
                    .run_command(doc! { "ping": 1 }, None)
                    .await
                    .map(|_| ())
                    .map_err(driver_error("ping"))
            })
            .map_err(|err| connect_failed(err.to_string()))?;
        gateway
            .ensure_indexes()
            .map_err(|err| connect_failed(err.to_string()))?;

        info!(
            "event=mongo_connect module=gateway status=ok database={} call_timeout_ms={}",
            config.database,
            call_timeout.as_millis()
        );
        Ok(gateway)
    }

    /// Drops the whole database. Used to isolate test runs.
    pub fn drop_database(&self) -> GatewayResult<()> {
        self.round_trip("drop_database", async {
            self.db.drop(None).await.map_err(driver_error("drop_database"))
        })
    }

    fn ensure_indexes(&self) -> GatewayResult<()> {
        self.round_trip("ensure_indexes", async {
            let op = "ensure_indexes";
            self.tasks
                .create_indexes(
                    [
                        unique_id_index(),
                        plain_index(doc! { "ownerId": 1, "dueAt": 1 }),
                        plain_index(doc! { "completed": 1, "dueAt": 1 }),
                    ],
                    None,
                )
                .await
                .map_err(driver_error(op))?;
            self.events
                .create_indexes(
                    [
                        unique_id_index(),
                        plain_index(doc! { "ownerId": 1, "startAt": 1 }),
                        plain_index(doc! { "startAt": 1 }),
                    ],
                    None,
                )
                .await
                .map_err(driver_error(op))?;
            self.users
                .create_indexes(
                    [
                        unique_id_index(),
                        plain_index(doc! { "email": 1 }),
                        plain_index(doc! { "verificationToken": 1 }),
                    ],
                    None,
                )
                .await
                .map_err(driver_error(op))?;
            self.notifications
                .create_indexes(
                    [
                        unique_id_index(),
                        plain_index(doc! { "referenceId": 1, "type": 1 }),
                        plain_index(doc! { "read": 1, "emailed": 1, "createdAt": 1 }),
                        plain_index(doc! { "ownerId": 1, "createdAt": -1 }),
                    ],
                    None,
                )
                .await
                .map_err(driver_error(op))?;
            Ok(())
        })
    }

    /// Runs one logical operation under the per-call timeout.
    fn round_trip<T, F>(&self, op: &'static str, call: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(GatewayError::transient(op, "store runtime already shut down"));
        };
        let limit = self.call_timeout;
        let started_at = Instant::now();
        let result = runtime.block_on(async move {
            match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::transient(
                    op,
                    format!("timed out after {}ms", limit.as_millis()),
                )),
            }
        });

        if let Err(err) = &result {
            if !err.is_not_found() {
                warn!(
                    "event=store_call module=gateway status=error backend=mongo op={op} duration_ms={} error_code={} error={err}",
                    started_at.elapsed().as_millis(),
                    err.code()
                );
            }
        }
        result
    }

    fn find_one_by<T>(
        &self,
        op: &'static str,
        collection: &Collection<T>,
        filter: Document,
        entity: EntityKind,
        key: &str,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        self.round_trip(op, async {
            collection
                .find_one(filter, None)
                .await
                .map_err(driver_error(op))?
                .ok_or_else(|| GatewayError::not_found(entity, key))
        })
    }

    fn find_sorted<T>(
        &self,
        op: &'static str,
        collection: &Collection<T>,
        filter: Document,
        sort: Document,
    ) -> GatewayResult<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        self.round_trip(op, async {
            let options = FindOptions::builder().sort(sort).build();
            collection
                .find(filter, options)
                .await
                .map_err(driver_error(op))?
                .try_collect::<Vec<T>>()
                .await
                .map_err(driver_error(op))
        })
    }

    fn set_fields<T>(
        &self,
        op: &'static str,
        collection: &Collection<T>,
        id: &str,
        fields: Document,
        entity: EntityKind,
    ) -> GatewayResult<()>
    where
        T: Send + Sync,
    {
        self.round_trip(op, async {
            let result = collection
                .update_one(doc! { "id": id }, doc! { "$set": fields }, None)
                .await
                .map_err(driver_error(op))?;
            if result.matched_count == 0 {
                return Err(GatewayError::not_found(entity, id));
            }
            Ok(())
        })
    }

    fn delete_by_id<T>(
        &self,
        op: &'static str,
        collection: &Collection<T>,
        id: &str,
        entity: EntityKind,
    ) -> GatewayResult<()>
    where
        T: Send + Sync,
    {
        self.round_trip(op, async {
            let result = collection
                .delete_one(doc! { "id": id }, None)
                .await
                .map_err(driver_error(op))?;
            if result.deleted_count == 0 {
                return Err(GatewayError::not_found(entity, id));
            }
            Ok(())
        })
    }

    fn update_user_fields(&self, op: &'static str, id: &str, fields: Document) -> GatewayResult<User> {
        self.round_trip(op, async {
            let options = FindOneAndUpdateOptions::builder()
                .return_document(ReturnDocument::After)
                .build();
            self.users
                .find_one_and_update(doc! { "id": id }, doc! { "$set": fields }, options)
                .await
                .map_err(driver_error(op))?
                .ok_or_else(|| GatewayError::not_found(EntityKind::User, id))
        })
    }
}

impl Drop for MongoGateway {
    fn drop(&mut self) {
        // A plain runtime drop panics when the last owner lives in async code.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl PersistenceGateway for MongoGateway {
    fn backend_name(&self) -> &'static str {
        "mongo"
    }

    fn create_task(&self, mut task: Task) -> GatewayResult<Task> {
        task.validate()?;
        task.id = assign_id(&task.id);
        self.round_trip("create_task", async {
            self.tasks
                .insert_one(&task, None)
                .await
                .map_err(insert_error("create_task", EntityKind::Task, &task.id))
        })?;
        Ok(task)
    }

    fn get_task(&self, id: &str) -> GatewayResult<Task> {
        self.find_one_by("get_task", &self.tasks, doc! { "id": id }, EntityKind::Task, id)
    }

    fn list_tasks(&self, owner_id: &str) -> GatewayResult<Vec<Task>> {
        self.find_sorted(
            "list_tasks",
            &self.tasks,
            doc! { "ownerId": owner_id },
            doc! { "dueAt": 1, "id": 1 },
        )
    }

    fn update_task(&self, id: &str, mut task: Task) -> GatewayResult<Task> {
        task.validate()?;
        task.id = id.to_string();
        self.round_trip("update_task", async {
            let result = self
                .tasks
                .replace_one(doc! { "id": id }, &task, None)
                .await
                .map_err(driver_error("update_task"))?;
            if result.matched_count == 0 {
                return Err(GatewayError::not_found(EntityKind::Task, id));
            }
            Ok(())
        })?;
        Ok(task)
    }

    fn delete_task(&self, id: &str) -> GatewayResult<()> {
        self.delete_by_id("delete_task", &self.tasks, id, EntityKind::Task)
    }

    fn create_event(&self, mut event: Event) -> GatewayResult<Event> {
        event.validate()?;
        event.id = assign_id(&event.id);
        self.round_trip("create_event", async {
            self.events
                .insert_one(&event, None)
                .await
                .map_err(insert_error("create_event", EntityKind::Event, &event.id))
        })?;
        Ok(event)
    }

    fn get_event(&self, id: &str) -> GatewayResult<Event> {
        self.find_one_by("get_event", &self.events, doc! { "id": id }, EntityKind::Event, id)
    }

    fn list_events(&self, owner_id: &str) -> GatewayResult<Vec<Event>> {
        self.find_sorted(
            "list_events",
            &self.events,
            doc! { "ownerId": owner_id },
            doc! { "startAt": 1, "id": 1 },
        )
    }

    fn update_event(&self, id: &str, mut event: Event) -> GatewayResult<Event> {
        event.validate()?;
        event.id = id.to_string();
        self.round_trip("update_event", async {
            let result = self
                .events
                .replace_one(doc! { "id": id }, &event, None)
                .await
                .map_err(driver_error("update_event"))?;
            if result.matched_count == 0 {
                return Err(GatewayError::not_found(EntityKind::Event, id));
            }
            Ok(())
        })?;
        Ok(event)
    }

    fn delete_event(&self, id: &str) -> GatewayResult<()> {
        self.delete_by_id("delete_event", &self.events, id, EntityKind::Event)
    }

    fn create_user(&self, mut user: User) -> GatewayResult<User> {
        user.validate()?;
        user.id = assign_id(&user.id);
        self.round_trip("create_user", async {
            self.users
                .insert_one(&user, None)
                .await
                .map_err(insert_error("create_user", EntityKind::User, &user.id))
        })?;
        Ok(user)
    }

    fn get_user(&self, id: &str) -> GatewayResult<User> {
        self.find_one_by("get_user", &self.users, doc! { "id": id }, EntityKind::User, id)
    }

    fn get_user_by_email(&self, email: &str) -> GatewayResult<User> {
        self.find_one_by(
            "get_user_by_email",
            &self.users,
            doc! { "email": email },
            EntityKind::User,
            email,
        )
    }

    fn get_user_by_verification_token(&self, token: &str) -> GatewayResult<User> {
        self.find_one_by(
            "get_user_by_verification_token",
            &self.users,
            doc! { "verificationToken": token },
            EntityKind::User,
            token,
        )
    }

    fn update_user(&self, id: &str, update: &UserUpdate) -> GatewayResult<User> {
        update.validate()?;
        if update.is_empty() {
            return self.get_user(id);
        }
        let mut fields = Document::new();
        if let Some(name) = &update.name {
            fields.insert("name", name.as_str());
        }
        if let Some(email) = &update.email {
            fields.insert("email", email.as_str());
        }
        self.update_user_fields("update_user", id, fields)
    }

    fn update_user_password(&self, id: &str, password_hash: &str) -> GatewayResult<User> {
        self.update_user_fields(
            "update_user_password",
            id,
            doc! { "password": password_hash },
        )
    }

    fn mark_user_verified(&self, id: &str) -> GatewayResult<()> {
        self.set_fields(
            "mark_user_verified",
            &self.users,
            id,
            doc! { "isVerified": true, "verificationToken": Bson::Null },
            EntityKind::User,
        )
    }

    fn list_notifications(&self, owner_id: &str) -> GatewayResult<Vec<Notification>> {
        self.find_sorted(
            "list_notifications",
            &self.notifications,
            doc! { "ownerId": owner_id },
            doc! { "createdAt": -1, "id": 1 },
        )
    }

    fn find_notification(
        &self,
        reference_id: &str,
        kind: NotificationKind,
    ) -> GatewayResult<Notification> {
        let op = "find_notification";
        self.round_trip(op, async {
            let options = FindOneOptions::builder()
                .sort(doc! { "createdAt": 1, "id": 1 })
                .build();
            self.notifications
                .find_one(
                    doc! { "referenceId": reference_id, "type": kind.as_str() },
                    options,
                )
                .await
                .map_err(driver_error(op))?
                .ok_or_else(|| {
                    GatewayError::not_found(
                        EntityKind::Notification,
                        format!("{reference_id}/{}", kind.as_str()),
                    )
                })
        })
    }

    fn create_notification(&self, mut notification: Notification) -> GatewayResult<Notification> {
        notification.validate()?;
        notification.id = assign_id(&notification.id);
        if notification.created_at == 0 {
            notification.created_at = self.clock.now_ms();
        }
        self.round_trip("create_notification", async {
            self.notifications
                .insert_one(&notification, None)
                .await
                .map_err(insert_error(
                    "create_notification",
                    EntityKind::Notification,
                    &notification.id,
                ))
        })?;
        Ok(notification)
    }

    fn mark_notification_read(&self, id: &str) -> GatewayResult<()> {
        self.set_fields(
            "mark_notification_read",
            &self.notifications,
            id,
            doc! { "read": true },
            EntityKind::Notification,
        )
    }

    fn mark_emailed(&self, id: &str) -> GatewayResult<()> {
        self.set_fields(
            "mark_emailed",
            &self.notifications,
            id,
            doc! { "emailed": true },
            EntityKind::Notification,
        )
    }

    fn list_stale_unread(
        &self,
        older_than: Duration,
        owner_id: Option<&str>,
    ) -> GatewayResult<Vec<Notification>> {
        let cutoff = stale_cutoff(self.clock.now_ms(), older_than)?;
        let mut filter = doc! {
            "read": false,
            "emailed": false,
            "createdAt": { "$lt": cutoff },
        };
        if let Some(owner_id) = owner_id {
            filter.insert("ownerId", owner_id);
        }
        self.find_sorted(
            "list_stale_unread",
            &self.notifications,
            filter,
            doc! { "createdAt": 1, "id": 1 },
        )
    }

    fn list_due_work_items(
        &self,
        kind: WorkItemKind,
        within: Duration,
    ) -> GatewayResult<Vec<WorkItem>> {
        let window = DueWindow::starting_at(self.clock.now_ms(), within)?;
        let range = doc! { "$gt": window.after, "$lte": window.until };
        match kind {
            WorkItemKind::Task => self
                .find_sorted(
                    "list_due_work_items",
                    &self.tasks,
                    doc! { "completed": false, "dueAt": range },
                    doc! { "dueAt": 1, "id": 1 },
                )
                .map(|tasks| tasks.into_iter().map(WorkItem::Task).collect()),
            WorkItemKind::Event => self
                .find_sorted(
                    "list_due_work_items",
                    &self.events,
                    doc! { "startAt": range },
                    doc! { "startAt": 1, "id": 1 },
                )
                .map(|events| events.into_iter().map(WorkItem::Event).collect()),
        }
    }
}

fn unique_id_index() -> IndexModel {
    IndexModel::builder()
        .keys(doc! { "id": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn plain_index(keys: Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn driver_error(op: &'static str) -> impl Fn(DriverError) -> GatewayError {
    move |err| match err.kind.as_ref() {
        ErrorKind::BsonDeserialization(_) => {
            GatewayError::InvalidData(format!("`{op}` returned an undecodable document: {err}"))
        }
        _ => GatewayError::transient(op, err.to_string()),
    }
}

fn insert_error<'a>(
    op: &'static str,
    entity: EntityKind,
    id: &'a str,
) -> impl FnOnce(DriverError) -> GatewayError + 'a {
    move |err| {
        if is_duplicate_key(&err) {
            GatewayError::Conflict {
                entity,
                id: id.to_string(),
            }
        } else {
            driver_error(op)(err)
        }
    }
}

fn is_duplicate_key(err: &DriverError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

/// Hides credentials in a connection string before it reaches a log record.
pub(crate) fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => uri.to_string(),
    }
}
