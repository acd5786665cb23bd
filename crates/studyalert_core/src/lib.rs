//! Deadline notification core for the study planner backend.
//!
//! Holds the persistence gateway contract with its in-process and MongoDB
//! backends, and the engine that turns upcoming deadlines into deduplicated
//! notifications and best-effort email.

pub mod clock;
pub mod engine;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod notifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    CycleReport, EngineConfig, EngineHandle, NotificationEngine, ScanReport, StaleScanReport,
};
pub use gateway::memory::InMemoryGateway;
pub use gateway::mongo::{MongoConfig, MongoGateway};
pub use gateway::{
    open_gateway, EntityKind, GatewayError, GatewayResult, PersistenceGateway, StoreConfig,
    StoreOpenError,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::notification::{Notification, NotificationKind};
pub use model::user::{User, UserUpdate};
pub use model::validation::ValidationError;
pub use model::work_item::{deadline_from_parts, Event, RecordId, Task, WorkItem, WorkItemKind};
pub use notifier::{LogNotifier, Notifier, NotifyError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
