//! Backend selection at process startup.
//!
//! # Responsibility
//! - Turn a store target into exactly one constructed gateway.
//! - Report failure to reach the backing store as the only fatal error class.
//!
//! # Invariants
//! - Selection happens once; callers receive an already-connected gateway and
//!   never branch on which backend they hold.

use super::memory::InMemoryGateway;
use super::mongo::{redact_uri, MongoConfig, MongoGateway};
use super::PersistenceGateway;
use crate::clock::Clock;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::sync::Arc;
use std::time::Instant;

/// Which backend to construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    InMemory,
    Mongo(MongoConfig),
}

impl StoreConfig {
    /// A non-blank document-store URI selects Mongo; otherwise the in-process store.
    pub fn from_target(uri: Option<&str>, database: Option<&str>) -> Self {
        match uri.map(str::trim).filter(|uri| !uri.is_empty()) {
            Some(uri) => {
                let mut config = MongoConfig::new(uri);
                if let Some(database) = database.map(str::trim).filter(|db| !db.is_empty()) {
                    config.database = database.to_string();
                }
                Self::Mongo(config)
            }
            None => Self::InMemory,
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::InMemory => "memory",
            Self::Mongo(_) => "mongo",
        }
    }
}

/// Fatal startup failure: the backing store could not be established.
#[derive(Debug)]
pub enum StoreOpenError {
    /// The driver runtime could not be started.
    Runtime(io::Error),
    /// The target could not be parsed, reached or prepared.
    Connect { target: String, message: String },
}

impl Display for StoreOpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime(err) => write!(f, "failed to start store runtime: {err}"),
            Self::Connect { target, message } => {
                write!(f, "failed to open store `{target}`: {message}")
            }
        }
    }
}

impl Error for StoreOpenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Runtime(err) => Some(err),
            Self::Connect { .. } => None,
        }
    }
}

/// Constructs the configured backend.
///
/// # Side effects
/// - Mongo: connects, pings and creates indexes before returning.
/// - Emits `store_open` logging events with duration and status.
///
/// # Blocking
/// - Every gateway call is synchronous, and the Mongo backend blocks on its own
///   runtime. Call `open_gateway` and the returned gateway from plain threads or
///   from `tokio::task::spawn_blocking`, never directly inside async tasks.
pub fn open_gateway(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn PersistenceGateway>, StoreOpenError> {
    let started_at = Instant::now();
    let mode = config.mode();
    info!("event=store_open module=gateway status=start mode={mode}");

    let opened: Result<Arc<dyn PersistenceGateway>, StoreOpenError> = match config {
        StoreConfig::InMemory => {
            Ok(Arc::new(InMemoryGateway::with_clock(clock)) as Arc<dyn PersistenceGateway>)
        }
        StoreConfig::Mongo(mongo) => {
            MongoGateway::connect_with_clock(mongo, clock).map(|gateway| {
                info!(
                    "event=store_target module=gateway status=ok mode=mongo target={} database={}",
                    redact_uri(&mongo.uri),
                    mongo.database
                );
                Arc::new(gateway) as Arc<dyn PersistenceGateway>
            })
        }
    };

    match &opened {
        Ok(_) => info!(
            "event=store_open module=gateway status=ok mode={mode} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=store_open module=gateway status=error mode={mode} duration_ms={} error_code=store_open_failed error={err}",
            started_at.elapsed().as_millis()
        ),
    }
    opened
}
