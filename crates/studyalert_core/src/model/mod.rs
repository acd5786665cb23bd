//! Domain model for work items, notifications and users.
//!
//! # Responsibility
//! - Define the records shared by both persistence backends and the engine.
//! - Normalize ingestion input so storage only ever sees canonical values.
//!
//! # Invariants
//! - Every record is identified by an opaque string id.
//! - All timestamps are UTC epoch milliseconds.

pub mod notification;
pub mod user;
pub mod validation;
pub mod work_item;
