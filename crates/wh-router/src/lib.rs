//! Warehouse upload router
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Drives staged event batches into analytical warehouses. The core is the
//! [`job::UploadJob`]: a persisted state machine that generates the upload
//! schema and load files, creates the remote schema, exports every table
//! through a pluggable [`loader::WarehouseLoader`] and finally cleans up the
//! consumed objects. Failures are accumulated per state, retried with
//! exponential backoff and aborted once both the attempt and time-window
//! thresholds are crossed.
//!
//! The [`router::Router`] polls due uploads and runs jobs built by the
//! [`job::UploadJobFactory`].

pub mod alert;
pub mod backoff;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod loader;
pub mod model;
pub mod repo;
pub mod reporting;
pub mod router;
pub mod schema;
pub mod state;
pub mod stats;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{Result, RouterError};
pub use job::{UploadJob, UploadJobFactory};
pub use state::UploadState;

/// Embedded migrations for the router tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
