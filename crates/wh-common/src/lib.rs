//! Warehouse Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, environment parsing and logging setup for the
//! warehouse workspace members.
//!
//! # Example
//!
//! ```no_run
//! use wh_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> wh_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("router starting");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, WhError};
