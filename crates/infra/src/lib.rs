//! Infrastructure for the batch engine: durable metadata and card stores,
//! flat-file item readers and writers.
//!
//! - [`postgres`]: sqlx-backed stores for production
//! - [`json`]: single-file stores for development and small installations
//! - [`file`]: fixed-width input and report output with byte-offset checkpoints

pub mod file;
pub mod json;
pub mod postgres;
pub mod stores;

pub use file::{FileJobIo, FixedWidthFileReader, ReportFileWriter};
pub use json::{JsonFileCardStore, JsonFileJobRepository};
pub use postgres::{PostgresCardStore, PostgresJobRepository};
pub use stores::{Stores, StoresError};
