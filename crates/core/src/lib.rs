//! `nightbatch-core`: shared building blocks for the nightly batch engine.
//!
//! This crate contains **pure** primitives (no IO): the fixed-point decimal
//! used for every monetary field, the error taxonomy consulted by the
//! skip/retry policy, and strongly-typed identifiers.

pub mod decimal;
pub mod error;
pub mod id;
pub mod value_object;

pub use decimal::{Decimal, DecimalError, DecimalSpec, RoundingMode};
pub use error::{ErrorKind, ItemError};
pub use id::{JobExecutionId, JobInstanceId, StepExecutionId};
pub use value_object::ValueObject;
