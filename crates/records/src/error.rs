//! Codec error.

use nightbatch_core::{ErrorKind, ItemError};
use thiserror::Error;

/// A line (or a value being encoded) does not match its layout.
///
/// Names the first offending field and its byte offset. Never carries the
/// field's raw content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {layout} record: field '{field}' at offset {offset}: {reason}")]
pub struct MalformedRecordError {
    pub layout: String,
    pub field: String,
    pub offset: usize,
    pub reason: String,
}

impl MalformedRecordError {
    pub fn new(
        layout: impl Into<String>,
        field: impl Into<String>,
        offset: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            layout: layout.into(),
            field: field.into(),
            offset,
            reason: reason.into(),
        }
    }
}

impl From<MalformedRecordError> for ItemError {
    fn from(err: MalformedRecordError) -> Self {
        ItemError::new(ErrorKind::MalformedRecord, err.to_string())
    }
}
