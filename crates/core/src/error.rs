//! Error taxonomy shared by every stage of the pipeline.
//!
//! Per-item failures are classified by [`ErrorKind`]; the chunk processor's
//! fault policy maps a kind to skip, retry or fatal. Launch-time errors
//! (concurrent execution, already complete) live with the metadata store and
//! never flow through this type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decimal::DecimalError;

/// Classification of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A fixed-width line could not be decoded.
    MalformedRecord,
    /// Decimal arithmetic exceeded the declared field width.
    Overflow,
    /// A transient IO failure (connection reset, lock timeout, ...).
    TransientIo,
    /// An IO operation exceeded its configured bound.
    Timeout,
    /// A business rule rejected one record.
    ConstraintViolation,
    /// Anything else.
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedRecord => "malformed_record",
            ErrorKind::Overflow => "overflow",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one item (read, processed or written).
///
/// `key` is the record's natural business key when known. It never holds the
/// raw line: raw bytes can carry card numbers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
    pub key: Option<String>,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            key: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRecord, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConstraintViolation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientIo, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unclassified, message)
    }

    /// Attach the natural key of the offending record.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach a key only if none is set yet.
    pub fn or_key(mut self, key: impl FnOnce() -> String) -> Self {
        if self.key.is_none() {
            self.key = Some(key());
        }
        self
    }
}

impl From<DecimalError> for ItemError {
    fn from(err: DecimalError) -> Self {
        let kind = match err {
            DecimalError::Overflow { .. } => ErrorKind::Overflow,
            DecimalError::Parse(_) => ErrorKind::MalformedRecord,
            _ => ErrorKind::Unclassified,
        };
        ItemError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Decimal, DecimalSpec};

    #[test]
    fn overflow_maps_to_overflow_kind() {
        let spec = DecimalSpec::new(1, 0).unwrap();
        let nine = Decimal::from_units(9, spec).unwrap();
        let err: ItemError = nine.add(&nine).unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn or_key_keeps_existing_key() {
        let err = ItemError::constraint("rejected")
            .with_key("TX1")
            .or_key(|| "LINE 4".to_string());
        assert_eq!(err.key.as_deref(), Some("TX1"));
    }
}
