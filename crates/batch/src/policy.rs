//! Skip/retry policy as a declarative table.

use std::collections::BTreeSet;

use nightbatch_core::ErrorKind;
use serde::{Deserialize, Serialize};

/// What the chunk processor does with a classified item error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    Skip,
    Retry,
    Fatal,
}

/// Error kind → action table plus the step's limits.
///
/// Retry is checked before skip: a kind registered as both is retried first,
/// and skipped once its retries are exhausted. `Overflow` is always fatal;
/// registering it has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPolicy {
    skippable: BTreeSet<ErrorKind>,
    retryable: BTreeSet<ErrorKind>,
    skip_limit: u32,
    retry_limit: u32,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            skippable: [ErrorKind::MalformedRecord, ErrorKind::ConstraintViolation]
                .into_iter()
                .collect(),
            retryable: [ErrorKind::TransientIo, ErrorKind::Timeout]
                .into_iter()
                .collect(),
            skip_limit: 10,
            retry_limit: 3,
        }
    }
}

impl FaultPolicy {
    /// A policy that tolerates nothing.
    pub fn strict() -> Self {
        Self {
            skippable: BTreeSet::new(),
            retryable: BTreeSet::new(),
            skip_limit: 0,
            retry_limit: 0,
        }
    }

    pub fn with_skip_limit(mut self, limit: u32) -> Self {
        self.skip_limit = limit;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn skip_on(mut self, kind: ErrorKind) -> Self {
        self.skippable.insert(kind);
        self
    }

    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable.insert(kind);
        self
    }

    pub fn never_skip(mut self, kind: ErrorKind) -> Self {
        self.skippable.remove(&kind);
        self
    }

    pub fn never_retry(mut self, kind: ErrorKind) -> Self {
        self.retryable.remove(&kind);
        self
    }

    pub fn skip_limit(&self) -> u32 {
        self.skip_limit
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn is_skippable(&self, kind: ErrorKind) -> bool {
        kind != ErrorKind::Overflow && self.skippable.contains(&kind)
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        kind != ErrorKind::Overflow && self.retryable.contains(&kind)
    }

    pub fn classify(&self, kind: ErrorKind) -> FaultAction {
        if self.is_retryable(kind) {
            FaultAction::Retry
        } else if self.is_skippable(kind) {
            FaultAction::Skip
        } else {
            FaultAction::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let p = FaultPolicy::default();
        assert_eq!(p.classify(ErrorKind::MalformedRecord), FaultAction::Skip);
        assert_eq!(p.classify(ErrorKind::ConstraintViolation), FaultAction::Skip);
        assert_eq!(p.classify(ErrorKind::TransientIo), FaultAction::Retry);
        assert_eq!(p.classify(ErrorKind::Timeout), FaultAction::Retry);
        assert_eq!(p.classify(ErrorKind::Overflow), FaultAction::Fatal);
        assert_eq!(p.classify(ErrorKind::Unclassified), FaultAction::Fatal);
    }

    #[test]
    fn retry_wins_over_skip() {
        let p = FaultPolicy::default().skip_on(ErrorKind::TransientIo);
        assert_eq!(p.classify(ErrorKind::TransientIo), FaultAction::Retry);
        assert!(p.is_skippable(ErrorKind::TransientIo));
    }

    #[test]
    fn overflow_cannot_be_tolerated() {
        let p = FaultPolicy::default()
            .skip_on(ErrorKind::Overflow)
            .retry_on(ErrorKind::Overflow);
        assert_eq!(p.classify(ErrorKind::Overflow), FaultAction::Fatal);
    }

    #[test]
    fn table_is_configuration() {
        let json = r#"{"skippable":["malformed_record"],"retryable":[],"skip_limit":5,"retry_limit":0}"#;
        let p: FaultPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(p.skip_limit(), 5);
        assert_eq!(p.classify(ErrorKind::ConstraintViolation), FaultAction::Fatal);
        assert_eq!(p.classify(ErrorKind::TransientIo), FaultAction::Fatal);
        assert_eq!(p.classify(ErrorKind::MalformedRecord), FaultAction::Skip);
    }
}
