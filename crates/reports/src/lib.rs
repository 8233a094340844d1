//! `nightbatch-reports`: fixed-column report lines.
//!
//! Pure formatting: the emitter turns headers, detail records and totals
//! into lines of an exact width. Writing them anywhere is the caller's job.

pub mod column;
pub mod emitter;

pub use column::{Align, Column, fit};
pub use emitter::{Cell, ReportEmitter, ReportError, ReportHeader, ReportRecord, ReportTotals, format_amount};
