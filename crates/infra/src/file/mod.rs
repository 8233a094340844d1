//! Flat-file adapters: fixed-width input, line-oriented report output.
//!
//! Both keep their byte position in the step's execution context, so a
//! restarted step resumes reading after the last committed line and resumes
//! writing after the last committed byte.

use std::io;

use nightbatch_core::{ErrorKind, ItemError};

pub mod job_io;
pub mod reader;
pub mod writer;

pub use job_io::FileJobIo;
pub use reader::FixedWidthFileReader;
pub use writer::ReportFileWriter;

/// IO failures during a read or write are worth retrying.
pub(crate) fn io_item_error(context: &str, err: io::Error) -> ItemError {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ErrorKind::Unclassified,
        _ => ErrorKind::TransientIo,
    };
    ItemError::new(kind, format!("{context}: {err}"))
}
