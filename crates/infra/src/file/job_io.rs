//! File locations for the card jobs.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use nightbatch_batch::{ItemReader, ItemWriter, LaunchError, PROCESSING_DATE};
use nightbatch_cardops::{JobIo, ReportLines};
use nightbatch_records::Transaction;

use super::{FixedWidthFileReader, ReportFileWriter};

/// Daily input is `{input_dir}/transactions-{date}.dat`; reports go to
/// `{output_dir}`.
#[derive(Debug, Clone)]
pub struct FileJobIo {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl FileJobIo {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn daily_file(&self, processing_date: NaiveDate) -> PathBuf {
        self.input_dir
            .join(format!("transactions-{}.dat", processing_date.format("%Y-%m-%d")))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl JobIo for FileJobIo {
    fn daily_transactions(
        &self,
        processing_date: NaiveDate,
    ) -> Result<Box<dyn ItemReader<Item = Transaction>>, LaunchError> {
        let path = self.daily_file(processing_date);
        if !path.is_file() {
            return Err(LaunchError::InvalidParameter {
                name: PROCESSING_DATE.into(),
                reason: format!("no input file {}", path.display()),
            });
        }
        Ok(Box::new(FixedWidthFileReader::<Transaction>::new(
            "daily-transactions",
            path,
        )))
    }

    fn report_writer(
        &self,
        file_name: &str,
    ) -> Result<Box<dyn ItemWriter<Item = ReportLines>>, LaunchError> {
        Ok(Box::new(ReportFileWriter::new(
            "report",
            self.output_dir.join(file_name),
        )))
    }
}
