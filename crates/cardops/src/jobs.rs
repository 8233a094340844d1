//! Job definitions and their registration with the operator.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use nightbatch_batch::{
    BatchConfig, ItemReader, ItemWriter, Job, JobBuilder, JobParameters, JobRegistry, LaunchError,
    StepBuilder,
};
use nightbatch_core::ItemError;
use nightbatch_records::Transaction;
use nightbatch_reports::ReportHeader;
use tracing::info;

use crate::interest::{InterestProcessor, InterestWriter};
use crate::posting::{PostingProcessor, PostingWriter};
use crate::report::{REPORT_ID, REPORT_TITLE, ReportLines, TransactionReportProcessor};
use crate::source::SnapshotReader;
use crate::store::CardStore;

pub const DAILY_TRANSACTION_POSTING: &str = "daily-transaction-posting";
pub const INTEREST_CALCULATION: &str = "interest-calculation";
pub const TRANSACTION_REPORT: &str = "transaction-report";

pub const START_DATE: &str = "start_date";
pub const END_DATE: &str = "end_date";
pub const PAGE_SIZE: &str = "page_size";

const DEFAULT_PAGE_SIZE: u64 = 20;

/// Where the jobs' files come from and go to.
pub trait JobIo: Send + Sync {
    /// The day's incoming transactions.
    fn daily_transactions(
        &self,
        processing_date: NaiveDate,
    ) -> Result<Box<dyn ItemReader<Item = Transaction>>, LaunchError>;

    /// A restartable line sink for a report.
    fn report_writer(
        &self,
        file_name: &str,
    ) -> Result<Box<dyn ItemWriter<Item = ReportLines>>, LaunchError>;
}

impl<T: JobIo + ?Sized> JobIo for Arc<T> {
    fn daily_transactions(
        &self,
        processing_date: NaiveDate,
    ) -> Result<Box<dyn ItemReader<Item = Transaction>>, LaunchError> {
        (**self).daily_transactions(processing_date)
    }

    fn report_writer(
        &self,
        file_name: &str,
    ) -> Result<Box<dyn ItemWriter<Item = ReportLines>>, LaunchError> {
        (**self).report_writer(file_name)
    }
}

/// Builds the card jobs for each launch.
pub struct CardJobs {
    store: Arc<dyn CardStore>,
    io: Arc<dyn JobIo>,
    config: BatchConfig,
}

impl CardJobs {
    pub fn new(store: Arc<dyn CardStore>, io: Arc<dyn JobIo>, config: BatchConfig) -> Self {
        Self { store, io, config }
    }

    /// Register every card job under its name.
    pub fn register(self: Arc<Self>, registry: &mut JobRegistry) {
        let jobs = self.clone();
        registry.register(DAILY_TRANSACTION_POSTING, move |p: &JobParameters| {
            jobs.posting_job(p)
        });
        let jobs = self.clone();
        registry.register(INTEREST_CALCULATION, move |p: &JobParameters| {
            jobs.interest_job(p)
        });
        let jobs = self;
        registry.register(TRANSACTION_REPORT, move |p: &JobParameters| {
            jobs.report_job(p)
        });
    }

    pub fn posting_job(&self, params: &JobParameters) -> Result<Job, LaunchError> {
        let date = params.processing_date()?;
        let reader = self.io.daily_transactions(date)?;
        // Stamped with the business date the batch runs for.
        let processed_at = date.and_time(Utc::now().time());

        info!(job = DAILY_TRANSACTION_POSTING, processing_date = %date, "building job");
        Ok(self
            .job(DAILY_TRANSACTION_POSTING)
            .step(StepBuilder::from_config("post-transactions", &self.config).build(
                reader,
                PostingProcessor::new(self.store.clone(), processed_at),
                PostingWriter::new(self.store.clone()),
            ))
            .build())
    }

    pub fn interest_job(&self, params: &JobParameters) -> Result<Job, LaunchError> {
        let date = params.processing_date()?;
        let store = self.store.clone();
        let reader = SnapshotReader::new("category-balances", move || {
            Ok(store.category_balances()?)
        });

        info!(job = INTEREST_CALCULATION, processing_date = %date, "building job");
        Ok(self
            .job(INTEREST_CALCULATION)
            .step(StepBuilder::from_config("accrue-interest", &self.config).build(
                reader,
                InterestProcessor::new(self.store.clone(), date),
                InterestWriter::new(self.store.clone()),
            ))
            .build())
    }

    pub fn report_job(&self, params: &JobParameters) -> Result<Job, LaunchError> {
        params.processing_date()?;
        let start = params.require_date(START_DATE)?;
        let end = params.require_date(END_DATE)?;
        if end < start {
            return Err(LaunchError::InvalidParameter {
                name: END_DATE.into(),
                reason: format!("{end} is before {START_DATE} {start}"),
            });
        }
        let page_size = match params.long(PAGE_SIZE) {
            Some(n) if n > 0 => n as u64,
            Some(n) => {
                return Err(LaunchError::InvalidParameter {
                    name: PAGE_SIZE.into(),
                    reason: format!("must be positive, got {n}"),
                });
            }
            None => DEFAULT_PAGE_SIZE,
        };

        let store = self.store.clone();
        let reader = SnapshotReader::new("posted-transactions", move || {
            report_transactions(store.as_ref(), start, end)
        });
        let header = ReportHeader {
            report_id: REPORT_ID.into(),
            title: REPORT_TITLE.into(),
            start_date: start,
            end_date: end,
        };
        let file_name = format!("transaction-report-{start}-{end}.txt");
        let writer = self.io.report_writer(&file_name)?;

        info!(job = TRANSACTION_REPORT, %start, %end, "building job");
        Ok(self
            .job(TRANSACTION_REPORT)
            .step(StepBuilder::from_config("write-report", &self.config).build(
                reader,
                TransactionReportProcessor::new(self.store.clone(), header, page_size),
                writer,
            ))
            .build())
    }

    fn job(&self, name: &str) -> JobBuilder {
        Job::builder(name).processing_window(self.config.processing_window())
    }
}

/// Posted transactions processed within `[start, end]`, by card then id.
fn report_transactions(
    store: &dyn CardStore,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Transaction>, ItemError> {
    let mut selected: Vec<Transaction> = store
        .transactions()?
        .into_iter()
        .filter(|t| {
            t.processed_ts
                .map(|ts| (start..=end).contains(&ts.date()))
                .unwrap_or(false)
        })
        .collect();
    selected.sort_by(|a, b| (&a.card_number, &a.id).cmp(&(&b.card_number, &b.id)));
    Ok(selected)
}
