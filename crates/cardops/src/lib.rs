//! `nightbatch-cardops`: the nightly card-processing jobs.
//!
//! ## Jobs
//!
//! - `daily-transaction-posting`: validate the day's transactions against
//!   the card cross-reference and account master, post accepted ones
//! - `interest-calculation`: monthly interest per account from category
//!   balances and disclosure-group rates
//! - `transaction-report`: fixed-column report of posted transactions for a
//!   date range
//!
//! Business state lives behind [`CardStore`]; files and report outputs come
//! from a [`JobIo`] so the jobs run the same against disk or memory.

pub mod interest;
pub mod jobs;
pub mod posting;
pub mod report;
pub mod source;
pub mod store;

pub use interest::{InterestPosting, InterestProcessor, InterestWriter, monthly_interest};
pub use jobs::{
    CardJobs, DAILY_TRANSACTION_POSTING, END_DATE, INTEREST_CALCULATION, JobIo, PAGE_SIZE,
    START_DATE, TRANSACTION_REPORT,
};
pub use posting::{Posting, PostingProcessor, PostingWriter, RejectReason};
pub use report::{ReportLines, TransactionReportProcessor, report_emitter};
pub use source::SnapshotReader;
pub use store::{CardRecord, CardState, CardStore, InMemoryCardStore, StoreError};
