//! Command-line surface.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use nightbatch_core::JobExecutionId;

#[derive(Parser, Debug)]
#[command(name = "nightbatch", version, about = "Nightly card-processing batch runner")]
pub struct Cli {
    /// JSON configuration file; `NIGHTBATCH_*` variables are used otherwise
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print execution summaries as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a job instance, resuming it if its last run failed or stopped
    Launch(JobArgs),

    /// Run a failed or stopped instance again from its checkpoint
    Restart(JobArgs),

    /// Show status, counters and first failures of an execution
    Status { execution: JobExecutionId },

    /// Ask a running execution to stop after its current chunk
    Stop { execution: JobExecutionId },

    /// Mark an execution whose process died as failed
    Abandon { execution: JobExecutionId },

    /// Import a fixed-width master file into the card store
    Load {
        #[arg(value_enum)]
        kind: RecordKind,
        file: PathBuf,
    },

    /// List the registered jobs
    Jobs,
}

#[derive(clap::Args, Debug)]
pub struct JobArgs {
    /// Job name, e.g. daily-transaction-posting
    pub job: String,

    /// Business date the run is for (YYYY-MM-DD)
    #[arg(long)]
    pub date: NaiveDate,

    /// Extra identifying parameter, `key=value`; may repeat
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Accounts,
    Xrefs,
    Categories,
    Disclosures,
    Transactions,
}
