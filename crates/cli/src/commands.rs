//! Command execution against the configured stores.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use nightbatch_batch::{
    BatchConfig, ExecutionContext, ExecutionSummary, ExitStatus, ItemReader, JobOperator,
    JobParameters, JobRegistry, JobRepository,
};
use nightbatch_cardops::{CardJobs, CardRecord, CardStore};
use nightbatch_core::ErrorKind;
use nightbatch_infra::{FileJobIo, FixedWidthFileReader, Stores};
use nightbatch_records::{
    Account, CardXref, CategoryBalance, DisclosureGroup, FixedWidthRecord, Transaction,
};
use tracing::{info, warn};

use crate::cli::{Cli, Command, JobArgs, RecordKind};

pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => BatchConfig::from_json_file(path)?,
        None => BatchConfig::from_env()?,
    };
    let stores = Stores::open(&config)?;
    let operator = operator(&config, &stores);

    match cli.command {
        Command::Launch(args) => {
            let execution = operator.launch(&args.job, &parameters(&args)?)?;
            report(&operator, execution.id, cli.json)
        }
        Command::Restart(args) => {
            let execution = operator.restart(&args.job, &parameters(&args)?)?;
            report(&operator, execution.id, cli.json)
        }
        Command::Status { execution } => {
            print_summary(&operator.status(execution)?, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop { execution } => {
            operator.stop(execution)?;
            print_summary(&operator.status(execution)?, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Abandon { execution } => {
            operator.abandon(execution)?;
            print_summary(&operator.status(execution)?, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Load { kind, file } => {
            let loaded = load(stores.cards.as_ref(), kind, &file, config.chunk_size)?;
            println!(
                "loaded {} record(s) from {}, rejected {}",
                loaded.loaded,
                file.display(),
                loaded.rejected
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Jobs => {
            for name in operator.registry().names() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn operator(config: &BatchConfig, stores: &Stores) -> JobOperator<Arc<dyn JobRepository>> {
    let io = Arc::new(FileJobIo::new(&config.input_dir, &config.output_dir));
    let mut registry = JobRegistry::new();
    Arc::new(CardJobs::new(stores.cards.clone(), io, config.clone())).register(&mut registry);
    JobOperator::new(stores.repository.clone(), registry)
        .with_max_reported_failures(config.max_reported_failures)
}

fn parameters(args: &JobArgs) -> anyhow::Result<JobParameters> {
    let mut params = JobParameters::new().with_processing_date(args.date);
    for assignment in &args.params {
        params = params.with_assignment(assignment)?;
    }
    Ok(params)
}

fn report(
    operator: &JobOperator<Arc<dyn JobRepository>>,
    execution: nightbatch_core::JobExecutionId,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let summary = operator.status(execution)?;
    print_summary(&summary, json)?;
    Ok(ExitCode::from(return_code(summary.exit_status)))
}

fn print_summary(summary: &ExecutionSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{summary}");
    }
    Ok(())
}

/// Return codes in the scheduler's convention: 0 clean, 4 warning,
/// 8 failed, 12 stopped.
pub fn return_code(status: ExitStatus) -> u8 {
    match status {
        ExitStatus::Completed | ExitStatus::CompletedWithSkips | ExitStatus::Noop => 0,
        ExitStatus::CompletedWithFailures => 4,
        ExitStatus::Failed | ExitStatus::Executing => 8,
        ExitStatus::Stopped => 12,
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub rejected: usize,
}

pub fn load(
    cards: &dyn CardStore,
    kind: RecordKind,
    path: &Path,
    batch: usize,
) -> anyhow::Result<LoadReport> {
    match kind {
        RecordKind::Accounts => load_records::<Account>(cards, path, batch, CardRecord::Account),
        RecordKind::Xrefs => load_records::<CardXref>(cards, path, batch, CardRecord::Xref),
        RecordKind::Categories => {
            load_records::<CategoryBalance>(cards, path, batch, CardRecord::Category)
        }
        RecordKind::Disclosures => {
            load_records::<DisclosureGroup>(cards, path, batch, CardRecord::Disclosure)
        }
        RecordKind::Transactions => {
            load_records::<Transaction>(cards, path, batch, CardRecord::Transaction)
        }
    }
}

fn load_records<T: FixedWidthRecord>(
    cards: &dyn CardStore,
    path: &Path,
    batch: usize,
    wrap: fn(T) -> CardRecord,
) -> anyhow::Result<LoadReport> {
    if !path.is_file() {
        bail!("{} is not a file", path.display());
    }
    let mut reader = FixedWidthFileReader::<T>::new("load", path);
    reader.open(&ExecutionContext::new())?;

    let mut result = LoadReport::default();
    let mut pending = Vec::with_capacity(batch.max(1));
    loop {
        match reader.read() {
            Ok(Some(record)) => {
                pending.push(wrap(record));
                if pending.len() >= batch.max(1) {
                    cards.upsert(&pending).context("upsert")?;
                    result.loaded += pending.len();
                    pending.clear();
                }
            }
            Ok(None) => break,
            Err(e) if e.kind == ErrorKind::MalformedRecord => {
                warn!(key = e.key.as_deref().unwrap_or_default(), error = %e.message, "line rejected");
                result.rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    if !pending.is_empty() {
        cards.upsert(&pending).context("upsert")?;
        result.loaded += pending.len();
    }
    reader.close()?;

    info!(path = %path.display(), loaded = result.loaded, rejected = result.rejected, "load finished");
    Ok(result)
}
