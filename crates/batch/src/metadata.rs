//! Execution metadata: instances, executions, step executions.

use chrono::{DateTime, Utc};
use nightbatch_core::{ErrorKind, ItemError, JobExecutionId, JobInstanceId, StepExecutionId};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::params::JobParameters;

/// Lifecycle status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }

    pub fn is_restartable(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "STARTING" => BatchStatus::Starting,
            "STARTED" => BatchStatus::Started,
            "COMPLETED" => BatchStatus::Completed,
            "FAILED" => BatchStatus::Failed,
            "STOPPED" => BatchStatus::Stopped,
            _ => return None,
        })
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit code reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
    Executing,
    Completed,
    CompletedWithSkips,
    /// A continuable step failed; the job went on.
    CompletedWithFailures,
    Failed,
    Stopped,
    /// Step not run because it had already completed.
    Noop,
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Executing => "EXECUTING",
            ExitStatus::Completed => "COMPLETED",
            ExitStatus::CompletedWithSkips => "COMPLETED_WITH_SKIPS",
            ExitStatus::CompletedWithFailures => "COMPLETED_WITH_FAILURES",
            ExitStatus::Failed => "FAILED",
            ExitStatus::Stopped => "STOPPED",
            ExitStatus::Noop => "NOOP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "EXECUTING" => ExitStatus::Executing,
            "COMPLETED" => ExitStatus::Completed,
            "COMPLETED_WITH_SKIPS" => ExitStatus::CompletedWithSkips,
            "COMPLETED_WITH_FAILURES" => ExitStatus::CompletedWithFailures,
            "FAILED" => ExitStatus::Failed,
            "STOPPED" => ExitStatus::Stopped,
            "NOOP" => ExitStatus::Noop,
            _ => return None,
        })
    }
}

impl core::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline phase an item failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPhase {
    Read,
    Process,
    Write,
}

impl ItemPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemPhase::Read => "read",
            ItemPhase::Process => "process",
            ItemPhase::Write => "write",
        }
    }
}

impl core::fmt::Display for ItemPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A skipped item or a step failure, as shown to operators.
///
/// `key` is the natural business key; raw input bytes are never recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub phase: Option<ItemPhase>,
    pub kind: ErrorKind,
    pub message: String,
    pub key: Option<String>,
}

impl FailureRecord {
    pub fn from_item(phase: ItemPhase, error: &ItemError) -> Self {
        Self {
            phase: Some(phase),
            kind: error.kind,
            message: error.message.clone(),
            key: error.key.clone(),
        }
    }
}

impl core::fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(phase) = self.phase {
            write!(f, "[{phase}] ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(key) = &self.key {
            write!(f, " (key {key})")?;
        }
        Ok(())
    }
}

/// A job identified by name and identifying parameters. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub job_name: String,
    pub parameters: JobParameters,
    /// `JobParameters::identifying_key` at creation time.
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl JobInstance {
    pub fn new(job_name: impl Into<String>, parameters: JobParameters) -> Self {
        let key = parameters.identifying_key();
        Self {
            id: JobInstanceId::new(),
            job_name: job_name.into(),
            parameters,
            key,
            created_at: Utc::now(),
        }
    }
}

/// One attempt to run a job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: JobExecutionId,
    pub instance_id: JobInstanceId,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub exit_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub stop_requested: bool,
    /// Step executions in the order they were started.
    pub steps: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(instance: &JobInstance) -> Self {
        let now = Utc::now();
        Self {
            id: JobExecutionId::new(),
            instance_id: instance.id,
            job_name: instance.job_name.clone(),
            parameters: instance.parameters.clone(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::Executing,
            exit_description: None,
            created_at: now,
            start_time: None,
            end_time: None,
            last_updated: now,
            stop_requested: false,
            steps: Vec::new(),
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.steps.iter().rev().find(|s| s.step_name == name)
    }

    /// The first failed step, if any.
    pub fn failing_step(&self) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.status == BatchStatus::Failed)
    }

    /// Wall-clock duration so far (or in total once ended).
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.start_time?;
        Some(self.end_time.unwrap_or_else(Utc::now) - start)
    }
}

/// One step's attempt within a job execution.
///
/// Counters and `context` describe what has been *committed*: they are
/// persisted after every chunk commit, never in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: StepExecutionId,
    pub job_execution_id: JobExecutionId,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub context: ExecutionContext,
    /// Skipped items, capped at the configured maximum.
    pub skips: Vec<FailureRecord>,
    /// Causes of a step failure.
    pub failures: Vec<FailureRecord>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl StepExecution {
    pub fn new(job_execution_id: JobExecutionId, step_name: impl Into<String>) -> Self {
        Self {
            id: StepExecutionId::new(),
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::Executing,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            context: ExecutionContext::new(),
            skips: Vec::new(),
            failures: Vec::new(),
            start_time: None,
            end_time: None,
            last_updated: Utc::now(),
        }
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.status = BatchStatus::Started;
        self.start_time = Some(now);
        self.last_updated = now;
    }

    pub fn mark_ended(&mut self, status: BatchStatus, exit_status: ExitStatus) {
        let now = Utc::now();
        self.status = status;
        self.exit_status = exit_status;
        self.end_time = Some(now);
        self.last_updated = now;
    }
}
