//! Operator-facing view of a job execution.

use chrono::{DateTime, Utc};
use nightbatch_core::JobExecutionId;
use serde::Serialize;

use crate::metadata::{BatchStatus, ExitStatus, FailureRecord, JobExecution, StepExecution};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
}

impl From<&StepExecution> for StepSummary {
    fn from(step: &StepExecution) -> Self {
        Self {
            name: step.step_name.clone(),
            status: step.status,
            exit_status: step.exit_status,
            read_count: step.read_count,
            write_count: step.write_count,
            filter_count: step.filter_count,
            skip_count: step.skip_count(),
            commit_count: step.commit_count,
            rollback_count: step.rollback_count,
        }
    }
}

/// Status, counts, failing step and the first few failures of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: JobExecutionId,
    pub job_name: String,
    pub parameters: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub exit_description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub failing_step: Option<String>,
    pub steps: Vec<StepSummary>,
    /// Step failures first, then skipped items; at most `max_failures`.
    pub failures: Vec<FailureRecord>,
}

impl ExecutionSummary {
    pub fn from_execution(execution: &JobExecution, max_failures: usize) -> Self {
        let failures = execution
            .steps
            .iter()
            .flat_map(|s| s.failures.iter())
            .chain(execution.steps.iter().flat_map(|s| s.skips.iter()))
            .take(max_failures)
            .cloned()
            .collect();

        Self {
            execution_id: execution.id,
            job_name: execution.job_name.clone(),
            parameters: execution.parameters.identifying_key(),
            status: execution.status,
            exit_status: execution.exit_status,
            exit_description: execution.exit_description.clone(),
            start_time: execution.start_time,
            end_time: execution.end_time,
            failing_step: execution.failing_step().map(|s| s.step_name.clone()),
            steps: execution.steps.iter().map(StepSummary::from).collect(),
            failures,
        }
    }

    pub fn total_skips(&self) -> u64 {
        self.steps.iter().map(|s| s.skip_count).sum()
    }
}

impl core::fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "job        {} [{}]", self.job_name, self.parameters)?;
        writeln!(f, "execution  {}", self.execution_id)?;
        writeln!(f, "status     {} / {}", self.status, self.exit_status)?;
        if let Some(description) = &self.exit_description {
            writeln!(f, "detail     {description}")?;
        }
        if let Some(step) = &self.failing_step {
            writeln!(f, "failed at  {step}")?;
        }
        writeln!(
            f,
            "{:<28} {:<10} {:>9} {:>9} {:>8} {:>7} {:>8}",
            "step", "status", "read", "written", "filtered", "skipped", "commits"
        )?;
        for step in &self.steps {
            writeln!(
                f,
                "{:<28} {:<10} {:>9} {:>9} {:>8} {:>7} {:>8}",
                step.name,
                step.exit_status.as_str(),
                step.read_count,
                step.write_count,
                step.filter_count,
                step.skip_count,
                step.commit_count
            )?;
        }
        for failure in &self.failures {
            writeln!(f, "  {failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ItemPhase, JobInstance};
    use crate::params::JobParameters;
    use nightbatch_core::ItemError;

    #[test]
    fn failures_are_capped_and_step_failures_come_first() {
        let instance = JobInstance::new("daily-transaction-posting", JobParameters::new());
        let mut execution = JobExecution::new(&instance);

        let mut step = StepExecution::new(execution.id, "post");
        for i in 0..5 {
            step.skips.push(FailureRecord::from_item(
                ItemPhase::Read,
                &ItemError::malformed("bad amount").with_key(format!("line {i}")),
            ));
        }
        step.read_skip_count = 5;
        step.failures.push(FailureRecord::from_item(
            ItemPhase::Process,
            &ItemError::unclassified("boom"),
        ));
        step.mark_ended(BatchStatus::Failed, ExitStatus::Failed);
        execution.steps.push(step);

        let summary = ExecutionSummary::from_execution(&execution, 3);
        assert_eq!(summary.failures.len(), 3);
        assert_eq!(summary.failures[0].message, "boom");
        assert_eq!(summary.failing_step.as_deref(), Some("post"));
        assert_eq!(summary.total_skips(), 5);

        let text = summary.to_string();
        assert!(text.contains("failed at  post"));
        assert!(text.contains("(key line 0)"));
    }
}
