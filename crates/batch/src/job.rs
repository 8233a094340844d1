//! A job: named, ordered steps run sequentially by one execution.

use std::fmt;
use std::time::{Duration, Instant};

use nightbatch_core::ErrorKind;
use nightbatch_observability::metrics::{self, BatchMetrics};
use tracing::{error, info, warn};

use crate::error::StepError;
use crate::metadata::{BatchStatus, ExitStatus, FailureRecord, JobExecution, StepExecution};
use crate::repository::{JobRepository, RepositoryError};
use crate::step::{Step, StepOutcome};

const DEFAULT_PROCESSING_WINDOW: Duration = Duration::from_secs(4 * 60 * 60);

struct JobStep {
    step: Box<dyn Step>,
    /// A failure of this step does not stop the job.
    continuable: bool,
}

pub struct Job {
    name: String,
    steps: Vec<JobStep>,
    processing_window: Duration,
    restartable: bool,
    metrics: BatchMetrics,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("processing_window", &self.processing_window)
            .field("restartable", &self.restartable)
            .finish_non_exhaustive()
    }
}

pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: Job {
                name: name.into(),
                steps: Vec::new(),
                processing_window: DEFAULT_PROCESSING_WINDOW,
                restartable: true,
                metrics: metrics::batch_metrics().clone(),
            },
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.job.steps.push(JobStep {
            step: Box::new(step),
            continuable: false,
        });
        self
    }

    /// A step whose failure is recorded but lets the job go on; the job then
    /// completes with `COMPLETED_WITH_FAILURES`.
    pub fn continuable_step(mut self, step: impl Step + 'static) -> Self {
        self.job.steps.push(JobStep {
            step: Box::new(step),
            continuable: true,
        });
        self
    }

    pub fn processing_window(mut self, window: Duration) -> Self {
        self.job.processing_window = window;
        self
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.job.restartable = restartable;
        self
    }

    /// Instruments to report on instead of the global meter's.
    pub fn metrics(mut self, metrics: BatchMetrics) -> Self {
        self.job.metrics = metrics;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl From<&StepError> for FailureRecord {
    fn from(err: &StepError) -> Self {
        let item = err.item_error();
        Self {
            phase: err.phase(),
            kind: item.map(|e| e.kind).unwrap_or(ErrorKind::Unclassified),
            message: err.to_string(),
            key: item.and_then(|e| e.key.clone()),
        }
    }
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn processing_window(&self) -> Duration {
        self.processing_window
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.name()).collect()
    }

    /// Run every step of `execution` in order and record the outcome.
    ///
    /// Steps completed by an earlier execution of the same instance are
    /// recorded as `NOOP`; failed or stopped ones resume from their last
    /// checkpoint. Repository errors abort the run and leave the execution
    /// non-terminal (an operator must abandon it).
    pub fn run(
        &mut self,
        execution: &mut JobExecution,
        repository: &dyn JobRepository,
    ) -> Result<JobExecution, RepositoryError> {
        let clock = Instant::now();
        execution.status = BatchStatus::Started;
        execution.start_time = Some(chrono::Utc::now());
        repository.update_execution(execution)?;
        info!(
            job = %self.name,
            execution_id = %execution.id,
            parameters = %execution.parameters.identifying_key(),
            "job execution started"
        );

        let mut status = BatchStatus::Completed;
        let mut description = None;
        let mut continued_past_failure = false;
        let mut skipped_items = false;

        for job_step in &mut self.steps {
            let name = job_step.step.name().to_string();

            if repository.is_stop_requested(execution.id)? {
                info!(job = %self.name, step = %name, "stop requested before step");
                status = BatchStatus::Stopped;
                description = Some(format!("stopped before step '{name}'"));
                break;
            }

            let previous = repository.last_step_execution(execution.instance_id, &name)?;
            let mut step_execution = StepExecution::new(execution.id, &name);

            match &previous {
                Some(prev)
                    if prev.status == BatchStatus::Completed
                        && !job_step.step.allow_start_if_complete() =>
                {
                    step_execution.mark_started();
                    step_execution.mark_ended(BatchStatus::Completed, ExitStatus::Noop);
                    repository.add_step_execution(&step_execution)?;
                    info!(job = %self.name, step = %name, "step already completed, not rerun");
                    continue;
                }
                Some(prev) if prev.status != BatchStatus::Completed => {
                    step_execution.context = prev.context.clone();
                }
                _ => {}
            }

            step_execution.mark_started();
            repository.add_step_execution(&step_execution)?;
            info!(
                job = %self.name,
                step = %name,
                resumed = !step_execution.context.is_empty(),
                "step started"
            );

            match job_step.step.execute(&mut step_execution, repository) {
                Ok(StepOutcome::Completed) => {
                    let exit = if step_execution.skip_count() > 0 {
                        skipped_items = true;
                        ExitStatus::CompletedWithSkips
                    } else {
                        ExitStatus::Completed
                    };
                    step_execution.mark_ended(BatchStatus::Completed, exit);
                }
                Ok(StepOutcome::Stopped) => {
                    step_execution.mark_ended(BatchStatus::Stopped, ExitStatus::Stopped);
                    status = BatchStatus::Stopped;
                    description = Some(format!("stopped during step '{name}'"));
                }
                Err(err) => {
                    error!(job = %self.name, step = %name, error = %err, "step failed");
                    step_execution.failures.push(FailureRecord::from(&err));
                    step_execution.mark_ended(BatchStatus::Failed, ExitStatus::Failed);
                    if job_step.continuable {
                        continued_past_failure = true;
                    } else {
                        status = BatchStatus::Failed;
                        description = Some(format!("step '{name}' failed: {err}"));
                    }
                }
            }

            repository.update_step_execution(&step_execution)?;
            info!(
                job = %self.name,
                step = %name,
                status = %step_execution.status,
                read = step_execution.read_count,
                written = step_execution.write_count,
                filtered = step_execution.filter_count,
                skipped = step_execution.skip_count(),
                commits = step_execution.commit_count,
                "step finished"
            );

            if status != BatchStatus::Completed {
                break;
            }
        }

        let exit = match status {
            BatchStatus::Failed => ExitStatus::Failed,
            BatchStatus::Stopped => ExitStatus::Stopped,
            _ if continued_past_failure => ExitStatus::CompletedWithFailures,
            _ if skipped_items => ExitStatus::CompletedWithSkips,
            _ => ExitStatus::Completed,
        };
        let finished = repository.complete_execution(execution.id, status, exit, description)?;

        let elapsed = clock.elapsed();
        if elapsed > self.processing_window {
            self.metrics
                .record_window_overrun(&self.name, finished.id, elapsed, self.processing_window);
        }
        if status == BatchStatus::Failed {
            warn!(job = %self.name, execution_id = %finished.id, "job execution failed");
        }
        info!(
            job = %self.name,
            execution_id = %finished.id,
            status = %finished.status,
            exit_status = %finished.exit_status,
            elapsed_ms = elapsed.as_millis() as u64,
            "job execution finished"
        );

        *execution = finished.clone();
        Ok(finished)
    }
}
