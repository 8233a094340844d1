//! Job registry and the operator surface: launch, restart, stop, abandon, status.

use std::collections::BTreeMap;

use nightbatch_core::{ErrorKind, JobExecutionId};
use tracing::{info, warn};

use crate::error::LaunchError;
use crate::job::Job;
use crate::metadata::{BatchStatus, ExitStatus, FailureRecord, JobExecution, JobInstance};
use crate::params::JobParameters;
use crate::repository::{JobRepository, RepositoryError};
use crate::summary::ExecutionSummary;

/// Builds a fresh job for one execution from its parameters.
pub type JobFactory = Box<dyn Fn(&JobParameters) -> Result<Job, LaunchError> + Send + Sync>;

const ABANDONED: &str = "abandoned by operator";

/// Job name → factory.
#[derive(Default)]
pub struct JobRegistry {
    factories: BTreeMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&JobParameters) -> Result<Job, LaunchError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(job = %name, "registered job");
        self.factories.insert(name, Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, name: &str, parameters: &JobParameters) -> Result<Job, LaunchError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| LaunchError::UnknownJob(name.to_string()))?;
        factory(parameters)
    }
}

/// Runs registered jobs against a metadata store.
pub struct JobOperator<R> {
    repository: R,
    registry: JobRegistry,
    max_reported_failures: usize,
}

impl<R: JobRepository> JobOperator<R> {
    pub fn new(repository: R, registry: JobRegistry) -> Self {
        Self {
            repository,
            registry,
            max_reported_failures: 10,
        }
    }

    pub fn with_max_reported_failures(mut self, max: usize) -> Self {
        self.max_reported_failures = max;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Start a job instance, creating it if needed.
    ///
    /// An instance whose last execution failed or stopped is resumed from its
    /// checkpoint; one that completed is rejected, as is one still running.
    pub fn launch(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, LaunchError> {
        let mut job = self.registry.build(job_name, parameters)?;

        let instance = match self.repository.find_instance(job_name, parameters)? {
            Some(instance) => instance,
            None => match self.repository.create_instance(job_name, parameters) {
                Ok(instance) => instance,
                // Lost a creation race; the winner's instance is ours too.
                Err(RepositoryError::AlreadyExists { .. }) => self
                    .repository
                    .find_instance(job_name, parameters)?
                    .ok_or_else(|| missing_instance(job_name, parameters))?,
                Err(e) => return Err(e.into()),
            },
        };
        self.check_runnable(&job, &instance)?;

        info!(job = %job_name, instance_id = %instance.id, "launching job");
        self.run(&mut job, &instance)
    }

    /// Run the most recent FAILED or STOPPED execution's instance again.
    pub fn restart(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, LaunchError> {
        let mut job = self.registry.build(job_name, parameters)?;
        let instance = self
            .repository
            .find_instance(job_name, parameters)?
            .ok_or_else(|| missing_instance(job_name, parameters))?;

        if self.repository.last_execution(instance.id)?.is_none() {
            return Err(RepositoryError::NotRestartable(format!(
                "job instance {} has never run",
                instance.id
            ))
            .into());
        }
        self.check_runnable(&job, &instance)?;

        info!(job = %job_name, instance_id = %instance.id, "restarting job");
        self.run(&mut job, &instance)
    }

    /// Restart the instance a previous execution belongs to.
    pub fn restart_execution(&self, execution_id: JobExecutionId) -> Result<JobExecution, LaunchError> {
        let previous = self.get(execution_id)?;
        self.restart(&previous.job_name, &previous.parameters)
    }

    /// Ask a running execution to stop after its current chunk commits.
    pub fn stop(&self, execution_id: JobExecutionId) -> Result<JobExecution, LaunchError> {
        let execution = self.repository.request_stop(execution_id)?;
        info!(job = %execution.job_name, execution_id = %execution_id, "stop requested");
        Ok(execution)
    }

    /// Mark an execution whose process died as FAILED so it can be restarted.
    pub fn abandon(&self, execution_id: JobExecutionId) -> Result<JobExecution, LaunchError> {
        let execution = self.get(execution_id)?;
        if execution.status.is_terminal() {
            return Err(RepositoryError::NotRunning(execution_id).into());
        }

        for step in execution.steps.iter().filter(|s| !s.status.is_terminal()) {
            let mut step = step.clone();
            step.failures.push(FailureRecord {
                phase: None,
                kind: ErrorKind::Unclassified,
                message: ABANDONED.to_string(),
                key: None,
            });
            step.mark_ended(BatchStatus::Failed, ExitStatus::Failed);
            self.repository.update_step_execution(&step)?;
        }

        let abandoned = self.repository.complete_execution(
            execution_id,
            BatchStatus::Failed,
            ExitStatus::Failed,
            Some(ABANDONED.to_string()),
        )?;
        warn!(job = %abandoned.job_name, execution_id = %execution_id, "execution abandoned");
        Ok(abandoned)
    }

    pub fn status(&self, execution_id: JobExecutionId) -> Result<ExecutionSummary, LaunchError> {
        let execution = self.get(execution_id)?;
        Ok(ExecutionSummary::from_execution(
            &execution,
            self.max_reported_failures,
        ))
    }

    fn get(&self, execution_id: JobExecutionId) -> Result<JobExecution, LaunchError> {
        self.repository
            .get_execution(execution_id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("job execution {execution_id}")).into())
    }

    fn check_runnable(&self, job: &Job, instance: &JobInstance) -> Result<(), LaunchError> {
        let Some(last) = self.repository.last_execution(instance.id)? else {
            return Ok(());
        };
        let err = match last.status {
            status if !status.is_terminal() => RepositoryError::ConcurrentExecution {
                instance_id: instance.id,
                execution_id: last.id,
            },
            BatchStatus::Completed => RepositoryError::AlreadyComplete {
                job_name: instance.job_name.clone(),
                key: instance.key.clone(),
            },
            _ if !job.is_restartable() => RepositoryError::NotRestartable(format!(
                "job '{}' does not allow restarts",
                instance.job_name
            )),
            _ => return Ok(()),
        };
        Err(err.into())
    }

    fn run(&self, job: &mut Job, instance: &JobInstance) -> Result<JobExecution, LaunchError> {
        let mut execution = self.repository.start_execution(instance)?;
        Ok(job.run(&mut execution, &self.repository)?)
    }
}

fn missing_instance(job_name: &str, parameters: &JobParameters) -> LaunchError {
    RepositoryError::NotFound(format!(
        "job instance {job_name} [{}]",
        parameters.identifying_key()
    ))
    .into()
}
