//! Execution metadata store.
//!
//! The repository is the only source of truth for what has been safely
//! processed. Every mutation is durable before the call returns (for the
//! in-memory store, "durable" means visible to every other caller).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use nightbatch_core::{ItemError, JobExecutionId, JobInstanceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::{BatchStatus, ExitStatus, JobExecution, JobInstance, StepExecution};
use crate::params::JobParameters;

/// Metadata store error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("job instance already exists: {job_name} [{key}]")]
    AlreadyExists { job_name: String, key: String },

    #[error("job instance {instance_id} already has a running execution {execution_id}")]
    ConcurrentExecution {
        instance_id: JobInstanceId,
        execution_id: JobExecutionId,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not restartable: {0}")]
    NotRestartable(String),

    #[error("job instance already complete: {job_name} [{key}]")]
    AlreadyComplete { job_name: String, key: String },

    #[error("execution {0} is not running")]
    NotRunning(JobExecutionId),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("metadata store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Failure of an atomic chunk commit.
#[derive(Debug, Clone, Error)]
pub enum CommitError {
    /// The chunk's output could not be made durable; nothing was recorded.
    #[error("chunk write failed: {0}")]
    Write(ItemError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Execution metadata store abstraction.
pub trait JobRepository: Send + Sync {
    /// Create a job instance; fails if one with the same name and identifying
    /// parameters exists.
    fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError>;

    fn find_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError>;

    /// Create a STARTING execution; fails if the instance already has a
    /// non-terminal one.
    fn start_execution(&self, instance: &JobInstance) -> Result<JobExecution, RepositoryError>;

    /// Persist execution-level fields (status, times). Step executions and a
    /// pending stop request are left as stored.
    fn update_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError>;

    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError>;

    /// Commit a chunk: run `write` (which makes the chunk's output durable)
    /// and persist `step` (counters + context) as one unit. If `write` fails
    /// nothing is recorded.
    fn record_step_progress(
        &self,
        step: &StepExecution,
        write: &mut dyn FnMut() -> Result<(), ItemError>,
    ) -> Result<(), CommitError>;

    /// Move an execution to a terminal status and return its final state.
    fn complete_execution(
        &self,
        execution_id: JobExecutionId,
        status: BatchStatus,
        exit_status: ExitStatus,
        exit_description: Option<String>,
    ) -> Result<JobExecution, RepositoryError>;

    /// Most recent execution of the instance, if it is FAILED or STOPPED.
    fn find_restartable_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError>;

    fn get_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError>;

    fn last_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError>;

    /// Most recent execution of a step across all executions of the instance.
    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError>;

    /// Flag a running execution to stop at the next chunk boundary.
    fn request_stop(&self, id: JobExecutionId) -> Result<JobExecution, RepositoryError>;

    fn is_stop_requested(&self, id: JobExecutionId) -> Result<bool, RepositoryError>;
}

/// The whole metadata model in memory.
///
/// Shared by the in-memory store and file-backed stores, which lock it,
/// mutate it, and persist the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryState {
    instances: Vec<JobInstance>,
    /// Executions in creation order.
    executions: Vec<JobExecution>,
}

impl RepositoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> &[JobInstance] {
        &self.instances
    }

    pub fn executions(&self) -> &[JobExecution] {
        &self.executions
    }

    pub fn create_instance(
        &mut self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        let key = parameters.identifying_key();
        if self.find_instance(job_name, parameters).is_some() {
            return Err(RepositoryError::AlreadyExists {
                job_name: job_name.to_string(),
                key,
            });
        }
        let instance = JobInstance::new(job_name, parameters.clone());
        self.instances.push(instance.clone());
        Ok(instance)
    }

    pub fn find_instance(&self, job_name: &str, parameters: &JobParameters) -> Option<JobInstance> {
        let key = parameters.identifying_key();
        self.instances
            .iter()
            .find(|i| i.job_name == job_name && i.key == key)
            .cloned()
    }

    pub fn start_execution(&mut self, instance: &JobInstance) -> Result<JobExecution, RepositoryError> {
        if !self.instances.iter().any(|i| i.id == instance.id) {
            return Err(RepositoryError::NotFound(format!("job instance {}", instance.id)));
        }
        if let Some(running) = self
            .executions
            .iter()
            .find(|e| e.instance_id == instance.id && !e.status.is_terminal())
        {
            return Err(RepositoryError::ConcurrentExecution {
                instance_id: instance.id,
                execution_id: running.id,
            });
        }
        let execution = JobExecution::new(instance);
        self.executions.push(execution.clone());
        Ok(execution)
    }

    fn execution_mut(&mut self, id: JobExecutionId) -> Result<&mut JobExecution, RepositoryError> {
        self.executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("job execution {id}")))
    }

    pub fn update_execution(&mut self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let stored = self.execution_mut(execution.id)?;
        stored.status = execution.status;
        stored.exit_status = execution.exit_status;
        stored.exit_description = execution.exit_description.clone();
        stored.start_time = execution.start_time;
        stored.end_time = execution.end_time;
        stored.stop_requested |= execution.stop_requested;
        stored.last_updated = Utc::now();
        Ok(())
    }

    pub fn add_step_execution(&mut self, step: &StepExecution) -> Result<(), RepositoryError> {
        let execution = self.execution_mut(step.job_execution_id)?;
        if execution.steps.iter().any(|s| s.id == step.id) {
            return Err(RepositoryError::Storage(format!(
                "step execution {} already recorded",
                step.id
            )));
        }
        execution.steps.push(step.clone());
        Ok(())
    }

    pub fn update_step_execution(&mut self, step: &StepExecution) -> Result<(), RepositoryError> {
        let execution = self.execution_mut(step.job_execution_id)?;
        let stored = execution
            .steps
            .iter_mut()
            .find(|s| s.id == step.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("step execution {}", step.id)))?;
        *stored = step.clone();
        stored.last_updated = Utc::now();
        execution.last_updated = stored.last_updated;
        Ok(())
    }

    pub fn complete_execution(
        &mut self,
        execution_id: JobExecutionId,
        status: BatchStatus,
        exit_status: ExitStatus,
        exit_description: Option<String>,
    ) -> Result<JobExecution, RepositoryError> {
        let execution = self.execution_mut(execution_id)?;
        let now = Utc::now();
        execution.status = status;
        execution.exit_status = exit_status;
        execution.exit_description = exit_description;
        execution.end_time = Some(now);
        execution.last_updated = now;
        Ok(execution.clone())
    }

    pub fn last_execution(&self, instance_id: JobInstanceId) -> Option<JobExecution> {
        self.executions
            .iter()
            .rev()
            .find(|e| e.instance_id == instance_id)
            .cloned()
    }

    pub fn find_restartable_execution(&self, instance_id: JobInstanceId) -> Option<JobExecution> {
        self.last_execution(instance_id)
            .filter(|e| e.status.is_restartable())
    }

    pub fn get_execution(&self, id: JobExecutionId) -> Option<JobExecution> {
        self.executions.iter().find(|e| e.id == id).cloned()
    }

    pub fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Option<StepExecution> {
        self.executions
            .iter()
            .rev()
            .filter(|e| e.instance_id == instance_id)
            .find_map(|e| e.step(step_name).cloned())
    }

    pub fn request_stop(&mut self, id: JobExecutionId) -> Result<JobExecution, RepositoryError> {
        let execution = self.execution_mut(id)?;
        if execution.status.is_terminal() {
            return Err(RepositoryError::NotRunning(id));
        }
        execution.stop_requested = true;
        execution.last_updated = Utc::now();
        Ok(execution.clone())
    }

    pub fn is_stop_requested(&self, id: JobExecutionId) -> Result<bool, RepositoryError> {
        self.executions
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.stop_requested)
            .ok_or_else(|| RepositoryError::NotFound(format!("job execution {id}")))
    }
}

/// In-memory repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    state: RwLock<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read<T>(&self, f: impl FnOnce(&RepositoryState) -> T) -> Result<T, RepositoryError> {
        let state = self
            .state
            .read()
            .map_err(|_| RepositoryError::Storage("metadata lock poisoned".to_string()))?;
        Ok(f(&state))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut RepositoryState) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| RepositoryError::Storage("metadata lock poisoned".to_string()))?;
        f(&mut state)
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        self.write(|s| s.create_instance(job_name, parameters))
    }

    fn find_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        self.read(|s| s.find_instance(job_name, parameters))
    }

    fn start_execution(&self, instance: &JobInstance) -> Result<JobExecution, RepositoryError> {
        self.write(|s| s.start_execution(instance))
    }

    fn update_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        self.write(|s| s.update_execution(execution))
    }

    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.write(|s| s.add_step_execution(step))
    }

    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.write(|s| s.update_step_execution(step))
    }

    fn record_step_progress(
        &self,
        step: &StepExecution,
        write: &mut dyn FnMut() -> Result<(), ItemError>,
    ) -> Result<(), CommitError> {
        // Held across the write so no reader observes output without progress.
        let mut state = self
            .state
            .write()
            .map_err(|_| RepositoryError::Storage("metadata lock poisoned".to_string()))?;
        write().map_err(CommitError::Write)?;
        state.update_step_execution(step)?;
        Ok(())
    }

    fn complete_execution(
        &self,
        execution_id: JobExecutionId,
        status: BatchStatus,
        exit_status: ExitStatus,
        exit_description: Option<String>,
    ) -> Result<JobExecution, RepositoryError> {
        self.write(|s| s.complete_execution(execution_id, status, exit_status, exit_description))
    }

    fn find_restartable_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        self.read(|s| s.find_restartable_execution(instance_id))
    }

    fn get_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        self.read(|s| s.get_execution(id))
    }

    fn last_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        self.read(|s| s.last_execution(instance_id))
    }

    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        self.read(|s| s.last_step_execution(instance_id, step_name))
    }

    fn request_stop(&self, id: JobExecutionId) -> Result<JobExecution, RepositoryError> {
        self.write(|s| s.request_stop(id))
    }

    fn is_stop_requested(&self, id: JobExecutionId) -> Result<bool, RepositoryError> {
        self.read(|s| s.is_stop_requested(id))?
    }
}

impl<R: JobRepository + ?Sized> JobRepository for Arc<R> {
    fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        (**self).create_instance(job_name, parameters)
    }

    fn find_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        (**self).find_instance(job_name, parameters)
    }

    fn start_execution(&self, instance: &JobInstance) -> Result<JobExecution, RepositoryError> {
        (**self).start_execution(instance)
    }

    fn update_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        (**self).update_execution(execution)
    }

    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        (**self).add_step_execution(step)
    }

    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        (**self).update_step_execution(step)
    }

    fn record_step_progress(
        &self,
        step: &StepExecution,
        write: &mut dyn FnMut() -> Result<(), ItemError>,
    ) -> Result<(), CommitError> {
        (**self).record_step_progress(step, write)
    }

    fn complete_execution(
        &self,
        execution_id: JobExecutionId,
        status: BatchStatus,
        exit_status: ExitStatus,
        exit_description: Option<String>,
    ) -> Result<JobExecution, RepositoryError> {
        (**self).complete_execution(execution_id, status, exit_status, exit_description)
    }

    fn find_restartable_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        (**self).find_restartable_execution(instance_id)
    }

    fn get_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        (**self).get_execution(id)
    }

    fn last_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        (**self).last_execution(instance_id)
    }

    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        (**self).last_step_execution(instance_id, step_name)
    }

    fn request_stop(&self, id: JobExecutionId) -> Result<JobExecution, RepositoryError> {
        (**self).request_stop(id)
    }

    fn is_stop_requested(&self, id: JobExecutionId) -> Result<bool, RepositoryError> {
        (**self).is_stop_requested(id)
    }
}
