//! [`JobRepository`] persisted as one JSON file.

use std::path::Path;

use nightbatch_batch::{
    BatchStatus, CommitError, ExitStatus, JobExecution, JobInstance, JobParameters,
    JobRepository, RepositoryError, RepositoryState, StepExecution,
};
use nightbatch_core::{ItemError, JobExecutionId, JobInstanceId};
use tracing::{debug, instrument};

use super::{JsonFileError, LockedJsonFile};

/// Metadata store backed by a JSON file.
///
/// Each call locks the file, reads the state other handles (and other
/// processes) have committed, and rewrites it before unlocking. Stop
/// requests and single-active-execution checks therefore hold across
/// processes sharing the file.
#[derive(Debug)]
pub struct JsonFileJobRepository {
    file: LockedJsonFile,
}

impl JsonFileJobRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let file = LockedJsonFile::new(path.as_ref());
        let executions = file
            .read(|s: &RepositoryState| s.executions().len())
            .map_err(storage)?;
        debug!(path = %file.path().display(), executions, "opened metadata file");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn read<T>(&self, f: impl FnOnce(&RepositoryState) -> T) -> Result<T, RepositoryError> {
        self.file.read(f).map_err(storage)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut RepositoryState) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        self.file.update(storage, f)
    }
}

fn storage(err: JsonFileError) -> RepositoryError {
    RepositoryError::Storage(err.to_string())
}

impl JobRepository for JsonFileJobRepository {
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

    #[instrument(skip(self, step, write), fields(step = %step.step_name, commit = step.commit_count), err)]
    fn record_step_progress(
        &self,
        step: &StepExecution,
        write: &mut dyn FnMut() -> Result<(), ItemError>,
    ) -> Result<(), CommitError> {
        self.file.update(
            |e| CommitError::from(storage(e)),
            |state: &mut RepositoryState| {
                state.update_step_execution(step)?;
                write().map_err(CommitError::Write)
            },
        )
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
