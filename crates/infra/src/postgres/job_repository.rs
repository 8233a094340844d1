//! Postgres-backed execution metadata store.
//!
//! Instances and executions are rows; an execution's step executions travel
//! with it in a JSONB body. "At most one non-terminal execution per
//! instance" is a partial unique index, so two processes racing to launch
//! the same instance cannot both win.

use std::time::Duration;

use chrono::Utc;
use nightbatch_batch::{
    BatchStatus, CommitError, ExitStatus, JobExecution, JobInstance, JobParameters,
    JobRepository, RepositoryError, StepExecution,
};
use nightbatch_core::{ItemError, JobExecutionId, JobInstanceId};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;

use super::{PgCallError, PgRuntime};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS batch_job_instance (
    id UUID PRIMARY KEY,
    job_name TEXT NOT NULL,
    instance_key TEXT NOT NULL,
    body JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (job_name, instance_key)
);
CREATE TABLE IF NOT EXISTS batch_job_execution (
    seq BIGSERIAL,
    id UUID PRIMARY KEY,
    instance_id UUID NOT NULL REFERENCES batch_job_instance (id),
    status TEXT NOT NULL,
    stop_requested BOOLEAN NOT NULL DEFAULT FALSE,
    body JSONB NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS batch_job_execution_one_active
    ON batch_job_execution (instance_id)
    WHERE status NOT IN ('COMPLETED', 'FAILED', 'STOPPED');
CREATE INDEX IF NOT EXISTS batch_job_execution_by_instance
    ON batch_job_execution (instance_id, seq)
"#;

type PgTransaction = Transaction<'static, Postgres>;

pub struct PostgresJobRepository {
    pg: PgRuntime,
}

impl PostgresJobRepository {
    pub fn connect(database_url: &str, timeout: Duration) -> Result<Self, RepositoryError> {
        let pg = PgRuntime::connect(database_url, timeout).map_err(storage)?;
        Ok(Self { pg })
    }

    /// Create the tables if they do not exist yet.
    pub fn ensure_schema(&self) -> Result<(), RepositoryError> {
        self.pg.ensure_schema(SCHEMA).map_err(storage)
    }

    fn begin(&self) -> Result<PgTransaction, RepositoryError> {
        self.pg.call("begin", self.pg.pool().begin()).map_err(storage)
    }

    fn lock_execution(
        &self,
        tx: &mut PgTransaction,
        id: JobExecutionId,
    ) -> Result<JobExecution, RepositoryError> {
        let row = self
            .pg
            .call(
                "lock_execution",
                sqlx::query("SELECT body FROM batch_job_execution WHERE id = $1 FOR UPDATE")
                    .bind(*id.as_uuid())
                    .fetch_optional(&mut **tx),
            )
            .map_err(storage)?
            .ok_or_else(|| RepositoryError::NotFound(format!("job execution {id}")))?;
        body(&row)
    }

    fn save(&self, mut tx: PgTransaction, execution: &JobExecution) -> Result<(), RepositoryError> {
        self.pg
            .call("save_execution", async move {
                sqlx::query(
                    r#"
                    UPDATE batch_job_execution
                    SET status = $2, stop_requested = $3, body = $4, last_updated = $5
                    WHERE id = $1
                    "#,
                )
                .bind(*execution.id.as_uuid())
                .bind(execution.status.as_str())
                .bind(execution.stop_requested)
                .bind(Json(execution))
                .bind(execution.last_updated)
                .execute(&mut *tx)
                .await?;
                tx.commit().await
            })
            .map_err(storage)
    }

    /// Load, change and store one execution under a row lock.
    fn modify<T>(
        &self,
        id: JobExecutionId,
        f: impl FnOnce(&mut JobExecution) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let _runtime = self.pg.enter();
        let mut tx = self.begin()?;
        let mut execution = self.lock_execution(&mut tx, id)?;
        let out = f(&mut execution)?;
        self.save(tx, &execution)?;
        Ok(out)
    }

    fn fetch_executions(
        &self,
        operation: &'static str,
        sql: &'static str,
        instance_id: JobInstanceId,
    ) -> Result<Vec<JobExecution>, RepositoryError> {
        let rows = self
            .pg
            .call(
                operation,
                sqlx::query(sql)
                    .bind(*instance_id.as_uuid())
                    .fetch_all(self.pg.pool()),
            )
            .map_err(storage)?;
        rows.iter().map(body).collect()
    }

    fn running_execution(&self, instance_id: JobInstanceId) -> Result<Option<JobExecution>, RepositoryError> {
        Ok(self
            .last_execution(instance_id)?
            .filter(|e| !e.status.is_terminal()))
    }
}

fn storage(err: PgCallError) -> RepositoryError {
    match err {
        PgCallError::Timeout { timeout, .. } => RepositoryError::Timeout(timeout),
        other => RepositoryError::Storage(other.to_string()),
    }
}

fn body<T: serde::de::DeserializeOwned>(row: &PgRow) -> Result<T, RepositoryError> {
    row.try_get::<Json<T>, _>("body")
        .map(|json| json.0)
        .map_err(|e| RepositoryError::Storage(format!("undecodable metadata row: {e}")))
}

fn replace_step(execution: &mut JobExecution, step: &StepExecution) -> Result<(), RepositoryError> {
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

impl JobRepository for PostgresJobRepository {
    #[instrument(skip(self, parameters), err)]
    fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        let instance = JobInstance::new(job_name, parameters.clone());
        let inserted = self
            .pg
            .call(
                "create_instance",
                sqlx::query(
                    r#"
                    INSERT INTO batch_job_instance (id, job_name, instance_key, body, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (job_name, instance_key) DO NOTHING
                    "#,
                )
                .bind(*instance.id.as_uuid())
                .bind(&instance.job_name)
                .bind(&instance.key)
                .bind(Json(&instance))
                .bind(instance.created_at)
                .execute(self.pg.pool()),
            )
            .map_err(storage)?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::AlreadyExists {
                job_name: instance.job_name,
                key: instance.key,
            });
        }
        Ok(instance)
    }

    #[instrument(skip(self, parameters), err)]
    fn find_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        let row = self
            .pg
            .call(
                "find_instance",
                sqlx::query(
                    "SELECT body FROM batch_job_instance WHERE job_name = $1 AND instance_key = $2",
                )
                .bind(job_name)
                .bind(parameters.identifying_key())
                .fetch_optional(self.pg.pool()),
            )
            .map_err(storage)?;
        row.as_ref().map(body).transpose()
    }

    #[instrument(skip(self, instance), fields(instance_id = %instance.id), err)]
    fn start_execution(&self, instance: &JobInstance) -> Result<JobExecution, RepositoryError> {
        let execution = JobExecution::new(instance);
        let result = self.pg.call(
            "start_execution",
            sqlx::query(
                r#"
                INSERT INTO batch_job_execution (id, instance_id, status, stop_requested, body, last_updated)
                VALUES ($1, $2, $3, FALSE, $4, $5)
                "#,
            )
            .bind(*execution.id.as_uuid())
            .bind(*instance.id.as_uuid())
            .bind(execution.status.as_str())
            .bind(Json(&execution))
            .bind(execution.last_updated)
            .execute(self.pg.pool()),
        );

        match result {
            Ok(_) => Ok(execution),
            Err(e) if e.is_unique_violation() => {
                let running = self.running_execution(instance.id)?;
                Err(RepositoryError::ConcurrentExecution {
                    instance_id: instance.id,
                    execution_id: running.map(|r| r.id).unwrap_or(execution.id),
                })
            }
            Err(e) if e.is_foreign_key_violation() => Err(RepositoryError::NotFound(format!(
                "job instance {}",
                instance.id
            ))),
            Err(e) => Err(storage(e)),
        }
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id, status = %execution.status), err)]
    fn update_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        self.modify(execution.id, |stored| {
            stored.status = execution.status;
            stored.exit_status = execution.exit_status;
            stored.exit_description = execution.exit_description.clone();
            stored.start_time = execution.start_time;
            stored.end_time = execution.end_time;
            stored.stop_requested |= execution.stop_requested;
            stored.last_updated = Utc::now();
            Ok(())
        })
    }

    #[instrument(skip(self, step), fields(step = %step.step_name), err)]
    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.modify(step.job_execution_id, |execution| {
            if execution.steps.iter().any(|s| s.id == step.id) {
                return Err(RepositoryError::Storage(format!(
                    "step execution {} already recorded",
                    step.id
                )));
            }
            execution.steps.push(step.clone());
            Ok(())
        })
    }

    #[instrument(skip(self, step), fields(step = %step.step_name, status = %step.status), err)]
    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.modify(step.job_execution_id, |execution| replace_step(execution, step))
    }

    #[instrument(skip(self, step, write), fields(step = %step.step_name, commit = step.commit_count), err)]
    fn record_step_progress(
        &self,
        step: &StepExecution,
        write: &mut dyn FnMut() -> Result<(), ItemError>,
    ) -> Result<(), CommitError> {
        let _runtime = self.pg.enter();
        let mut tx = self.begin()?;
        // The row lock is held across the write; dropping `tx` rolls back.
        let mut execution = self.lock_execution(&mut tx, step.job_execution_id)?;
        write().map_err(CommitError::Write)?;
        replace_step(&mut execution, step)?;
        self.save(tx, &execution)?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    fn complete_execution(
        &self,
        execution_id: JobExecutionId,
        status: BatchStatus,
        exit_status: ExitStatus,
        exit_description: Option<String>,
    ) -> Result<JobExecution, RepositoryError> {
        self.modify(execution_id, |execution| {
            let now = Utc::now();
            execution.status = status;
            execution.exit_status = exit_status;
            execution.exit_description = exit_description;
            execution.end_time = Some(now);
            execution.last_updated = now;
            Ok(execution.clone())
        })
    }

    fn find_restartable_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        Ok(self
            .last_execution(instance_id)?
            .filter(|e| e.status.is_restartable()))
    }

    #[instrument(skip(self), err)]
    fn get_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        let row = self
            .pg
            .call(
                "get_execution",
                sqlx::query("SELECT body FROM batch_job_execution WHERE id = $1")
                    .bind(*id.as_uuid())
                    .fetch_optional(self.pg.pool()),
            )
            .map_err(storage)?;
        row.as_ref().map(body).transpose()
    }

    #[instrument(skip(self), err)]
    fn last_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        Ok(self
            .fetch_executions(
                "last_execution",
                "SELECT body FROM batch_job_execution WHERE instance_id = $1 ORDER BY seq DESC LIMIT 1",
                instance_id,
            )?
            .pop())
    }

    #[instrument(skip(self), err)]
    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        let executions = self.fetch_executions(
            "last_step_execution",
            "SELECT body FROM batch_job_execution WHERE instance_id = $1 ORDER BY seq DESC",
            instance_id,
        )?;
        Ok(executions
            .iter()
            .find_map(|e| e.step(step_name).cloned()))
    }

    #[instrument(skip(self), err)]
    fn request_stop(&self, id: JobExecutionId) -> Result<JobExecution, RepositoryError> {
        self.modify(id, |execution| {
            if execution.status.is_terminal() {
                return Err(RepositoryError::NotRunning(id));
            }
            execution.stop_requested = true;
            execution.last_updated = Utc::now();
            Ok(execution.clone())
        })
    }

    fn is_stop_requested(&self, id: JobExecutionId) -> Result<bool, RepositoryError> {
        let row = self
            .pg
            .call(
                "is_stop_requested",
                sqlx::query("SELECT stop_requested FROM batch_job_execution WHERE id = $1")
                    .bind(*id.as_uuid())
                    .fetch_optional(self.pg.pool()),
            )
            .map_err(storage)?
            .ok_or_else(|| RepositoryError::NotFound(format!("job execution {id}")))?;
        row.try_get::<bool, _>("stop_requested")
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }
}
