//! Postgres adapters (sqlx).
//!
//! The engine's store traits are synchronous; each adapter owns a private
//! current-thread tokio runtime and blocks on it. Every call is bounded by
//! the configured IO timeout.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | Meaning |
//! |------------|----------------------|---------|
//! | Database (unique violation) | `23505` | key already taken (instance exists, execution running) |
//! | Database (foreign key violation) | `23503` | parent row missing |
//! | Io / PoolTimedOut / PoolClosed | N/A | transient, worth retrying |
//! | Other | N/A | storage error |

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::runtime::Runtime;

pub mod card_store;
pub mod job_repository;

pub use card_store::PostgresCardStore;
pub use job_repository::PostgresJobRepository;

/// Failure of one blocking database call.
#[derive(Debug, Error)]
pub enum PgCallError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation}: {source}")]
    Sql {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("runtime: {0}")]
    Runtime(String),
}

impl PgCallError {
    /// Postgres SQLSTATE of a database error.
    pub fn code(&self) -> Option<String> {
        match self {
            PgCallError::Sql {
                source: sqlx::Error::Database(db),
                ..
            } => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code().as_deref() == Some("23505")
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.code().as_deref() == Some("23503")
    }

    /// Connection-level failures that a retry may get past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PgCallError::Sql {
                source: sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed,
                ..
            }
        )
    }
}

/// A pool plus the runtime that drives it.
pub struct PgRuntime {
    runtime: Runtime,
    pool: PgPool,
    timeout: Duration,
}

impl PgRuntime {
    /// Connect lazily: the first query opens the first connection.
    pub fn connect(database_url: &str, timeout: Duration) -> Result<Self, PgCallError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PgCallError::Runtime(e.to_string()))?;
        let pool = {
            let _guard = runtime.enter();
            PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(timeout)
                .connect_lazy(database_url)
                .map_err(|source| PgCallError::Sql {
                    operation: "connect",
                    source,
                })?
        };
        Ok(Self {
            runtime,
            pool,
            timeout,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Make this runtime current for the caller's scope, so sqlx values
    /// (pooled connections, open transactions) can be dropped outside
    /// [`PgRuntime::call`].
    pub fn enter(&self) -> tokio::runtime::EnterGuard<'_> {
        self.runtime.enter()
    }

    /// Run one database future to completion within the IO timeout.
    pub fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, PgCallError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let timeout = self.timeout;
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result.map_err(|source| PgCallError::Sql { operation, source }),
                Err(_) => Err(PgCallError::Timeout { operation, timeout }),
            }
        })
    }

    /// Run a schema script; statements are separated by `;`.
    pub fn ensure_schema(&self, script: &'static str) -> Result<(), PgCallError> {
        for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.call("ensure_schema", async {
                sqlx::query(statement).execute(&self.pool).await.map(|_| ())
            })?;
        }
        Ok(())
    }
}
