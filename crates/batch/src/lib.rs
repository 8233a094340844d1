//! Chunk-oriented batch engine.
//!
//! ## Components
//!
//! - [`JobParameters`] / [`ExecutionContext`]: what identifies a run, and
//!   what a step checkpoints after every chunk
//! - [`JobRepository`]: durable execution metadata (instances, executions,
//!   step executions)
//! - [`FaultPolicy`]: declarative skip/retry table per error kind
//! - [`ChunkStep`]: read → process → write with transactional chunk commits
//! - [`Job`] / [`JobOperator`]: sequential steps, single active execution
//!   per instance, restart from checkpoint

pub mod config;
pub mod context;
pub mod error;
pub mod item;
pub mod job;
pub mod metadata;
pub mod operator;
pub mod params;
pub mod policy;
pub mod repository;
pub mod step;
pub mod summary;

pub use config::{BatchConfig, ConfigError};
pub use context::{ContextError, ExecutionContext};
pub use error::{LaunchError, StepError};
pub use item::{
    FnProcessor, ItemProcessor, ItemReader, ItemWriter, ListItemReader, PassThroughProcessor,
    VecItemWriter,
};
pub use job::{Job, JobBuilder};
pub use metadata::{
    BatchStatus, ExitStatus, FailureRecord, ItemPhase, JobExecution, JobInstance, StepExecution,
};
pub use operator::{JobFactory, JobOperator, JobRegistry};
pub use params::{JobParameter, JobParameterValue, JobParameters, PROCESSING_DATE};
pub use policy::{FaultAction, FaultPolicy};
pub use repository::{
    CommitError, InMemoryJobRepository, JobRepository, RepositoryError, RepositoryState,
};
pub use step::{ChunkStep, Step, StepBuilder, StepOutcome};
pub use summary::{ExecutionSummary, StepSummary};
