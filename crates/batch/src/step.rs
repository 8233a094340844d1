//! Chunk-oriented step: read → process → write → commit, one chunk at a time.
//!
//! ## Chunk protocol
//!
//! 1. Read up to `chunk_size` items (skipped reads do not count).
//! 2. Process each item independently; filtered items produce no output.
//! 3. Stage all outputs with the writer.
//! 4. Commit: flush the writer and persist counters + checkpoint in one
//!    repository call. Only then does the step's committed state advance.
//!
//! A crash anywhere before 4 completes replays the whole chunk on restart.
//! Chunk N+1 is never read before chunk N is committed.

use nightbatch_core::ItemError;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::error::StepError;
use crate::item::{ItemProcessor, ItemReader, ItemWriter};
use crate::metadata::{FailureRecord, ItemPhase, StepExecution};
use crate::policy::{FaultAction, FaultPolicy};
use crate::repository::{CommitError, JobRepository};

/// How a step run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Input exhausted, everything committed.
    Completed,
    /// A stop was requested; the last chunk committed and the checkpoint is intact.
    Stopped,
}

/// A unit of work within a job.
pub trait Step: Send {
    fn name(&self) -> &str;

    /// Run again on restart even if a previous execution completed it.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Run the step. `execution` arrives with the restored checkpoint in its
    /// context and leaves with the last committed counters.
    fn execute(
        &mut self,
        execution: &mut StepExecution,
        repository: &dyn JobRepository,
    ) -> Result<StepOutcome, StepError>;
}

/// Step settings; `build` attaches the reader, processor and writer.
#[derive(Debug, Clone)]
pub struct StepBuilder {
    name: String,
    chunk_size: usize,
    policy: FaultPolicy,
    max_reported_failures: usize,
    allow_start_if_complete: bool,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunk_size: 100,
            policy: FaultPolicy::default(),
            max_reported_failures: 10,
            allow_start_if_complete: false,
        }
    }

    /// Chunk size, limits and reporting cap from the batch configuration.
    pub fn from_config(name: impl Into<String>, config: &BatchConfig) -> Self {
        Self::new(name)
            .chunk_size(config.chunk_size)
            .fault_policy(config.fault_policy())
            .max_reported_failures(config.max_reported_failures)
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn skip_limit(mut self, limit: u32) -> Self {
        self.policy = self.policy.with_skip_limit(limit);
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.policy = self.policy.with_retry_limit(limit);
        self
    }

    pub fn max_reported_failures(mut self, max: usize) -> Self {
        self.max_reported_failures = max;
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn build<R, P, W>(self, reader: R, processor: P, writer: W) -> ChunkStep<R, P, W>
    where
        R: ItemReader,
        P: ItemProcessor<In = R::Item>,
        W: ItemWriter<Item = P::Out>,
    {
        ChunkStep {
            name: self.name,
            chunk_size: self.chunk_size,
            policy: self.policy,
            max_reported_failures: self.max_reported_failures,
            allow_start_if_complete: self.allow_start_if_complete,
            reader,
            processor,
            writer,
        }
    }
}

/// Counters and skip records of the chunk in flight; applied to the step
/// only when the chunk commits.
#[derive(Debug, Default)]
struct ChunkState {
    number: u64,
    read: u64,
    filtered: u64,
    read_skips: u64,
    process_skips: u64,
    write_skips: u64,
    skips: Vec<FailureRecord>,
    exhausted: bool,
}

impl ChunkState {
    fn skips(&self) -> u64 {
        self.read_skips + self.process_skips + self.write_skips
    }

    fn is_empty(&self) -> bool {
        self.read == 0 && self.skips() == 0
    }
}

/// The read → process → write step.
pub struct ChunkStep<R, P, W> {
    name: String,
    chunk_size: usize,
    policy: FaultPolicy,
    max_reported_failures: usize,
    allow_start_if_complete: bool,
    reader: R,
    processor: P,
    writer: W,
}

impl<R, P, W> ChunkStep<R, P, W>
where
    R: ItemReader,
    P: ItemProcessor<In = R::Item>,
    W: ItemWriter<Item = P::Out>,
{
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn policy(&self) -> &FaultPolicy {
        &self.policy
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn open_streams(&mut self, step: &StepExecution) -> Result<(), StepError> {
        let stream = |error| StepError::Stream {
            operation: "open",
            error,
        };
        self.reader.open(&step.context).map_err(stream)?;
        self.processor.open(&step.context).map_err(stream)?;
        self.writer.open(&step.context).map_err(stream)?;
        Ok(())
    }

    fn close_streams(&mut self) -> Result<(), StepError> {
        let stream = |error| StepError::Stream {
            operation: "close",
            error,
        };
        let reader = self.reader.close();
        let processor = self.processor.close();
        let writer = self.writer.close();
        reader.map_err(stream)?;
        processor.map_err(stream)?;
        writer.map_err(stream)
    }

    /// Resolve an item error the policy did not retry (or whose retries ran out).
    fn tolerate(
        &self,
        step: &StepExecution,
        chunk: &mut ChunkState,
        phase: ItemPhase,
        error: ItemError,
    ) -> Result<(), StepError> {
        match self.policy.classify(error.kind) {
            FaultAction::Fatal => return Err(StepError::Fatal { phase, error }),
            FaultAction::Retry if !self.policy.is_skippable(error.kind) => {
                return Err(StepError::RetryLimitExceeded {
                    limit: self.policy.retry_limit(),
                    phase,
                    error,
                });
            }
            FaultAction::Retry | FaultAction::Skip => {}
        }

        if step.skip_count() + chunk.skips() >= self.policy.skip_limit() as u64 {
            return Err(StepError::SkipLimitExceeded {
                limit: self.policy.skip_limit(),
                phase,
                error,
            });
        }

        warn!(
            step = %self.name,
            phase = %phase,
            kind = %error.kind,
            key = error.key.as_deref().unwrap_or("-"),
            reason = %error.message,
            "item skipped"
        );
        match phase {
            ItemPhase::Read => chunk.read_skips += 1,
            ItemPhase::Process => chunk.process_skips += 1,
            ItemPhase::Write => chunk.write_skips += 1,
        }
        chunk.skips.push(FailureRecord::from_item(phase, &error));
        Ok(())
    }

    fn read_with_retry(&mut self) -> Result<Option<R::Item>, ItemError> {
        let mut attempts = 0;
        loop {
            match self.reader.read() {
                Err(e) if self.policy.is_retryable(e.kind) && attempts < self.policy.retry_limit() => {
                    attempts += 1;
                    debug!(step = %self.name, attempt = attempts, kind = %e.kind, "retrying read");
                }
                other => return other,
            }
        }
    }

    fn process_with_retry(&mut self, item: &R::Item) -> Result<Option<P::Out>, ItemError> {
        let mut attempts = 0;
        loop {
            match self.processor.process(item) {
                Err(e) if self.policy.is_retryable(e.kind) && attempts < self.policy.retry_limit() => {
                    attempts += 1;
                    debug!(step = %self.name, attempt = attempts, kind = %e.kind, "retrying item");
                }
                other => return other,
            }
        }
    }

    fn read_chunk(
        &mut self,
        step: &StepExecution,
        chunk: &mut ChunkState,
    ) -> Result<Vec<R::Item>, StepError> {
        let mut items = Vec::with_capacity(self.chunk_size);
        while items.len() < self.chunk_size {
            match self.read_with_retry() {
                Ok(Some(item)) => {
                    items.push(item);
                    chunk.read += 1;
                }
                Ok(None) => {
                    chunk.exhausted = true;
                    break;
                }
                Err(e) => self.tolerate(step, chunk, ItemPhase::Read, e)?,
            }
        }
        Ok(items)
    }

    fn process_chunk(
        &mut self,
        step: &StepExecution,
        chunk: &mut ChunkState,
        items: &[R::Item],
    ) -> Result<Vec<P::Out>, StepError> {
        let mut outputs = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match self.process_with_retry(item) {
                Ok(Some(out)) => outputs.push(out),
                Ok(None) => chunk.filtered += 1,
                Err(e) => {
                    let number = chunk.number;
                    let e = e.or_key(|| format!("item {} of chunk {number}", index + 1));
                    self.tolerate(step, chunk, ItemPhase::Process, e)?;
                }
            }
        }

        if chunk.exhausted {
            let drained = self.processor.drain().map_err(|error| StepError::Fatal {
                phase: ItemPhase::Process,
                error,
            })?;
            outputs.extend(drained);
        }
        Ok(outputs)
    }

    /// The step state as it will be once this chunk commits.
    fn checkpoint(
        &mut self,
        step: &StepExecution,
        chunk: &ChunkState,
        written: u64,
    ) -> Result<StepExecution, StepError> {
        let mut next = step.clone();
        next.read_count += chunk.read;
        next.write_count += written;
        next.filter_count += chunk.filtered;
        next.read_skip_count += chunk.read_skips;
        next.process_skip_count += chunk.process_skips;
        next.write_skip_count += chunk.write_skips;
        next.commit_count += 1;

        let room = self.max_reported_failures.saturating_sub(next.skips.len());
        next.skips.extend(chunk.skips.iter().take(room).cloned());

        let stream = |error| StepError::Stream {
            operation: "update",
            error,
        };
        self.reader.update(&mut next.context).map_err(stream)?;
        self.processor.update(&mut next.context).map_err(stream)?;
        self.writer.update(&mut next.context).map_err(stream)?;
        Ok(next)
    }

    /// Flush (optionally) and persist `next` atomically; `step` advances only on success.
    fn record(
        &mut self,
        step: &mut StepExecution,
        repository: &dyn JobRepository,
        next: StepExecution,
        flush: bool,
    ) -> Result<(), CommitError> {
        let writer = &mut self.writer;
        repository.record_step_progress(&next, &mut || if flush { writer.flush() } else { Ok(()) })?;
        *step = next;
        Ok(())
    }

    /// Write the chunk as one unit, retrying or falling back to scan mode.
    fn write_chunk(
        &mut self,
        step: &mut StepExecution,
        repository: &dyn JobRepository,
        chunk: &mut ChunkState,
        outputs: &[P::Out],
    ) -> Result<(), StepError> {
        let mut attempts = 0;
        loop {
            let result = match self.writer.write(outputs) {
                Ok(()) => {
                    let next = self.checkpoint(step, chunk, outputs.len() as u64)?;
                    self.record(step, repository, next, true)
                }
                Err(e) => Err(CommitError::Write(e)),
            };

            let error = match result {
                Ok(()) => return Ok(()),
                Err(CommitError::Repository(e)) => {
                    self.writer.rollback();
                    return Err(StepError::Repository(e));
                }
                Err(CommitError::Write(e)) => e,
            };

            self.writer.rollback();
            step.rollback_count += 1;

            match self.policy.classify(error.kind) {
                FaultAction::Retry if attempts < self.policy.retry_limit() => {
                    attempts += 1;
                    debug!(
                        step = %self.name,
                        chunk = chunk.number,
                        attempt = attempts,
                        kind = %error.kind,
                        "retrying chunk write"
                    );
                }
                FaultAction::Retry | FaultAction::Skip if self.policy.is_skippable(error.kind) => {
                    return self.scan(step, repository, chunk, outputs);
                }
                FaultAction::Retry => {
                    return Err(StepError::RetryLimitExceeded {
                        limit: self.policy.retry_limit(),
                        phase: ItemPhase::Write,
                        error,
                    });
                }
                FaultAction::Skip | FaultAction::Fatal => {
                    return Err(StepError::Fatal {
                        phase: ItemPhase::Write,
                        error,
                    });
                }
            }
        }
    }

    /// Write items one at a time to isolate the ones that cannot be written.
    fn scan(
        &mut self,
        step: &mut StepExecution,
        repository: &dyn JobRepository,
        chunk: &mut ChunkState,
        outputs: &[P::Out],
    ) -> Result<(), StepError> {
        debug!(step = %self.name, chunk = chunk.number, items = outputs.len(), "scanning chunk");
        let mut written = 0;

        for (index, output) in outputs.iter().enumerate() {
            let mut attempts = 0;
            loop {
                let result = self
                    .writer
                    .write(std::slice::from_ref(output))
                    .and_then(|()| self.writer.flush());
                match result {
                    Ok(()) => {
                        written += 1;
                        break;
                    }
                    Err(e) => {
                        self.writer.rollback();
                        if self.policy.is_retryable(e.kind) && attempts < self.policy.retry_limit() {
                            attempts += 1;
                            continue;
                        }
                        let number = chunk.number;
                        let e = e.or_key(|| format!("item {} of chunk {number}", index + 1));
                        self.tolerate(step, chunk, ItemPhase::Write, e)?;
                        break;
                    }
                }
            }
        }

        let next = self.checkpoint(step, chunk, written)?;
        self.record(step, repository, next, false)
            .map_err(|e| match e {
                CommitError::Repository(r) => StepError::Repository(r),
                CommitError::Write(error) => StepError::Fatal {
                    phase: ItemPhase::Write,
                    error,
                },
            })
    }

    fn run_chunks(
        &mut self,
        step: &mut StepExecution,
        repository: &dyn JobRepository,
    ) -> Result<StepOutcome, StepError> {
        loop {
            let mut chunk = ChunkState {
                number: step.commit_count + 1,
                ..ChunkState::default()
            };

            let items = self.read_chunk(step, &mut chunk)?;
            let outputs = self.process_chunk(step, &mut chunk, &items)?;

            if chunk.is_empty() && outputs.is_empty() {
                return Ok(StepOutcome::Completed);
            }

            self.write_chunk(step, repository, &mut chunk, &outputs)?;
            debug!(
                step = %self.name,
                chunk = chunk.number,
                read = step.read_count,
                written = step.write_count,
                skipped = step.skip_count(),
                "chunk committed"
            );

            if chunk.exhausted {
                return Ok(StepOutcome::Completed);
            }
            if repository.is_stop_requested(step.job_execution_id)? {
                info!(step = %self.name, commits = step.commit_count, "stop requested, step stopping");
                return Ok(StepOutcome::Stopped);
            }
        }
    }
}

impl<R, P, W> Step for ChunkStep<R, P, W>
where
    R: ItemReader,
    P: ItemProcessor<In = R::Item>,
    W: ItemWriter<Item = P::Out>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn execute(
        &mut self,
        execution: &mut StepExecution,
        repository: &dyn JobRepository,
    ) -> Result<StepOutcome, StepError> {
        self.open_streams(execution)?;
        let outcome = self.run_chunks(execution, repository);
        let closed = self.close_streams();
        let outcome = outcome?;
        closed?;
        Ok(outcome)
    }
}
