//! Restart, abandonment and single-active-execution behaviour.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use nightbatch_batch::{
    BatchStatus, CommitError, ExitStatus, InMemoryJobRepository, ItemReader, ItemWriter, Job,
    JobExecution, JobInstance, JobOperator, JobParameters, JobRegistry, JobRepository,
    LaunchError, ListItemReader, PassThroughProcessor, RepositoryError, StepBuilder,
    StepExecution, ExecutionContext,
};
use nightbatch_core::{ItemError, JobExecutionId, JobInstanceId};

type Store = Arc<Mutex<BTreeMap<u32, u32>>>;

/// Upserts items by key; fails fatally once when a poisoned key is staged.
struct UpsertWriter {
    store: Store,
    staged: Vec<u32>,
    writes: Arc<AtomicU64>,
    poison: Arc<Mutex<Option<u32>>>,
}

impl ItemWriter for UpsertWriter {
    type Item = u32;

    fn write(&mut self, items: &[u32]) -> Result<(), ItemError> {
        let mut poison = self.poison.lock().unwrap();
        if let Some(bad) = *poison {
            if items.contains(&bad) {
                *poison = None;
                return Err(ItemError::unclassified("disk full").with_key(bad.to_string()));
            }
        }
        self.staged.extend_from_slice(items);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ItemError> {
        let mut store = self.store.lock().unwrap();
        for item in self.staged.drain(..) {
            store.insert(item, item * 10);
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}

struct Fixture {
    store: Store,
    writes: Arc<AtomicU64>,
    poison: Arc<Mutex<Option<u32>>>,
}

impl Fixture {
    fn new(poison: Option<u32>) -> Self {
        Self {
            store: Arc::default(),
            writes: Arc::default(),
            poison: Arc::new(Mutex::new(poison)),
        }
    }

    fn registry(&self, total: u32) -> JobRegistry {
        let store = self.store.clone();
        let writes = self.writes.clone();
        let poison = self.poison.clone();
        let mut registry = JobRegistry::new();
        registry.register("upsert", move |_: &JobParameters| {
            Ok(Job::builder("upsert")
                .step(StepBuilder::new("upsert").chunk_size(10).build(
                    ListItemReader::new("upsert", (1..=total).collect::<Vec<u32>>()),
                    PassThroughProcessor::default(),
                    UpsertWriter {
                        store: store.clone(),
                        staged: Vec::new(),
                        writes: writes.clone(),
                        poison: poison.clone(),
                    },
                ))
                .build())
        });
        registry
    }
}

fn params() -> JobParameters {
    JobParameters::new().with_long("batch", 7)
}

#[test]
fn restart_resumes_after_the_last_committed_chunk() {
    let fixture = Fixture::new(Some(35));
    let operator = JobOperator::new(InMemoryJobRepository::new(), fixture.registry(100));

    let failed = operator.launch("upsert", &params()).unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    let first = failed.step("upsert").unwrap();
    assert_eq!(first.commit_count, 3);
    assert_eq!(first.context.get_u64("upsert.position"), Some(30));
    assert_eq!(first.failures[0].key.as_deref(), Some("35"));

    let finished = operator.restart("upsert", &params()).unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(finished.instance_id, failed.instance_id);
    let second = finished.step("upsert").unwrap();
    assert_eq!(second.read_count, 70);

    assert_eq!(first.write_count + second.write_count, 100);
    assert_eq!(fixture.writes.load(Ordering::SeqCst), 100);
    let store = fixture.store.lock().unwrap();
    assert_eq!(store.len(), 100);
    assert_eq!(store.get(&100), Some(&1000));
}

#[test]
fn launching_a_failed_instance_resumes_it() {
    let fixture = Fixture::new(Some(5));
    let operator = JobOperator::new(InMemoryJobRepository::new(), fixture.registry(20));

    assert_eq!(
        operator.launch("upsert", &params()).unwrap().status,
        BatchStatus::Failed
    );
    let resumed = operator.launch("upsert", &params()).unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(fixture.store.lock().unwrap().len(), 20);
}

/// Repository that loses the metadata commit of one chunk after its output
/// was made durable, as if the process died between the two.
struct CrashingRepository {
    inner: InMemoryJobRepository,
    commits: AtomicU64,
    crash_at: u64,
    down: AtomicBool,
}

impl CrashingRepository {
    fn new(crash_at: u64) -> Self {
        Self {
            inner: InMemoryJobRepository::new(),
            commits: AtomicU64::new(0),
            crash_at,
            down: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("connection lost".into()));
        }
        Ok(())
    }

    /// A new process with a working connection.
    fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
    }
}

impl JobRepository for CrashingRepository {
    fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        self.inner.create_instance(job_name, parameters)
    }

    fn find_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        self.inner.find_instance(job_name, parameters)
    }

    fn start_execution(&self, instance: &JobInstance) -> Result<JobExecution, RepositoryError> {
        self.inner.start_execution(instance)
    }

    fn update_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        self.inner.update_execution(execution)
    }

    fn add_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.inner.add_step_execution(step)
    }

    fn update_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.update_step_execution(step)
    }

    fn record_step_progress(
        &self,
        step: &StepExecution,
        write: &mut dyn FnMut() -> Result<(), ItemError>,
    ) -> Result<(), CommitError> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.crash_at {
            write().map_err(CommitError::Write)?;
            self.down.store(true, Ordering::SeqCst);
            return Err(RepositoryError::Storage("connection lost".into()).into());
        }
        self.inner.record_step_progress(step, write)
    }

    fn complete_execution(
        &self,
        execution_id: JobExecutionId,
        status: BatchStatus,
        exit_status: ExitStatus,
        exit_description: Option<String>,
    ) -> Result<JobExecution, RepositoryError> {
        self.check()?;
        self.inner
            .complete_execution(execution_id, status, exit_status, exit_description)
    }

    fn find_restartable_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        self.inner.find_restartable_execution(instance_id)
    }

    fn get_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        self.inner.get_execution(id)
    }

    fn last_execution(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        self.inner.last_execution(instance_id)
    }

    fn last_step_execution(
        &self,
        instance_id: JobInstanceId,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        self.inner.last_step_execution(instance_id, step_name)
    }

    fn request_stop(&self, id: JobExecutionId) -> Result<JobExecution, RepositoryError> {
        self.inner.request_stop(id)
    }

    fn is_stop_requested(&self, id: JobExecutionId) -> Result<bool, RepositoryError> {
        self.inner.is_stop_requested(id)
    }
}

#[test]
fn crash_between_output_and_metadata_replays_the_chunk_idempotently() {
    let fixture = Fixture::new(None);
    let operator = JobOperator::new(CrashingRepository::new(4), fixture.registry(60));

    let err = operator.launch("upsert", &params()).unwrap_err();
    assert!(matches!(err, LaunchError::Repository(RepositoryError::Storage(_))));

    // The dead execution still looks like it is running.
    operator.repository().recover();
    let instance = operator
        .repository()
        .find_instance("upsert", &params())
        .unwrap()
        .unwrap();
    let dead = operator
        .repository()
        .last_execution(instance.id)
        .unwrap()
        .unwrap();
    assert_eq!(dead.status, BatchStatus::Started);
    assert!(operator.launch("upsert", &params()).unwrap_err().is_concurrent_execution());

    // Chunk 4 reached the store but its commit was lost.
    assert_eq!(fixture.store.lock().unwrap().len(), 40);
    assert_eq!(dead.step("upsert").unwrap().commit_count, 3);

    let abandoned = operator.abandon(dead.id).unwrap();
    assert_eq!(abandoned.status, BatchStatus::Failed);
    assert_eq!(abandoned.exit_description.as_deref(), Some("abandoned by operator"));

    let finished = operator.restart_execution(dead.id).unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(finished.step("upsert").unwrap().read_count, 30);

    // Chunk 4 was written twice, the store holds each key once.
    assert_eq!(fixture.writes.load(Ordering::SeqCst), 70);
    assert_eq!(fixture.store.lock().unwrap().len(), 60);
}

#[test]
fn second_launch_of_a_running_instance_is_rejected() {
    let repository = InMemoryJobRepository::new();
    let instance = repository.create_instance("upsert", &params()).unwrap();
    let running = repository.start_execution(&instance).unwrap();

    let fixture = Fixture::new(None);
    let operator = JobOperator::new(repository, fixture.registry(10));
    let err = operator.launch("upsert", &params()).unwrap_err();
    match err {
        LaunchError::Repository(RepositoryError::ConcurrentExecution { execution_id, .. }) => {
            assert_eq!(execution_id, running.id)
        }
        other => panic!("expected concurrent execution, got {other:?}"),
    }
    assert!(fixture.store.lock().unwrap().is_empty());
}

/// Blocks on its first read until released, announcing that it got there.
struct GatedReader {
    inner: ListItemReader<u32>,
    gate: Option<(Sender<()>, Receiver<()>)>,
}

impl ItemReader for GatedReader {
    type Item = u32;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.inner.open(context)
    }

    fn read(&mut self) -> Result<Option<u32>, ItemError> {
        if let Some((arrived, release)) = self.gate.take() {
            arrived
                .send(())
                .map_err(|_| ItemError::unclassified("test harness gone"))?;
            release
                .recv()
                .map_err(|_| ItemError::unclassified("test harness gone"))?;
        }
        self.inner.read()
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        self.inner.update(context)
    }
}

#[test]
fn concurrent_launches_yield_one_execution() {
    let (arrived_tx, arrived_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let gate = Arc::new(Mutex::new(Some((arrived_tx, release_rx))));
    let written = Arc::new(Mutex::new(Vec::new()));

    let mut registry = JobRegistry::new();
    {
        let written = written.clone();
        registry.register("gated", move |_: &JobParameters| {
            let gate = gate.lock().unwrap().take();
            Ok(Job::builder("gated")
                .step(StepBuilder::new("gated").build(
                    GatedReader {
                        inner: ListItemReader::new("gated", vec![1, 2, 3]),
                        gate,
                    },
                    PassThroughProcessor::default(),
                    nightbatch_batch::VecItemWriter::shared(written.clone()),
                ))
                .build())
        });
    }
    let operator = Arc::new(JobOperator::new(InMemoryJobRepository::new(), registry));

    let first = {
        let operator = operator.clone();
        std::thread::spawn(move || operator.launch("gated", &params()))
    };
    arrived_rx.recv().unwrap();

    let second = operator.launch("gated", &params());
    assert!(second.unwrap_err().is_concurrent_execution());

    release_tx.send(()).unwrap();
    let first = first.join().unwrap().unwrap();
    assert_eq!(first.status, BatchStatus::Completed);
    assert_eq!(*written.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn completed_steps_are_not_rerun_on_restart() {
    let fixture = Fixture::new(Some(7));
    let copied = Arc::new(Mutex::new(Vec::new()));

    let mut registry = JobRegistry::new();
    {
        let copied = copied.clone();
        let store = fixture.store.clone();
        let writes = fixture.writes.clone();
        let poison = fixture.poison.clone();
        registry.register("two-steps", move |_: &JobParameters| {
            Ok(Job::builder("two-steps")
                .step(StepBuilder::new("copy").build(
                    ListItemReader::new("copy", vec![1u32, 2, 3]),
                    PassThroughProcessor::default(),
                    nightbatch_batch::VecItemWriter::shared(copied.clone()),
                ))
                .step(StepBuilder::new("upsert").chunk_size(5).build(
                    ListItemReader::new("upsert", (1..=10).collect::<Vec<u32>>()),
                    PassThroughProcessor::default(),
                    UpsertWriter {
                        store: store.clone(),
                        staged: Vec::new(),
                        writes: writes.clone(),
                        poison: poison.clone(),
                    },
                ))
                .build())
        });
    }
    let operator = JobOperator::new(InMemoryJobRepository::new(), registry);

    let failed = operator.launch("two-steps", &params()).unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(failed.failing_step().unwrap().step_name, "upsert");

    let finished = operator.restart("two-steps", &params()).unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);
    let copy = finished.step("copy").unwrap();
    assert_eq!(copy.exit_status, ExitStatus::Noop);
    assert_eq!(copy.read_count, 0);
    assert_eq!(finished.step("upsert").unwrap().read_count, 5);
    assert_eq!(*copied.lock().unwrap(), vec![1, 2, 3]);
}
