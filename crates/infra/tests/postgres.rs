//! Postgres stores against a live database.
//!
//! Ignored by default. Run with
//! `NIGHTBATCH_TEST_DATABASE_URL=postgres://... cargo test -p nightbatch-infra -- --ignored`.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use nightbatch_batch::{
    BatchStatus, CommitError, ExitStatus, JobParameters, JobRepository, RepositoryError,
    StepExecution,
};
use nightbatch_cardops::{CardRecord, CardStore, Posting};
use nightbatch_core::{Decimal, DecimalSpec, ItemError};
use nightbatch_infra::{PostgresCardStore, PostgresJobRepository};
use nightbatch_records::{Account, Transaction};

fn database_url() -> Option<String> {
    std::env::var("NIGHTBATCH_TEST_DATABASE_URL").ok()
}

/// Distinct per run, so reruns against the same database do not collide.
fn run_id() -> i64 {
    Utc::now().timestamp_micros() % 1_000_000_000
}

fn repository(url: &str) -> PostgresJobRepository {
    let repo = PostgresJobRepository::connect(url, Duration::from_secs(10)).unwrap();
    repo.ensure_schema().unwrap();
    repo
}

fn params() -> JobParameters {
    JobParameters::new().with_processing_date(NaiveDate::from_ymd_opt(2024, 3, 14).unwrap())
}

#[test]
#[ignore]
fn one_running_execution_per_instance() {
    let Some(url) = database_url() else { return };
    let repo = repository(&url);
    let job = format!("pg-posting-{}", run_id());

    let instance = repo.create_instance(&job, &params()).unwrap();
    assert!(matches!(
        repo.create_instance(&job, &params()),
        Err(RepositoryError::AlreadyExists { .. })
    ));

    let first = repo.start_execution(&instance).unwrap();
    match repo.start_execution(&instance) {
        Err(RepositoryError::ConcurrentExecution { execution_id, .. }) => {
            assert_eq!(execution_id, first.id)
        }
        other => panic!("expected concurrent execution error, got {other:?}"),
    }

    repo.complete_execution(first.id, BatchStatus::Failed, ExitStatus::Failed, None)
        .unwrap();
    assert_eq!(
        repo.find_restartable_execution(instance.id).unwrap().map(|e| e.id),
        Some(first.id)
    );
    assert!(repo.start_execution(&instance).is_ok());
}

#[test]
#[ignore]
fn chunk_progress_commits_with_the_write() {
    let Some(url) = database_url() else { return };
    let repo = repository(&url);
    let job = format!("pg-progress-{}", run_id());

    let instance = repo.create_instance(&job, &params()).unwrap();
    let execution = repo.start_execution(&instance).unwrap();
    let mut step = StepExecution::new(execution.id, "post");
    repo.add_step_execution(&step).unwrap();

    step.commit_count = 1;
    step.context.put_u64("reader.position", 100);
    let result = repo.record_step_progress(&step, &mut || Err(ItemError::transient("reset")));
    assert!(matches!(result, Err(CommitError::Write(_))));
    let stored = repo.last_step_execution(instance.id, "post").unwrap().unwrap();
    assert_eq!(stored.commit_count, 0);

    repo.record_step_progress(&step, &mut || Ok(())).unwrap();
    let stored = repo.last_step_execution(instance.id, "post").unwrap().unwrap();
    assert_eq!(stored.context.get_u64("reader.position"), Some(100));

    repo.request_stop(execution.id).unwrap();
    assert!(repo.is_stop_requested(execution.id).unwrap());
}

#[test]
#[ignore]
fn replayed_postings_do_not_move_balances_twice() {
    let Some(url) = database_url() else { return };
    let store = PostgresCardStore::connect(&url, Duration::from_secs(10)).unwrap();
    store.ensure_schema().unwrap();

    let id = run_id() as u64;
    let zero = Decimal::zero(DecimalSpec::BALANCE);
    store
        .upsert(&[CardRecord::Account(Account {
            id,
            active: true,
            current_balance: zero,
            credit_limit: Decimal::parse("1000", DecimalSpec::BALANCE).unwrap(),
            cash_credit_limit: zero,
            open_date: None,
            expiration_date: None,
            reissue_date: None,
            cycle_credit: zero,
            cycle_debit: zero,
            zip: "12345".into(),
            group_id: "DEFAULT".into(),
        })])
        .unwrap();

    let posting = |n: u64| Posting {
        account_id: id,
        transaction: Transaction {
            id: format!("{id:010}{n:06}"),
            type_code: "01".into(),
            category_code: 1,
            source: "POS TERM".into(),
            description: "Purchase".into(),
            amount: Decimal::parse("2.50", DecimalSpec::AMOUNT).unwrap(),
            merchant_id: 1,
            merchant_name: "Shop".into(),
            merchant_city: "Town".into(),
            merchant_zip: "12345".into(),
            card_number: "4000000000000001".into(),
            origin_ts: None,
            processed_ts: None,
        },
    };

    assert_eq!(store.post(&[posting(1), posting(2)]).unwrap(), 2);
    assert_eq!(store.post(&[posting(2), posting(3)]).unwrap(), 1);
    let account = store.account(id).unwrap().unwrap();
    assert_eq!(account.current_balance.to_string(), "7.50");
}
