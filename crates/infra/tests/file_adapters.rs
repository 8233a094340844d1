//! Card jobs against real files: fixed-width input, JSON stores, report
//! output, and a process restart in between.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use nightbatch_batch::{
    BatchConfig, BatchStatus, ExitStatus, JobOperator, JobParameters, JobRegistry,
    JobRepository, LaunchError, RepositoryError,
};
use nightbatch_cardops::{
    CardJobs, CardRecord, DAILY_TRANSACTION_POSTING, END_DATE, START_DATE, TRANSACTION_REPORT,
};
use nightbatch_core::{Decimal, DecimalSpec};
use nightbatch_infra::{FileJobIo, Stores};
use nightbatch_records::{Account, CardXref, FixedWidthRecord, Transaction};

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn balance(s: &str) -> Decimal {
    Decimal::parse(s, DecimalSpec::BALANCE).unwrap()
}

fn card(n: u64) -> String {
    format!("40000000000000{n:02}")
}

fn master_data() -> Vec<CardRecord> {
    let mut records = Vec::new();
    for id in 1..=2 {
        records.push(CardRecord::Account(Account {
            id,
            active: true,
            current_balance: balance("0"),
            credit_limit: balance("1000"),
            cash_credit_limit: balance("0"),
            open_date: Some(date(1)),
            expiration_date: NaiveDate::from_ymd_opt(2030, 1, 1),
            reissue_date: None,
            cycle_credit: balance("0"),
            cycle_debit: balance("0"),
            zip: "12345".into(),
            group_id: "STANDARD".into(),
        }));
        records.push(CardRecord::Xref(CardXref {
            card_number: card(id),
            customer_id: id,
            account_id: id,
        }));
    }
    records
}

fn transaction(n: u64, account: u64, amount: &str) -> Transaction {
    Transaction {
        id: format!("{n:016}"),
        type_code: "01".into(),
        category_code: 1,
        source: "POS TERM".into(),
        description: format!("Purchase {n}"),
        amount: Decimal::parse(amount, DecimalSpec::AMOUNT).unwrap(),
        merchant_id: 7,
        merchant_name: "Corner Store".into(),
        merchant_city: "Springfield".into(),
        merchant_zip: "12345".into(),
        card_number: card(account),
        origin_ts: date(1).and_hms_opt(12, 0, 0),
        processed_ts: None,
    }
}

/// Five transactions; the third line's amount does not decode.
fn write_daily_file(io: &FileJobIo) {
    let mut lines: Vec<Vec<u8>> = [
        transaction(1, 1, "10.00"),
        transaction(2, 2, "20.00"),
        transaction(3, 1, "30.00"),
        transaction(4, 2, "40.00"),
        transaction(5, 1, "50.00"),
    ]
    .iter()
    .map(|t| t.encode().unwrap())
    .collect();
    lines[2][132..143].copy_from_slice(b"XXXXXXXXXXX");

    let path = io.daily_file(date(1));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut content = Vec::new();
    for line in lines {
        content.extend(line);
        content.extend(b"\r\n");
    }
    fs::write(path, content).unwrap();
}

fn config(dir: &Path) -> BatchConfig {
    BatchConfig::default()
        .with_chunk_size(2)
        .with_metadata_path(dir.join("meta.json"))
        .with_input_dir(dir.join("in"))
        .with_output_dir(dir.join("out"))
}

fn operator(config: &BatchConfig) -> (JobOperator<Arc<dyn JobRepository>>, Stores) {
    let stores = Stores::open(config).unwrap();
    let io = Arc::new(FileJobIo::new(&config.input_dir, &config.output_dir));
    let mut registry = JobRegistry::new();
    Arc::new(CardJobs::new(stores.cards.clone(), io, config.clone())).register(&mut registry);
    (JobOperator::new(stores.repository.clone(), registry), stores)
}

fn daily_params() -> JobParameters {
    JobParameters::new().with_processing_date(date(1))
}

#[test]
fn posting_from_a_fixed_width_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    write_daily_file(&FileJobIo::new(&config.input_dir, &config.output_dir));
    let (operator, stores) = operator(&config);
    stores.cards.upsert(&master_data()).unwrap();

    let execution = operator.launch(DAILY_TRANSACTION_POSTING, &daily_params()).unwrap();
    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.exit_status, ExitStatus::CompletedWithSkips);
    let step = &execution.steps[0];
    assert_eq!(step.write_count, 4);
    assert_eq!(step.skips[0].key.as_deref(), Some("line 3"));
    assert_eq!(step.context.get_u64("daily-transactions.line"), Some(5));

    assert_eq!(stores.cards.account(1).unwrap().unwrap().current_balance, balance("60.00"));
    assert_eq!(stores.cards.account(2).unwrap().unwrap().current_balance, balance("60.00"));
}

#[test]
fn state_outlives_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    write_daily_file(&FileJobIo::new(&config.input_dir, &config.output_dir));
    {
        let (operator, stores) = operator(&config);
        stores.cards.upsert(&master_data()).unwrap();
        operator.launch(DAILY_TRANSACTION_POSTING, &daily_params()).unwrap();
    }

    let (operator, stores) = operator(&config);
    assert_eq!(stores.cards.transactions().unwrap().len(), 4);
    let err = operator
        .launch(DAILY_TRANSACTION_POSTING, &daily_params())
        .unwrap_err();
    assert!(matches!(
        err,
        LaunchError::Repository(RepositoryError::AlreadyComplete { .. })
    ));
}

#[test]
fn report_file_has_one_page_per_page_size_and_a_grand_total() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    write_daily_file(&FileJobIo::new(&config.input_dir, &config.output_dir));
    let (operator, stores) = operator(&config);
    stores.cards.upsert(&master_data()).unwrap();
    operator.launch(DAILY_TRANSACTION_POSTING, &daily_params()).unwrap();

    let params = daily_params()
        .with_date(START_DATE, date(1))
        .with_date(END_DATE, date(1))
        .with_long("page_size", 3);
    let execution = operator.launch(TRANSACTION_REPORT, &params).unwrap();
    assert_eq!(execution.exit_status, ExitStatus::Completed);

    let path = config
        .output_dir
        .join("transaction-report-2024-03-01-2024-03-01.txt");
    let report = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.iter().filter(|l| l.starts_with("Page Total")).count(), 2);
    assert!(lines.last().unwrap().starts_with("Grand Total (4)"));
    assert!(lines.last().unwrap().ends_with("120.00"));
    assert!(!report.contains(&card(1)));
}
