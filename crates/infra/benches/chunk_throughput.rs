use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use nightbatch_batch::{
    BatchConfig, ExecutionContext, InMemoryJobRepository, ItemReader, JobOperator, JobParameters,
    JobRegistry,
};
use nightbatch_cardops::{CardJobs, CardRecord, DAILY_TRANSACTION_POSTING, InMemoryCardStore};
use nightbatch_core::{Decimal, DecimalSpec};
use nightbatch_infra::{FileJobIo, FixedWidthFileReader};
use nightbatch_records::{Account, CardXref, FixedWidthRecord, Transaction};

const ACCOUNTS: u64 = 50;
const TRANSACTIONS: u64 = 10_000;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn card(n: u64) -> String {
    format!("4{n:015}")
}

fn master_data() -> Vec<CardRecord> {
    let zero = Decimal::zero(DecimalSpec::BALANCE);
    (1..=ACCOUNTS)
        .flat_map(|id| {
            [
                CardRecord::Account(Account {
                    id,
                    active: true,
                    current_balance: zero,
                    credit_limit: Decimal::parse("99999999", DecimalSpec::BALANCE).unwrap(),
                    cash_credit_limit: zero,
                    open_date: None,
                    expiration_date: None,
                    reissue_date: None,
                    cycle_credit: zero,
                    cycle_debit: zero,
                    zip: "12345".into(),
                    group_id: "DEFAULT".into(),
                }),
                CardRecord::Xref(CardXref {
                    card_number: card(id),
                    customer_id: id,
                    account_id: id,
                }),
            ]
        })
        .collect()
}

fn write_daily_file(io: &FileJobIo) {
    let path = io.daily_file(date());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut content = Vec::new();
    for n in 1..=TRANSACTIONS {
        let tx = Transaction {
            id: format!("{n:016}"),
            type_code: "01".into(),
            category_code: 1,
            source: "POS TERM".into(),
            description: format!("Purchase {n}"),
            amount: Decimal::parse("12.34", DecimalSpec::AMOUNT).unwrap(),
            merchant_id: n % 97,
            merchant_name: "Corner Store".into(),
            merchant_city: "Springfield".into(),
            merchant_zip: "12345".into(),
            card_number: card(n % ACCOUNTS + 1),
            origin_ts: date().and_hms_opt(9, 30, 0),
            processed_ts: None,
        };
        content.extend(tx.encode().unwrap());
        content.push(b'\n');
    }
    fs::write(path, content).unwrap();
}

fn file_io(dir: &Path) -> FileJobIo {
    FileJobIo::new(dir.join("in"), dir.join("out"))
}

fn bench_file_decode(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let io = file_io(dir.path());
    write_daily_file(&io);

    let mut group = c.benchmark_group("fixed_width_decode");
    group.throughput(Throughput::Elements(TRANSACTIONS));
    group.bench_function("daily_transactions", |b| {
        b.iter(|| {
            let mut reader = FixedWidthFileReader::<Transaction>::new("bench", io.daily_file(date()));
            reader.open(&ExecutionContext::new()).unwrap();
            let mut count = 0u64;
            while let Some(tx) = reader.read().unwrap() {
                black_box(&tx);
                count += 1;
            }
            assert_eq!(count, TRANSACTIONS);
        });
    });
    group.finish();
}

fn bench_posting_job(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let io = Arc::new(file_io(dir.path()));
    write_daily_file(&io);
    let params = JobParameters::new().with_processing_date(date());

    let mut group = c.benchmark_group("posting_job");
    group.sample_size(10);
    group.throughput(Throughput::Elements(TRANSACTIONS));

    for chunk_size in [10usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("chunk_size", chunk_size),
            &chunk_size,
            |b, &size| {
                b.iter_batched(
                    || {
                        let store = Arc::new(InMemoryCardStore::with_records(master_data()));
                        let config = BatchConfig::default().with_chunk_size(size);
                        let mut registry = JobRegistry::new();
                        Arc::new(CardJobs::new(store, io.clone(), config)).register(&mut registry);
                        JobOperator::new(InMemoryJobRepository::new(), registry)
                    },
                    |operator| {
                        black_box(operator.launch(DAILY_TRANSACTION_POSTING, &params).unwrap());
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_file_decode, bench_posting_job);
criterion_main!(benches);
