//! Postgres-backed card store.
//!
//! One table per record kind, keyed by natural key, with the record itself
//! in a JSONB body. Posting locks the touched account rows, applies the
//! batch through [`CardState`] and writes the changed rows back in the same
//! transaction.

use std::collections::BTreeSet;
use std::time::Duration;

use nightbatch_cardops::{CardRecord, CardState, CardStore, InterestPosting, Posting, StoreError};
use nightbatch_records::{Account, CardXref, CategoryBalance, DisclosureGroup, Transaction};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, Row};
use tracing::{debug, instrument};

use super::{PgCallError, PgRuntime};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS card_account (
    id BIGINT PRIMARY KEY,
    body JSONB NOT NULL
);
CREATE TABLE IF NOT EXISTS card_xref (
    card_number TEXT PRIMARY KEY,
    account_id BIGINT NOT NULL,
    body JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS card_xref_by_account ON card_xref (account_id, card_number);
CREATE TABLE IF NOT EXISTS card_category_balance (
    key TEXT PRIMARY KEY,
    body JSONB NOT NULL
);
CREATE TABLE IF NOT EXISTS card_disclosure_group (
    key TEXT PRIMARY KEY,
    body JSONB NOT NULL
);
CREATE TABLE IF NOT EXISTS card_transaction (
    id TEXT PRIMARY KEY,
    card_number TEXT NOT NULL,
    body JSONB NOT NULL
)
"#;

pub struct PostgresCardStore {
    pg: PgRuntime,
}

impl PostgresCardStore {
    pub fn connect(database_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let pg = PgRuntime::connect(database_url, timeout).map_err(store_error)?;
        Ok(Self { pg })
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.pg.ensure_schema(SCHEMA).map_err(store_error)
    }

    fn fetch_one<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Option<T>, StoreError> {
        let row = self
            .pg
            .call(operation, query.fetch_optional(self.pg.pool()))
            .map_err(store_error)?;
        row.as_ref().map(body).transpose()
    }

    fn fetch_all<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        sql: &'static str,
    ) -> Result<Vec<T>, StoreError> {
        let rows = self
            .pg
            .call(operation, sqlx::query(sql).fetch_all(self.pg.pool()))
            .map_err(store_error)?;
        rows.iter().map(body).collect()
    }

    /// Lock and load the rows a posting batch touches, apply it, and write
    /// the result back. Nothing is written if `apply` fails.
    fn post_batch(
        &self,
        operation: &'static str,
        account_ids: BTreeSet<u64>,
        category_keys: Vec<String>,
        transaction_ids: Vec<String>,
        apply: impl FnOnce(&mut CardState) -> Result<usize, StoreError>,
    ) -> Result<usize, StoreError> {
        let _runtime = self.pg.enter();
        let mut tx = self
            .pg
            .call("begin", self.pg.pool().begin())
            .map_err(store_error)?;

        let ids: Vec<i64> = account_ids.iter().map(|&id| id as i64).collect();
        let accounts = self
            .pg
            .call(
                operation,
                sqlx::query("SELECT body FROM card_account WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                    .bind(ids)
                    .fetch_all(&mut *tx),
            )
            .map_err(store_error)?;
        let categories = self
            .pg
            .call(
                operation,
                sqlx::query("SELECT body FROM card_category_balance WHERE key = ANY($1)")
                    .bind(category_keys)
                    .fetch_all(&mut *tx),
            )
            .map_err(store_error)?;
        let posted = self
            .pg
            .call(
                operation,
                sqlx::query("SELECT body FROM card_transaction WHERE id = ANY($1)")
                    .bind(transaction_ids)
                    .fetch_all(&mut *tx),
            )
            .map_err(store_error)?;

        let mut state = CardState::new();
        for row in &accounts {
            state.load(CardRecord::Account(body(row)?));
        }
        for row in &categories {
            state.load(CardRecord::Category(body(row)?));
        }
        let already: BTreeSet<String> = posted
            .iter()
            .map(|row| body::<Transaction>(row).map(|t| t.id))
            .collect::<Result<_, _>>()?;
        for row in &posted {
            state.load(CardRecord::Transaction(body(row)?));
        }

        let count = apply(&mut state)?;

        let mut records: Vec<CardRecord> = Vec::new();
        records.extend(state.accounts.into_values().map(CardRecord::Account));
        records.extend(state.categories.into_values().map(CardRecord::Category));
        records.extend(
            state
                .transactions
                .into_values()
                .filter(|t| !already.contains(&t.id))
                .map(CardRecord::Transaction),
        );

        self.pg
            .call(operation, async move {
                for record in &records {
                    upsert_row(&mut tx, record).await?;
                }
                tx.commit().await
            })
            .map_err(store_error)?;
        debug!(operation, posted = count, "card batch committed");
        Ok(count)
    }
}

fn store_error(err: PgCallError) -> StoreError {
    match err {
        PgCallError::Timeout { timeout, .. } => StoreError::Timeout(timeout),
        e if e.is_transient() => StoreError::Unavailable(e.to_string()),
        e => StoreError::Corrupt(e.to_string()),
    }
}

fn body<T: serde::de::DeserializeOwned>(row: &PgRow) -> Result<T, StoreError> {
    row.try_get::<Json<T>, _>("body")
        .map(|json| json.0)
        .map_err(|e| StoreError::Corrupt(format!("undecodable card row: {e}")))
}

async fn upsert_row(conn: &mut PgConnection, record: &CardRecord) -> Result<(), sqlx::Error> {
    let query = match record {
        CardRecord::Account(a) => sqlx::query(
            "INSERT INTO card_account (id, body) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(a.id as i64)
        .bind(Json(a)),
        CardRecord::Xref(x) => sqlx::query(
            "INSERT INTO card_xref (card_number, account_id, body) VALUES ($1, $2, $3) \
             ON CONFLICT (card_number) DO UPDATE SET account_id = EXCLUDED.account_id, body = EXCLUDED.body",
        )
        .bind(&x.card_number)
        .bind(x.account_id as i64)
        .bind(Json(x)),
        CardRecord::Category(c) => sqlx::query(
            "INSERT INTO card_category_balance (key, body) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(CategoryBalance::key(c.account_id, &c.type_code, c.category_code))
        .bind(Json(c)),
        CardRecord::Disclosure(d) => sqlx::query(
            "INSERT INTO card_disclosure_group (key, body) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(DisclosureGroup::key(&d.group_id, &d.type_code, d.category_code))
        .bind(Json(d)),
        CardRecord::Transaction(t) => sqlx::query(
            "INSERT INTO card_transaction (id, card_number, body) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET card_number = EXCLUDED.card_number, body = EXCLUDED.body",
        )
        .bind(&t.id)
        .bind(&t.card_number)
        .bind(Json(t)),
    };
    query.execute(conn).await.map(|_| ())
}

impl CardStore for PostgresCardStore {
    fn account(&self, id: u64) -> Result<Option<Account>, StoreError> {
        self.fetch_one(
            "account",
            sqlx::query("SELECT body FROM card_account WHERE id = $1").bind(id as i64),
        )
    }

    fn xref_by_card(&self, card_number: &str) -> Result<Option<CardXref>, StoreError> {
        self.fetch_one(
            "xref_by_card",
            sqlx::query("SELECT body FROM card_xref WHERE card_number = $1").bind(card_number),
        )
    }

    fn xref_by_account(&self, account_id: u64) -> Result<Option<CardXref>, StoreError> {
        self.fetch_one(
            "xref_by_account",
            sqlx::query(
                "SELECT body FROM card_xref WHERE account_id = $1 ORDER BY card_number LIMIT 1",
            )
            .bind(account_id as i64),
        )
    }

    fn disclosure_group(
        &self,
        group_id: &str,
        type_code: &str,
        category_code: u16,
    ) -> Result<Option<DisclosureGroup>, StoreError> {
        self.fetch_one(
            "disclosure_group",
            sqlx::query("SELECT body FROM card_disclosure_group WHERE key = $1")
                .bind(DisclosureGroup::key(group_id, type_code, category_code)),
        )
    }

    fn transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        self.fetch_one(
            "transaction",
            sqlx::query("SELECT body FROM card_transaction WHERE id = $1").bind(id),
        )
    }

    fn category_balances(&self) -> Result<Vec<CategoryBalance>, StoreError> {
        self.fetch_all(
            "category_balances",
            "SELECT body FROM card_category_balance ORDER BY key",
        )
    }

    fn transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        self.fetch_all("transactions", "SELECT body FROM card_transaction ORDER BY id")
    }

    #[instrument(skip(self, records), fields(count = records.len()), err)]
    fn upsert(&self, records: &[CardRecord]) -> Result<(), StoreError> {
        let _runtime = self.pg.enter();
        let mut tx = self
            .pg
            .call("begin", self.pg.pool().begin())
            .map_err(store_error)?;
        self.pg
            .call("upsert", async move {
                for record in records {
                    upsert_row(&mut tx, record).await?;
                }
                tx.commit().await
            })
            .map_err(store_error)
    }

    #[instrument(skip(self, postings), fields(count = postings.len()), err)]
    fn post(&self, postings: &[Posting]) -> Result<usize, StoreError> {
        let accounts = postings.iter().map(|p| p.account_id).collect();
        let categories = postings
            .iter()
            .map(|p| {
                let t = &p.transaction;
                CategoryBalance::key(p.account_id, &t.type_code, t.category_code)
            })
            .collect();
        let ids = postings.iter().map(|p| p.transaction.id.clone()).collect();
        self.post_batch("post", accounts, categories, ids, |state| state.post(postings))
    }

    #[instrument(skip(self, postings), fields(count = postings.len()), err)]
    fn post_interest(&self, postings: &[InterestPosting]) -> Result<usize, StoreError> {
        let accounts = postings.iter().map(|p| p.account_id).collect();
        let ids = postings
            .iter()
            .filter_map(|p| p.transaction.as_ref().map(|t| t.id.clone()))
            .collect();
        self.post_batch("post_interest", accounts, Vec::new(), ids, |state| {
            state.post_interest(postings)
        })
    }
}
