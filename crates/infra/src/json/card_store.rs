//! [`CardStore`] persisted as one JSON file.

use std::path::Path;

use nightbatch_cardops::{CardRecord, CardState, CardStore, InterestPosting, Posting, StoreError};
use nightbatch_records::{Account, CardXref, CategoryBalance, DisclosureGroup, Transaction};
use tracing::debug;

use super::{JsonFileError, LockedJsonFile};

/// Card records in one JSON file, shared between processes through the
/// file's advisory lock.
#[derive(Debug)]
pub struct JsonFileCardStore {
    file: LockedJsonFile,
}

impl JsonFileCardStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = LockedJsonFile::new(path.as_ref());
        let (accounts, transactions) = file
            .read(|s: &CardState| (s.accounts.len(), s.transactions.len()))
            .map_err(store_error)?;
        debug!(
            path = %file.path().display(),
            accounts,
            transactions,
            "opened card file"
        );
        Ok(Self { file })
    }

    fn read<T>(&self, f: impl FnOnce(&CardState) -> T) -> Result<T, StoreError> {
        self.file.read(f).map_err(store_error)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut CardState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.file.update(store_error, f)
    }
}

fn store_error(err: JsonFileError) -> StoreError {
    match err {
        JsonFileError::Io { .. } => StoreError::Unavailable(err.to_string()),
        JsonFileError::Json { .. } => StoreError::Corrupt(err.to_string()),
    }
}

impl CardStore for JsonFileCardStore {
    fn account(&self, id: u64) -> Result<Option<Account>, StoreError> {
        self.read(|s| s.accounts.get(&id).cloned())
    }

    fn xref_by_card(&self, card_number: &str) -> Result<Option<CardXref>, StoreError> {
        self.read(|s| s.xrefs.get(card_number).cloned())
    }

    fn xref_by_account(&self, account_id: u64) -> Result<Option<CardXref>, StoreError> {
        self.read(|s| s.xref_by_account(account_id).cloned())
    }

    fn disclosure_group(
        &self,
        group_id: &str,
        type_code: &str,
        category_code: u16,
    ) -> Result<Option<DisclosureGroup>, StoreError> {
        let key = DisclosureGroup::key(group_id, type_code, category_code);
        self.read(|s| s.disclosures.get(&key).cloned())
    }

    fn category_balances(&self) -> Result<Vec<CategoryBalance>, StoreError> {
        self.read(|s| s.categories.values().cloned().collect())
    }

    fn transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        self.read(|s| s.transactions.get(id).cloned())
    }

    fn transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        self.read(|s| s.transactions.values().cloned().collect())
    }

    fn upsert(&self, records: &[CardRecord]) -> Result<(), StoreError> {
        self.write(|s| {
            for record in records {
                s.load(record.clone());
            }
            Ok(())
        })
    }

    fn post(&self, postings: &[Posting]) -> Result<usize, StoreError> {
        self.write(|s| s.post(postings))
    }

    fn post_interest(&self, postings: &[InterestPosting]) -> Result<usize, StoreError> {
        self.write(|s| s.post_interest(postings))
    }
}
