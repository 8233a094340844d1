//! Keyed business state the card jobs read and post to.
//!
//! A [`CardStore`] holds the account master, card cross-reference, category
//! balances, disclosure groups and posted transactions. Every write is
//! atomic per call and idempotent by transaction id, so a chunk replayed
//! after a crash never moves a balance twice.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use nightbatch_core::{Decimal, DecimalError, ErrorKind, ItemError};
use nightbatch_records::{
    Account, CardXref, CategoryBalance, DisclosureGroup, Transaction, account_key,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interest::InterestPosting;
use crate::posting::Posting;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store could not be reached; worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call exceeded {0:?}")]
    Timeout(Duration),

    #[error("{record} {key} not found")]
    Missing { record: &'static str, key: String },

    #[error(transparent)]
    Arithmetic(#[from] DecimalError),

    /// Stored data that no longer decodes, or a broken lock.
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

impl From<StoreError> for ItemError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => ItemError::new(ErrorKind::TransientIo, err.to_string()),
            StoreError::Timeout(_) => ItemError::new(ErrorKind::Timeout, err.to_string()),
            StoreError::Missing { ref key, .. } => {
                let key = key.clone();
                ItemError::constraint(err.to_string()).with_key(key)
            }
            StoreError::Arithmetic(e) => ItemError::from(e),
            StoreError::Corrupt(_) => ItemError::unclassified(err.to_string()),
        }
    }
}

/// One master-data record to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardRecord {
    Account(Account),
    Xref(CardXref),
    Category(CategoryBalance),
    Disclosure(DisclosureGroup),
    Transaction(Transaction),
}

/// Store for the card-processing jobs.
///
/// Implementations must be `Send + Sync`: one store is shared by every job
/// the operator builds.
pub trait CardStore: Send + Sync {
    fn account(&self, id: u64) -> Result<Option<Account>, StoreError>;

    fn xref_by_card(&self, card_number: &str) -> Result<Option<CardXref>, StoreError>;

    /// First cross-reference for an account, in card-number order.
    fn xref_by_account(&self, account_id: u64) -> Result<Option<CardXref>, StoreError>;

    fn disclosure_group(
        &self,
        group_id: &str,
        type_code: &str,
        category_code: u16,
    ) -> Result<Option<DisclosureGroup>, StoreError>;

    /// All category balances in key (account, type, category) order.
    fn category_balances(&self) -> Result<Vec<CategoryBalance>, StoreError>;

    /// A posted transaction by id.
    fn transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError>;

    /// All posted transactions in id order.
    fn transactions(&self) -> Result<Vec<Transaction>, StoreError>;

    /// Insert or replace master records by natural key, all or nothing.
    fn upsert(&self, records: &[CardRecord]) -> Result<(), StoreError>;

    /// Post accepted transactions, all or nothing. Transactions already
    /// posted are ignored. Returns how many were newly posted.
    fn post(&self, postings: &[Posting]) -> Result<usize, StoreError>;

    /// Post interest and close each account's cycle, all or nothing.
    /// Returns how many interest transactions were newly posted.
    fn post_interest(&self, postings: &[InterestPosting]) -> Result<usize, StoreError>;
}

impl<S: CardStore + ?Sized> CardStore for Arc<S> {
    fn account(&self, id: u64) -> Result<Option<Account>, StoreError> {
        (**self).account(id)
    }

    fn xref_by_card(&self, card_number: &str) -> Result<Option<CardXref>, StoreError> {
        (**self).xref_by_card(card_number)
    }

    fn xref_by_account(&self, account_id: u64) -> Result<Option<CardXref>, StoreError> {
        (**self).xref_by_account(account_id)
    }

    fn disclosure_group(
        &self,
        group_id: &str,
        type_code: &str,
        category_code: u16,
    ) -> Result<Option<DisclosureGroup>, StoreError> {
        (**self).disclosure_group(group_id, type_code, category_code)
    }

    fn category_balances(&self) -> Result<Vec<CategoryBalance>, StoreError> {
        (**self).category_balances()
    }

    fn transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        (**self).transaction(id)
    }

    fn transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        (**self).transactions()
    }

    fn upsert(&self, records: &[CardRecord]) -> Result<(), StoreError> {
        (**self).upsert(records)
    }

    fn post(&self, postings: &[Posting]) -> Result<usize, StoreError> {
        (**self).post(postings)
    }

    fn post_interest(&self, postings: &[InterestPosting]) -> Result<usize, StoreError> {
        (**self).post_interest(postings)
    }
}

/// The whole card state as ordered maps.
///
/// Posting goes through [`CardState::post`] and
/// [`CardState::post_interest`]: both work on copies of the touched rows and
/// write them back only when every posting in the batch succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardState {
    pub accounts: BTreeMap<u64, Account>,
    pub xrefs: BTreeMap<String, CardXref>,
    pub categories: BTreeMap<String, CategoryBalance>,
    pub disclosures: BTreeMap<String, DisclosureGroup>,
    pub transactions: BTreeMap<String, Transaction>,
}

impl CardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn xref_by_account(&self, account_id: u64) -> Option<&CardXref> {
        self.xrefs.values().find(|x| x.account_id == account_id)
    }

    pub fn load(&mut self, record: CardRecord) {
        match record {
            CardRecord::Account(a) => {
                self.accounts.insert(a.id, a);
            }
            CardRecord::Xref(x) => {
                self.xrefs.insert(x.card_number.clone(), x);
            }
            CardRecord::Category(c) => {
                let key = CategoryBalance::key(c.account_id, &c.type_code, c.category_code);
                self.categories.insert(key, c);
            }
            CardRecord::Disclosure(d) => {
                let key = DisclosureGroup::key(&d.group_id, &d.type_code, d.category_code);
                self.disclosures.insert(key, d);
            }
            CardRecord::Transaction(t) => {
                self.transactions.insert(t.id.clone(), t);
            }
        }
    }

    pub fn post(&mut self, postings: &[Posting]) -> Result<usize, StoreError> {
        let mut accounts: BTreeMap<u64, Account> = BTreeMap::new();
        let mut categories: BTreeMap<String, CategoryBalance> = BTreeMap::new();
        let mut fresh: Vec<&Transaction> = Vec::new();
        let mut seen = BTreeSet::new();

        for posting in postings {
            let tx = &posting.transaction;
            if self.transactions.contains_key(&tx.id) || !seen.insert(tx.id.as_str()) {
                continue;
            }

            let account = self.staged_account(&mut accounts, posting.account_id)?;
            account.apply(&tx.amount)?;

            let key = CategoryBalance::key(posting.account_id, &tx.type_code, tx.category_code);
            let category = categories.entry(key.clone()).or_insert_with(|| {
                self.categories.get(&key).cloned().unwrap_or_else(|| CategoryBalance {
                    account_id: posting.account_id,
                    type_code: tx.type_code.clone(),
                    category_code: tx.category_code,
                    balance: Decimal::zero(tx.amount.spec()),
                })
            });
            category.balance = category.balance.add(&tx.amount)?;

            fresh.push(tx);
        }

        let posted = fresh.len();
        let fresh: Vec<Transaction> = fresh.into_iter().cloned().collect();
        self.accounts.extend(accounts);
        self.categories.extend(categories);
        self.transactions
            .extend(fresh.into_iter().map(|t| (t.id.clone(), t)));
        Ok(posted)
    }

    pub fn post_interest(&mut self, postings: &[InterestPosting]) -> Result<usize, StoreError> {
        let mut accounts: BTreeMap<u64, Account> = BTreeMap::new();
        let mut fresh: Vec<Transaction> = Vec::new();

        for posting in postings {
            if let Some(tx) = &posting.transaction {
                if self.transactions.contains_key(&tx.id) || fresh.iter().any(|t| t.id == tx.id) {
                    // Already posted; the cycle was closed with it.
                    continue;
                }
                let account = self.staged_account(&mut accounts, posting.account_id)?;
                account.current_balance = account.current_balance.add(&tx.amount)?;
                fresh.push(tx.clone());
            }
            let account = self.staged_account(&mut accounts, posting.account_id)?;
            account.cycle_credit = Decimal::zero(account.cycle_credit.spec());
            account.cycle_debit = Decimal::zero(account.cycle_debit.spec());
        }

        let posted = fresh.len();
        self.accounts.extend(accounts);
        self.transactions
            .extend(fresh.into_iter().map(|t| (t.id.clone(), t)));
        Ok(posted)
    }

    fn staged_account<'a>(
        &self,
        staged: &'a mut BTreeMap<u64, Account>,
        id: u64,
    ) -> Result<&'a mut Account, StoreError> {
        if !staged.contains_key(&id) {
            let account = self.accounts.get(&id).cloned().ok_or_else(|| StoreError::Missing {
                record: "account",
                key: account_key(id),
            })?;
            staged.insert(id, account);
        }
        staged.get_mut(&id).ok_or_else(|| StoreError::Missing {
            record: "account",
            key: account_key(id),
        })
    }
}

/// In-process [`CardStore`]; the state sits behind one `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryCardStore {
    state: RwLock<CardState>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_records(records: impl IntoIterator<Item = CardRecord>) -> Self {
        let mut state = CardState::new();
        for record in records {
            state.load(record);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<CardState, StoreError> {
        self.read(|s| s.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&CardState) -> T) -> Result<T, StoreError> {
        let guard = self
            .state
            .read()
            .map_err(|_| StoreError::Corrupt("card store lock poisoned".into()))?;
        Ok(f(&guard))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut CardState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::Corrupt("card store lock poisoned".into()))?;
        f(&mut guard)
    }
}

impl CardStore for InMemoryCardStore {
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
