//! Daily transaction posting: validate each transaction, then post it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use nightbatch_batch::{ExecutionContext, ItemProcessor, ItemWriter};
use nightbatch_core::{Decimal, ItemError};
use nightbatch_records::{Account, Transaction};
use tracing::debug;

use crate::store::CardStore;

/// Why a transaction was rejected. The codes are the ones printed on the
/// legacy reject listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidCard,
    AccountNotFound,
    OverLimit,
    AfterExpiration,
}

impl RejectReason {
    pub fn code(&self) -> u16 {
        match self {
            RejectReason::InvalidCard => 100,
            RejectReason::AccountNotFound => 101,
            RejectReason::OverLimit => 102,
            RejectReason::AfterExpiration => 103,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RejectReason::InvalidCard => "INVALID CARD NUMBER FOUND",
            RejectReason::AccountNotFound => "ACCOUNT RECORD NOT FOUND",
            RejectReason::OverLimit => "OVERLIMIT TRANSACTION",
            RejectReason::AfterExpiration => "TRANSACTION RECEIVED AFTER ACCT EXPIRATION",
        }
    }

    /// A skippable item error keyed by the transaction id.
    pub fn reject(&self, tx: &Transaction) -> ItemError {
        ItemError::constraint(format!("{} {}", self.code(), self.description()))
            .with_key(tx.id.clone())
    }
}

/// An accepted transaction and the account it posts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account_id: u64,
    pub transaction: Transaction,
}

/// Validates transactions against the cross-reference and account master.
///
/// Amounts accepted earlier in the same chunk are not in the store yet; they
/// are tracked per account so the credit limit sees them too.
pub struct PostingProcessor {
    store: Arc<dyn CardStore>,
    processed_at: NaiveDateTime,
    pending: BTreeMap<u64, Decimal>,
}

impl PostingProcessor {
    pub fn new(store: Arc<dyn CardStore>, processed_at: NaiveDateTime) -> Self {
        Self {
            store,
            processed_at,
            pending: BTreeMap::new(),
        }
    }

    fn check_limit(&self, account: &Account, tx: &Transaction) -> Result<Decimal, ItemError> {
        let pending = match self.pending.get(&account.id) {
            Some(p) => p.add(&tx.amount)?,
            None => tx.amount,
        };
        let projected = account.projected_cycle_balance(&pending)?;
        if projected > account.credit_limit {
            return Err(RejectReason::OverLimit.reject(tx));
        }
        Ok(pending)
    }
}

impl ItemProcessor for PostingProcessor {
    type In = Transaction;
    type Out = Posting;

    fn process(&mut self, tx: &Transaction) -> Result<Option<Posting>, ItemError> {
        let xref = self
            .store
            .xref_by_card(&tx.card_number)
            .map_err(|e| ItemError::from(e).or_key(|| tx.id.clone()))?
            .ok_or_else(|| RejectReason::InvalidCard.reject(tx))?;

        // A replayed chunk: the store already holds this posting, so the
        // balances include its amount. Pass it through for the writer to ignore.
        let posted = self
            .store
            .transaction(&tx.id)
            .map_err(|e| ItemError::from(e).or_key(|| tx.id.clone()))?;
        if let Some(transaction) = posted {
            debug!(transaction_id = %tx.id, "transaction already posted");
            return Ok(Some(Posting {
                account_id: xref.account_id,
                transaction,
            }));
        }

        let account = self
            .store
            .account(xref.account_id)
            .map_err(|e| ItemError::from(e).or_key(|| tx.id.clone()))?
            .ok_or_else(|| RejectReason::AccountNotFound.reject(tx))?;

        let pending = self.check_limit(&account, tx)?;
        if let (Some(expires), Some(origin)) = (account.expiration_date, tx.origin_ts) {
            if origin.date() > expires {
                return Err(RejectReason::AfterExpiration.reject(tx));
            }
        }

        self.pending.insert(account.id, pending);
        let mut transaction = tx.clone();
        transaction.processed_ts = Some(self.processed_at);
        Ok(Some(Posting {
            account_id: account.id,
            transaction,
        }))
    }

    fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        // The chunk is committed; its amounts are in the store now.
        self.pending.clear();
        Ok(())
    }
}

/// Stages postings and applies them to the store on flush.
pub struct PostingWriter {
    store: Arc<dyn CardStore>,
    staged: Vec<Posting>,
}

impl PostingWriter {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self {
            store,
            staged: Vec::new(),
        }
    }
}

impl ItemWriter for PostingWriter {
    type Item = Posting;

    fn write(&mut self, items: &[Posting]) -> Result<(), ItemError> {
        self.staged.extend_from_slice(items);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ItemError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let posted = self.store.post(&self.staged).map_err(|e| {
            let key = self.staged.first().map(|p| p.transaction.id.clone());
            let err = ItemError::from(e);
            match key {
                Some(key) if self.staged.len() == 1 => err.or_key(|| key),
                _ => err,
            }
        })?;
        debug!(staged = self.staged.len(), posted, "posted transactions");
        self.staged.clear();
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{account, balance, transaction, xref};
    use crate::store::{CardRecord, InMemoryCardStore};
    use chrono::NaiveDate;
    use nightbatch_core::ErrorKind;

    fn processed_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 2)
            .and_then(|d| d.and_hms_opt(1, 0, 0))
            .unwrap()
    }

    fn store() -> Arc<InMemoryCardStore> {
        let mut expired = account(2, "1000");
        expired.expiration_date = NaiveDate::from_ymd_opt(2024, 2, 28);
        Arc::new(InMemoryCardStore::with_records([
            CardRecord::Account(account(1, "500")),
            CardRecord::Account(expired),
            CardRecord::Xref(xref("4000000000000001", 1)),
            CardRecord::Xref(xref("4000000000000002", 2)),
            CardRecord::Xref(xref("4000000000000009", 9)),
        ]))
    }

    fn processor(store: &Arc<InMemoryCardStore>) -> PostingProcessor {
        PostingProcessor::new(store.clone(), processed_at())
    }

    fn rejection(result: Result<Option<Posting>, ItemError>) -> String {
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConstraintViolation);
        err.message
    }

    #[test]
    fn accepted_transaction_is_stamped() {
        let store = store();
        let posting = processor(&store)
            .process(&transaction("T1", "4000000000000001", "25.00"))
            .unwrap()
            .unwrap();
        assert_eq!(posting.account_id, 1);
        assert_eq!(posting.transaction.processed_ts, Some(processed_at()));
    }

    #[test]
    fn each_reject_reason_has_its_code() {
        let store = store();
        let mut p = processor(&store);

        let unknown = p.process(&transaction("T1", "4999999999999999", "1.00"));
        assert_eq!(rejection(unknown), "100 INVALID CARD NUMBER FOUND");

        let orphan = p.process(&transaction("T2", "4000000000000009", "1.00"));
        assert_eq!(rejection(orphan), "101 ACCOUNT RECORD NOT FOUND");

        let over = p.process(&transaction("T3", "4000000000000001", "500.01"));
        assert_eq!(rejection(over), "102 OVERLIMIT TRANSACTION");

        let late = p.process(&transaction("T4", "4000000000000002", "1.00"));
        assert_eq!(
            rejection(late),
            "103 TRANSACTION RECEIVED AFTER ACCT EXPIRATION"
        );
    }

    #[test]
    fn rejects_carry_the_transaction_id_not_the_card() {
        let store = store();
        let err = processor(&store)
            .process(&transaction("T1", "4999999999999999", "1.00"))
            .unwrap_err();
        assert_eq!(err.key.as_deref(), Some("T1"));
        assert!(!err.message.contains("4999"));
    }

    #[test]
    fn limit_counts_amounts_pending_in_the_chunk() {
        let store = store();
        let mut p = processor(&store);
        p.process(&transaction("T1", "4000000000000001", "300.00")).unwrap();
        let second = p.process(&transaction("T2", "4000000000000001", "300.00"));
        assert_eq!(rejection(second), "102 OVERLIMIT TRANSACTION");

        // After a commit the store holds the first amount instead.
        p.update(&mut ExecutionContext::new()).unwrap();
        store
            .post(&[Posting {
                account_id: 1,
                transaction: transaction("T1", "4000000000000001", "300.00"),
            }])
            .unwrap();
        let third = p.process(&transaction("T3", "4000000000000001", "300.00"));
        assert_eq!(rejection(third), "102 OVERLIMIT TRANSACTION");
        assert!(
            p.process(&transaction("T4", "4000000000000001", "200.00"))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn replayed_transaction_is_not_validated_again() {
        let store = store();
        let posted = processor(&store)
            .process(&transaction("T1", "4000000000000001", "300.00"))
            .unwrap()
            .unwrap();
        store.post(std::slice::from_ref(&posted)).unwrap();

        // A fresh processor after a crash between the store flush and the
        // metadata commit sees T1 again on top of the balance it already moved.
        let mut p = processor(&store);
        let replayed = p
            .process(&transaction("T1", "4000000000000001", "300.00"))
            .unwrap()
            .unwrap();
        assert_eq!(replayed, posted);
        assert_eq!(store.post(&[replayed]).unwrap(), 0);

        // It does not count against the limit of the rest of the chunk either.
        assert!(
            p.process(&transaction("T2", "4000000000000001", "200.00"))
                .unwrap()
                .is_some()
        );
        assert_eq!(
            store.account(1).unwrap().unwrap().current_balance,
            balance("300.00")
        );
    }

    #[test]
    fn writer_posts_on_flush_only() {
        let store = store();
        let mut writer = PostingWriter::new(store.clone());
        let posting = Posting {
            account_id: 1,
            transaction: transaction("T1", "4000000000000001", "10.00"),
        };

        writer.write(std::slice::from_ref(&posting)).unwrap();
        writer.rollback();
        writer.flush().unwrap();
        assert!(store.transactions().unwrap().is_empty());

        writer.write(&[posting]).unwrap();
        writer.flush().unwrap();
        assert_eq!(
            store.account(1).unwrap().unwrap().current_balance,
            balance("10.00")
        );
    }
}
