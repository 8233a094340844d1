//! Monthly interest: accrue per category balance, post once per account.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use nightbatch_batch::{ExecutionContext, ItemProcessor, ItemWriter};
use nightbatch_core::{Decimal, DecimalError, DecimalSpec, ItemError, RoundingMode};
use nightbatch_records::{
    Account, CategoryBalance, DEFAULT_GROUP, DisclosureGroup, Transaction, account_key,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::CardStore;

const STATE_KEY: &str = "interest.state";

pub const INTEREST_TYPE: &str = "01";
pub const INTEREST_CATEGORY: u16 = 5;

/// Interest for one month: `balance * annual_rate / 1200`, truncated to
/// cents. The product is kept exact at four decimals before dividing.
pub fn monthly_interest(balance: &Decimal, annual_rate: &Decimal) -> Result<Decimal, DecimalError> {
    let product = balance.mul_to(annual_rate, DecimalSpec::new(13, 4)?, RoundingMode::Truncate)?;
    let months = Decimal::from_units(1200, DecimalSpec::whole(4))?;
    product.div_to(&months, DecimalSpec::AMOUNT, RoundingMode::Truncate)
}

/// Interest for one account, ready to post. `transaction` is `None` when
/// nothing accrued; the cycle is closed either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestPosting {
    pub account_id: u64,
    pub transaction: Option<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Accrual {
    account_id: u64,
    total: Decimal,
}

/// Carried across chunks in the step's checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct InterestState {
    current: Option<Accrual>,
    posted: u64,
}

/// Reads category balances in account order and emits an
/// [`InterestPosting`] whenever the account changes, plus one for the last
/// account when the input runs out.
pub struct InterestProcessor {
    store: Arc<dyn CardStore>,
    processing_date: NaiveDate,
    state: InterestState,
}

impl InterestProcessor {
    pub fn new(store: Arc<dyn CardStore>, processing_date: NaiveDate) -> Self {
        Self {
            store,
            processing_date,
            state: InterestState::default(),
        }
    }

    fn rate(&self, account: &Account, balance: &CategoryBalance) -> Result<Decimal, ItemError> {
        let group = account.group_id.trim();
        let lookup = |group: &str| -> Result<Option<DisclosureGroup>, ItemError> {
            Ok(self
                .store
                .disclosure_group(group, &balance.type_code, balance.category_code)?)
        };

        match lookup(group)? {
            Some(found) => Ok(found.interest_rate),
            None => lookup(DEFAULT_GROUP)?
                .map(|d| d.interest_rate)
                .ok_or_else(|| {
                    // Not a bad record: the rate table itself is incomplete.
                    ItemError::unclassified(format!(
                        "no interest rate for {}",
                        DisclosureGroup::key(DEFAULT_GROUP, &balance.type_code, balance.category_code)
                    ))
                }),
        }
    }

    fn timestamp(&self) -> NaiveDateTime {
        self.processing_date.and_time(chrono::NaiveTime::MIN)
    }

    /// The posting that closes `accrual`. Pure apart from store reads; the
    /// caller advances the state only once this succeeded.
    fn posting(&self, accrual: &Accrual, sequence: u64) -> Result<InterestPosting, ItemError> {
        if accrual.total.is_zero() {
            return Ok(InterestPosting {
                account_id: accrual.account_id,
                transaction: None,
            });
        }
        let card_number = self
            .store
            .xref_by_account(accrual.account_id)?
            .map(|x| x.card_number)
            .unwrap_or_default();

        Ok(InterestPosting {
            account_id: accrual.account_id,
            transaction: Some(Transaction {
                id: format!("{}{sequence:06}", self.processing_date.format("%Y-%m-%d")),
                type_code: INTEREST_TYPE.into(),
                category_code: INTEREST_CATEGORY,
                source: "System".into(),
                description: format!("Int. for a/c {}", account_key(accrual.account_id)),
                amount: accrual.total,
                merchant_id: 0,
                merchant_name: String::new(),
                merchant_city: String::new(),
                merchant_zip: String::new(),
                card_number,
                origin_ts: Some(self.timestamp()),
                processed_ts: Some(self.timestamp()),
            }),
        })
    }

    fn close(&mut self, accrual: &Accrual) -> Result<InterestPosting, ItemError> {
        let sequence = self.state.posted + 1;
        let posting = self.posting(accrual, sequence)?;
        if posting.transaction.is_some() {
            self.state.posted = sequence;
        }
        debug!(
            account = %account_key(accrual.account_id),
            interest = %accrual.total,
            "account interest closed"
        );
        Ok(posting)
    }
}

impl ItemProcessor for InterestProcessor {
    type In = CategoryBalance;
    type Out = InterestPosting;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.state = context
            .get(STATE_KEY)
            .map_err(|e| ItemError::unclassified(e.to_string()))?
            .unwrap_or_default();
        Ok(())
    }

    fn process(&mut self, balance: &CategoryBalance) -> Result<Option<InterestPosting>, ItemError> {
        let account = self.store.account(balance.account_id)?.ok_or_else(|| {
            ItemError::constraint("ACCOUNT RECORD NOT FOUND")
                .with_key(CategoryBalance::key(balance.account_id, &balance.type_code, balance.category_code))
        })?;
        let rate = self.rate(&account, balance)?;
        let interest = monthly_interest(&balance.balance, &rate)
            .map_err(|e| ItemError::from(e).with_key(account_key(account.id)))?;

        let (closed, total) = match &self.state.current {
            Some(current) if current.account_id == account.id => (None, current.total),
            Some(previous) => (Some(previous.clone()), Decimal::zero(DecimalSpec::AMOUNT)),
            None => (None, Decimal::zero(DecimalSpec::AMOUNT)),
        };
        let total = total
            .add(&interest)
            .map_err(|e| ItemError::from(e).with_key(account_key(account.id)))?;

        let output = match closed {
            Some(previous) => Some(self.close(&previous)?),
            None => None,
        };
        self.state.current = Some(Accrual {
            account_id: account.id,
            total,
        });
        Ok(output)
    }

    fn drain(&mut self) -> Result<Vec<InterestPosting>, ItemError> {
        let Some(last) = self.state.current.clone() else {
            return Ok(Vec::new());
        };
        let posting = self.close(&last)?;
        self.state.current = None;
        Ok(vec![posting])
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context
            .put(STATE_KEY, &self.state)
            .map_err(|e| ItemError::unclassified(e.to_string()))
    }
}

pub struct InterestWriter {
    store: Arc<dyn CardStore>,
    staged: Vec<InterestPosting>,
}

impl InterestWriter {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self {
            store,
            staged: Vec::new(),
        }
    }
}

impl ItemWriter for InterestWriter {
    type Item = InterestPosting;

    fn write(&mut self, items: &[InterestPosting]) -> Result<(), ItemError> {
        self.staged.extend_from_slice(items);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ItemError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let posted = self.store.post_interest(&self.staged)?;
        debug!(accounts = self.staged.len(), posted, "posted interest");
        self.staged.clear();
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}
