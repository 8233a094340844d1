//! Account master record (300 bytes).

use std::sync::LazyLock;

use chrono::NaiveDate;
use nightbatch_core::{Decimal, DecimalError, DecimalSpec};
use serde::{Deserialize, Serialize};

use crate::codec::{DecodedRecord, FieldValue, FixedWidthRecord};
use crate::error::MalformedRecordError;
use crate::layout::{DateFormat, RecordLayout};

static LAYOUT: LazyLock<RecordLayout> = LazyLock::new(|| {
    RecordLayout::builder("account")
        .zoned("id", DecimalSpec::whole(11))
        .alphanumeric("active", 1)
        .signed_zoned("current_balance", DecimalSpec::BALANCE)
        .signed_zoned("credit_limit", DecimalSpec::BALANCE)
        .signed_zoned("cash_credit_limit", DecimalSpec::BALANCE)
        .date("open_date", DateFormat::Iso)
        .date("expiration_date", DateFormat::Iso)
        .date("reissue_date", DateFormat::Iso)
        .signed_zoned("cycle_credit", DecimalSpec::BALANCE)
        .signed_zoned("cycle_debit", DecimalSpec::BALANCE)
        .alphanumeric("zip", 10)
        .alphanumeric("group_id", 10)
        .filler(178)
        .build()
});

/// Eleven-digit account key as it appears in every layout.
pub fn account_key(id: u64) -> String {
    format!("{id:011}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub active: bool,
    pub current_balance: Decimal,
    pub credit_limit: Decimal,
    pub cash_credit_limit: Decimal,
    pub open_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub reissue_date: Option<NaiveDate>,
    pub cycle_credit: Decimal,
    pub cycle_debit: Decimal,
    pub zip: String,
    pub group_id: String,
}

impl Account {
    /// Apply a posted amount: credits (positive) and debits (negative) move
    /// both the balance and the matching cycle total.
    pub fn apply(&mut self, amount: &Decimal) -> Result<(), DecimalError> {
        let balance = self.current_balance.add(amount)?;
        if amount.is_negative() {
            self.cycle_debit = self.cycle_debit.add(amount)?;
        } else {
            self.cycle_credit = self.cycle_credit.add(amount)?;
        }
        self.current_balance = balance;
        Ok(())
    }

    /// Remaining credit after applying `amount` to the current cycle.
    pub fn projected_cycle_balance(&self, amount: &Decimal) -> Result<Decimal, DecimalError> {
        self.cycle_credit.sub(&self.cycle_debit)?.add(amount)
    }
}

impl FixedWidthRecord for Account {
    fn layout() -> &'static RecordLayout {
        &LAYOUT
    }

    fn from_record(r: &DecodedRecord) -> Result<Self, MalformedRecordError> {
        Ok(Self {
            id: r.integer("id")?,
            active: r.flag("active")?,
            current_balance: r.number("current_balance")?,
            credit_limit: r.number("credit_limit")?,
            cash_credit_limit: r.number("cash_credit_limit")?,
            open_date: r.date("open_date")?,
            expiration_date: r.date("expiration_date")?,
            reissue_date: r.date("reissue_date")?,
            cycle_credit: r.number("cycle_credit")?,
            cycle_debit: r.number("cycle_debit")?,
            zip: r.text("zip")?.to_string(),
            group_id: r.text("group_id")?.to_string(),
        })
    }

    fn to_record(&self) -> DecodedRecord {
        DecodedRecord::new(LAYOUT.name())
            .with("id", FieldValue::integer(self.id))
            .with("active", FieldValue::flag(self.active))
            .with("current_balance", FieldValue::Number(self.current_balance))
            .with("credit_limit", FieldValue::Number(self.credit_limit))
            .with("cash_credit_limit", FieldValue::Number(self.cash_credit_limit))
            .with("open_date", FieldValue::date(self.open_date))
            .with("expiration_date", FieldValue::date(self.expiration_date))
            .with("reissue_date", FieldValue::date(self.reissue_date))
            .with("cycle_credit", FieldValue::Number(self.cycle_credit))
            .with("cycle_debit", FieldValue::Number(self.cycle_debit))
            .with("zip", FieldValue::text(&self.zip))
            .with("group_id", FieldValue::text(&self.group_id))
    }

    fn natural_key(&self) -> String {
        account_key(self.id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn balance(s: &str) -> Decimal {
        Decimal::parse(s, DecimalSpec::BALANCE).unwrap()
    }

    pub(crate) fn sample() -> Account {
        Account {
            id: 1,
            active: true,
            current_balance: balance("1500.00"),
            credit_limit: balance("5000.00"),
            cash_credit_limit: balance("1000.00"),
            open_date: NaiveDate::from_ymd_opt(2019, 6, 1),
            expiration_date: NaiveDate::from_ymd_opt(2027, 6, 30),
            reissue_date: None,
            cycle_credit: balance("200.00"),
            cycle_debit: balance("-50.25"),
            zip: "12345".into(),
            group_id: "GOLD".into(),
        }
    }

    #[test]
    fn layout_is_300_bytes() {
        assert_eq!(Account::layout().length(), 300);
    }

    #[test]
    fn round_trip_with_blank_reissue_date() {
        let account = sample();
        let line = account.encode().unwrap();
        assert_eq!(&line[0..11], b"00000000001");
        assert_eq!(&line[11..12], b"Y");
        assert_eq!(Account::decode(&line).unwrap(), account);
    }

    #[test]
    fn apply_routes_by_sign() {
        let mut account = sample();
        account.apply(&Decimal::parse("-10.00", DecimalSpec::AMOUNT).unwrap()).unwrap();
        account.apply(&Decimal::parse("25.50", DecimalSpec::AMOUNT).unwrap()).unwrap();

        assert_eq!(account.current_balance, balance("1515.50"));
        assert_eq!(account.cycle_debit, balance("-60.25"));
        assert_eq!(account.cycle_credit, balance("225.50"));
    }

    #[test]
    fn invalid_active_flag_is_malformed() {
        let mut line = sample().encode().unwrap();
        line[11] = b'?';
        let err = Account::decode(&line).unwrap_err();
        assert_eq!(err.field, "active");
    }

    #[test]
    fn natural_key_is_zero_padded() {
        assert_eq!(sample().natural_key(), "00000000001");
    }
}
