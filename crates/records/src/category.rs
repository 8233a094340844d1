//! Transaction category balances and disclosure (interest rate) groups.

use std::sync::LazyLock;

use nightbatch_core::{Decimal, DecimalSpec};
use serde::{Deserialize, Serialize};

use crate::account::account_key;
use crate::codec::{DecodedRecord, FieldValue, FixedWidthRecord};
use crate::error::MalformedRecordError;
use crate::layout::RecordLayout;

static BALANCE_LAYOUT: LazyLock<RecordLayout> = LazyLock::new(|| {
    RecordLayout::builder("category_balance")
        .zoned("account_id", DecimalSpec::whole(11))
        .alphanumeric("type_code", 2)
        .zoned("category_code", DecimalSpec::whole(4))
        .signed_zoned("balance", DecimalSpec::AMOUNT)
        .filler(22)
        .build()
});

static GROUP_LAYOUT: LazyLock<RecordLayout> = LazyLock::new(|| {
    RecordLayout::builder("disclosure_group")
        .alphanumeric("group_id", 10)
        .alphanumeric("type_code", 2)
        .zoned("category_code", DecimalSpec::whole(4))
        .signed_zoned("interest_rate", DecimalSpec::RATE)
        .filler(28)
        .build()
});

/// Group used when an account's own group has no rate for a category.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Running balance of one account in one transaction category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBalance {
    pub account_id: u64,
    pub type_code: String,
    pub category_code: u16,
    pub balance: Decimal,
}

impl CategoryBalance {
    /// Upsert key: `account/type/category`.
    pub fn key(account_id: u64, type_code: &str, category_code: u16) -> String {
        format!("{}/{}/{:04}", account_key(account_id), type_code, category_code)
    }
}

impl FixedWidthRecord for CategoryBalance {
    fn layout() -> &'static RecordLayout {
        &BALANCE_LAYOUT
    }

    fn from_record(r: &DecodedRecord) -> Result<Self, MalformedRecordError> {
        Ok(Self {
            account_id: r.integer("account_id")?,
            type_code: r.text("type_code")?.to_string(),
            category_code: r.integer("category_code")? as u16,
            balance: r.number("balance")?,
        })
    }

    fn to_record(&self) -> DecodedRecord {
        DecodedRecord::new(BALANCE_LAYOUT.name())
            .with("account_id", FieldValue::integer(self.account_id))
            .with("type_code", FieldValue::text(&self.type_code))
            .with("category_code", FieldValue::integer(self.category_code as u64))
            .with("balance", FieldValue::Number(self.balance))
    }

    fn natural_key(&self) -> String {
        Self::key(self.account_id, &self.type_code, self.category_code)
    }
}

/// Annual interest rate (percent) for a group, type and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureGroup {
    pub group_id: String,
    pub type_code: String,
    pub category_code: u16,
    pub interest_rate: Decimal,
}

impl DisclosureGroup {
    pub fn key(group_id: &str, type_code: &str, category_code: u16) -> String {
        format!("{group_id}/{type_code}/{category_code:04}")
    }
}

impl FixedWidthRecord for DisclosureGroup {
    fn layout() -> &'static RecordLayout {
        &GROUP_LAYOUT
    }

    fn from_record(r: &DecodedRecord) -> Result<Self, MalformedRecordError> {
        Ok(Self {
            group_id: r.text("group_id")?.to_string(),
            type_code: r.text("type_code")?.to_string(),
            category_code: r.integer("category_code")? as u16,
            interest_rate: r.number("interest_rate")?,
        })
    }

    fn to_record(&self) -> DecodedRecord {
        DecodedRecord::new(GROUP_LAYOUT.name())
            .with("group_id", FieldValue::text(&self.group_id))
            .with("type_code", FieldValue::text(&self.type_code))
            .with("category_code", FieldValue::integer(self.category_code as u64))
            .with("interest_rate", FieldValue::Number(self.interest_rate))
    }

    fn natural_key(&self) -> String {
        Self::key(&self.group_id, &self.type_code, self.category_code)
    }
}
