//! Card master (150 bytes) and card cross-reference (50 bytes).

use std::sync::LazyLock;

use chrono::NaiveDate;
use nightbatch_core::DecimalSpec;
use serde::{Deserialize, Serialize};

use crate::account::account_key;
use crate::codec::{DecodedRecord, FieldValue, FixedWidthRecord};
use crate::error::MalformedRecordError;
use crate::layout::{DateFormat, RecordLayout};

static CARD_LAYOUT: LazyLock<RecordLayout> = LazyLock::new(|| {
    RecordLayout::builder("card")
        .alphanumeric("number", 16)
        .zoned("account_id", DecimalSpec::whole(11))
        .zoned("cvv", DecimalSpec::whole(3))
        .alphanumeric("embossed_name", 50)
        .date("expiration_date", DateFormat::Iso)
        .alphanumeric("active", 1)
        .filler(59)
        .build()
});

static XREF_LAYOUT: LazyLock<RecordLayout> = LazyLock::new(|| {
    RecordLayout::builder("card_xref")
        .alphanumeric("card_number", 16)
        .zoned("customer_id", DecimalSpec::whole(9))
        .zoned("account_id", DecimalSpec::whole(11))
        .filler(14)
        .build()
});

/// Mask all but the last four characters of a card number.
pub fn mask_card_number(number: &str) -> String {
    let visible = number.len().saturating_sub(4);
    number
        .chars()
        .enumerate()
        .map(|(i, c)| if i < visible { '*' } else { c })
        .collect()
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub number: String,
    pub account_id: u64,
    pub cvv: u16,
    pub embossed_name: String,
    pub expiration_date: Option<NaiveDate>,
    pub active: bool,
}

// Hand-written so the number and CVV never reach a log line.
impl core::fmt::Debug for Card {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Card")
            .field("number", &mask_card_number(&self.number))
            .field("account_id", &self.account_id)
            .field("embossed_name", &self.embossed_name)
            .field("expiration_date", &self.expiration_date)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl FixedWidthRecord for Card {
    fn layout() -> &'static RecordLayout {
        &CARD_LAYOUT
    }

    fn from_record(r: &DecodedRecord) -> Result<Self, MalformedRecordError> {
        Ok(Self {
            number: r.text("number")?.to_string(),
            account_id: r.integer("account_id")?,
            cvv: r.integer("cvv")? as u16,
            embossed_name: r.text("embossed_name")?.to_string(),
            expiration_date: r.date("expiration_date")?,
            active: r.flag("active")?,
        })
    }

    fn to_record(&self) -> DecodedRecord {
        DecodedRecord::new(CARD_LAYOUT.name())
            .with("number", FieldValue::text(&self.number))
            .with("account_id", FieldValue::integer(self.account_id))
            .with("cvv", FieldValue::integer(self.cvv as u64))
            .with("embossed_name", FieldValue::text(&self.embossed_name))
            .with("expiration_date", FieldValue::date(self.expiration_date))
            .with("active", FieldValue::flag(self.active))
    }

    fn natural_key(&self) -> String {
        mask_card_number(&self.number)
    }
}

/// Links a card number to its customer and account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardXref {
    pub card_number: String,
    pub customer_id: u64,
    pub account_id: u64,
}

impl core::fmt::Debug for CardXref {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CardXref")
            .field("card_number", &mask_card_number(&self.card_number))
            .field("customer_id", &self.customer_id)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl FixedWidthRecord for CardXref {
    fn layout() -> &'static RecordLayout {
        &XREF_LAYOUT
    }

    fn from_record(r: &DecodedRecord) -> Result<Self, MalformedRecordError> {
        Ok(Self {
            card_number: r.text("card_number")?.to_string(),
            customer_id: r.integer("customer_id")?,
            account_id: r.integer("account_id")?,
        })
    }

    fn to_record(&self) -> DecodedRecord {
        DecodedRecord::new(XREF_LAYOUT.name())
            .with("card_number", FieldValue::text(&self.card_number))
            .with("customer_id", FieldValue::integer(self.customer_id))
            .with("account_id", FieldValue::integer(self.account_id))
    }

    fn natural_key(&self) -> String {
        format!("{}/{}", mask_card_number(&self.card_number), account_key(self.account_id))
    }
}
