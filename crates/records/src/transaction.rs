//! Daily transaction record (350 bytes).

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use nightbatch_core::{Decimal, DecimalSpec};
use serde::{Deserialize, Serialize};

use crate::card::mask_card_number;
use crate::codec::{DecodedRecord, FieldValue, FixedWidthRecord};
use crate::error::MalformedRecordError;
use crate::layout::RecordLayout;

static LAYOUT: LazyLock<RecordLayout> = LazyLock::new(|| {
    RecordLayout::builder("transaction")
        .alphanumeric("id", 16)
        .alphanumeric("type_code", 2)
        .zoned("category_code", DecimalSpec::whole(4))
        .alphanumeric("source", 10)
        .alphanumeric("description", 100)
        .signed_zoned("amount", DecimalSpec::AMOUNT)
        .zoned("merchant_id", DecimalSpec::whole(9))
        .alphanumeric("merchant_name", 50)
        .alphanumeric("merchant_city", 50)
        .alphanumeric("merchant_zip", 10)
        .alphanumeric("card_number", 16)
        .timestamp("origin_ts")
        .timestamp("processed_ts")
        .filler(20)
        .build()
});

/// One card transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub type_code: String,
    pub category_code: u16,
    pub source: String,
    pub description: String,
    pub amount: Decimal,
    pub merchant_id: u64,
    pub merchant_name: String,
    pub merchant_city: String,
    pub merchant_zip: String,
    pub card_number: String,
    pub origin_ts: Option<NaiveDateTime>,
    pub processed_ts: Option<NaiveDateTime>,
}

impl FixedWidthRecord for Transaction {
    fn layout() -> &'static RecordLayout {
        &LAYOUT
    }

    fn from_record(r: &DecodedRecord) -> Result<Self, MalformedRecordError> {
        Ok(Self {
            id: r.text("id")?.to_string(),
            type_code: r.text("type_code")?.to_string(),
            category_code: r.integer("category_code")? as u16,
            source: r.text("source")?.to_string(),
            description: r.text("description")?.to_string(),
            amount: r.number("amount")?,
            merchant_id: r.integer("merchant_id")?,
            merchant_name: r.text("merchant_name")?.to_string(),
            merchant_city: r.text("merchant_city")?.to_string(),
            merchant_zip: r.text("merchant_zip")?.to_string(),
            card_number: r.text("card_number")?.to_string(),
            origin_ts: r.timestamp("origin_ts")?,
            processed_ts: r.timestamp("processed_ts")?,
        })
    }

    fn to_record(&self) -> DecodedRecord {
        DecodedRecord::new(LAYOUT.name())
            .with("id", FieldValue::text(&self.id))
            .with("type_code", FieldValue::text(&self.type_code))
            .with("category_code", FieldValue::integer(self.category_code as u64))
            .with("source", FieldValue::text(&self.source))
            .with("description", FieldValue::text(&self.description))
            .with("amount", FieldValue::Number(self.amount))
            .with("merchant_id", FieldValue::integer(self.merchant_id))
            .with("merchant_name", FieldValue::text(&self.merchant_name))
            .with("merchant_city", FieldValue::text(&self.merchant_city))
            .with("merchant_zip", FieldValue::text(&self.merchant_zip))
            .with("card_number", FieldValue::text(&self.card_number))
            .with("origin_ts", FieldValue::timestamp(self.origin_ts))
            .with("processed_ts", FieldValue::timestamp(self.processed_ts))
    }

    fn natural_key(&self) -> String {
        self.id.clone()
    }
}

impl Transaction {
    /// Card number safe for logs and reports.
    pub fn masked_card(&self) -> String {
        mask_card_number(&self.card_number)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn sample() -> Transaction {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 14)
            .and_then(|d| d.and_hms_micro_opt(9, 30, 0, 250))
            .unwrap();
        Transaction {
            id: "0000000000000042".into(),
            type_code: "01".into(),
            category_code: 1,
            source: "POS TERM".into(),
            description: "Purchase at corner store".into(),
            amount: Decimal::parse("-57.31", DecimalSpec::AMOUNT).unwrap(),
            merchant_id: 800_000_123,
            merchant_name: "Corner Store".into(),
            merchant_city: "Springfield".into(),
            merchant_zip: "12345".into(),
            card_number: "4111111111111111".into(),
            origin_ts: Some(ts),
            processed_ts: None,
        }
    }

    #[test]
    fn layout_is_350_bytes() {
        assert_eq!(Transaction::layout().length(), 350);
        assert_eq!(Transaction::layout().field("amount").unwrap().offset, 132);
    }

    #[test]
    fn encode_decode_round_trip() {
        let txn = sample();
        let line = txn.encode().unwrap();
        assert_eq!(line.len(), 350);
        // -57.31 -> 0000000573J
        assert_eq!(&line[132..143], b"0000000573J");
        assert_eq!(Transaction::decode(&line).unwrap(), txn);
    }

    #[test]
    fn malformed_amount_names_the_field() {
        let mut line = sample().encode().unwrap();
        line[135] = b'x';
        let err = Transaction::decode(&line).unwrap_err();
        assert_eq!(err.field, "amount");
        assert_eq!(err.offset, 132);
        assert!(!err.to_string().contains("4111111111111111"));
    }

    #[test]
    fn masked_card_keeps_last_four() {
        assert_eq!(sample().masked_card(), "************1111");
    }
}
