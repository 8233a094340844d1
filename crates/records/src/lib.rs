//! Fixed-width record codec (legacy sequential file formats).
//!
//! Pure: decodes byte lines into typed records and back, no IO. A layout is a
//! list of fields at fixed byte offsets; every numeric field goes through
//! [`nightbatch_core::Decimal`].

pub mod account;
pub mod card;
pub mod category;
pub mod codec;
pub mod error;
pub mod layout;
pub mod transaction;

pub use account::{Account, account_key};
pub use card::{Card, CardXref, mask_card_number};
pub use category::{CategoryBalance, DEFAULT_GROUP, DisclosureGroup};
pub use codec::{DecodedRecord, FieldValue, FixedWidthRecord, decode, encode};
pub use error::MalformedRecordError;
pub use layout::{DateFormat, FieldSpec, FieldType, RecordLayout, RecordLayoutBuilder};
pub use transaction::Transaction;
