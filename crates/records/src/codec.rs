//! Decoding and encoding of fixed-width lines.
//!
//! Values are encoded in canonical form: signed zoned fields carry an
//! overpunched last digit, packed fields use `C`/`D` sign nibbles (`F` when
//! unsigned), text is UTF-8 right-padded with spaces, fillers are spaces.
//!
//! A decoded line remembers the bytes of every field it held in another
//! valid form (a plain last digit in a signed field, a negative zero, an `F`
//! nibble on a signed packed field, non-blank filler), so re-encoding it
//! reproduces the line byte for byte. Replacing a field's value with
//! [`DecodedRecord::with`] drops its remembered bytes.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use nightbatch_core::{Decimal, DecimalSpec};

use crate::error::MalformedRecordError;
use crate::layout::{DateFormat, FieldSpec, FieldType, RecordLayout, TIMESTAMP_WIDTH};

/// Decoded value of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// A date or timestamp field holding only spaces.
    Blank,
}

/// A decoded line: field values keyed by field name, in layout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    layout: &'static str,
    values: Vec<(&'static str, FieldValue)>,
    /// Source bytes of fields whose canonical encoding differs, by offset.
    verbatim: Vec<Verbatim>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Verbatim {
    field: &'static str,
    offset: usize,
    bytes: Vec<u8>,
}

impl DecodedRecord {
    pub fn new(layout: &'static str) -> Self {
        Self {
            layout,
            values: Vec::new(),
            verbatim: Vec::new(),
        }
    }

    pub fn layout(&self) -> &'static str {
        self.layout
    }

    /// Set (or replace) a field value.
    pub fn with(mut self, name: &'static str, value: FieldValue) -> Self {
        self.verbatim.retain(|v| v.field != name);
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn values(&self) -> &[(&'static str, FieldValue)] {
        &self.values
    }

    /// Whether re-encoding reproduces some field in its source form rather
    /// than the canonical one.
    pub fn is_canonical(&self) -> bool {
        self.verbatim.is_empty()
    }

    fn keep_verbatim(&mut self, field: &FieldSpec, bytes: &[u8]) {
        self.verbatim.push(Verbatim {
            field: field.name,
            offset: field.offset,
            bytes: bytes.to_vec(),
        });
    }

    fn verbatim_at(&self, field: &FieldSpec) -> Option<&[u8]> {
        self.verbatim
            .iter()
            .find(|v| v.offset == field.offset && v.bytes.len() == field.length)
            .map(|v| v.bytes.as_slice())
    }

    fn missing(&self, name: &str, expected: &str) -> MalformedRecordError {
        MalformedRecordError::new(self.layout, name, 0, format!("expected {expected} value"))
    }

    pub fn text(&self, name: &str) -> Result<&str, MalformedRecordError> {
        match self.get(name) {
            Some(FieldValue::Text(s)) => Ok(s),
            _ => Err(self.missing(name, "text")),
        }
    }

    pub fn number(&self, name: &str) -> Result<Decimal, MalformedRecordError> {
        match self.get(name) {
            Some(FieldValue::Number(d)) => Ok(*d),
            _ => Err(self.missing(name, "numeric")),
        }
    }

    /// A scale-0, non-negative numeric field as an integer.
    pub fn integer(&self, name: &str) -> Result<u64, MalformedRecordError> {
        let d = self.number(name)?;
        if d.scale() != 0 || d.is_negative() {
            return Err(self.missing(name, "unsigned integer"));
        }
        u64::try_from(d.units()).map_err(|_| self.missing(name, "unsigned integer"))
    }

    pub fn date(&self, name: &str) -> Result<Option<NaiveDate>, MalformedRecordError> {
        match self.get(name) {
            Some(FieldValue::Date(d)) => Ok(Some(*d)),
            Some(FieldValue::Blank) => Ok(None),
            _ => Err(self.missing(name, "date")),
        }
    }

    pub fn timestamp(&self, name: &str) -> Result<Option<NaiveDateTime>, MalformedRecordError> {
        match self.get(name) {
            Some(FieldValue::Timestamp(ts)) => Ok(Some(*ts)),
            Some(FieldValue::Blank) => Ok(None),
            _ => Err(self.missing(name, "timestamp")),
        }
    }

    /// A one-character `Y`/`N` flag.
    pub fn flag(&self, name: &str) -> Result<bool, MalformedRecordError> {
        match self.text(name)? {
            "Y" => Ok(true),
            "N" => Ok(false),
            _ => Err(self.missing(name, "Y/N flag")),
        }
    }
}

/// Helpers for building encodable values from typed fields.
impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn flag(value: bool) -> Self {
        FieldValue::Text(if value { "Y" } else { "N" }.to_string())
    }

    pub fn integer(value: u64) -> Self {
        match Decimal::from_units(value as i128, DecimalSpec::INTEGER) {
            Ok(d) => FieldValue::Number(d),
            // Wider than any field; encode reports the type mismatch.
            Err(_) => FieldValue::Text(value.to_string()),
        }
    }

    pub fn date(value: Option<NaiveDate>) -> Self {
        value.map_or(FieldValue::Blank, FieldValue::Date)
    }

    pub fn timestamp(value: Option<NaiveDateTime>) -> Self {
        value.map_or(FieldValue::Blank, FieldValue::Timestamp)
    }
}

/// A typed record with a fixed-width layout.
pub trait FixedWidthRecord: Sized {
    fn layout() -> &'static RecordLayout;

    fn from_record(record: &DecodedRecord) -> Result<Self, MalformedRecordError>;

    fn to_record(&self) -> DecodedRecord;

    /// Business key used for upserts and in failure reports.
    fn natural_key(&self) -> String;

    fn decode(line: &[u8]) -> Result<Self, MalformedRecordError> {
        Self::from_record(&decode(Self::layout(), line)?)
    }

    fn encode(&self) -> Result<Vec<u8>, MalformedRecordError> {
        encode(Self::layout(), &self.to_record())
    }
}

/// Decode one line (without line terminator) against a layout.
pub fn decode(layout: &RecordLayout, line: &[u8]) -> Result<DecodedRecord, MalformedRecordError> {
    let mut record = DecodedRecord::new(layout.name());

    for field in layout.fields() {
        let end = field.offset + field.length;
        let bytes = line.get(field.offset..end).ok_or_else(|| {
            err(layout, field, format!("line ends at byte {}", line.len()))
        })?;

        let value = match field.kind {
            FieldType::Filler => {
                if bytes.iter().any(|b| *b != b' ') {
                    record.keep_verbatim(field, bytes);
                }
                continue;
            }
            FieldType::Alphanumeric => decode_text(layout, field, bytes)?,
            FieldType::Zoned { spec, signed } => decode_zoned(layout, field, bytes, spec, signed)?,
            FieldType::Packed { spec, signed } => decode_packed(layout, field, bytes, spec, signed)?,
            FieldType::Date(format) => decode_date(layout, field, bytes, format)?,
            FieldType::Timestamp => decode_timestamp(layout, field, bytes)?,
        };
        if field.kind != FieldType::Alphanumeric
            && encode_field(layout, field, &value).map_or(true, |canonical| canonical != bytes)
        {
            record.keep_verbatim(field, bytes);
        }
        record.values.push((field.name, value));
    }

    if line.len() > layout.length() {
        return Err(MalformedRecordError::new(
            layout.name(),
            "<end of record>",
            layout.length(),
            format!("{} trailing bytes", line.len() - layout.length()),
        ));
    }

    Ok(record)
}

/// Encode a record into exactly `layout.length()` bytes.
pub fn encode(layout: &RecordLayout, record: &DecodedRecord) -> Result<Vec<u8>, MalformedRecordError> {
    let mut out = Vec::with_capacity(layout.length());

    for field in layout.fields() {
        if let Some(bytes) = record.verbatim_at(field) {
            out.extend_from_slice(bytes);
            continue;
        }
        if field.kind == FieldType::Filler {
            out.resize(out.len() + field.length, b' ');
            continue;
        }

        let value = record
            .get(field.name)
            .ok_or_else(|| err(layout, field, "no value to encode"))?;
        let bytes = encode_field(layout, field, value)?;
        debug_assert_eq!(bytes.len(), field.length);
        out.extend_from_slice(&bytes);
    }

    Ok(out)
}

/// Canonical encoding of one field's value.
fn encode_field(
    layout: &RecordLayout,
    field: &FieldSpec,
    value: &FieldValue,
) -> Result<Vec<u8>, MalformedRecordError> {
    let bytes = match (field.kind, value) {
        (FieldType::Alphanumeric, FieldValue::Text(s)) => encode_text(layout, field, s)?,
        (FieldType::Zoned { spec, signed }, FieldValue::Number(d)) => {
            encode_zoned(layout, field, d, spec, signed)?
        }
        (FieldType::Packed { spec, signed }, FieldValue::Number(d)) => {
            encode_packed(layout, field, d, spec, signed)?
        }
        (FieldType::Date(format), FieldValue::Date(d)) => encode_date(d, format).into_bytes(),
        (FieldType::Timestamp, FieldValue::Timestamp(ts)) => encode_timestamp(ts).into_bytes(),
        (FieldType::Date(_) | FieldType::Timestamp, FieldValue::Blank) => vec![b' '; field.length],
        _ => return Err(err(layout, field, "value type does not match field type")),
    };
    Ok(bytes)
}

fn err(layout: &RecordLayout, field: &FieldSpec, reason: impl Into<String>) -> MalformedRecordError {
    MalformedRecordError::new(layout.name(), field.name, field.offset, reason)
}

fn decode_text(
    layout: &RecordLayout,
    field: &FieldSpec,
    bytes: &[u8],
) -> Result<FieldValue, MalformedRecordError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| err(layout, field, format!("invalid UTF-8 at byte {}", e.valid_up_to())))?;
    Ok(FieldValue::Text(s.trim_end_matches(' ').to_string()))
}

fn encode_text(
    layout: &RecordLayout,
    field: &FieldSpec,
    s: &str,
) -> Result<Vec<u8>, MalformedRecordError> {
    // Widths are in bytes, as in the layout.
    if s.len() > field.length {
        return Err(err(
            layout,
            field,
            format!("{} bytes do not fit in {}", s.len(), field.length),
        ));
    }
    let mut bytes = s.as_bytes().to_vec();
    bytes.resize(field.length, b' ');
    Ok(bytes)
}

/// Overpunch characters for the last digit of a signed zoned field.
const POSITIVE_OVERPUNCH: &[u8; 10] = b"{ABCDEFGHI";
const NEGATIVE_OVERPUNCH: &[u8; 10] = b"}JKLMNOPQR";

fn decode_zoned(
    layout: &RecordLayout,
    field: &FieldSpec,
    bytes: &[u8],
    spec: DecimalSpec,
    signed: bool,
) -> Result<FieldValue, MalformedRecordError> {
    let (last, body) = bytes
        .split_last()
        .ok_or_else(|| err(layout, field, "empty numeric field"))?;

    let mut units: i128 = 0;
    for b in body {
        if !b.is_ascii_digit() {
            return Err(err(layout, field, "non-digit in zoned field"));
        }
        units = units * 10 + (b - b'0') as i128;
    }

    let (digit, negative) = if last.is_ascii_digit() {
        (last - b'0', false)
    } else if let (true, Some(pos)) = (signed, POSITIVE_OVERPUNCH.iter().position(|c| c == last)) {
        (pos as u8, false)
    } else if let (true, Some(pos)) = (signed, NEGATIVE_OVERPUNCH.iter().position(|c| c == last)) {
        (pos as u8, true)
    } else {
        return Err(err(layout, field, "invalid sign or digit in last position"));
    };
    units = units * 10 + digit as i128;

    let value = Decimal::from_units(if negative { -units } else { units }, spec)
        .map_err(|e| err(layout, field, e.to_string()))?;
    Ok(FieldValue::Number(value))
}

fn encode_zoned(
    layout: &RecordLayout,
    field: &FieldSpec,
    value: &Decimal,
    spec: DecimalSpec,
    signed: bool,
) -> Result<Vec<u8>, MalformedRecordError> {
    let units = field_units(layout, field, value, spec)?;
    if units < 0 && !signed {
        return Err(err(layout, field, "negative value in unsigned field"));
    }

    let mut bytes = format!("{:0width$}", units.unsigned_abs(), width = field.length).into_bytes();
    if signed {
        if let Some(last) = bytes.last_mut() {
            let digit = (*last - b'0') as usize;
            *last = if units < 0 {
                NEGATIVE_OVERPUNCH[digit]
            } else {
                POSITIVE_OVERPUNCH[digit]
            };
        }
    }
    Ok(bytes)
}

fn decode_packed(
    layout: &RecordLayout,
    field: &FieldSpec,
    bytes: &[u8],
    spec: DecimalSpec,
    signed: bool,
) -> Result<FieldValue, MalformedRecordError> {
    let mut units: i128 = 0;
    let mut negative = false;

    for (i, byte) in bytes.iter().enumerate() {
        let high = byte >> 4;
        let low = byte & 0x0F;
        if high > 9 {
            return Err(err(layout, field, "invalid packed digit nibble"));
        }
        units = units * 10 + high as i128;

        if i + 1 < bytes.len() {
            if low > 9 {
                return Err(err(layout, field, "invalid packed digit nibble"));
            }
            units = units * 10 + low as i128;
        } else {
            negative = match (low, signed) {
                (0x0C, true) | (0x0F, _) => false,
                (0x0D, true) => true,
                _ => return Err(err(layout, field, "invalid packed sign nibble")),
            };
        }
    }

    let value = Decimal::from_units(if negative { -units } else { units }, spec)
        .map_err(|e| err(layout, field, e.to_string()))?;
    Ok(FieldValue::Number(value))
}

fn encode_packed(
    layout: &RecordLayout,
    field: &FieldSpec,
    value: &Decimal,
    spec: DecimalSpec,
    signed: bool,
) -> Result<Vec<u8>, MalformedRecordError> {
    let units = field_units(layout, field, value, spec)?;
    if units < 0 && !signed {
        return Err(err(layout, field, "negative value in unsigned field"));
    }

    let digits = format!("{:0width$}", units.unsigned_abs(), width = field.length * 2 - 1);
    let sign = match (signed, units < 0) {
        (false, _) => 0x0F,
        (true, false) => 0x0C,
        (true, true) => 0x0D,
    };

    let mut nibbles: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
    nibbles.push(sign);
    Ok(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// The value's units at the field's scale; never rounds.
fn field_units(
    layout: &RecordLayout,
    field: &FieldSpec,
    value: &Decimal,
    spec: DecimalSpec,
) -> Result<i128, MalformedRecordError> {
    let zero = Decimal::zero(spec);
    zero.add(value)
        .map(|d| d.units())
        .map_err(|e| err(layout, field, e.to_string()))
}

fn parse_digits(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| acc * 10 + (b - b'0') as u32))
}

fn parse_date(bytes: &[u8], format: DateFormat) -> Option<NaiveDate> {
    let (y, m, d) = match format {
        DateFormat::Compact => (&bytes[0..4], &bytes[4..6], &bytes[6..8]),
        DateFormat::Iso => {
            if bytes[4] != b'-' || bytes[7] != b'-' {
                return None;
            }
            (&bytes[0..4], &bytes[5..7], &bytes[8..10])
        }
    };
    NaiveDate::from_ymd_opt(parse_digits(y)? as i32, parse_digits(m)?, parse_digits(d)?)
}

fn decode_date(
    layout: &RecordLayout,
    field: &FieldSpec,
    bytes: &[u8],
    format: DateFormat,
) -> Result<FieldValue, MalformedRecordError> {
    if bytes.iter().all(|b| *b == b' ') {
        return Ok(FieldValue::Blank);
    }
    parse_date(bytes, format)
        .map(FieldValue::Date)
        .ok_or_else(|| err(layout, field, "invalid calendar date"))
}

fn encode_date(date: &NaiveDate, format: DateFormat) -> String {
    match format {
        DateFormat::Compact => format!("{:04}{:02}{:02}", date.year(), date.month(), date.day()),
        DateFormat::Iso => format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day()),
    }
}

fn decode_timestamp(
    layout: &RecordLayout,
    field: &FieldSpec,
    bytes: &[u8],
) -> Result<FieldValue, MalformedRecordError> {
    if bytes.iter().all(|b| *b == b' ') {
        return Ok(FieldValue::Blank);
    }

    let parsed = (|| {
        let date = parse_date(&bytes[0..10], DateFormat::Iso)?;
        if bytes[10] != b' ' || bytes[13] != b':' || bytes[16] != b':' || bytes[19] != b'.' {
            return None;
        }
        let time = NaiveTime::from_hms_micro_opt(
            parse_digits(&bytes[11..13])?,
            parse_digits(&bytes[14..16])?,
            parse_digits(&bytes[17..19])?,
            parse_digits(&bytes[20..TIMESTAMP_WIDTH])?,
        )?;
        Some(NaiveDateTime::new(date, time))
    })();

    parsed
        .map(FieldValue::Timestamp)
        .ok_or_else(|| err(layout, field, "invalid timestamp"))
}

fn encode_timestamp(ts: &NaiveDateTime) -> String {
    format!(
        "{} {:02}:{:02}:{:02}.{:06}",
        encode_date(&ts.date(), DateFormat::Iso),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.nanosecond() / 1_000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layout() -> RecordLayout {
        RecordLayout::builder("sample")
            .alphanumeric("name", 6)
            .zoned("count", DecimalSpec::new(4, 0).unwrap())
            .signed_zoned("amount", DecimalSpec::new(5, 2).unwrap())
            .packed("packed", DecimalSpec::new(5, 2).unwrap(), true)
            .date("compact", DateFormat::Compact)
            .date("iso", DateFormat::Iso)
            .timestamp("ts")
            .filler(2)
            .build()
    }

    fn sample_line() -> Vec<u8> {
        let mut line = Vec::new();
        line.extend_from_slice(b"ALICE ");
        line.extend_from_slice(b"0042");
        line.extend_from_slice(b"001234J"); // -123.41
        line.extend_from_slice(&[0x00, 0x12, 0x34, 0x5C]); // +123.45
        line.extend_from_slice(b"20240229");
        line.extend_from_slice(b"2024-03-01");
        line.extend_from_slice(b"2024-03-01 13:45:07.000120");
        line.extend_from_slice(b"  ");
        line
    }

    #[test]
    fn decodes_every_field_type() {
        let layout = sample_layout();
        let record = decode(&layout, &sample_line()).unwrap();

        assert_eq!(record.text("name").unwrap(), "ALICE");
        assert_eq!(record.integer("count").unwrap(), 42);
        assert_eq!(record.number("amount").unwrap().to_string(), "-123.41");
        assert_eq!(record.number("packed").unwrap().to_string(), "123.45");
        assert_eq!(
            record.date("compact").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        let ts = record.timestamp("ts").unwrap().unwrap();
        assert_eq!(ts.nanosecond(), 120_000);
    }

    #[test]
    fn encode_reproduces_the_original_bytes() {
        let layout = sample_layout();
        let line = sample_line();
        let record = decode(&layout, &line).unwrap();
        assert_eq!(encode(&layout, &record).unwrap(), line);
    }

    #[test]
    fn invalid_calendar_date_fails_instead_of_clamping() {
        let layout = sample_layout();
        let mut line = sample_line();
        line[21..29].copy_from_slice(b"20230229");

        let e = decode(&layout, &line).unwrap_err();
        assert_eq!(e.field, "compact");
        assert_eq!(e.offset, 21);
    }

    #[test]
    fn reports_the_first_invalid_field() {
        let layout = sample_layout();
        let mut line = sample_line();
        line[6] = b'X'; // count
        line[12] = b'!'; // amount, later field

        let e = decode(&layout, &line).unwrap_err();
        assert_eq!(e.field, "count");
        assert_eq!(e.offset, 6);
    }

    #[test]
    fn short_and_long_lines_are_malformed() {
        let layout = sample_layout();
        let line = sample_line();

        let short = decode(&layout, &line[..20]).unwrap_err();
        assert_eq!(short.field, "packed");

        let mut long = line.clone();
        long.push(b'Z');
        let e = decode(&layout, &long).unwrap_err();
        assert_eq!(e.offset, layout.length());
    }

    #[test]
    fn packed_sign_nibbles() {
        let layout = RecordLayout::builder("p")
            .packed("v", DecimalSpec::new(3, 0).unwrap(), true)
            .packed("u", DecimalSpec::new(3, 0).unwrap(), false)
            .build();

        let record = decode(&layout, &[0x12, 0x3D, 0x45, 0x6F]).unwrap();
        assert_eq!(record.number("v").unwrap().to_string(), "-123");
        assert_eq!(record.number("u").unwrap().to_string(), "456");

        assert!(decode(&layout, &[0x12, 0x3A, 0x45, 0x6F]).is_err());
        assert!(decode(&layout, &[0x12, 0x3C, 0x45, 0x6D]).is_err());
    }

    #[test]
    fn encode_rejects_values_that_do_not_fit() {
        let layout = sample_layout();
        let record = decode(&layout, &sample_line()).unwrap();

        let too_long = record.clone().with("name", FieldValue::text("BARTHOLOMEW"));
        assert_eq!(encode(&layout, &too_long).unwrap_err().field, "name");

        let big = Decimal::parse("123456.00", DecimalSpec::BALANCE).unwrap();
        let overflow = record.with("amount", FieldValue::Number(big));
        assert_eq!(encode(&layout, &overflow).unwrap_err().field, "amount");
    }

    #[test]
    fn non_canonical_fields_re_encode_byte_for_byte() {
        let layout = sample_layout();
        let mut line = sample_line();
        line[16] = b'1'; // amount: plain last digit in a signed field
        line[17..21].copy_from_slice(&[0x00, 0x00, 0x00, 0x0D]); // packed negative zero
        line[65..67].copy_from_slice(b"X9"); // filler

        let record = decode(&layout, &line).unwrap();
        assert_eq!(record.number("amount").unwrap().to_string(), "123.41");
        assert!(record.number("packed").unwrap().is_zero());
        assert!(!record.is_canonical());
        assert_eq!(encode(&layout, &record).unwrap(), line);
        assert_eq!(decode(&layout, &encode(&layout, &record).unwrap()).unwrap(), record);
    }

    #[test]
    fn replacing_a_value_encodes_it_canonically() {
        let layout = sample_layout();
        let mut line = sample_line();
        line[16] = b'1';

        let amount = Decimal::parse("123.41", DecimalSpec::new(5, 2).unwrap()).unwrap();
        let record = decode(&layout, &line)
            .unwrap()
            .with("amount", FieldValue::Number(amount));
        assert!(record.is_canonical());
        assert_eq!(&encode(&layout, &record).unwrap()[10..17], b"001234A");
    }

    #[test]
    fn text_fields_hold_utf8_measured_in_bytes() {
        let layout = RecordLayout::builder("merchant")
            .alphanumeric("name", 12)
            .alphanumeric("city", 4)
            .build();
        let mut line = "Café Züri ".as_bytes().to_vec();
        assert_eq!(line.len(), 12);
        line.extend_from_slice(b"Bern");

        let record = decode(&layout, &line).unwrap();
        assert_eq!(record.text("name").unwrap(), "Café Züri");
        assert_eq!(encode(&layout, &record).unwrap(), line);

        let wide = record.with("city", FieldValue::text("Zürich"));
        assert_eq!(encode(&layout, &wide).unwrap_err().field, "city");
    }

    #[test]
    fn a_field_cut_inside_a_character_is_malformed() {
        let layout = RecordLayout::builder("t").alphanumeric("name", 4).build();
        let e = decode(&layout, &"Café".as_bytes()[..4]).unwrap_err();
        assert_eq!(e.field, "name");
    }

    #[test]
    fn blank_dates_round_trip() {
        let layout = sample_layout();
        let mut line = sample_line();
        line[29..39].copy_from_slice(b"          ");

        let record = decode(&layout, &line).unwrap();
        assert_eq!(record.date("iso").unwrap(), None);
        assert_eq!(encode(&layout, &record).unwrap(), line);
    }
}
