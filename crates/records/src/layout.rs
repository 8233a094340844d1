//! Record layouts: named fields at fixed byte offsets.

use nightbatch_core::DecimalSpec;

/// Shape of a date field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `YYYYMMDD`
    Compact,
    /// `YYYY-MM-DD`
    Iso,
}

impl DateFormat {
    pub fn width(&self) -> usize {
        match self {
            DateFormat::Compact => 8,
            DateFormat::Iso => 10,
        }
    }
}

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Text, right-padded with spaces.
    Alphanumeric,
    /// Display digits; when signed, the last digit carries an overpunched sign.
    Zoned { spec: DecimalSpec, signed: bool },
    /// COMP-3: two digits per byte, sign in the low nibble of the last byte.
    Packed { spec: DecimalSpec, signed: bool },
    /// Calendar date; all spaces decodes as blank.
    Date(DateFormat),
    /// `YYYY-MM-DD HH:MM:SS.ffffff`; all spaces decodes as blank.
    Timestamp,
    /// Unused bytes, written as spaces.
    Filler,
}

/// Width of the legacy timestamp field.
pub const TIMESTAMP_WIDTH: usize = 26;

/// One field of a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub length: usize,
    pub kind: FieldType,
}

/// A complete fixed-width record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    name: &'static str,
    length: usize,
    fields: Vec<FieldSpec>,
}

impl RecordLayout {
    pub fn builder(name: &'static str) -> RecordLayoutBuilder {
        RecordLayoutBuilder {
            name,
            offset: 0,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Total record length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Builds a layout field by field; offsets are assigned sequentially and
/// widths of typed fields follow from their type.
#[derive(Debug)]
pub struct RecordLayoutBuilder {
    name: &'static str,
    offset: usize,
    fields: Vec<FieldSpec>,
}

impl RecordLayoutBuilder {
    fn push(mut self, name: &'static str, length: usize, kind: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name,
            offset: self.offset,
            length,
            kind,
        });
        self.offset += length;
        self
    }

    pub fn alphanumeric(self, name: &'static str, length: usize) -> Self {
        self.push(name, length, FieldType::Alphanumeric)
    }

    /// Unsigned zoned field `9(n)V9(s)`.
    pub fn zoned(self, name: &'static str, spec: DecimalSpec) -> Self {
        self.push(
            name,
            spec.total_digits() as usize,
            FieldType::Zoned {
                spec,
                signed: false,
            },
        )
    }

    /// Signed zoned field `S9(n)V9(s)` with a trailing overpunch sign.
    pub fn signed_zoned(self, name: &'static str, spec: DecimalSpec) -> Self {
        self.push(
            name,
            spec.total_digits() as usize,
            FieldType::Zoned { spec, signed: true },
        )
    }

    /// Packed-decimal field `S9(n)V9(s) COMP-3`.
    pub fn packed(self, name: &'static str, spec: DecimalSpec, signed: bool) -> Self {
        self.push(
            name,
            spec.total_digits() as usize / 2 + 1,
            FieldType::Packed { spec, signed },
        )
    }

    pub fn date(self, name: &'static str, format: DateFormat) -> Self {
        self.push(name, format.width(), FieldType::Date(format))
    }

    pub fn timestamp(self, name: &'static str) -> Self {
        self.push(name, TIMESTAMP_WIDTH, FieldType::Timestamp)
    }

    pub fn filler(self, length: usize) -> Self {
        self.push("FILLER", length, FieldType::Filler)
    }

    pub fn build(self) -> RecordLayout {
        RecordLayout {
            name: self.name,
            length: self.offset,
            fields: self.fields,
        }
    }
}
