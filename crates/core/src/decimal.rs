//! Fixed-point decimal arithmetic with packed-decimal field semantics.
//!
//! A [`Decimal`] is a scaled integer (`units × 10^-scale`) tagged with the
//! [`DecimalSpec`] of the field it lives in: how many integer digits and how
//! many fractional digits the field declares (COBOL `PIC S9(i)V9(s)`).
//!
//! ## Arithmetic rules
//!
//! - The left operand is the *receiving field*: results take its spec.
//! - Addition and subtraction are exact. An operand with more fractional
//!   digits than the receiving field fails with `PrecisionLoss` unless the
//!   extra digits are zero.
//! - Multiplication and division compute the exact result and round once at
//!   the target scale (half-up, i.e. away from zero, unless told otherwise).
//! - Any result whose integer part needs more digits than the receiving field
//!   declares fails with `Overflow`. Nothing is ever truncated silently.
//!
//! Equality, ordering and hashing compare numeric values: `1.0 == 1.00`.

use core::cmp::Ordering;
use core::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_object::ValueObject;

/// Maximum number of digits (integer + fractional) a field may declare.
pub const MAX_DIGITS: u8 = 18;

/// Decimal arithmetic failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecimalError {
    #[error("overflow: {value} does not fit in {integer_digits} integer digits")]
    Overflow { value: String, integer_digits: u8 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("precision loss: {0}")]
    PrecisionLoss(String),

    #[error("invalid decimal spec: {0}")]
    InvalidSpec(String),
}

/// Rounding applied when a result has more fractional digits than its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Round half away from zero (`ROUNDED`).
    HalfUp,
    /// Round half to even (banker's rounding).
    HalfEven,
    /// Drop excess digits (arithmetic without `ROUNDED`).
    Truncate,
}

/// Declared shape of a decimal field: integer digits and scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecimalSpec {
    integer_digits: u8,
    scale: u8,
}

impl DecimalSpec {
    /// Transaction amounts: `S9(9)V99`.
    pub const AMOUNT: DecimalSpec = DecimalSpec {
        integer_digits: 9,
        scale: 2,
    };

    /// Account balances and limits: `S9(10)V99`.
    pub const BALANCE: DecimalSpec = DecimalSpec {
        integer_digits: 10,
        scale: 2,
    };

    /// Interest rates in percent: `S9(4)V99`.
    pub const RATE: DecimalSpec = DecimalSpec {
        integer_digits: 4,
        scale: 2,
    };

    /// Whole numbers up to the widest field.
    pub const INTEGER: DecimalSpec = DecimalSpec::whole(MAX_DIGITS);

    /// Unsigned display field `9(n)`; `digits` is clamped to `1..=MAX_DIGITS`.
    pub const fn whole(digits: u8) -> Self {
        let integer_digits = if digits == 0 {
            1
        } else if digits > MAX_DIGITS {
            MAX_DIGITS
        } else {
            digits
        };
        Self {
            integer_digits,
            scale: 0,
        }
    }

    pub fn new(integer_digits: u8, scale: u8) -> Result<Self, DecimalError> {
        let total = integer_digits as u16 + scale as u16;
        if total == 0 || total > MAX_DIGITS as u16 {
            return Err(DecimalError::InvalidSpec(format!(
                "{integer_digits} integer + {scale} fractional digits (max {MAX_DIGITS} total)"
            )));
        }
        Ok(Self {
            integer_digits,
            scale,
        })
    }

    pub fn integer_digits(&self) -> u8 {
        self.integer_digits
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn total_digits(&self) -> u8 {
        self.integer_digits + self.scale
    }

    /// Exclusive bound on `|units|`.
    fn limit(&self) -> i128 {
        pow10(self.total_digits() as u32)
    }
}

impl ValueObject for DecimalSpec {}

/// Signed fixed-point decimal value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "DecimalRepr", into = "DecimalRepr")]
pub struct Decimal {
    units: i128,
    spec: DecimalSpec,
}

impl Decimal {
    /// Build a value from its scaled integer representation.
    pub fn from_units(units: i128, spec: DecimalSpec) -> Result<Self, DecimalError> {
        if units.unsigned_abs() >= spec.limit() as u128 {
            return Err(DecimalError::Overflow {
                value: render(units, spec.scale),
                integer_digits: spec.integer_digits,
            });
        }
        Ok(Self { units, spec })
    }

    pub fn zero(spec: DecimalSpec) -> Self {
        Self { units: 0, spec }
    }

    /// Parse a plain decimal literal (`-123.45`, `+7`, `0.5`) into a field.
    pub fn parse(s: &str, spec: DecimalSpec) -> Result<Self, DecimalError> {
        let s = s.trim();
        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(DecimalError::Parse(format!("no digits in '{s}'")));
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(DecimalError::Parse(format!("invalid character in '{s}'")));
        }

        let frac_trimmed = frac_part.trim_end_matches('0');
        if frac_trimmed.len() > spec.scale as usize {
            return Err(DecimalError::PrecisionLoss(format!(
                "'{s}' has more than {} fractional digits",
                spec.scale
            )));
        }

        let int_digits = int_part.trim_start_matches('0');
        if int_digits.len() > spec.integer_digits as usize {
            return Err(DecimalError::Overflow {
                value: s.to_string(),
                integer_digits: spec.integer_digits,
            });
        }

        let mut units: i128 = 0;
        for b in int_digits.bytes() {
            units = units * 10 + (b - b'0') as i128;
        }
        for i in 0..spec.scale as usize {
            let digit = frac_trimmed.as_bytes().get(i).map_or(0, |b| b - b'0');
            units = units * 10 + digit as i128;
        }

        Self::from_units(if negative { -units } else { units }, spec)
    }

    pub fn units(&self) -> i128 {
        self.units
    }

    pub fn spec(&self) -> DecimalSpec {
        self.spec
    }

    pub fn scale(&self) -> u8 {
        self.spec.scale
    }

    pub fn is_zero(&self) -> bool {
        self.units == 0
    }

    pub fn is_negative(&self) -> bool {
        self.units < 0
    }

    pub fn signum(&self) -> i8 {
        self.units.signum() as i8
    }

    pub fn neg(&self) -> Self {
        Self {
            units: -self.units,
            spec: self.spec,
        }
    }

    pub fn abs(&self) -> Self {
        Self {
            units: self.units.abs(),
            spec: self.spec,
        }
    }

    /// Exact addition into the receiving field.
    pub fn add(&self, rhs: &Decimal) -> Result<Decimal, DecimalError> {
        let rhs_units = self.align_exact(rhs)?;
        let units = self.units.checked_add(rhs_units).ok_or_else(|| self.overflow_raw())?;
        Self::from_units(units, self.spec)
    }

    /// Exact subtraction into the receiving field.
    pub fn sub(&self, rhs: &Decimal) -> Result<Decimal, DecimalError> {
        let rhs_units = self.align_exact(rhs)?;
        let units = self.units.checked_sub(rhs_units).ok_or_else(|| self.overflow_raw())?;
        Self::from_units(units, self.spec)
    }

    /// Multiply, rounding half-up at the receiving field's scale.
    pub fn mul(&self, rhs: &Decimal) -> Result<Decimal, DecimalError> {
        self.mul_to(rhs, self.spec, RoundingMode::HalfUp)
    }

    /// Multiply into an explicit target field with an explicit rounding mode.
    pub fn mul_to(
        &self,
        rhs: &Decimal,
        target: DecimalSpec,
        mode: RoundingMode,
    ) -> Result<Decimal, DecimalError> {
        let product = self.units.checked_mul(rhs.units).ok_or_else(|| self.overflow_raw())?;
        let product_scale = self.spec.scale as u32 + rhs.spec.scale as u32;
        let units = rescale_units(product, product_scale, target.scale as u32, mode)
            .ok_or_else(|| self.overflow_raw())?;
        Self::from_units(units, target)
    }

    /// Divide, rounding half-up at the receiving field's scale.
    pub fn div(&self, rhs: &Decimal) -> Result<Decimal, DecimalError> {
        self.div_to(rhs, self.spec, RoundingMode::HalfUp)
    }

    /// Divide into an explicit target field with an explicit rounding mode.
    pub fn div_to(
        &self,
        rhs: &Decimal,
        target: DecimalSpec,
        mode: RoundingMode,
    ) -> Result<Decimal, DecimalError> {
        if rhs.units == 0 {
            return Err(DecimalError::DivisionByZero);
        }

        // units(target) = a.units * 10^(t + sb - sa) / b.units
        let exponent = target.scale as i32 + rhs.spec.scale as i32 - self.spec.scale as i32;
        let (numerator, denominator) = if exponent >= 0 {
            let factor = checked_pow10(exponent as u32).ok_or_else(|| self.overflow_raw())?;
            let n = self.units.checked_mul(factor).ok_or_else(|| self.overflow_raw())?;
            (n, rhs.units)
        } else {
            let factor = checked_pow10((-exponent) as u32).ok_or_else(|| self.overflow_raw())?;
            let d = rhs.units.checked_mul(factor).ok_or_else(|| self.overflow_raw())?;
            (self.units, d)
        };

        Self::from_units(round_div(numerator, denominator, mode), target)
    }

    /// Move the value into another field, rounding if the target scale is smaller.
    pub fn rescale(&self, target: DecimalSpec, mode: RoundingMode) -> Result<Decimal, DecimalError> {
        let units = rescale_units(self.units, self.spec.scale as u32, target.scale as u32, mode)
            .ok_or_else(|| self.overflow_raw())?;
        Self::from_units(units, target)
    }

    /// Render with exactly `scale` fractional digits (half-up when shortening).
    ///
    /// Widening appends zeros to the text, so any `scale` renders.
    pub fn format(&self, scale: u8) -> String {
        let own = self.spec.scale;
        if scale < own {
            // own <= MAX_DIGITS, so the divisor fits.
            let divisor = pow10((own - scale) as u32);
            return render(round_div(self.units, divisor, RoundingMode::HalfUp), scale);
        }
        let mut text = render(self.units, own);
        if scale > own {
            if own == 0 {
                text.push('.');
            }
            text.extend(std::iter::repeat_n('0', (scale - own) as usize));
        }
        text
    }

    /// Align `rhs` to this value's scale without losing digits.
    fn align_exact(&self, rhs: &Decimal) -> Result<i128, DecimalError> {
        let from = rhs.spec.scale as u32;
        let to = self.spec.scale as u32;
        if from > to {
            let factor = pow10(from - to);
            if rhs.units % factor != 0 {
                return Err(DecimalError::PrecisionLoss(format!(
                    "{} cannot be represented with {} fractional digits",
                    rhs, to
                )));
            }
            Ok(rhs.units / factor)
        } else {
            rhs.units
                .checked_mul(pow10(to - from))
                .ok_or_else(|| self.overflow_raw())
        }
    }

    fn overflow_raw(&self) -> DecimalError {
        DecimalError::Overflow {
            value: "intermediate result".to_string(),
            integer_digits: self.spec.integer_digits,
        }
    }

    /// `(units, scale)` with trailing fractional zeros removed.
    fn normalized(&self) -> (i128, u8) {
        let mut units = self.units;
        let mut scale = self.spec.scale;
        while scale > 0 && units % 10 == 0 {
            units /= 10;
            scale -= 1;
        }
        (units, scale)
    }
}

impl ValueObject for Decimal {}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.spec.scale.max(other.spec.scale) as u32;
        // Both operands have at most MAX_DIGITS digits, so aligning cannot overflow.
        let a = self.units * pow10(scale - self.spec.scale as u32);
        let b = other.units * pow10(scale - other.spec.scale as u32);
        a.cmp(&b)
    }
}

impl Hash for Decimal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl core::fmt::Display for Decimal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&render(self.units, self.spec.scale))
    }
}

#[derive(Serialize, Deserialize)]
struct DecimalRepr {
    value: String,
    integer_digits: u8,
    scale: u8,
}

impl From<Decimal> for DecimalRepr {
    fn from(d: Decimal) -> Self {
        Self {
            value: d.to_string(),
            integer_digits: d.spec.integer_digits,
            scale: d.spec.scale,
        }
    }
}

impl TryFrom<DecimalRepr> for Decimal {
    type Error = DecimalError;

    fn try_from(repr: DecimalRepr) -> Result<Self, Self::Error> {
        let spec = DecimalSpec::new(repr.integer_digits, repr.scale)?;
        Decimal::parse(&repr.value, spec)
    }
}

fn pow10(exp: u32) -> i128 {
    10i128.pow(exp)
}

fn checked_pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

fn rescale_units(units: i128, from: u32, to: u32, mode: RoundingMode) -> Option<i128> {
    if to >= from {
        units.checked_mul(checked_pow10(to - from)?)
    } else {
        Some(round_div(units, checked_pow10(from - to)?, mode))
    }
}

/// Integer division with the requested rounding of the remainder.
fn round_div(numerator: i128, denominator: i128, mode: RoundingMode) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder == 0 {
        return quotient;
    }

    let twice_remainder = remainder.unsigned_abs() * 2;
    let divisor = denominator.unsigned_abs();
    let away_from_zero = match mode {
        RoundingMode::Truncate => false,
        RoundingMode::HalfUp => twice_remainder >= divisor,
        RoundingMode::HalfEven => {
            twice_remainder > divisor || (twice_remainder == divisor && quotient % 2 != 0)
        }
    };

    if !away_from_zero {
        quotient
    } else if (numerator < 0) == (denominator < 0) {
        quotient + 1
    } else {
        quotient - 1
    }
}

fn render(units: i128, scale: u8) -> String {
    let magnitude = units.unsigned_abs();
    let sign = if units < 0 { "-" } else { "" };
    if scale == 0 {
        return format!("{sign}{magnitude}");
    }
    let factor = 10u128.pow(scale as u32);
    format!(
        "{sign}{}.{:0width$}",
        magnitude / factor,
        magnitude % factor,
        width = scale as usize
    )
}
