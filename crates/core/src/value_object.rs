//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have **no identity**: two values with the same attributes are
/// the same value. `Decimal`, `DecimalSpec` and the job parameter values are
/// value objects; job instances and executions are not (they carry ids).
///
/// Value objects are immutable; arithmetic returns a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
