//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - a condition
/// clause or a reconciliation split is defined entirely by its attributes; two
/// with the same attributes are the same value. To "modify" one, build a new
/// one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
