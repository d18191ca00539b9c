//! Value object marker: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes
/// (geographic points, GPS samples, payment outcomes).
///
/// To "modify" a value object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
