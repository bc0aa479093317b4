//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity; two instances with the same attribute
/// values are interchangeable (e.g. an [`AuditInfo`](crate::AuditInfo) stamp
/// or a stock movement's type).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
