//! `stockroom-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod audit;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion, RaisesEvents};
pub use audit::{AuditInfo, Auditable};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, LocationId, UserId};
pub use value_object::ValueObject;
