//! `fieldcollect-core`: domain foundation building blocks.
//!
//! Pure domain primitives shared by every field-collection crate: identifiers,
//! the domain error model and the aggregate contract. No IO lives here.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use value_object::ValueObject;
