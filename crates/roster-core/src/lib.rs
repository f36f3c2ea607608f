//! Core types and traits for Roster.
//!
//! `roster-core` is the **foundation layer** for the workspace. It defines
//! the data types and contracts all other crates build on.
//!
//! # Role In The Architecture
//!
//! - **Schema model**: `Schema`, `EntityInfo`, `FieldInfo` and
//!   `RelationshipInfo` describe the entity graph; built once, read
//!   concurrently everywhere.
//! - **Data model**: `Value` and `Record` carry row data in and out of the
//!   engine.
//! - **Store contract**: `Store`, `ChangeSet` and `TableSnapshot` are what a
//!   backing store implements.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync
//!   so every store round trip is cancel-correct.
//!
//! # Who Uses This Crate
//!
//! - `roster-query` evaluates filters and runs reads over `TableSource`s.
//! - `roster-session` executes mutations inside a transaction and commits
//!   change sets through a `Store`.
//! - `roster-schema` builds a `Schema` from a declarative document.
//! - `roster-memory` implements `Store`.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod constraint;
pub mod entity;
pub mod error;
pub mod field;
pub mod record;
pub mod relationship;
pub mod schema;
pub mod store;
pub mod table;
pub mod update;
pub mod validate;
pub mod value;

pub use entity::{EntityInfo, UniqueConstraint};
pub use error::{
    ConstraintError, ConstraintErrorKind, Error, NotFoundError, Result, SchemaError, StoreError,
    StoreErrorKind, ValidationError, ValidationErrorKind,
};
pub use field::{DefaultValue, FieldInfo, FieldType, ReferentialAction};
pub use record::{BatchResult, Record, Related};
pub use relationship::{RelationshipInfo, RelationshipKind};
pub use schema::{InboundRelation, Schema, SchemaBuilder};
pub use store::{
    ChangeSet, IsolationLevel, Store, TableSnapshot, TransactionOptions, WriteOp,
};
pub use table::{Dataset, TableSource};
pub use update::FieldUpdate;
pub use value::{Value, ValueKey};

/// Unwrap an `Outcome`, returning early from the enclosing function on
/// anything but `Ok`.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(v) => v,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside a function returning `Outcome`.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => return $crate::Outcome::Err(e.into()),
        }
    };
}
