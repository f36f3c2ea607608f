//! Roster: schema-driven CRUD, filtering and relation loading.
//!
//! `roster` is the **facade crate**. It ties the schema model, the read
//! engine, the unit of work and a backing store together behind a
//! [`Client`] with one delegate per entity.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use roster::prelude::*;
//!
//! let schema = Arc::new(school_schema()?);
//! let client = Client::in_memory(Arc::clone(&schema));
//!
//! let school = client
//!     .school()
//!     .create(&cx, CreateInput::new().set("name", "North"), Selection::new())
//!     .await;
//!
//! let students = client
//!     .student()
//!     .find_many(&cx, FindArgs::new().filter(Filter::equals("grade", 3)).include("class"))
//!     .await;
//! ```
//!
//! # Transactions
//!
//! - One-shot calls on a [`Client`] delegate each run in their own
//!   transaction.
//! - [`Client::batch_transaction`] runs a list of [`Operation`]s
//!   all-or-nothing.
//! - [`Client::begin`] and [`Client::transaction`] open an interactive
//!   [`TransactionClient`] whose writes stay private until commit.
//!
//! Every async operation takes a `&Cx` and returns an
//! `Outcome<T, Error>`, so callers see cancellation distinctly from
//! failure.

pub mod client;
pub mod config;
pub mod delegate;
pub mod school;
pub mod transaction;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use delegate::EntityDelegate;
pub use transaction::TransactionClient;

pub use roster_core::{
    BatchResult, ConstraintError, ConstraintErrorKind, Cx, Error, IsolationLevel, NotFoundError,
    Outcome, Record, Related, Result, Schema, SchemaError, Store, StoreError, StoreErrorKind,
    TransactionOptions, ValidationError, ValidationErrorKind, Value,
};
pub use roster_memory::{MemoryStore, MemoryStoreConfig};
pub use roster_schema::{load_schema, school_schema};
pub use roster_session::{Operation, OperationResult, SessionConfig};

/// Everything needed to build requests and run them.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{Client, ClientConfig, EntityDelegate, TransactionClient};
    pub use roster_core::{
        BatchResult, Cx, Error, IsolationLevel, Outcome, Record, Result, Schema, Store,
        TransactionOptions, Value,
    };
    pub use roster_memory::MemoryStore;
    pub use roster_query::{
        AggregateArgs, AggregateFn, AggregateSelection, FieldFilter, Filter, FindArgs,
        GroupByArgs, GroupOrderBy, Having, NullMarker, NullsOrder, OrderBy, QueryMode,
        RelationFilter, Selection, SortOrder, UniqueWhere,
    };
    pub use roster_schema::{load_schema, school_schema};
    pub use roster_session::{
        ConnectOrCreate, CreateInput, CreateManyArgs, DeleteManyArgs, FieldUpdate, Operation,
        OperationResult, RelationWrite, UpdateInput, UpdateManyArgs, UpsertArgs,
    };
}
