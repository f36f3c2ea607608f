//! Transactions and mutation execution for Roster.
//!
//! `roster-session` is the **unit-of-work layer**. It turns operations into
//! reads and writes against a transaction's working set and publishes the
//! writes to a [`roster_core::Store`] in one atomic commit.
//!
//! # Role In The Architecture
//!
//! - **Operations**: [`Operation`] and [`Action`] describe every request as
//!   data, so batches and one-shot calls share one execution path.
//! - **Mutations**: [`MutationExecutor`] implements create, update, upsert
//!   and delete, including nested relation writes and delete policies.
//! - **Transactions**: [`Transaction`] loads snapshots lazily, keeps each
//!   operation atomic within the working set, and commits a
//!   [`roster_core::ChangeSet`].
//!
//! # Example
//!
//! ```rust,ignore
//! let mut tx = Transaction::new(schema, SessionConfig::default(), TransactionOptions::default());
//! tx.run(&cx, &store, &Operation::create("School", CreateInput::new().set("name", "North"))).await;
//! tx.commit(&cx, &store).await;
//! ```

pub mod config;
pub mod input;
pub mod mutation;
pub mod operation;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use config::SessionConfig;
pub use input::{
    ConnectOrCreate, CreateInput, CreateManyArgs, DeleteManyArgs, FieldUpdate, RelationWrite,
    UpdateInput, UpdateManyArgs, UpsertArgs,
};
pub use mutation::MutationExecutor;
pub use operation::{Action, Operation, OperationResult};
pub use transaction::{Transaction, TransactionState};
