//! The backing store contract.
//!
//! The engine reads whole-table snapshots and publishes every transaction as
//! one [`ChangeSet`]. A store applies a change set atomically or not at all,
//! and is the final arbiter of uniqueness and isolation.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::record::Record;
use crate::update::FieldUpdate;
use crate::value::Value;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Behaves like `ReadCommitted`; snapshots never expose uncommitted writes.
    ReadUncommitted,
    #[default]
    ReadCommitted,
    /// Commit fails if a table the transaction writes changed since it was read.
    RepeatableRead,
    /// Commit fails if any table the transaction read changed since it was read.
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "ReadUncommitted",
            IsolationLevel::ReadCommitted => "ReadCommitted",
            IsolationLevel::RepeatableRead => "RepeatableRead",
            IsolationLevel::Serializable => "Serializable",
        }
    }
}

/// Options accepted by every transaction form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    /// Longest time to wait for the first snapshot.
    pub max_wait: Duration,
    /// Longest time the whole transaction may run before it is rolled back.
    pub timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            max_wait: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
        }
    }
}

impl TransactionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    #[must_use]
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// All rows of one entity at a given table version.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub entity: String,
    pub version: u64,
    pub rows: Vec<Record>,
}

/// A single row write, expressed against the row's identity value.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert { entity: String, record: Record },
    /// Insert `record` unless it collides with a committed row on a unique
    /// field set, in which case the store drops it.
    InsertOrSkip { entity: String, record: Record },
    /// Apply `changes`, in order, to the row identified by `id` as the store
    /// holds it at commit.
    Update {
        entity: String,
        id: Value,
        changes: Vec<(String, FieldUpdate)>,
    },
    Delete { entity: String, id: Value },
}

impl WriteOp {
    #[must_use]
    pub fn entity(&self) -> &str {
        match self {
            WriteOp::Insert { entity, .. }
            | WriteOp::InsertOrSkip { entity, .. }
            | WriteOp::Update { entity, .. }
            | WriteOp::Delete { entity, .. } => entity,
        }
    }
}

/// Everything a transaction publishes on commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Writes in execution order.
    pub ops: Vec<WriteOp>,
    /// Version of each table at the time it was read.
    pub read_versions: BTreeMap<String, u64>,
    pub isolation: IsolationLevel,
    /// The commit must not be applied after this instant.
    pub deadline: Option<Instant>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A backing store the engine reads snapshots from and commits change sets to.
pub trait Store: Send + Sync {
    /// Read every row of `entity` along with the table version.
    fn load(
        &self,
        cx: &Cx,
        entity: &str,
    ) -> impl Future<Output = Outcome<TableSnapshot, Error>> + Send;

    /// Apply a change set atomically. Returns the number of applied writes;
    /// skipped [`WriteOp::InsertOrSkip`] rows are not counted.
    fn commit(
        &self,
        cx: &Cx,
        changes: ChangeSet,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}

impl<S: Store> Store for Arc<S> {
    fn load(
        &self,
        cx: &Cx,
        entity: &str,
    ) -> impl Future<Output = Outcome<TableSnapshot, Error>> + Send {
        (**self).load(cx, entity)
    }

    fn commit(
        &self,
        cx: &Cx,
        changes: ChangeSet,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        (**self).commit(cx, changes)
    }
}
