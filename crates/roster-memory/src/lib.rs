//! In-memory backing store for Roster.
//!
//! `roster-memory` is the reference implementation of [`roster_core::Store`].
//! It keeps every table as a vector of records guarded by a mutex, versions
//! each table, and applies a [`ChangeSet`] to a copy of the data before
//! swapping it in, so a commit is visible completely or not at all.
//!
//! # Commit Checks
//!
//! In order, a commit is rejected when:
//!
//! 1. the caller is cancelled, the store is marked unavailable, or the
//!    change set's deadline has passed;
//! 2. the isolation level requires it and a table changed since it was read
//!    (`Serializable` checks every table read, `RepeatableRead` only the
//!    tables written);
//! 3. a write breaks a unique constraint, targets a row that no longer
//!    exists, or leaves a foreign key dangling.
//!
//! The store is the last word on uniqueness: two transactions that each
//! passed their own checks cannot both insert the same unique key. Updates
//! arrive as field changes and are re-applied to the committed row, so
//! concurrent updates of one row at `ReadCommitted` compose instead of
//! overwriting each other. `InsertOrSkip` rows that collide with a committed
//! row are dropped, not rejected.

pub mod config;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use roster_core::constraint::{
    check_foreign_keys, check_unique, first_dependent, has_row_with, unique_conflict,
};
use roster_core::update::apply_changes;
use roster_core::{
    ChangeSet, ConstraintError, ConstraintErrorKind, Cx, Dataset, Error, IsolationLevel, Outcome,
    Record, Result, Schema, Store, StoreError, StoreErrorKind, TableSnapshot, TableSource, Value,
    WriteOp, try_result,
};

pub use config::MemoryStoreConfig;

#[derive(Debug)]
struct State {
    tables: Dataset,
    versions: BTreeMap<String, u64>,
}

/// A transactional store holding all data in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    schema: Arc<Schema>,
    config: MemoryStoreConfig,
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store with one table per schema entity.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_config(schema, MemoryStoreConfig::default())
    }

    pub fn with_config(schema: Arc<Schema>, config: MemoryStoreConfig) -> Self {
        let mut tables = Dataset::new();
        let mut versions = BTreeMap::new();
        for entity in schema.entities() {
            tables.insert_table(entity.name.clone(), Vec::new());
            versions.insert(entity.name.clone(), 0);
        }
        Self {
            schema,
            config,
            state: Mutex::new(State { tables, versions }),
            unavailable: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::internal(format!("store `{}` lock poisoned", self.config.name)))
    }

    /// Replace the rows of one table, bypassing constraint checks.
    ///
    /// Intended for fixtures. Bumps the table version like a commit would.
    pub fn seed(&self, entity: &str, rows: Vec<Record>) -> Result<()> {
        let entity = self.schema.resolve_entity(entity)?;
        let mut state = self.lock()?;
        state.tables.insert_table(entity.name.clone(), rows);
        *state.versions.entry(entity.name.clone()).or_insert(0) += 1;
        Ok(())
    }

    /// Committed rows of `entity`. Empty for unknown entities.
    #[must_use]
    pub fn rows(&self, entity: &str) -> Vec<Record> {
        self.lock()
            .ok()
            .and_then(|state| state.tables.table(entity).cloned())
            .unwrap_or_default()
    }

    /// Current version of `entity`'s table.
    #[must_use]
    pub fn version(&self, entity: &str) -> u64 {
        self.lock()
            .ok()
            .and_then(|state| state.versions.get(entity).copied())
            .unwrap_or(0)
    }

    /// Make every load and commit fail with an `Unavailable` store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::new(
                StoreErrorKind::Unavailable,
                format!("store `{}` is unavailable", self.config.name),
            )
            .into());
        }
        Ok(())
    }

    fn check_versions(&self, state: &State, changes: &ChangeSet) -> Result<()> {
        let written: BTreeSet<&str> = changes.ops.iter().map(WriteOp::entity).collect();
        let checked: Vec<(&String, &u64)> = match changes.isolation {
            IsolationLevel::Serializable => changes.read_versions.iter().collect(),
            IsolationLevel::RepeatableRead => changes
                .read_versions
                .iter()
                .filter(|(entity, _)| written.contains(entity.as_str()))
                .collect(),
            IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => Vec::new(),
        };
        for (entity, read) in checked {
            let current = state.versions.get(entity).copied().unwrap_or(0);
            if current != *read {
                tracing::debug!(
                    store = %self.config.name,
                    entity = %entity,
                    read = read,
                    current = current,
                    "Table changed since it was read"
                );
                return Err(StoreError::new(
                    StoreErrorKind::SerializationFailure,
                    format!("`{entity}` was modified by a concurrent transaction"),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Apply `changes` to a copy of the tables and check integrity.
    ///
    /// Returns the new tables and the number of writes that took effect.
    fn apply(&self, tables: &Dataset, changes: &ChangeSet) -> Result<(Dataset, u64)> {
        let mut next = tables.clone();
        let mut applied = 0u64;
        let mut touched: Vec<(String, Value)> = Vec::new();
        let mut replaced: Vec<(String, Value, Record)> = Vec::new();
        let mut removed: Vec<(String, Record)> = Vec::new();

        for op in &changes.ops {
            let entity = self.schema.resolve_entity(op.entity())?;
            let id_field = entity.id_field();
            match op {
                WriteOp::Insert { record, .. } => {
                    let rows = next.table_mut(&entity.name)?;
                    check_unique(entity, rows, record, None)?;
                    rows.push(record.clone());
                    touched.push((entity.name.clone(), record.value(id_field).clone()));
                }
                WriteOp::InsertOrSkip { record, .. } => {
                    let rows = next.table_mut(&entity.name)?;
                    if let Some(fields) = unique_conflict(entity, rows, record, None) {
                        tracing::debug!(
                            store = %self.config.name,
                            entity = %entity.name,
                            fields = ?fields,
                            "Skipped duplicate insert"
                        );
                        continue;
                    }
                    rows.push(record.clone());
                    touched.push((entity.name.clone(), record.value(id_field).clone()));
                }
                WriteOp::Update { id, changes, .. } => {
                    let pos = next
                        .position(&entity.name, id_field, id)
                        .ok_or_else(|| missing_row(&entity.name, id))?;
                    let rows = next.table_mut(&entity.name)?;
                    let before = rows[pos].clone();
                    let after = apply_changes(entity, &before, changes)?;
                    check_unique(entity, rows, &after, Some(pos))?;
                    touched.push((entity.name.clone(), after.value(id_field).clone()));
                    replaced.push((entity.name.clone(), after.value(id_field).clone(), before));
                    rows[pos] = after;
                }
                WriteOp::Delete { id, .. } => {
                    let pos = next
                        .position(&entity.name, id_field, id)
                        .ok_or_else(|| missing_row(&entity.name, id))?;
                    let row = next.table_mut(&entity.name)?.remove(pos);
                    removed.push((entity.name.clone(), row));
                }
            }
            applied += 1;
        }

        for (name, id) in &touched {
            let entity = self.schema.resolve_entity(name)?;
            // Rows written and later deleted in the same change set.
            let Some(record) = next.find(name, entity.id_field(), id) else {
                continue;
            };
            check_foreign_keys(&self.schema, &next, entity, record)?;
        }
        for (name, id, before) in &replaced {
            let entity = self.schema.resolve_entity(name)?;
            let current = next.find(name, entity.id_field(), id);
            for inbound in self.schema.inbound_relations(name) {
                let field = inbound.relation.references.as_str();
                let old = before.value(field);
                if current.is_some_and(|row| row.value(field).loose_eq(old)) {
                    continue;
                }
                if has_row_with(next.rows(&inbound.entity.name)?, inbound.key(), old) {
                    return Err(dangling(name, &inbound.entity.name, &inbound.relation.name));
                }
            }
        }
        for (name, record) in &removed {
            let entity = self.schema.resolve_entity(name)?;
            if let Some((dependent, relation)) =
                first_dependent(&self.schema, &next, entity, record)?
            {
                return Err(dangling(name, &dependent, &relation));
            }
        }
        Ok((next, applied))
    }
}

fn dangling(entity: &str, dependent: &str, relation: &str) -> Error {
    ConstraintError::new(
        ConstraintErrorKind::ForeignKey,
        dependent,
        vec![relation.to_string()],
        format!("{entity} row is still referenced by {dependent}.{relation}"),
    )
    .into()
}

fn missing_row(entity: &str, id: &Value) -> Error {
    StoreError::new(
        StoreErrorKind::WriteConflict,
        format!("{entity} {} no longer exists", id.to_json()),
    )
    .into()
}

impl Store for MemoryStore {
    #[tracing::instrument(level = "debug", skip(self, cx), fields(store = %self.config.name))]
    async fn load(&self, cx: &Cx, entity: &str) -> Outcome<TableSnapshot, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        try_result!(self.check_available());
        let entity = try_result!(self.schema.resolve_entity(entity));
        let state = try_result!(self.lock());
        let rows = state.tables.table(&entity.name).cloned().unwrap_or_default();
        let version = state.versions.get(&entity.name).copied().unwrap_or(0);
        tracing::trace!(rows = rows.len(), version = version, "Loaded table");
        Outcome::Ok(TableSnapshot {
            entity: entity.name.clone(),
            version,
            rows,
        })
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, cx, changes),
        fields(store = %self.config.name, ops = changes.ops.len())
    )]
    async fn commit(&self, cx: &Cx, changes: ChangeSet) -> Outcome<u64, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        try_result!(self.check_available());
        if changes.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::warn!(store = %self.config.name, "Commit arrived after the transaction deadline");
            return Outcome::Err(
                StoreError::new(StoreErrorKind::Timeout, "transaction deadline passed before commit")
                    .into(),
            );
        }

        let mut state = try_result!(self.lock());
        try_result!(self.check_versions(&state, &changes));
        if changes.is_empty() {
            return Outcome::Ok(0);
        }

        let (next, applied) = try_result!(self.apply(&state.tables, &changes));
        let written: BTreeSet<&str> = changes.ops.iter().map(WriteOp::entity).collect();
        for entity in written {
            *state.versions.entry(entity.to_string()).or_insert(0) += 1;
        }
        state.tables = next;

        tracing::debug!(store = %self.config.name, applied, "Change set applied");
        Outcome::Ok(applied)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
