//! The unit of work.
//!
//! A [`Transaction`] loads table snapshots from the store on first use,
//! runs operations against its private working set, and publishes all of
//! its writes as one [`ChangeSet`] on commit. Nothing is visible to other
//! transactions before that commit succeeds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use roster_core::{
    ChangeSet, Cx, Dataset, Error, NotFoundError, Outcome, Result, Schema, Store, StoreError,
    StoreErrorKind, TransactionOptions, WriteOp, try_outcome, try_result,
};
use roster_query::QueryExecutor;

use crate::config::SessionConfig;
use crate::mutation::MutationExecutor;
use crate::operation::{Action, Operation, OperationResult};

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Working set, pending writes and read versions of one transaction.
#[derive(Debug)]
pub struct Transaction {
    schema: Arc<Schema>,
    config: SessionConfig,
    options: TransactionOptions,
    data: Dataset,
    read_versions: BTreeMap<String, u64>,
    pending: Vec<WriteOp>,
    started: Instant,
    state: TransactionState,
    /// Why the transaction was closed early, reported to later calls.
    failure: Option<Error>,
}

fn not_found(entity: &str) -> Error {
    NotFoundError::new(entity, format!("no {entity} record matched")).into()
}

impl Transaction {
    pub fn new(schema: Arc<Schema>, config: SessionConfig, options: TransactionOptions) -> Self {
        tracing::info!(
            isolation = options.isolation_level.as_str(),
            timeout_ms = options.timeout.as_millis() as u64,
            "Beginning transaction"
        );
        Self {
            schema,
            config,
            options,
            data: Dataset::new(),
            read_versions: BTreeMap::new(),
            pending: Vec::new(),
            started: Instant::now(),
            state: TransactionState::Active,
            failure: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    #[must_use]
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of row writes waiting for commit.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    fn ensure_active(&self) -> Result<()> {
        match (self.state, &self.failure) {
            (TransactionState::Active, _) => Ok(()),
            (_, Some(err)) => Err(err.clone()),
            (TransactionState::Committed, None) => Err(Error::internal("transaction already committed")),
            (TransactionState::RolledBack, None) => {
                Err(Error::internal("transaction already rolled back"))
            }
        }
    }

    fn close(&mut self, err: Error) -> Error {
        self.state = TransactionState::RolledBack;
        self.pending.clear();
        self.failure = Some(err.clone());
        tracing::info!(error = %err, "Transaction rolled back");
        err
    }

    /// Roll back if the transaction ran past its timeout.
    pub fn check_deadline(&mut self) -> Result<()> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.options.timeout {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.options.timeout.as_millis() as u64,
                "Transaction timed out"
            );
            return Err(self.close(
                StoreError::new(
                    StoreErrorKind::Timeout,
                    format!("transaction exceeded its timeout of {:?}", self.options.timeout),
                )
                .into(),
            ));
        }
        Ok(())
    }

    /// Load snapshots of every table in `entities` not loaded yet.
    pub async fn ensure_loaded<S: Store>(
        &mut self,
        cx: &Cx,
        store: &S,
        entities: &BTreeSet<String>,
    ) -> Outcome<(), Error> {
        for entity in entities {
            if self.data.contains(entity) {
                continue;
            }
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }
            let first = self.read_versions.is_empty();
            let snapshot = try_outcome!(store.load(cx, entity).await);
            if first && self.started.elapsed() > self.options.max_wait {
                tracing::warn!(
                    max_wait_ms = self.options.max_wait.as_millis() as u64,
                    "Timed out waiting for the first snapshot"
                );
                return Outcome::Err(self.close(
                    StoreError::new(
                        StoreErrorKind::Timeout,
                        format!("no snapshot within max wait of {:?}", self.options.max_wait),
                    )
                    .into(),
                ));
            }
            tracing::trace!(entity = %entity, version = snapshot.version, rows = snapshot.rows.len(), "table loaded");
            self.read_versions.insert(entity.clone(), snapshot.version);
            self.data.insert_table(entity.clone(), snapshot.rows);
        }
        Outcome::Ok(())
    }

    /// Run `op` against the working set. Tables it needs must be loaded.
    ///
    /// A failing write leaves the working set as it was before the call.
    pub fn execute(&mut self, op: &Operation) -> Result<OperationResult> {
        self.ensure_active()?;
        self.check_deadline()?;
        let schema = Arc::clone(&self.schema);
        schema.request_entity(&op.entity)?;
        tracing::debug!(entity = %op.entity, action = op.name(), "executing operation");

        if !op.is_write() {
            return self.read(&schema, op);
        }
        let checkpoint = (self.data.clone(), self.pending.len());
        let result = self.write(&schema, op);
        if let Err(err) = &result {
            tracing::debug!(entity = %op.entity, action = op.name(), error = %err, "operation failed, working set restored");
            let (data, pending) = checkpoint;
            self.data = data;
            self.pending.truncate(pending);
        }
        result
    }

    fn read(&self, schema: &Schema, op: &Operation) -> Result<OperationResult> {
        let reader =
            QueryExecutor::new(schema, &self.data).max_depth(self.config.max_include_depth);
        let entity = op.entity.as_str();
        match &op.action {
            Action::FindUnique { unique, selection } => reader
                .find_unique(entity, unique, selection)
                .map(OperationResult::Record),
            Action::FindUniqueOrThrow { unique, selection } => reader
                .find_unique(entity, unique, selection)?
                .ok_or_else(|| not_found(entity))
                .map(|r| OperationResult::Record(Some(r))),
            Action::FindFirst(args) => reader.find_first(entity, args).map(OperationResult::Record),
            Action::FindFirstOrThrow(args) => reader
                .find_first(entity, args)?
                .ok_or_else(|| not_found(entity))
                .map(|r| OperationResult::Record(Some(r))),
            Action::FindMany(args) => reader.find_many(entity, args).map(OperationResult::Records),
            Action::Count(args) => reader.count(entity, args).map(OperationResult::Count),
            Action::Aggregate(args) => reader.aggregate(entity, args).map(OperationResult::Aggregate),
            Action::GroupBy(args) => reader.group_by(entity, args).map(OperationResult::Groups),
            other => Err(Error::internal(format!("{} is not a read", other.name()))),
        }
    }

    fn write(&mut self, schema: &Schema, op: &Operation) -> Result<OperationResult> {
        let mut exec = MutationExecutor::new(schema, &mut self.data, &mut self.pending)
            .max_depth(self.config.max_include_depth);
        let entity = op.entity.as_str();
        let one = |r: roster_core::Record| OperationResult::Record(Some(r));
        match &op.action {
            Action::Create { data, selection } => exec.create(entity, data, selection).map(one),
            Action::CreateMany(args) => exec.create_many(entity, args).map(OperationResult::Batch),
            Action::CreateManyAndReturn { args, selection } => exec
                .create_many_and_return(entity, args, selection)
                .map(OperationResult::Records),
            Action::Update {
                unique,
                data,
                selection,
            } => exec.update(entity, unique, data, selection).map(one),
            Action::UpdateMany(args) => exec.update_many(entity, args).map(OperationResult::Batch),
            Action::UpdateManyAndReturn { args, selection } => exec
                .update_many_and_return(entity, args, selection)
                .map(OperationResult::Records),
            Action::Upsert { args, selection } => exec.upsert(entity, args, selection).map(one),
            Action::Delete { unique, selection } => exec.delete(entity, unique, selection).map(one),
            Action::DeleteMany(args) => exec.delete_many(entity, args).map(OperationResult::Batch),
            other => Err(Error::internal(format!("{} is not a write", other.name()))),
        }
    }

    /// Load what `op` needs, then execute it.
    #[tracing::instrument(level = "debug", skip(self, cx, store, op), fields(entity = %op.entity, action = op.name()))]
    pub async fn run<S: Store>(
        &mut self,
        cx: &Cx,
        store: &S,
        op: &Operation,
    ) -> Outcome<OperationResult, Error> {
        try_result!(self.ensure_active());
        try_result!(self.schema.request_entity(&op.entity).map(|_| ()));
        let entities = op.required_entities(&self.schema);
        try_outcome!(self.ensure_loaded(cx, store, &entities).await);
        match self.execute(op) {
            Ok(result) => Outcome::Ok(result),
            Err(err) => Outcome::Err(err),
        }
    }

    /// Publish every pending write atomically.
    ///
    /// Returns the number of writes applied. Read-only transactions still
    /// go through the store so serializable reads are validated.
    #[tracing::instrument(level = "debug", skip(self, cx, store))]
    pub async fn commit<S: Store>(mut self, cx: &Cx, store: &S) -> Outcome<u64, Error> {
        try_result!(self.ensure_active());
        try_result!(self.check_deadline());
        if let Some(reason) = cx.cancel_reason() {
            self.close(Error::internal("commit cancelled"));
            return Outcome::Cancelled(reason);
        }

        let changes = ChangeSet {
            ops: std::mem::take(&mut self.pending),
            read_versions: std::mem::take(&mut self.read_versions),
            isolation: self.options.isolation_level,
            deadline: self.started.checked_add(self.options.timeout),
        };
        tracing::info!(writes = changes.ops.len(), "Committing transaction");
        match store.commit(cx, changes).await {
            Outcome::Ok(applied) => {
                tracing::info!(applied, "Transaction committed");
                Outcome::Ok(applied)
            }
            Outcome::Err(err) => Outcome::Err(self.close(err)),
            Outcome::Cancelled(reason) => {
                self.close(Error::internal("commit cancelled"));
                Outcome::Cancelled(reason)
            }
            Outcome::Panicked(payload) => Outcome::Panicked(payload),
        }
    }

    /// Discard every pending write.
    pub fn rollback(self) {
        if self.state == TransactionState::Active {
            tracing::info!(discarded = self.pending.len(), "Rolling back transaction");
        }
    }

    // ========================================================================
    // One-shot forms
    // ========================================================================

    async fn run_once<S: Store>(
        cx: &Cx,
        schema: &Arc<Schema>,
        config: &SessionConfig,
        store: &S,
        op: &Operation,
        options: TransactionOptions,
    ) -> Outcome<OperationResult, Error> {
        let mut tx = Transaction::new(Arc::clone(schema), config.clone(), options);
        let result = match tx.run(cx, store, op).await {
            Outcome::Ok(result) => result,
            other => {
                tx.rollback();
                return other;
            }
        };
        try_outcome!(tx.commit(cx, store).await);
        Outcome::Ok(result)
    }

    /// Run one operation in its own transaction.
    ///
    /// An upsert whose commit loses a unique race is retried once in a fresh
    /// transaction, which then sees the competing row and updates it.
    pub async fn standalone<S: Store>(
        cx: &Cx,
        schema: &Arc<Schema>,
        config: &SessionConfig,
        store: &S,
        op: &Operation,
    ) -> Outcome<OperationResult, Error> {
        let options = config.default_transaction;
        match Self::run_once(cx, schema, config, store, op, options).await {
            Outcome::Err(err)
                if config.upsert_retry
                    && matches!(op.action, Action::Upsert { .. })
                    && err.is_unique_violation() =>
            {
                tracing::warn!(entity = %op.entity, error = %err, "upsert lost a unique race, retrying once");
                Self::run_once(cx, schema, config, store, op, options).await
            }
            other => other,
        }
    }

    /// Run `ops` in order inside one transaction, all or nothing.
    #[tracing::instrument(level = "debug", skip(cx, schema, config, store, ops), fields(ops = ops.len()))]
    pub async fn batch<S: Store>(
        cx: &Cx,
        schema: &Arc<Schema>,
        config: &SessionConfig,
        store: &S,
        ops: &[Operation],
        options: TransactionOptions,
    ) -> Outcome<Vec<OperationResult>, Error> {
        let mut tx = Transaction::new(Arc::clone(schema), config.clone(), options);
        let mut results = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            match tx.run(cx, store, op).await {
                Outcome::Ok(result) => results.push(result),
                other => {
                    tracing::debug!(index, entity = %op.entity, action = op.name(), "batch operation failed");
                    tx.rollback();
                    return match other {
                        Outcome::Err(e) => Outcome::Err(e),
                        Outcome::Cancelled(r) => Outcome::Cancelled(r),
                        Outcome::Panicked(p) => Outcome::Panicked(p),
                        Outcome::Ok(_) => Outcome::Err(Error::internal("unreachable batch state")),
                    };
                }
            }
        }
        try_outcome!(tx.commit(cx, store).await);
        Outcome::Ok(results)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{CreateInput, RelationWrite, UpdateInput};
    use asupersync::runtime::RuntimeBuilder;
    use crate::test_support::{school_fixture, school_schema};
    use roster_core::{IsolationLevel, Record, TableSource, Value};
    use roster_memory::MemoryStore;
    use roster_query::{FindArgs, UniqueWhere};
    use std::time::Duration;

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
        match outcome {
            Outcome::Err(e) => e,
            Outcome::Ok(_) => panic!("expected an error"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn seeded_store(schema: &Arc<Schema>) -> MemoryStore {
        let store = MemoryStore::new(Arc::clone(schema));
        let data = school_fixture();
        for entity in data.entities() {
            let rows: Vec<Record> = data.rows(entity).unwrap().to_vec();
            store.seed(entity, rows).unwrap();
        }
        store
    }

    #[test]
    fn test_writes_stay_private_until_commit() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let schema = Arc::new(school_schema());
        let store = seeded_store(&schema);

        rt.block_on(async {
            let mut tx = Transaction::new(Arc::clone(&schema), SessionConfig::default(), TransactionOptions::default());
            let create = Operation::create(
                "School",
                CreateInput::new().set("id", "s3").set("name", "East"),
            );
            unwrap_outcome(tx.run(&cx, &store, &create).await);

            let count = Operation::count("School", FindArgs::new());
            let inside = unwrap_outcome(tx.run(&cx, &store, &count).await);
            assert_eq!(inside.into_count().unwrap(), 3);
            assert_eq!(store.rows("School").len(), 2);

            assert_eq!(unwrap_outcome(tx.commit(&cx, &store).await), 1);
            assert_eq!(store.rows("School").len(), 3);
        });
    }

    #[test]
    fn test_failed_write_restores_working_set() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let schema = Arc::new(school_schema());
        let store = seeded_store(&schema);

        rt.block_on(async {
            let mut tx = Transaction::new(Arc::clone(&schema), SessionConfig::default(), TransactionOptions::default());
            let ok = Operation::update(
                "School",
                UniqueWhere::id("s1"),
                UpdateInput::new().set("name", "North Hill"),
            );
            unwrap_outcome(tx.run(&cx, &store, &ok).await);
            assert_eq!(tx.pending_writes(), 1);

            // The school and its first class are inserted before the
            // second class collides with the first.
            let bad = Operation::create(
                "School",
                CreateInput::new().set("id", "s3").set("name", "East").relation(
                    "classes",
                    RelationWrite::new()
                        .create(CreateInput::new().set("name", "3A"))
                        .create(CreateInput::new().set("name", "3A")),
                ),
            );
            let err = expect_err(tx.run(&cx, &store, &bad).await);
            assert!(err.is_unique_violation());
            assert_eq!(tx.pending_writes(), 1);
            assert_eq!(tx.state(), TransactionState::Active);

            tx.rollback();
            assert_eq!(store.rows("School")[0].value("name"), &Value::from("North"));
        });
    }

    #[test]
    fn test_serializable_detects_concurrent_change() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let schema = Arc::new(school_schema());
        let store = seeded_store(&schema);
        let config = SessionConfig::default();

        rt.block_on(async {
            let options = TransactionOptions::new().isolation_level(IsolationLevel::Serializable);
            let mut tx = Transaction::new(Arc::clone(&schema), config.clone(), options);
            let read = Operation::count("School", FindArgs::new());
            unwrap_outcome(tx.run(&cx, &store, &read).await);

            let other = Operation::create("School", CreateInput::new().set("name", "West"));
            unwrap_outcome(Transaction::standalone(&cx, &schema, &config, &store, &other).await);

            let err = expect_err(tx.commit(&cx, &store).await);
            assert!(matches!(
                err,
                Error::Store(StoreError {
                    kind: StoreErrorKind::SerializationFailure,
                    ..
                })
            ));
            assert!(err.is_retryable());
        });
    }

    #[test]
    fn test_timeout_rolls_back() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let schema = Arc::new(school_schema());
        let store = seeded_store(&schema);

        rt.block_on(async {
            let options = TransactionOptions::new().timeout(Duration::ZERO);
            let mut tx = Transaction::new(Arc::clone(&schema), SessionConfig::default(), options);
            let op = Operation::find_many("School", FindArgs::new());
            let err = expect_err(tx.run(&cx, &store, &op).await);
            assert!(matches!(
                err,
                Error::Store(StoreError {
                    kind: StoreErrorKind::Timeout,
                    ..
                })
            ));
            assert_eq!(tx.state(), TransactionState::RolledBack);
            // Later calls keep reporting the timeout.
            assert_eq!(expect_err(tx.run(&cx, &store, &op).await), err);
        });
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let schema = Arc::new(school_schema());
        let store = seeded_store(&schema);
        let config = SessionConfig::default();

        rt.block_on(async {
            let ops = vec![
                Operation::create("School", CreateInput::new().set("name", "East")),
                Operation::create(
                    "Class",
                    CreateInput::new().set("name", "1A").set("schoolId", "s1"),
                ),
            ];
            let err = expect_err(
                Transaction::batch(&cx, &schema, &config, &store, &ops, TransactionOptions::default()).await,
            );
            assert!(err.is_unique_violation());
            assert_eq!(store.rows("School").len(), 2);

            let ops = vec![
                Operation::create("School", CreateInput::new().set("name", "East")),
                Operation::count("School", FindArgs::new()),
            ];
            let results = unwrap_outcome(
                Transaction::batch(&cx, &schema, &config, &store, &ops, TransactionOptions::default()).await,
            );
            assert_eq!(results[1].clone().into_count().unwrap(), 3);
            assert_eq!(store.rows("School").len(), 3);
        });
    }

    #[test]
    fn test_unknown_entity_is_a_validation_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let schema = Arc::new(school_schema());
        let store = seeded_store(&schema);

        rt.block_on(async {
            let op = Operation::find_many("Teacher", FindArgs::new());
            let err = expect_err(
                Transaction::standalone(&cx, &schema, &SessionConfig::default(), &store, &op).await,
            );
            assert!(err.is_validation());
        });
    }
}
