//! Interactive transactions.

use std::fmt;
use std::sync::Arc;

use asupersync::sync::Mutex;
use roster_core::{Cx, Error, Outcome, Result, Schema, Store, TransactionOptions, try_result};
use roster_session::{Operation, OperationResult, Transaction, TransactionState};

use crate::config::ClientConfig;
use crate::delegate::{EntityDelegate, Target, check_shape};

fn closed() -> Error {
    Error::internal("transaction is no longer open")
}

/// A client bound to one open transaction.
///
/// Operations run through its delegates see the transaction's own writes
/// and nothing else. The transaction ends with [`Self::commit`] or
/// [`Self::rollback`]; dropping it without either discards its writes.
pub struct TransactionClient<S: Store> {
    schema: Arc<Schema>,
    store: Arc<S>,
    inner: Mutex<Option<Transaction>>,
}

impl<S: Store> fmt::Debug for TransactionClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionClient")
            .field("entities", &self.schema.entities().count())
            .field("inner", &"Mutex<Option<Transaction>>")
            .finish_non_exhaustive()
    }
}

impl<S: Store> TransactionClient<S> {
    pub(crate) fn new(
        schema: Arc<Schema>,
        store: Arc<S>,
        config: ClientConfig,
        options: TransactionOptions,
    ) -> Self {
        let tx = Transaction::new(Arc::clone(&schema), config.session, options);
        Self {
            schema,
            store,
            inner: Mutex::new(Some(tx)),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Operations on the entity called `name`, inside this transaction.
    pub fn model(&self, name: &str) -> Result<EntityDelegate<'_, S>> {
        let entity = self.schema.request_entity(name)?;
        Ok(EntityDelegate::new(Target::Transaction(self), &entity.name))
    }

    /// Current lifecycle state.
    pub async fn state(&self, cx: &Cx) -> Outcome<TransactionState, Error> {
        let Ok(guard) = self.inner.lock(cx).await else {
            return Outcome::Err(Error::internal("failed to acquire transaction lock"));
        };
        Outcome::Ok(
            guard
                .as_ref()
                .map_or(TransactionState::RolledBack, Transaction::state),
        )
    }

    /// Run one operation inside the transaction.
    ///
    /// A failing operation leaves the transaction as it was before the call;
    /// a timed-out transaction stays rolled back.
    #[tracing::instrument(level = "debug", skip(self, cx, op), fields(entity = %op.entity, action = op.name()))]
    pub async fn execute(&self, cx: &Cx, op: Operation) -> Outcome<OperationResult, Error> {
        try_result!(check_shape(&self.schema, &op));
        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(Error::internal("failed to acquire transaction lock"));
        };
        let Some(tx) = guard.as_mut() else {
            return Outcome::Err(closed());
        };
        tx.run(cx, &*self.store, &op).await
    }

    /// Publish the transaction's writes. Returns the number applied.
    pub async fn commit(self, cx: &Cx) -> Outcome<u64, Error> {
        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(Error::internal("failed to acquire transaction lock"));
        };
        let Some(tx) = guard.take() else {
            return Outcome::Err(closed());
        };
        tx.commit(cx, &*self.store).await
    }

    /// Discard the transaction's writes.
    pub async fn rollback(self, cx: &Cx) -> Outcome<(), Error> {
        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(Error::internal("failed to acquire transaction lock"));
        };
        if let Some(tx) = guard.take() {
            tx.rollback();
        }
        Outcome::Ok(())
    }
}
