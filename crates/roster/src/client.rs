//! The client: entry point for every operation.

use std::sync::Arc;

use roster_core::{Cx, Error, Outcome, Result, Schema, Store, TransactionOptions, try_result};
use roster_memory::MemoryStore;
use roster_session::{Operation, OperationResult, Transaction};

use crate::config::ClientConfig;
use crate::delegate::{EntityDelegate, Target, check_shape};
use crate::transaction::TransactionClient;

/// A handle on one schema and one store.
///
/// Cloning is cheap; clones share the schema and the store.
#[derive(Debug)]
pub struct Client<S: Store> {
    schema: Arc<Schema>,
    store: Arc<S>,
    config: ClientConfig,
}

impl<S: Store> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: Store> Client<S> {
    pub fn new(schema: Arc<Schema>, store: S) -> Self {
        Self::builder(schema).build(store)
    }

    #[must_use]
    pub fn builder(schema: Arc<Schema>) -> ClientBuilder {
        ClientBuilder::new(schema)
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Operations on the entity called `name`.
    pub fn model(&self, name: &str) -> Result<EntityDelegate<'_, S>> {
        let entity = self.schema.request_entity(name)?;
        Ok(EntityDelegate::new(Target::Client(self), &entity.name))
    }

    /// Run one operation in its own transaction.
    #[tracing::instrument(level = "debug", skip(self, cx, op), fields(entity = %op.entity, action = op.name()))]
    pub async fn execute(&self, cx: &Cx, op: Operation) -> Outcome<OperationResult, Error> {
        try_result!(check_shape(&self.schema, &op));
        Transaction::standalone(cx, &self.schema, &self.config.session, &*self.store, &op).await
    }

    /// Run `ops` in order inside one transaction. Either every operation
    /// takes effect or none does.
    #[tracing::instrument(level = "debug", skip(self, cx, ops, options), fields(ops = ops.len()))]
    pub async fn batch_transaction(
        &self,
        cx: &Cx,
        ops: Vec<Operation>,
        options: Option<TransactionOptions>,
    ) -> Outcome<Vec<OperationResult>, Error> {
        for op in &ops {
            try_result!(check_shape(&self.schema, op));
        }
        let options = options.unwrap_or(self.config.session.default_transaction);
        Transaction::batch(cx, &self.schema, &self.config.session, &*self.store, &ops, options)
            .await
    }

    /// Open an interactive transaction.
    ///
    /// Nothing is published until [`TransactionClient::commit`].
    pub fn begin(&self, options: Option<TransactionOptions>) -> TransactionClient<S> {
        let options = options.unwrap_or(self.config.session.default_transaction);
        TransactionClient::new(
            Arc::clone(&self.schema),
            Arc::clone(&self.store),
            self.config.clone(),
            options,
        )
    }

    /// Run `body` inside an interactive transaction.
    ///
    /// Commits when `body` returns `Ok`; rolls back on anything else and
    /// returns that outcome. `body` only borrows the transaction, so it
    /// cannot commit or roll back itself.
    ///
    /// ```rust,ignore
    /// let moved = client
    ///     .transaction(&cx, None, async |cx, tx| {
    ///         tx.student().update(cx, UniqueWhere::id("t1"), data, Selection::new()).await
    ///     })
    ///     .await;
    /// ```
    pub async fn transaction<T, F>(
        &self,
        cx: &Cx,
        options: Option<TransactionOptions>,
        body: F,
    ) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&Cx, &TransactionClient<S>) -> Outcome<T, Error>,
    {
        let tx = self.begin(options);
        match body(cx, &tx).await {
            Outcome::Ok(value) => match tx.commit(cx).await {
                Outcome::Ok(_) => Outcome::Ok(value),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            other => {
                // A failed rollback cannot hide the body's outcome.
                let _ = tx.rollback(cx).await;
                other
            }
        }
    }
}

impl Client<MemoryStore> {
    /// A client over a fresh, empty in-memory store.
    #[must_use]
    pub fn in_memory(schema: Arc<Schema>) -> Self {
        let store = MemoryStore::new(Arc::clone(&schema));
        Self::new(schema, store)
    }
}

/// Builder for [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    schema: Arc<Schema>,
    config: ClientConfig,
}

impl ClientBuilder {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            config: ClientConfig::default(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build<S: Store>(self, store: S) -> Client<S> {
        tracing::debug!(
            entities = self.schema.entities().count(),
            max_include_depth = self.config.session.max_include_depth,
            "Client created"
        );
        Client {
            schema: self.schema,
            store: Arc::new(store),
            config: self.config,
        }
    }

    /// Build over a store that is already shared.
    pub fn build_shared<S: Store>(self, store: Arc<S>) -> Client<S> {
        Client {
            schema: self.schema,
            store,
            config: self.config,
        }
    }
}
