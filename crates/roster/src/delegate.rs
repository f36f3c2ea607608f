//! Per-entity operation delegates.

use roster_core::{BatchResult, Cx, Error, Outcome, Record, Result, Schema, Store};
use roster_query::{
    AggregateArgs, AggregateResult, FindArgs, GroupByArgs, GroupRow, Selection, UniqueWhere,
};
use roster_session::{
    Action, CreateInput, CreateManyArgs, DeleteManyArgs, Operation, OperationResult, UpdateInput,
    UpdateManyArgs, UpsertArgs,
};

use crate::client::Client;
use crate::transaction::TransactionClient;

/// Reject requests whose shape is wrong before any table is loaded.
pub(crate) fn check_shape(schema: &Schema, op: &Operation) -> Result<()> {
    schema.request_entity(&op.entity)?;
    if let Some(selection) = op.action.selection() {
        selection.check_exclusive()?;
    }
    Ok(())
}

/// Where a delegate sends its operations.
#[derive(Debug)]
pub(crate) enum Target<'a, S: Store> {
    Client(&'a Client<S>),
    Transaction(&'a TransactionClient<S>),
}

impl<S: Store> Clone for Target<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: Store> Copy for Target<'_, S> {}

impl<S: Store> Target<'_, S> {
    async fn execute(&self, cx: &Cx, op: Operation) -> Outcome<OperationResult, Error> {
        match self {
            Target::Client(client) => client.execute(cx, op).await,
            Target::Transaction(tx) => tx.execute(cx, op).await,
        }
    }
}

fn map_result<T>(
    outcome: Outcome<OperationResult, Error>,
    convert: impl FnOnce(OperationResult) -> Result<T>,
) -> Outcome<T, Error> {
    match outcome {
        Outcome::Ok(result) => match convert(result) {
            Ok(value) => Outcome::Ok(value),
            Err(e) => Outcome::Err(e),
        },
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

fn required(result: OperationResult) -> Result<Record> {
    result
        .into_record()?
        .ok_or_else(|| Error::internal("operation returned no record"))
}

/// Every operation on one entity.
///
/// Obtained from [`Client::model`], [`TransactionClient::model`] or one of
/// the typed school accessors. Operations on a client delegate each run in
/// their own transaction; operations on a transaction delegate join it.
#[derive(Debug)]
pub struct EntityDelegate<'a, S: Store> {
    target: Target<'a, S>,
    entity: &'a str,
}

impl<S: Store> Clone for EntityDelegate<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: Store> Copy for EntityDelegate<'_, S> {}

impl<'a, S: Store> EntityDelegate<'a, S> {
    pub(crate) fn new(target: Target<'a, S>, entity: &'a str) -> Self {
        Self { target, entity }
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        self.entity
    }

    async fn run(&self, cx: &Cx, action: Action) -> Outcome<OperationResult, Error> {
        self.target
            .execute(cx, Operation::new(self.entity, action))
            .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn find_unique(
        &self,
        cx: &Cx,
        unique: UniqueWhere,
        selection: Selection,
    ) -> Outcome<Option<Record>, Error> {
        let outcome = self.run(cx, Action::FindUnique { unique, selection }).await;
        map_result(outcome, OperationResult::into_record)
    }

    /// Like [`Self::find_unique`], failing with a not-found error on no match.
    pub async fn find_unique_or_throw(
        &self,
        cx: &Cx,
        unique: UniqueWhere,
        selection: Selection,
    ) -> Outcome<Record, Error> {
        let outcome = self
            .run(cx, Action::FindUniqueOrThrow { unique, selection })
            .await;
        map_result(outcome, required)
    }

    pub async fn find_first(&self, cx: &Cx, args: FindArgs) -> Outcome<Option<Record>, Error> {
        let outcome = self.run(cx, Action::FindFirst(args)).await;
        map_result(outcome, OperationResult::into_record)
    }

    pub async fn find_first_or_throw(&self, cx: &Cx, args: FindArgs) -> Outcome<Record, Error> {
        let outcome = self.run(cx, Action::FindFirstOrThrow(args)).await;
        map_result(outcome, required)
    }

    pub async fn find_many(&self, cx: &Cx, args: FindArgs) -> Outcome<Vec<Record>, Error> {
        let outcome = self.run(cx, Action::FindMany(args)).await;
        map_result(outcome, OperationResult::into_records)
    }

    pub async fn count(&self, cx: &Cx, args: FindArgs) -> Outcome<u64, Error> {
        let outcome = self.run(cx, Action::Count(args)).await;
        map_result(outcome, OperationResult::into_count)
    }

    pub async fn aggregate(&self, cx: &Cx, args: AggregateArgs) -> Outcome<AggregateResult, Error> {
        let outcome = self.run(cx, Action::Aggregate(args)).await;
        map_result(outcome, OperationResult::into_aggregate)
    }

    pub async fn group_by(&self, cx: &Cx, args: GroupByArgs) -> Outcome<Vec<GroupRow>, Error> {
        let outcome = self.run(cx, Action::GroupBy(args)).await;
        map_result(outcome, OperationResult::into_groups)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn create(
        &self,
        cx: &Cx,
        data: CreateInput,
        selection: Selection,
    ) -> Outcome<Record, Error> {
        let outcome = self.run(cx, Action::Create { data, selection }).await;
        map_result(outcome, required)
    }

    pub async fn create_many(&self, cx: &Cx, args: CreateManyArgs) -> Outcome<BatchResult, Error> {
        let outcome = self.run(cx, Action::CreateMany(args)).await;
        map_result(outcome, OperationResult::into_batch)
    }

    pub async fn create_many_and_return(
        &self,
        cx: &Cx,
        args: CreateManyArgs,
        selection: Selection,
    ) -> Outcome<Vec<Record>, Error> {
        let outcome = self
            .run(cx, Action::CreateManyAndReturn { args, selection })
            .await;
        map_result(outcome, OperationResult::into_records)
    }

    pub async fn update(
        &self,
        cx: &Cx,
        unique: UniqueWhere,
        data: UpdateInput,
        selection: Selection,
    ) -> Outcome<Record, Error> {
        let outcome = self
            .run(
                cx,
                Action::Update {
                    unique,
                    data,
                    selection,
                },
            )
            .await;
        map_result(outcome, required)
    }

    pub async fn update_many(&self, cx: &Cx, args: UpdateManyArgs) -> Outcome<BatchResult, Error> {
        let outcome = self.run(cx, Action::UpdateMany(args)).await;
        map_result(outcome, OperationResult::into_batch)
    }

    pub async fn update_many_and_return(
        &self,
        cx: &Cx,
        args: UpdateManyArgs,
        selection: Selection,
    ) -> Outcome<Vec<Record>, Error> {
        let outcome = self
            .run(cx, Action::UpdateManyAndReturn { args, selection })
            .await;
        map_result(outcome, OperationResult::into_records)
    }

    /// Update the row `args.unique` identifies, or create it from
    /// `args.create` when there is none.
    pub async fn upsert(
        &self,
        cx: &Cx,
        args: UpsertArgs,
        selection: Selection,
    ) -> Outcome<Record, Error> {
        let outcome = self.run(cx, Action::Upsert { args, selection }).await;
        map_result(outcome, required)
    }

    /// Delete one row, returning it as it was before deletion.
    pub async fn delete(
        &self,
        cx: &Cx,
        unique: UniqueWhere,
        selection: Selection,
    ) -> Outcome<Record, Error> {
        let outcome = self.run(cx, Action::Delete { unique, selection }).await;
        map_result(outcome, required)
    }

    pub async fn delete_many(&self, cx: &Cx, args: DeleteManyArgs) -> Outcome<BatchResult, Error> {
        let outcome = self.run(cx, Action::DeleteMany(args)).await;
        map_result(outcome, OperationResult::into_batch)
    }
}
