//! Operations as data.
//!
//! An [`Operation`] names an entity and one action with its arguments. The
//! batch transaction form runs a list of them, and every delegate call is
//! turned into one before it reaches a transaction.

use std::collections::BTreeSet;

use roster_core::{BatchResult, Error, Record, Result, Schema};
use roster_query::{
    AggregateArgs, AggregateResult, FindArgs, GroupByArgs, GroupRow, Selection, UniqueWhere,
    find_entities, group_entities, selection_entities,
};
use serde::{Serialize, Serializer};

use crate::input::{
    CreateInput, CreateManyArgs, DeleteManyArgs, UpdateInput, UpdateManyArgs, UpsertArgs,
};

/// One action with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    FindUnique {
        unique: UniqueWhere,
        selection: Selection,
    },
    FindUniqueOrThrow {
        unique: UniqueWhere,
        selection: Selection,
    },
    FindFirst(FindArgs),
    FindFirstOrThrow(FindArgs),
    FindMany(FindArgs),
    Create {
        data: CreateInput,
        selection: Selection,
    },
    CreateMany(CreateManyArgs),
    CreateManyAndReturn {
        args: CreateManyArgs,
        selection: Selection,
    },
    Update {
        unique: UniqueWhere,
        data: UpdateInput,
        selection: Selection,
    },
    UpdateMany(UpdateManyArgs),
    UpdateManyAndReturn {
        args: UpdateManyArgs,
        selection: Selection,
    },
    Upsert {
        args: UpsertArgs,
        selection: Selection,
    },
    Delete {
        unique: UniqueWhere,
        selection: Selection,
    },
    DeleteMany(DeleteManyArgs),
    Count(FindArgs),
    Aggregate(AggregateArgs),
    GroupBy(GroupByArgs),
}

impl Action {
    /// Operation name as callers know it.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Action::FindUnique { .. } => "findUnique",
            Action::FindUniqueOrThrow { .. } => "findUniqueOrThrow",
            Action::FindFirst(_) => "findFirst",
            Action::FindFirstOrThrow(_) => "findFirstOrThrow",
            Action::FindMany(_) => "findMany",
            Action::Create { .. } => "create",
            Action::CreateMany(_) => "createMany",
            Action::CreateManyAndReturn { .. } => "createManyAndReturn",
            Action::Update { .. } => "update",
            Action::UpdateMany(_) => "updateMany",
            Action::UpdateManyAndReturn { .. } => "updateManyAndReturn",
            Action::Upsert { .. } => "upsert",
            Action::Delete { .. } => "delete",
            Action::DeleteMany(_) => "deleteMany",
            Action::Count(_) => "count",
            Action::Aggregate(_) => "aggregate",
            Action::GroupBy(_) => "groupBy",
        }
    }

    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(
            self,
            Action::FindUnique { .. }
                | Action::FindUniqueOrThrow { .. }
                | Action::FindFirst(_)
                | Action::FindFirstOrThrow(_)
                | Action::FindMany(_)
                | Action::Count(_)
                | Action::Aggregate(_)
                | Action::GroupBy(_)
        )
    }

    /// The result selection, for actions that return records.
    #[must_use]
    pub fn selection(&self) -> Option<&Selection> {
        match self {
            Action::FindUnique { selection, .. }
            | Action::FindUniqueOrThrow { selection, .. }
            | Action::Create { selection, .. }
            | Action::CreateManyAndReturn { selection, .. }
            | Action::Update { selection, .. }
            | Action::UpdateManyAndReturn { selection, .. }
            | Action::Upsert { selection, .. }
            | Action::Delete { selection, .. } => Some(selection),
            Action::FindFirst(args) | Action::FindFirstOrThrow(args) | Action::FindMany(args) => {
                Some(&args.selection)
            }
            _ => None,
        }
    }

    fn selection_mut(&mut self) -> Option<&mut Selection> {
        match self {
            Action::FindUnique { selection, .. }
            | Action::FindUniqueOrThrow { selection, .. }
            | Action::Create { selection, .. }
            | Action::CreateManyAndReturn { selection, .. }
            | Action::Update { selection, .. }
            | Action::UpdateManyAndReturn { selection, .. }
            | Action::Upsert { selection, .. }
            | Action::Delete { selection, .. } => Some(selection),
            Action::FindFirst(args) | Action::FindFirstOrThrow(args) | Action::FindMany(args) => {
                Some(&mut args.selection)
            }
            _ => None,
        }
    }
}

/// An action on one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub entity: String,
    pub action: Action,
}

impl Operation {
    pub fn new(entity: impl Into<String>, action: Action) -> Self {
        Self {
            entity: entity.into(),
            action,
        }
    }

    pub fn find_unique(entity: impl Into<String>, unique: UniqueWhere) -> Self {
        Self::new(
            entity,
            Action::FindUnique {
                unique,
                selection: Selection::default(),
            },
        )
    }

    pub fn find_first(entity: impl Into<String>, args: FindArgs) -> Self {
        Self::new(entity, Action::FindFirst(args))
    }

    pub fn find_many(entity: impl Into<String>, args: FindArgs) -> Self {
        Self::new(entity, Action::FindMany(args))
    }

    pub fn create(entity: impl Into<String>, data: CreateInput) -> Self {
        Self::new(
            entity,
            Action::Create {
                data,
                selection: Selection::default(),
            },
        )
    }

    pub fn create_many(entity: impl Into<String>, args: CreateManyArgs) -> Self {
        Self::new(entity, Action::CreateMany(args))
    }

    pub fn update(entity: impl Into<String>, unique: UniqueWhere, data: UpdateInput) -> Self {
        Self::new(
            entity,
            Action::Update {
                unique,
                data,
                selection: Selection::default(),
            },
        )
    }

    pub fn update_many(entity: impl Into<String>, args: UpdateManyArgs) -> Self {
        Self::new(entity, Action::UpdateMany(args))
    }

    pub fn upsert(entity: impl Into<String>, args: UpsertArgs) -> Self {
        Self::new(
            entity,
            Action::Upsert {
                args,
                selection: Selection::default(),
            },
        )
    }

    pub fn delete(entity: impl Into<String>, unique: UniqueWhere) -> Self {
        Self::new(
            entity,
            Action::Delete {
                unique,
                selection: Selection::default(),
            },
        )
    }

    pub fn delete_many(entity: impl Into<String>, args: DeleteManyArgs) -> Self {
        Self::new(entity, Action::DeleteMany(args))
    }

    pub fn count(entity: impl Into<String>, args: FindArgs) -> Self {
        Self::new(entity, Action::Count(args))
    }

    pub fn aggregate(entity: impl Into<String>, args: AggregateArgs) -> Self {
        Self::new(entity, Action::Aggregate(args))
    }

    pub fn group_by(entity: impl Into<String>, args: GroupByArgs) -> Self {
        Self::new(entity, Action::GroupBy(args))
    }

    /// Replace the result selection. No effect on actions returning counts,
    /// aggregates or groups.
    #[must_use]
    pub fn with_selection(mut self, selection: Selection) -> Self {
        if let Some(slot) = self.action.selection_mut() {
            *slot = selection;
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.action.name()
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.action.is_write()
    }

    /// Tables that must be loaded before this operation runs.
    ///
    /// Writes load every entity connected to theirs, since nested writes,
    /// key checks and delete policies can reach any of them.
    #[must_use]
    pub fn required_entities(&self, schema: &Schema) -> BTreeSet<String> {
        let entity = self.entity.as_str();
        if self.is_write() {
            return schema.related_closure(entity);
        }
        match &self.action {
            Action::FindFirst(args)
            | Action::FindFirstOrThrow(args)
            | Action::FindMany(args)
            | Action::Count(args) => find_entities(schema, entity, args),
            Action::Aggregate(args) => find_entities(schema, entity, &args.rows),
            Action::GroupBy(args) => group_entities(schema, entity, args),
            Action::FindUnique { selection, .. } | Action::FindUniqueOrThrow { selection, .. } => {
                let mut out = BTreeSet::from([entity.to_string()]);
                selection_entities(schema, entity, selection, &mut out);
                out
            }
            _ => schema.related_closure(entity),
        }
    }
}

/// What an operation returns.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Record(Option<Record>),
    Records(Vec<Record>),
    Batch(BatchResult),
    Count(u64),
    Aggregate(AggregateResult),
    Groups(Vec<GroupRow>),
}

fn shape_mismatch(expected: &str, found: &OperationResult) -> Error {
    Error::internal(format!("expected {expected} result, got {}", found.kind()))
}

impl OperationResult {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            OperationResult::Record(_) => "record",
            OperationResult::Records(_) => "records",
            OperationResult::Batch(_) => "batch",
            OperationResult::Count(_) => "count",
            OperationResult::Aggregate(_) => "aggregate",
            OperationResult::Groups(_) => "groups",
        }
    }

    pub fn into_record(self) -> Result<Option<Record>> {
        match self {
            OperationResult::Record(record) => Ok(record),
            other => Err(shape_mismatch("record", &other)),
        }
    }

    pub fn into_records(self) -> Result<Vec<Record>> {
        match self {
            OperationResult::Records(records) => Ok(records),
            other => Err(shape_mismatch("records", &other)),
        }
    }

    pub fn into_batch(self) -> Result<BatchResult> {
        match self {
            OperationResult::Batch(batch) => Ok(batch),
            other => Err(shape_mismatch("batch", &other)),
        }
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            OperationResult::Count(n) => Ok(n),
            other => Err(shape_mismatch("count", &other)),
        }
    }

    pub fn into_aggregate(self) -> Result<AggregateResult> {
        match self {
            OperationResult::Aggregate(result) => Ok(result),
            other => Err(shape_mismatch("aggregate", &other)),
        }
    }

    pub fn into_groups(self) -> Result<Vec<GroupRow>> {
        match self {
            OperationResult::Groups(groups) => Ok(groups),
            other => Err(shape_mismatch("groups", &other)),
        }
    }

    /// Render as plain JSON data.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            OperationResult::Record(Some(record)) => record.to_json(),
            OperationResult::Record(None) => serde_json::Value::Null,
            OperationResult::Records(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
            OperationResult::Batch(batch) => serde_json::json!({ "count": batch.count }),
            OperationResult::Count(n) => serde_json::json!(n),
            OperationResult::Aggregate(result) => result.to_json(),
            OperationResult::Groups(groups) => {
                serde_json::Value::Array(groups.iter().map(GroupRow::to_json).collect())
            }
        }
    }
}

impl Serialize for OperationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
