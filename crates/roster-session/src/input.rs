//! Write payloads: create and update data, nested relation writes and the
//! bulk argument forms.

use std::collections::BTreeMap;

use roster_core::{Record, Value};
pub use roster_core::FieldUpdate;
use roster_query::{Filter, UniqueWhere};

/// Data for one created row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateInput {
    /// Scalar values, foreign keys included.
    pub values: BTreeMap<String, Value>,
    /// Nested writes keyed by relation field.
    pub relations: BTreeMap<String, RelationWrite>,
}

impl CreateInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: impl Into<String>, write: RelationWrite) -> Self {
        self.relations.insert(relation.into(), write);
        self
    }

    /// Link an existing row through `relation`.
    #[must_use]
    pub fn connect(self, relation: impl Into<String>, target: UniqueWhere) -> Self {
        self.relation(relation, RelationWrite::new().connect(target))
    }

    /// Create a related row through `relation`.
    #[must_use]
    pub fn create_related(self, relation: impl Into<String>, data: CreateInput) -> Self {
        self.relation(relation, RelationWrite::new().create(data))
    }
}

impl From<Record> for CreateInput {
    fn from(record: Record) -> Self {
        Self {
            values: record
                .fields()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            relations: BTreeMap::new(),
        }
    }
}

/// `connectOrCreate` entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectOrCreate {
    pub unique: UniqueWhere,
    pub create: CreateInput,
}

/// Nested writes on one relation field.
///
/// To-one relations take at most one of `create`, `connect` and
/// `connect_or_create`, or `disconnect_one` on update. To-many relations
/// take any combination, plus `disconnect` and `set` on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationWrite {
    pub create: Vec<CreateInput>,
    pub create_many: Option<CreateManyArgs>,
    pub connect: Vec<UniqueWhere>,
    pub connect_or_create: Vec<ConnectOrCreate>,
    pub disconnect: Vec<UniqueWhere>,
    pub disconnect_one: bool,
    /// Replace the whole related set.
    pub set: Option<Vec<UniqueWhere>>,
}

impl RelationWrite {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn create(mut self, data: CreateInput) -> Self {
        self.create.push(data);
        self
    }

    #[must_use]
    pub fn create_many(mut self, args: CreateManyArgs) -> Self {
        self.create_many = Some(args);
        self
    }

    #[must_use]
    pub fn connect(mut self, target: UniqueWhere) -> Self {
        self.connect.push(target);
        self
    }

    #[must_use]
    pub fn connect_or_create(mut self, unique: UniqueWhere, create: CreateInput) -> Self {
        self.connect_or_create.push(ConnectOrCreate { unique, create });
        self
    }

    #[must_use]
    pub fn disconnect(mut self, target: UniqueWhere) -> Self {
        self.disconnect.push(target);
        self
    }

    /// Unlink a to-one relation.
    #[must_use]
    pub fn disconnect_one(mut self) -> Self {
        self.disconnect_one = true;
        self
    }

    #[must_use]
    pub fn set<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = UniqueWhere>,
    {
        self.set = Some(targets.into_iter().collect());
        self
    }

    /// Number of row-linking operations, used to enforce the to-one rule.
    pub(crate) fn link_count(&self) -> usize {
        self.create.len() + self.connect.len() + self.connect_or_create.len()
    }

    pub(crate) fn has_update_only_ops(&self) -> bool {
        !self.disconnect.is_empty() || self.disconnect_one || self.set.is_some()
    }
}

/// Data for an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateInput {
    pub fields: BTreeMap<String, FieldUpdate>,
    pub relations: BTreeMap<String, RelationWrite>,
}

impl UpdateInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldUpdate::Set(value.into()));
        self
    }

    #[must_use]
    pub fn increment(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldUpdate::Increment(by.into()));
        self
    }

    #[must_use]
    pub fn decrement(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldUpdate::Decrement(by.into()));
        self
    }

    #[must_use]
    pub fn multiply(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldUpdate::Multiply(by.into()));
        self
    }

    #[must_use]
    pub fn divide(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldUpdate::Divide(by.into()));
        self
    }

    #[must_use]
    pub fn push(mut self, field: impl Into<String>, item: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldUpdate::Push(item.into()));
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: impl Into<String>, write: RelationWrite) -> Self {
        self.relations.insert(relation.into(), write);
        self
    }

    #[must_use]
    pub fn connect(self, relation: impl Into<String>, target: UniqueWhere) -> Self {
        self.relation(relation, RelationWrite::new().connect(target))
    }

    /// Unlink a to-one relation.
    #[must_use]
    pub fn disconnect(self, relation: impl Into<String>) -> Self {
        self.relation(relation, RelationWrite::new().disconnect_one())
    }
}

/// Arguments of `createMany`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateManyArgs {
    /// Scalar-only rows.
    pub data: Vec<CreateInput>,
    /// Skip rows that violate a unique constraint instead of failing.
    pub skip_duplicates: bool,
}

impl CreateManyArgs {
    pub fn new(data: impl IntoIterator<Item = CreateInput>) -> Self {
        Self {
            data: data.into_iter().collect(),
            skip_duplicates: false,
        }
    }

    #[must_use]
    pub fn skip_duplicates(mut self) -> Self {
        self.skip_duplicates = true;
        self
    }
}

/// Arguments of `updateMany`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateManyArgs {
    pub filter: Option<Filter>,
    /// Scalar-only changes.
    pub data: UpdateInput,
    /// Cap on affected rows, taken in store order.
    pub limit: Option<u64>,
}

impl UpdateManyArgs {
    #[must_use]
    pub fn new(data: UpdateInput) -> Self {
        Self {
            filter: None,
            data,
            limit: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Arguments of `deleteMany`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteManyArgs {
    pub filter: Option<Filter>,
    pub limit: Option<u64>,
}

impl DeleteManyArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Arguments of `upsert`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertArgs {
    pub unique: UniqueWhere,
    pub create: CreateInput,
    pub update: UpdateInput,
}

impl UpsertArgs {
    #[must_use]
    pub fn new(unique: UniqueWhere, create: CreateInput, update: UpdateInput) -> Self {
        Self {
            unique,
            create,
            update,
        }
    }
}
