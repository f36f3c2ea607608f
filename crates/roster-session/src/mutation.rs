//! Mutation execution against a transaction's working set.
//!
//! Every write goes through [`MutationExecutor`], which edits the in-memory
//! [`Dataset`] and records one [`WriteOp`] per touched row. Integrity is
//! checked as rows change: unique sets, foreign keys, delete policies and
//! required relations. The store re-checks uniqueness and keys at commit.

use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use roster_core::constraint::{check_foreign_keys, check_unique, has_row_with, unique_conflict};
use roster_core::{
    BatchResult, ConstraintError, ConstraintErrorKind, Dataset, DefaultValue, EntityInfo, Error,
    FieldInfo, FieldUpdate, NotFoundError, Record, ReferentialAction, RelationshipInfo, Result,
    Schema, TableSource, ValidationError, ValidationErrorKind, Value, ValueKey, WriteOp,
};
use roster_core::update::apply_field_update;
use roster_core::validate::validate_field_value;
use roster_query::{QueryExecutor, Selection, UniqueWhere, check_unique_where};

use crate::input::{
    CreateInput, CreateManyArgs, DeleteManyArgs, RelationWrite, UpdateInput, UpdateManyArgs,
    UpsertArgs,
};

fn invalid_write(entity: &str, field: &str, message: impl Into<String>) -> Error {
    ValidationError::new(ValidationErrorKind::InvalidRelationWrite, message)
        .entity(entity)
        .field(field)
        .into()
}

fn required_relation(entity: &str, key: &str, message: impl Into<String>) -> Error {
    ConstraintError::new(
        ConstraintErrorKind::RequiredRelation,
        entity,
        vec![key.to_string()],
        message,
    )
    .into()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

fn id_key(id: &Value) -> ValueKey {
    ValueKey::single(id.clone())
}

/// Resolve a scalar field named in write data.
fn write_field<'e>(entity: &'e EntityInfo, name: &str) -> Result<&'e FieldInfo> {
    if let Some(field) = entity.field(name) {
        return Ok(field);
    }
    if entity.relation(name).is_some() {
        return Err(invalid_write(
            &entity.name,
            name,
            format!("`{name}` is a relation and takes a nested write"),
        ));
    }
    Err(ValidationError::new(ValidationErrorKind::UnknownField, format!("unknown field `{name}`"))
        .entity(&entity.name)
        .field(name)
        .into())
}

fn write_relation<'e>(entity: &'e EntityInfo, name: &str) -> Result<&'e RelationshipInfo> {
    entity.relation(name).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::UnknownRelation,
            format!("`{name}` is not a relation field"),
        )
        .entity(&entity.name)
        .field(name)
        .into()
    })
}

fn check_to_one_write(
    entity: &EntityInfo,
    relation: &RelationshipInfo,
    write: &RelationWrite,
    on_update: bool,
) -> Result<()> {
    let name = &relation.name;
    if write.create_many.is_some() || !write.disconnect.is_empty() || write.set.is_some() {
        return Err(invalid_write(
            &entity.name,
            name,
            "createMany, set and disconnect by key apply to to-many relations only",
        ));
    }
    if write.disconnect_one && !on_update {
        return Err(invalid_write(&entity.name, name, "disconnect is only valid on update"));
    }
    match (write.link_count(), write.disconnect_one) {
        (0, true) | (1, false) => Ok(()),
        (0, false) => Err(invalid_write(&entity.name, name, "empty relation write")),
        _ => Err(invalid_write(
            &entity.name,
            name,
            "a to-one relation takes exactly one of create, connect, connectOrCreate or disconnect",
        )),
    }
}

fn check_to_many_write(
    entity: &EntityInfo,
    relation: &RelationshipInfo,
    write: &RelationWrite,
    on_update: bool,
) -> Result<()> {
    if write.disconnect_one {
        return Err(invalid_write(
            &entity.name,
            &relation.name,
            "disconnect on a to-many relation takes the rows to unlink",
        ));
    }
    if !on_update && write.has_update_only_ops() {
        return Err(invalid_write(
            &entity.name,
            &relation.name,
            "set and disconnect are only valid on update",
        ));
    }
    Ok(())
}

/// Executes writes on one working set.
pub struct MutationExecutor<'a> {
    schema: &'a Schema,
    data: &'a mut Dataset,
    pending: &'a mut Vec<WriteOp>,
    max_depth: usize,
}

impl<'a> MutationExecutor<'a> {
    pub fn new(schema: &'a Schema, data: &'a mut Dataset, pending: &'a mut Vec<WriteOp>) -> Self {
        Self {
            schema,
            data,
            pending,
            max_depth: roster_query::DEFAULT_MAX_DEPTH,
        }
    }

    /// Bound on nested writes and on the depth of returned selections.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    fn reader(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(self.schema, &*self.data).max_depth(self.max_depth)
    }

    fn locate(&self, entity: &EntityInfo, unique: &UniqueWhere) -> Result<Option<Record>> {
        Ok(self.reader().find_unique_row(entity, unique)?.cloned())
    }

    fn require(&self, entity: &EntityInfo, unique: &UniqueWhere, action: &str) -> Result<Record> {
        self.locate(entity, unique)?.ok_or_else(|| {
            NotFoundError::new(&entity.name, format!("no {} record found for {action}", entity.name))
                .into()
        })
    }

    fn project_ids(
        &self,
        entity: &EntityInfo,
        ids: &[Value],
        selection: &Selection,
    ) -> Result<Vec<Record>> {
        let id_field = entity.id_field();
        let rows: Vec<&Record> = ids
            .iter()
            .filter_map(|id| self.data.find(&entity.name, id_field, id))
            .collect();
        self.reader().project(entity, &rows, selection, 0)
    }

    fn project_one(&self, entity: &EntityInfo, id: &Value, selection: &Selection) -> Result<Record> {
        self.project_ids(entity, std::slice::from_ref(id), selection)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal(format!("{} row missing after write", entity.name)))
    }

    fn check_depth(&self, entity: &EntityInfo, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(ValidationError::new(
                ValidationErrorKind::DepthExceeded,
                format!("nested writes deeper than {}", self.max_depth),
            )
            .entity(&entity.name)
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // Operations
    // ========================================================================

    #[tracing::instrument(level = "debug", skip(self, data, selection))]
    pub fn create(&mut self, entity: &str, data: &CreateInput, selection: &Selection) -> Result<Record> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        selection.check_exclusive()?;
        let row = self.create_row(info, data, 0)?;
        self.project_one(info, row.value(info.id_field()), selection)
    }

    pub fn create_many(&mut self, entity: &str, args: &CreateManyArgs) -> Result<BatchResult> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        let ids = self.create_many_rows(info, args)?;
        Ok(BatchResult::new(ids.len() as u64))
    }

    pub fn create_many_and_return(
        &mut self,
        entity: &str,
        args: &CreateManyArgs,
        selection: &Selection,
    ) -> Result<Vec<Record>> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        selection.check_exclusive()?;
        let ids = self.create_many_rows(info, args)?;
        self.project_ids(info, &ids, selection)
    }

    #[tracing::instrument(level = "debug", skip(self, unique, data, selection))]
    pub fn update(
        &mut self,
        entity: &str,
        unique: &UniqueWhere,
        data: &UpdateInput,
        selection: &Selection,
    ) -> Result<Record> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        selection.check_exclusive()?;
        let old = self.require(info, unique, "update")?;
        let row = self.update_row(info, old, data, 0)?;
        self.project_one(info, row.value(info.id_field()), selection)
    }

    pub fn update_many(&mut self, entity: &str, args: &UpdateManyArgs) -> Result<BatchResult> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        let ids = self.update_many_rows(info, args)?;
        Ok(BatchResult::new(ids.len() as u64))
    }

    pub fn update_many_and_return(
        &mut self,
        entity: &str,
        args: &UpdateManyArgs,
        selection: &Selection,
    ) -> Result<Vec<Record>> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        selection.check_exclusive()?;
        let ids = self.update_many_rows(info, args)?;
        self.project_ids(info, &ids, selection)
    }

    /// Update the row identified by `args.unique`, or create it.
    #[tracing::instrument(level = "debug", skip(self, args, selection))]
    pub fn upsert(&mut self, entity: &str, args: &UpsertArgs, selection: &Selection) -> Result<Record> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        selection.check_exclusive()?;
        check_unique_where(info, &args.unique)?;
        let row = match self.locate(info, &args.unique)? {
            Some(old) => {
                tracing::debug!(entity = %entity, "upsert matched, updating");
                self.update_row(info, old, &args.update, 0)?
            }
            None => {
                tracing::debug!(entity = %entity, "upsert missed, creating");
                self.create_row(info, &args.create, 0)?
            }
        };
        self.project_one(info, row.value(info.id_field()), selection)
    }

    /// Delete one row, applying delete policies to its dependents. The
    /// returned record is projected before removal.
    #[tracing::instrument(level = "debug", skip(self, unique, selection))]
    pub fn delete(&mut self, entity: &str, unique: &UniqueWhere, selection: &Selection) -> Result<Record> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        selection.check_exclusive()?;
        let row = self.require(info, unique, "delete")?;
        let id = row.value(info.id_field()).clone();
        let projected = self.project_one(info, &id, selection)?;
        self.delete_row(info, &id, &mut HashSet::new())?;
        Ok(projected)
    }

    pub fn delete_many(&mut self, entity: &str, args: &DeleteManyArgs) -> Result<BatchResult> {
        let schema = self.schema;
        let info = schema.request_entity(entity)?;
        let id_field = info.id_field();
        let mut ids: Vec<Value> = self
            .reader()
            .matching_rows(info, args.filter.as_ref())?
            .into_iter()
            .map(|row| row.value(id_field).clone())
            .collect();
        if let Some(limit) = args.limit {
            ids.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        let mut visited = HashSet::new();
        let mut count = 0;
        for id in &ids {
            // An earlier cascade in this batch may already have removed it.
            if self.data.position(&info.name, id_field, id).is_none() {
                continue;
            }
            self.delete_row(info, id, &mut visited)?;
            count += 1;
        }
        tracing::debug!(entity = %entity, count, "deleteMany applied");
        Ok(BatchResult::new(count))
    }

    // ========================================================================
    // Row creation
    // ========================================================================

    fn create_row(&mut self, entity: &EntityInfo, data: &CreateInput, depth: usize) -> Result<Record> {
        self.check_depth(entity, depth)?;
        let schema = self.schema;
        let mut values = data.values.clone();

        // The rows this one points at must exist before it does.
        for (name, write) in &data.relations {
            let relation = write_relation(entity, name)?;
            let Some(key) = relation.local_key.as_deref() else {
                continue;
            };
            if values.contains_key(key) {
                return Err(invalid_write(
                    &entity.name,
                    name,
                    format!("`{key}` is set both directly and through `{name}`"),
                ));
            }
            check_to_one_write(entity, relation, write, false)?;
            let target = self.link_target(relation, write, depth)?;
            values.insert(key.to_string(), target.value(&relation.references).clone());
        }

        let row = self.build_row(entity, &values)?;
        self.insert_row(entity, row.clone())?;

        for (name, write) in &data.relations {
            let relation = write_relation(entity, name)?;
            if !relation.is_owning() {
                schema.resolve_entity(&relation.related_entity)?;
                self.write_inverse(entity, relation, &row, write, depth, false)?;
            }
        }
        Ok(row)
    }

    /// The row an owning relation write links to, created if requested.
    fn link_target(
        &mut self,
        relation: &RelationshipInfo,
        write: &RelationWrite,
        depth: usize,
    ) -> Result<Record> {
        let schema = self.schema;
        let target = schema.resolve_entity(&relation.related_entity)?;
        if let Some(data) = write.create.first() {
            return self.create_row(target, data, depth + 1);
        }
        if let Some(unique) = write.connect.first() {
            return self.require(target, unique, "connect");
        }
        if let Some(entry) = write.connect_or_create.first() {
            return match self.locate(target, &entry.unique)? {
                Some(row) => Ok(row),
                None => self.create_row(target, &entry.create, depth + 1),
            };
        }
        Err(invalid_write(&target.name, &relation.name, "empty relation write"))
    }

    /// Fill defaults, coerce and validate every declared field.
    fn build_row(&self, entity: &EntityInfo, values: &BTreeMap<String, Value>) -> Result<Record> {
        for name in values.keys() {
            write_field(entity, name)?;
        }
        let mut row = Record::new();
        for field in &entity.fields {
            let value = match values.get(&field.name) {
                Some(value) => validate_field_value(&entity.name, field, value.clone())?,
                None => match &field.default {
                    Some(DefaultValue::Static(value)) => value.clone(),
                    Some(DefaultValue::Uuid) => Value::Text(uuid::Uuid::new_v4().to_string()),
                    Some(DefaultValue::Now) => Value::Timestamp(now_millis()),
                    Some(DefaultValue::AutoIncrement) => {
                        let max = self
                            .data
                            .rows(&entity.name)?
                            .iter()
                            .filter_map(|r| r.value(&field.name).as_i64())
                            .max()
                            .unwrap_or(0);
                        Value::Int(max + 1)
                    }
                    None if field.nullable => Value::Null,
                    None => {
                        return Err(ValidationError::new(
                            ValidationErrorKind::MissingRequired,
                            "required field is missing",
                        )
                        .entity(&entity.name)
                        .field(&field.name)
                        .into());
                    }
                },
            };
            row.set(field.name.clone(), value);
        }
        Ok(row)
    }

    fn insert_row(&mut self, entity: &EntityInfo, row: Record) -> Result<()> {
        self.insert_row_with(entity, row, false)
    }

    /// Insert `row`. With `skip_on_conflict` the store drops the row instead
    /// of failing the commit when a concurrent writer took its unique key.
    fn insert_row_with(&mut self, entity: &EntityInfo, row: Record, skip_on_conflict: bool) -> Result<()> {
        check_unique(entity, self.data.rows(&entity.name)?, &row, None)?;
        check_foreign_keys(self.schema, &*self.data, entity, &row)?;
        self.data.table_mut(&entity.name)?.push(row.clone());
        tracing::trace!(entity = %entity.name, "row inserted");
        let entity = entity.name.clone();
        self.pending.push(if skip_on_conflict {
            WriteOp::InsertOrSkip { entity, record: row }
        } else {
            WriteOp::Insert { entity, record: row }
        });
        Ok(())
    }

    /// Insert scalar-only rows. Returns the ids of the inserted rows.
    fn create_many_rows(&mut self, entity: &EntityInfo, args: &CreateManyArgs) -> Result<Vec<Value>> {
        let mut ids = Vec::with_capacity(args.data.len());
        let mut skipped = 0usize;
        for data in &args.data {
            if let Some(name) = data.relations.keys().next() {
                return Err(invalid_write(&entity.name, name, "createMany takes scalar fields only"));
            }
            let row = self.build_row(entity, &data.values)?;
            if args.skip_duplicates
                && unique_conflict(entity, self.data.rows(&entity.name)?, &row, None).is_some()
            {
                skipped += 1;
                continue;
            }
            ids.push(row.value(entity.id_field()).clone());
            self.insert_row_with(entity, row, args.skip_duplicates)?;
        }
        tracing::debug!(entity = %entity.name, created = ids.len(), skipped, "createMany applied");
        Ok(ids)
    }

    // ========================================================================
    // Row updates
    // ========================================================================

    fn update_row(
        &mut self,
        entity: &EntityInfo,
        old: Record,
        data: &UpdateInput,
        depth: usize,
    ) -> Result<Record> {
        self.check_depth(entity, depth)?;
        let mut new = old.clone();
        let mut changes = Vec::with_capacity(data.fields.len());
        for (name, update) in &data.fields {
            let field = write_field(entity, name)?;
            let value = apply_field_update(entity, field, old.value(name), update)?;
            let change = match update {
                FieldUpdate::Set(_) => FieldUpdate::Set(value.clone()),
                other => other.clone(),
            };
            changes.push((name.clone(), change));
            new.set(name.clone(), value);
        }

        for (name, write) in &data.relations {
            let relation = write_relation(entity, name)?;
            let Some(key) = relation.local_key.as_deref() else {
                continue;
            };
            if data.fields.contains_key(key) {
                return Err(invalid_write(
                    &entity.name,
                    name,
                    format!("`{key}` is set both directly and through `{name}`"),
                ));
            }
            check_to_one_write(entity, relation, write, true)?;
            if write.disconnect_one {
                if !self.schema.is_optional(entity, relation) {
                    return Err(required_relation(
                        &entity.name,
                        key,
                        format!("relation `{name}` is required and cannot be disconnected"),
                    ));
                }
                new.set(key, Value::Null);
                changes.push((key.to_string(), FieldUpdate::Set(Value::Null)));
            } else {
                let target = self.link_target(relation, write, depth)?;
                let value = target.value(&relation.references).clone();
                new.set(key, value.clone());
                changes.push((key.to_string(), FieldUpdate::Set(value)));
            }
        }

        if new != old {
            self.replace_row(entity, &old, new.clone(), changes)?;
        }

        for (name, write) in &data.relations {
            let relation = write_relation(entity, name)?;
            if !relation.is_owning() {
                self.write_inverse(entity, relation, &new, write, depth, true)?;
            }
        }
        Ok(new)
    }

    /// Replace `old` with `new` in place, checking every constraint the
    /// change could break. `changes` are what the store re-applies at commit.
    fn replace_row(
        &mut self,
        entity: &EntityInfo,
        old: &Record,
        new: Record,
        changes: Vec<(String, FieldUpdate)>,
    ) -> Result<()> {
        let id_field = entity.id_field();
        let id = old.value(id_field).clone();
        let pos = self
            .data
            .position(&entity.name, id_field, &id)
            .ok_or_else(|| Error::internal(format!("{} row missing during update", entity.name)))?;

        check_unique(entity, self.data.rows(&entity.name)?, &new, Some(pos))?;
        check_foreign_keys(self.schema, &*self.data, entity, &new)?;
        for inbound in self.schema.inbound_relations(&entity.name) {
            let field = inbound.relation.references.as_str();
            let before = old.value(field);
            if before.loose_eq(new.value(field)) {
                continue;
            }
            if has_row_with(self.data.rows(&inbound.entity.name)?, inbound.key(), before) {
                return Err(ConstraintError::new(
                    ConstraintErrorKind::Restrict,
                    &entity.name,
                    vec![field.to_string()],
                    format!(
                        "{} rows still reference this {} through `{}`",
                        inbound.entity.name, entity.name, inbound.relation.name
                    ),
                )
                .into());
            }
        }

        self.data.table_mut(&entity.name)?[pos] = new;
        self.pending.push(WriteOp::Update {
            entity: entity.name.clone(),
            id,
            changes,
        });
        Ok(())
    }

    fn set_value(&mut self, entity: &EntityInfo, row: &Record, field: &str, value: Value) -> Result<()> {
        if row.value(field).loose_eq(&value) && row.contains(field) {
            return Ok(());
        }
        let mut new = row.clone();
        new.set(field, value.clone());
        self.replace_row(entity, row, new, vec![(field.to_string(), FieldUpdate::Set(value))])
    }

    fn update_many_rows(&mut self, entity: &EntityInfo, args: &UpdateManyArgs) -> Result<Vec<Value>> {
        if let Some(name) = args.data.relations.keys().next() {
            return Err(invalid_write(&entity.name, name, "updateMany takes scalar fields only"));
        }
        // Reject bad data even when nothing matches.
        for (name, update) in &args.data.fields {
            let field = write_field(entity, name)?;
            apply_field_update(entity, field, &Value::Null, update)?;
        }

        let mut rows: Vec<Record> = self
            .reader()
            .matching_rows(entity, args.filter.as_ref())?
            .into_iter()
            .cloned()
            .collect();
        if let Some(limit) = args.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        let mut ids = Vec::with_capacity(rows.len());
        for old in rows {
            let row = self.update_row(entity, old, &args.data, 0)?;
            ids.push(row.value(entity.id_field()).clone());
        }
        tracing::debug!(entity = %entity.name, count = ids.len(), "updateMany applied");
        Ok(ids)
    }

    // ========================================================================
    // Inverse relation writes
    // ========================================================================

    /// Apply a nested write on a relation whose key lives on the related
    /// entity. `parent` is already stored.
    fn write_inverse(
        &mut self,
        entity: &EntityInfo,
        relation: &RelationshipInfo,
        parent: &Record,
        write: &RelationWrite,
        depth: usize,
        on_update: bool,
    ) -> Result<()> {
        let schema = self.schema;
        let child = schema.resolve_entity(&relation.related_entity)?;
        let Some(remote) = relation.remote_key.as_deref() else {
            return Err(invalid_write(&entity.name, &relation.name, "relation has no key to write"));
        };
        let key = parent.value(&relation.references).clone();
        let link = ChildLink {
            parent: entity,
            relation,
            child,
            remote,
            key,
        };

        if relation.is_to_many() {
            check_to_many_write(entity, relation, write, on_update)?;
            self.write_many_children(&link, write, depth)
        } else {
            check_to_one_write(entity, relation, write, on_update)?;
            self.write_one_child(&link, write, depth)
        }
    }

    fn write_many_children(&mut self, link: &ChildLink<'_>, write: &RelationWrite, depth: usize) -> Result<()> {
        if let Some(targets) = &write.set {
            let mut keep = HashSet::new();
            let mut rows = Vec::with_capacity(targets.len());
            for unique in targets {
                let row = self.require(link.child, unique, "set")?;
                keep.insert(id_key(row.value(link.child.id_field())));
                rows.push(row);
            }
            for current in self.linked_children(link)? {
                if !keep.contains(&id_key(current.value(link.child.id_field()))) {
                    self.unlink_child(link, &current)?;
                }
            }
            for row in rows {
                self.attach_child(link, &row)?;
            }
        }
        for unique in &write.disconnect {
            let row = self.require(link.child, unique, "disconnect")?;
            if row.value(link.remote).loose_eq(&link.key) {
                self.unlink_child(link, &row)?;
            }
        }
        for data in &write.create {
            let data = link.child_input(data)?;
            self.create_row(link.child, &data, depth + 1)?;
        }
        if let Some(many) = &write.create_many {
            let data = many
                .data
                .iter()
                .map(|d| link.child_input(d))
                .collect::<Result<Vec<_>>>()?;
            let args = CreateManyArgs {
                data,
                skip_duplicates: many.skip_duplicates,
            };
            self.create_many_rows(link.child, &args)?;
        }
        for unique in &write.connect {
            let row = self.require(link.child, unique, "connect")?;
            self.attach_child(link, &row)?;
        }
        for entry in &write.connect_or_create {
            match self.locate(link.child, &entry.unique)? {
                Some(row) => self.attach_child(link, &row)?,
                None => {
                    let data = link.child_input(&entry.create)?;
                    self.create_row(link.child, &data, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    fn write_one_child(&mut self, link: &ChildLink<'_>, write: &RelationWrite, depth: usize) -> Result<()> {
        let current = self.linked_children(link)?;
        let id_field = link.child.id_field();

        if write.disconnect_one {
            for row in &current {
                self.unlink_child(link, row)?;
            }
            return Ok(());
        }

        let existing = if let Some(unique) = write.connect.first() {
            Some(self.require(link.child, unique, "connect")?)
        } else if let Some(entry) = write.connect_or_create.first() {
            self.locate(link.child, &entry.unique)?
        } else {
            None
        };

        let same = |row: &Record| {
            existing
                .as_ref()
                .is_some_and(|e| e.value(id_field).loose_eq(row.value(id_field)))
        };
        for row in current.iter().filter(|&row| !same(row)) {
            self.unlink_child(link, row)?;
        }

        match (existing, write.create.first(), write.connect_or_create.first()) {
            (Some(row), _, _) => self.attach_child(link, &row),
            (None, Some(data), _) => {
                let data = link.child_input(data)?;
                self.create_row(link.child, &data, depth + 1).map(|_| ())
            }
            (None, None, Some(entry)) => {
                let data = link.child_input(&entry.create)?;
                self.create_row(link.child, &data, depth + 1).map(|_| ())
            }
            (None, None, None) => Err(invalid_write(
                &link.parent.name,
                &link.relation.name,
                "empty relation write",
            )),
        }
    }

    fn linked_children(&self, link: &ChildLink<'_>) -> Result<Vec<Record>> {
        if link.key.is_null() {
            return Ok(Vec::new());
        }
        Ok(self
            .data
            .rows(&link.child.name)?
            .iter()
            .filter(|row| row.value(link.remote).loose_eq(&link.key))
            .cloned()
            .collect())
    }

    fn attach_child(&mut self, link: &ChildLink<'_>, row: &Record) -> Result<()> {
        self.set_value(link.child, row, link.remote, link.key.clone())
    }

    fn unlink_child(&mut self, link: &ChildLink<'_>, row: &Record) -> Result<()> {
        if link.child.field(link.remote).is_none_or(|f| !f.nullable) {
            return Err(required_relation(
                &link.child.name,
                link.remote,
                format!(
                    "{} rows require a {} and cannot be disconnected",
                    link.child.name, link.parent.name
                ),
            ));
        }
        self.set_value(link.child, row, link.remote, Value::Null)
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Remove one row after applying the delete policy of every relation
    /// pointing at it. `visited` holds rows already being deleted.
    fn delete_row(
        &mut self,
        entity: &EntityInfo,
        id: &Value,
        visited: &mut HashSet<(String, ValueKey)>,
    ) -> Result<()> {
        let schema = self.schema;
        visited.insert((entity.name.clone(), id_key(id)));
        let id_field = entity.id_field();
        let row = self
            .data
            .find(&entity.name, id_field, id)
            .cloned()
            .ok_or_else(|| Error::internal(format!("{} row missing during delete", entity.name)))?;

        for inbound in schema.inbound_relations(&entity.name) {
            let key = row.value(&inbound.relation.references);
            if key.is_null() {
                continue;
            }
            let dep_entity = inbound.entity;
            let dep_key = inbound.key();
            let dependents: Vec<Record> = self
                .data
                .rows(&dep_entity.name)?
                .iter()
                .filter(|r| r.value(dep_key).loose_eq(key))
                .filter(|r| {
                    !visited.contains(&(dep_entity.name.clone(), id_key(r.value(dep_entity.id_field()))))
                })
                .cloned()
                .collect();
            if dependents.is_empty() {
                continue;
            }

            let policy = schema.delete_policy(dep_entity, inbound.relation);
            tracing::debug!(
                entity = %entity.name,
                dependent = %dep_entity.name,
                rows = dependents.len(),
                policy = policy.as_str(),
                "applying delete policy"
            );
            match policy {
                ReferentialAction::NoAction | ReferentialAction::Restrict => {
                    return Err(ConstraintError::new(
                        ConstraintErrorKind::Restrict,
                        &entity.name,
                        vec![dep_key.to_string()],
                        format!(
                            "{} {} rows still reference this {} through `{}`",
                            dependents.len(),
                            dep_entity.name,
                            entity.name,
                            inbound.relation.name
                        ),
                    )
                    .into());
                }
                ReferentialAction::Cascade => {
                    for dep in &dependents {
                        let dep_id = dep.value(dep_entity.id_field()).clone();
                        if !visited.contains(&(dep_entity.name.clone(), id_key(&dep_id))) {
                            self.delete_row(dep_entity, &dep_id, visited)?;
                        }
                    }
                }
                ReferentialAction::SetNull | ReferentialAction::SetDefault => {
                    let field = write_field(dep_entity, dep_key)?;
                    let value = if policy == ReferentialAction::SetDefault {
                        field.static_default().cloned().unwrap_or(Value::Null)
                    } else {
                        Value::Null
                    };
                    if value.is_null() && !field.nullable {
                        return Err(required_relation(
                            &dep_entity.name,
                            dep_key,
                            format!(
                                "cannot clear `{dep_key}`: {} rows require a {}",
                                dep_entity.name, entity.name
                            ),
                        ));
                    }
                    for dep in &dependents {
                        self.set_value(dep_entity, dep, dep_key, value.clone())?;
                    }
                }
            }
        }

        let pos = self
            .data
            .position(&entity.name, id_field, id)
            .ok_or_else(|| Error::internal(format!("{} row missing during delete", entity.name)))?;
        self.data.table_mut(&entity.name)?.remove(pos);
        self.pending.push(WriteOp::Delete {
            entity: entity.name.clone(),
            id: id.clone(),
        });
        Ok(())
    }
}

/// One parent row seen from the entity holding the key.
struct ChildLink<'s> {
    parent: &'s EntityInfo,
    relation: &'s RelationshipInfo,
    child: &'s EntityInfo,
    remote: &'s str,
    key: Value,
}

impl ChildLink<'_> {
    /// Child create data with the key pointing at the parent.
    fn child_input(&self, data: &CreateInput) -> Result<CreateInput> {
        let back = self
            .child
            .relations
            .iter()
            .find(|r| r.local_key.as_deref() == Some(self.remote));
        if data.values.contains_key(self.remote)
            || back.is_some_and(|r| data.relations.contains_key(&r.name))
        {
            return Err(invalid_write(
                &self.parent.name,
                &self.relation.name,
                format!("nested {} rows must not set `{}`", self.child.name, self.remote),
            ));
        }
        let mut data = data.clone();
        data.values.insert(self.remote.to_string(), self.key.clone());
        Ok(data)
    }
}
