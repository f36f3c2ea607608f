//! The schema graph: all entities plus their relation edges.
//!
//! A [`Schema`] is built once at startup through [`SchemaBuilder`], which
//! validates every cross-reference. After that it is immutable and is shared
//! behind an `Arc` by every other component.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::entity::EntityInfo;
use crate::error::{Error, Result, SchemaError, ValidationError, ValidationErrorKind};
use crate::field::{DefaultValue, FieldInfo, ReferentialAction};
use crate::relationship::{RelationshipInfo, RelationshipKind};
use crate::validate::validate_pattern;

/// Immutable, validated set of entity descriptors.
#[derive(Debug, Clone)]
pub struct Schema {
    entities: Vec<EntityInfo>,
    index: HashMap<String, usize>,
}

/// An owning relation that points at some entity, seen from that entity.
#[derive(Debug, Clone, Copy)]
pub struct InboundRelation<'a> {
    /// The entity holding the foreign key.
    pub entity: &'a EntityInfo,
    /// The owning relation on that entity.
    pub relation: &'a RelationshipInfo,
}

impl InboundRelation<'_> {
    /// Foreign key field on the dependent entity.
    #[must_use]
    pub fn key(&self) -> &str {
        self.relation.local_key.as_deref().unwrap_or_default()
    }
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// All entities in declaration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityInfo> {
        self.entities.iter()
    }

    /// Look up an entity without producing an error.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityInfo> {
        self.index.get(name).map(|&i| &self.entities[i])
    }

    /// Resolve an entity descriptor by name.
    pub fn resolve_entity(&self, name: &str) -> Result<&EntityInfo> {
        self.entity(name).ok_or_else(|| {
            Error::Schema(SchemaError::new(format!("unknown entity `{name}`")).entity(name))
        })
    }

    /// Resolve a relation descriptor by entity and field name.
    pub fn resolve_relation(&self, entity: &str, field: &str) -> Result<&RelationshipInfo> {
        let info = self.resolve_entity(entity)?;
        info.relation(field).ok_or_else(|| {
            Error::Schema(SchemaError::new(format!("unknown relation `{field}`")).entity(entity))
        })
    }

    /// Like [`Schema::resolve_entity`], but reports a caller mistake.
    pub fn request_entity(&self, name: &str) -> Result<&EntityInfo> {
        self.entity(name).ok_or_else(|| {
            ValidationError::new(
                ValidationErrorKind::UnknownEntity,
                format!("unknown entity `{name}`"),
            )
            .entity(name)
            .into()
        })
    }

    /// Owning relations on any entity whose target is `entity`.
    #[must_use]
    pub fn inbound_relations(&self, entity: &str) -> Vec<InboundRelation<'_>> {
        self.entities
            .iter()
            .flat_map(|e| {
                e.relations
                    .iter()
                    .filter(move |r| r.is_owning() && r.related_entity == entity)
                    .map(move |r| InboundRelation {
                        entity: e,
                        relation: r,
                    })
            })
            .collect()
    }

    /// Fields of `entity` referenced by some foreign key.
    #[must_use]
    pub fn referenced_fields(&self, entity: &str) -> BTreeSet<String> {
        self.inbound_relations(entity)
            .iter()
            .map(|inbound| inbound.relation.references.clone())
            .collect()
    }

    /// Every entity reachable from `entity` over relation edges, itself included.
    #[must_use]
    pub fn related_closure(&self, entity: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([entity.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(info) = self.entity(&name) {
                for rel in &info.relations {
                    queue.push_back(rel.related_entity.clone());
                }
            }
            for inbound in self.inbound_relations(&name) {
                queue.push_back(inbound.entity.name.clone());
            }
        }
        seen
    }

    /// Whether the foreign key behind an owning relation may be NULL.
    #[must_use]
    pub fn is_optional(&self, entity: &EntityInfo, relation: &RelationshipInfo) -> bool {
        match (&relation.local_key, &relation.remote_key) {
            (Some(key), _) => entity.field(key).is_some_and(|f| f.nullable),
            (None, Some(key)) => self
                .entity(&relation.related_entity)
                .and_then(|target| target.field(key))
                .is_some_and(|f| f.nullable),
            (None, None) => true,
        }
    }

    /// Effective delete policy of an owning relation.
    ///
    /// Undeclared policies default to `SetNull` for optional relations and
    /// `Restrict` for required ones.
    #[must_use]
    pub fn delete_policy(
        &self,
        entity: &EntityInfo,
        relation: &RelationshipInfo,
    ) -> ReferentialAction {
        relation.on_delete.unwrap_or_else(|| {
            if self.is_optional(entity, relation) {
                ReferentialAction::SetNull
            } else {
                ReferentialAction::Restrict
            }
        })
    }
}

/// Collects entity descriptors and validates them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityInfo>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn entity(mut self, entity: EntityInfo) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate all cross-references and freeze the schema.
    pub fn build(self) -> Result<Schema> {
        let mut index = HashMap::new();
        for (i, entity) in self.entities.iter().enumerate() {
            if index.insert(entity.name.clone(), i).is_some() {
                return Err(schema_err(&entity.name, "entity declared twice"));
            }
        }
        let schema = Schema {
            entities: self.entities,
            index,
        };
        for entity in &schema.entities {
            validate_entity(&schema, entity)?;
        }
        tracing::debug!(entities = schema.entities.len(), "Schema validated");
        Ok(schema)
    }
}

fn schema_err(entity: &str, message: impl Into<String>) -> Error {
    Error::Schema(SchemaError::new(message).entity(entity))
}

fn validate_entity(schema: &Schema, entity: &EntityInfo) -> Result<()> {
    let mut names = BTreeSet::new();
    for name in entity
        .fields
        .iter()
        .map(|f| &f.name)
        .chain(entity.relations.iter().map(|r| &r.name))
    {
        if !names.insert(name.as_str()) {
            return Err(schema_err(&entity.name, format!("field `{name}` declared twice")));
        }
    }

    let pk_count = entity.fields.iter().filter(|f| f.primary_key).count();
    if pk_count != 1 {
        return Err(schema_err(
            &entity.name,
            format!("expected exactly one id field, found {pk_count}"),
        ));
    }

    for field in &entity.fields {
        validate_field(entity, field)?;
    }

    for constraint in &entity.unique_constraints {
        if constraint.fields.is_empty() {
            return Err(schema_err(&entity.name, "empty unique constraint"));
        }
        for name in &constraint.fields {
            if entity.field(name).is_none() {
                return Err(schema_err(
                    &entity.name,
                    format!("unique constraint references unknown field `{name}`"),
                ));
            }
        }
    }

    for relation in &entity.relations {
        validate_relation(schema, entity, relation)?;
    }
    Ok(())
}

fn validate_field(entity: &EntityInfo, field: &FieldInfo) -> Result<()> {
    if let Some(pattern) = &field.pattern {
        if let Some(message) = validate_pattern(pattern) {
            return Err(schema_err(&entity.name, format!("{}: {message}", field.name)));
        }
    }
    if field.field_type == crate::field::FieldType::Enum && field.enum_values.is_empty() {
        return Err(schema_err(
            &entity.name,
            format!("enum field `{}` declares no variants", field.name),
        ));
    }
    if let Some(DefaultValue::Static(value)) = &field.default {
        let coerced = field.field_type.coerce(value.clone()).ok_or_else(|| {
            schema_err(
                &entity.name,
                format!("default for `{}` is not a {}", field.name, field.field_type.as_str()),
            )
        })?;
        if coerced.is_null() && !field.nullable {
            return Err(schema_err(
                &entity.name,
                format!("non-nullable field `{}` defaults to null", field.name),
            ));
        }
        if let Some(text) = coerced.as_str() {
            if !field.enum_values.is_empty() && !field.enum_values.iter().any(|v| v == text) {
                return Err(schema_err(
                    &entity.name,
                    format!("default `{text}` is not a variant of `{}`", field.name),
                ));
            }
        }
    }
    Ok(())
}

fn validate_relation(
    schema: &Schema,
    entity: &EntityInfo,
    relation: &RelationshipInfo,
) -> Result<()> {
    let ctx = |msg: String| schema_err(&entity.name, format!("relation `{}`: {msg}", relation.name));

    let target = schema
        .entity(&relation.related_entity)
        .ok_or_else(|| ctx(format!("unknown target entity `{}`", relation.related_entity)))?;

    match (relation.kind, &relation.local_key, &relation.remote_key) {
        (RelationshipKind::ManyToOne, Some(_), None)
        | (RelationshipKind::OneToMany, None, Some(_))
        | (RelationshipKind::OneToOne, Some(_), None)
        | (RelationshipKind::OneToOne, None, Some(_)) => {}
        _ => {
            return Err(ctx(
                "manyToOne needs a local key, oneToMany a remote key, oneToOne exactly one of them"
                    .to_string(),
            ));
        }
    }

    let (key_entity, key_name, parent_entity) = match (&relation.local_key, &relation.remote_key) {
        (Some(key), _) => (entity, key, target),
        (None, Some(key)) => (target, key, entity),
        (None, None) => return Err(ctx("relation declares no key".to_string())),
    };
    let key_field = key_entity
        .field(key_name)
        .ok_or_else(|| ctx(format!("unknown key field `{}.{key_name}`", key_entity.name)))?;
    let referenced = parent_entity.field(&relation.references).ok_or_else(|| {
        ctx(format!(
            "unknown referenced field `{}.{}`",
            parent_entity.name, relation.references
        ))
    })?;
    if !parent_entity.is_unique_field(&referenced.name) {
        return Err(ctx(format!(
            "referenced field `{}.{}` is not unique",
            parent_entity.name, referenced.name
        )));
    }
    if key_field.field_type != referenced.field_type {
        return Err(ctx(format!(
            "key `{}` is {} but `{}` is {}",
            key_field.name,
            key_field.field_type.as_str(),
            referenced.name,
            referenced.field_type.as_str()
        )));
    }

    if let Some(action) = relation.on_delete {
        if !relation.is_owning() {
            return Err(ctx("onDelete is only allowed on the owning side".to_string()));
        }
        if action == ReferentialAction::SetNull && !key_field.nullable {
            return Err(ctx(format!("SetNull on non-nullable key `{}`", key_field.name)));
        }
        if action == ReferentialAction::SetDefault && key_field.static_default().is_none() {
            return Err(ctx(format!("SetDefault on key `{}` without a default", key_field.name)));
        }
    }

    if let Some(back) = &relation.back_populates {
        let other = target
            .relation(back)
            .ok_or_else(|| ctx(format!("back_populates `{back}` not found on target")))?;
        if other.related_entity != entity.name {
            return Err(ctx(format!(
                "back_populates `{back}` points at `{}`",
                other.related_entity
            )));
        }
        let same_key = other.local_key.as_ref().or(other.remote_key.as_ref())
            == relation.local_key.as_ref().or(relation.remote_key.as_ref());
        if other.is_owning() == relation.is_owning() || !same_key {
            return Err(ctx(format!("back_populates `{back}` is not the opposite side")));
        }
    }
    Ok(())
}
