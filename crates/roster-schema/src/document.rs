//! The declarative schema document.
//!
//! A document is JSON with one object per entity:
//!
//! ```json
//! {
//!   "entities": [{
//!     "name": "Class",
//!     "fields": [
//!       { "name": "id", "type": "string", "id": true, "default": "uuid()" },
//!       { "name": "schoolId", "type": "string" },
//!       { "name": "name", "type": "string" }
//!     ],
//!     "relations": [
//!       { "name": "school", "target": "School", "kind": "manyToOne",
//!         "localKey": "schoolId", "onDelete": "restrict" }
//!     ],
//!     "unique": [["schoolId", "name"]]
//!   }]
//! }
//! ```
//!
//! Defaults are either a JSON literal or one of the generator calls
//! `uuid()`, `now()` and `autoincrement()`.

use roster_core::{
    DefaultValue, EntityInfo, FieldInfo, FieldType, ReferentialAction, RelationshipInfo,
    RelationshipKind, Result, Schema, SchemaError, UniqueConstraint, Value,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    pub entities: Vec<EntityDocument>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDocument {
    pub name: String,
    pub fields: Vec<FieldDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationDocument>,
    /// Compound unique constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub id: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Variants of an `enum` field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelationDocument {
    pub name: String,
    pub target: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_populates: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
}

impl SchemaDocument {
    /// Parse a document from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SchemaError::new(format!("invalid schema document: {e}")).into())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SchemaError::new(format!("cannot render schema document: {e}")).into())
    }

    pub fn entity_mut(&mut self, name: &str) -> Option<&mut EntityDocument> {
        self.entities.iter_mut().find(|e| e.name == name)
    }

    /// Mutable access to one relation, for deriving schema variants.
    pub fn relation_mut(&mut self, entity: &str, relation: &str) -> Option<&mut RelationDocument> {
        self.entity_mut(entity)?
            .relations
            .iter_mut()
            .find(|r| r.name == relation)
    }

    /// Convert the document and validate the resulting schema.
    #[tracing::instrument(level = "debug", skip(self), fields(entities = self.entities.len()))]
    pub fn build(&self) -> Result<Schema> {
        let mut builder = Schema::builder();
        for entity in &self.entities {
            builder = builder.entity(entity.to_info()?);
        }
        let schema = builder.build()?;
        tracing::debug!("Schema document loaded");
        Ok(schema)
    }
}

impl EntityDocument {
    fn to_info(&self) -> Result<EntityInfo> {
        let mut info = EntityInfo::new(&self.name);
        for field in &self.fields {
            info = info.add_field(field.to_info(&self.name)?);
        }
        for relation in &self.relations {
            info = info.add_relation(relation.to_info(&self.name)?);
        }
        for fields in &self.unique {
            info = info.add_unique(UniqueConstraint::new(fields.iter().cloned()));
        }
        Ok(info)
    }
}

impl FieldDocument {
    fn to_info(&self, entity: &str) -> Result<FieldInfo> {
        let field_type = FieldType::from_str(&self.field_type).ok_or_else(|| {
            SchemaError::new(format!(
                "field `{}` has unknown type `{}`",
                self.name, self.field_type
            ))
            .entity(entity)
        })?;
        let mut info = FieldInfo::new(&self.name, field_type)
            .nullable(self.optional)
            .primary_key(self.id)
            .unique(self.unique);
        if !self.values.is_empty() {
            info = info.enum_values(self.values.iter().cloned());
        }
        if let Some(pattern) = &self.pattern {
            info = info.pattern(pattern.clone());
        }
        if let Some(default) = &self.default {
            info = info.default_value(self.parse_default(entity, field_type, default)?);
        }
        Ok(info)
    }

    fn parse_default(
        &self,
        entity: &str,
        field_type: FieldType,
        default: &serde_json::Value,
    ) -> Result<DefaultValue> {
        match default.as_str() {
            Some("uuid()") => return Ok(DefaultValue::Uuid),
            Some("now()") => return Ok(DefaultValue::Now),
            Some("autoincrement()") => return Ok(DefaultValue::AutoIncrement),
            _ => {}
        }
        field_type
            .coerce(Value::from_json(default))
            .map(DefaultValue::Static)
            .ok_or_else(|| {
                SchemaError::new(format!(
                    "default {default} does not fit {} field `{}`",
                    field_type.as_str(),
                    self.name
                ))
                .entity(entity)
                .into()
            })
    }
}

impl RelationDocument {
    fn to_info(&self, entity: &str) -> Result<RelationshipInfo> {
        let kind = RelationshipKind::from_str(&self.kind).ok_or_else(|| {
            SchemaError::new(format!(
                "relation `{}` has unknown kind `{}`",
                self.name, self.kind
            ))
            .entity(entity)
        })?;
        let mut info = RelationshipInfo::new(&self.name, &self.target, kind);
        if let Some(key) = &self.local_key {
            info = info.local_key(key.clone());
        }
        if let Some(key) = &self.remote_key {
            info = info.remote_key(key.clone());
        }
        if let Some(field) = &self.references {
            info = info.references(field.clone());
        }
        if let Some(back) = &self.back_populates {
            info = info.back_populates(back.clone());
        }
        if let Some(action) = &self.on_delete {
            let action = ReferentialAction::from_str(action).ok_or_else(|| {
                SchemaError::new(format!(
                    "relation `{}` has unknown onDelete action `{action}`",
                    self.name
                ))
                .entity(entity)
            })?;
            info = info.on_delete(action);
        }
        Ok(info)
    }
}
