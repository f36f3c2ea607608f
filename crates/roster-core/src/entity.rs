//! Entity descriptors.

use crate::field::FieldInfo;
use crate::relationship::RelationshipInfo;

/// A unique constraint spanning one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: Option<String>,
    pub fields: Vec<String>,
}

impl UniqueConstraint {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Static description of one entity: its scalar fields, relation fields and
/// compound unique constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub relations: Vec<RelationshipInfo>,
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl EntityInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn add_relation(mut self, relation: RelationshipInfo) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn add_unique(mut self, constraint: UniqueConstraint) -> Self {
        self.unique_constraints.push(constraint);
        self
    }

    /// Look up a scalar field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a relation field by name.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationshipInfo> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// The identity field.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Name of the identity field (`"id"` when none is declared).
    #[must_use]
    pub fn id_field(&self) -> &str {
        self.primary_key().map_or("id", |f| f.name.as_str())
    }

    /// Every field set that must be unique: the identity field, each
    /// single-field unique, then the compound constraints.
    #[must_use]
    pub fn unique_sets(&self) -> Vec<Vec<String>> {
        let mut sets: Vec<Vec<String>> = Vec::new();
        if let Some(pk) = self.primary_key() {
            sets.push(vec![pk.name.clone()]);
        }
        for field in self.fields.iter().filter(|f| f.unique && !f.primary_key) {
            sets.push(vec![field.name.clone()]);
        }
        for constraint in &self.unique_constraints {
            if !sets.contains(&constraint.fields) {
                sets.push(constraint.fields.clone());
            }
        }
        sets
    }

    /// Whether the field is covered by a single-field unique constraint.
    #[must_use]
    pub fn is_unique_field(&self, name: &str) -> bool {
        self.unique_sets()
            .iter()
            .any(|set| set.len() == 1 && set[0] == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    fn class_entity() -> EntityInfo {
        EntityInfo::new("Class")
            .add_field(FieldInfo::new("id", FieldType::String).primary_key(true))
            .add_field(FieldInfo::new("code", FieldType::String).unique(true))
            .add_field(FieldInfo::new("schoolId", FieldType::String))
            .add_field(FieldInfo::new("name", FieldType::String))
            .add_unique(UniqueConstraint::new(["schoolId", "name"]))
    }

    #[test]
    fn test_unique_sets_order() {
        let sets = class_entity().unique_sets();
        assert_eq!(
            sets,
            vec![
                vec!["id".to_string()],
                vec!["code".to_string()],
                vec!["schoolId".to_string(), "name".to_string()],
            ]
        );
    }

    #[test]
    fn test_lookups() {
        let entity = class_entity();
        assert_eq!(entity.id_field(), "id");
        assert!(entity.field("name").is_some());
        assert!(entity.field("missing").is_none());
        assert!(entity.is_unique_field("code"));
        assert!(!entity.is_unique_field("name"));
    }
}
