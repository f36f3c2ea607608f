//! Relationship metadata for Roster.
//!
//! Relationships are declared in the schema and represented as metadata on
//! each entity. The owning side of a relation carries the foreign key
//! (`local_key`); the inverse side names the key on the related entity
//! (`remote_key`). Both sides point at the same referenced field on the
//! parent entity (`references`, normally its `id`).

use crate::field::ReferentialAction;

/// The type of relationship between two entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: a `Staff` has one `User`.
    OneToOne,
    /// Many-to-one: many `Student`s belong to one `Class`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Class` has many `Student`s.
    OneToMany,
}

impl RelationshipKind {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "oneToOne" | "OneToOne" | "one_to_one" => Some(RelationshipKind::OneToOne),
            "manyToOne" | "ManyToOne" | "many_to_one" => Some(RelationshipKind::ManyToOne),
            "oneToMany" | "OneToMany" | "one_to_many" => Some(RelationshipKind::OneToMany),
            _ => None,
        }
    }
}

/// Metadata about a relationship between entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship field.
    pub name: String,

    /// The related entity's name.
    pub related_entity: String,

    /// Kind of relationship.
    pub kind: RelationshipKind,

    /// Foreign key field on this entity (owning side).
    /// e.g., `"classId"` on `Student`.
    pub local_key: Option<String>,

    /// Foreign key field on the related entity (inverse side).
    /// e.g., `"classId"` on `Student` when accessed from `Class`.
    pub remote_key: Option<String>,

    /// Field on the parent entity the foreign key points at.
    pub references: String,

    /// The field on the related entity that points back.
    pub back_populates: Option<String>,

    /// Delete policy applied to this entity's rows when the referenced row
    /// is deleted. Only meaningful on the owning side.
    pub on_delete: Option<ReferentialAction>,
}

impl RelationshipInfo {
    /// Create a new relationship with required fields.
    pub fn new(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name: name.into(),
            related_entity: related_entity.into(),
            kind,
            local_key: None,
            remote_key: None,
            references: "id".to_string(),
            back_populates: None,
            on_delete: None,
        }
    }

    /// Set the local foreign key field (owning side).
    #[must_use]
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = Some(key.into());
        self
    }

    /// Set the remote foreign key field (inverse side).
    #[must_use]
    pub fn remote_key(mut self, key: impl Into<String>) -> Self {
        self.remote_key = Some(key.into());
        self
    }

    /// Set the referenced field on the parent entity.
    #[must_use]
    pub fn references(mut self, field: impl Into<String>) -> Self {
        self.references = field.into();
        self
    }

    /// Set the back-populates field name (bidirectional relationships).
    #[must_use]
    pub fn back_populates(mut self, field: impl Into<String>) -> Self {
        self.back_populates = Some(field.into());
        self
    }

    /// Set the delete policy.
    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Whether this side stores the foreign key.
    #[must_use]
    pub fn is_owning(&self) -> bool {
        self.local_key.is_some()
    }

    /// Whether the relation yields a list of related records.
    #[must_use]
    pub fn is_to_many(&self) -> bool {
        self.kind == RelationshipKind::OneToMany
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_kind_default() {
        assert_eq!(RelationshipKind::default(), RelationshipKind::ManyToOne);
        assert_eq!(
            RelationshipKind::from_str("oneToMany"),
            Some(RelationshipKind::OneToMany)
        );
        assert_eq!(RelationshipKind::from_str("manyToMany"), None);
    }

    #[test]
    fn test_relationship_info_builder_chain() {
        let info = RelationshipInfo::new("class", "Class", RelationshipKind::ManyToOne)
            .local_key("classId")
            .back_populates("students")
            .on_delete(ReferentialAction::SetNull);

        assert_eq!(info.name, "class");
        assert_eq!(info.related_entity, "Class");
        assert_eq!(info.kind, RelationshipKind::ManyToOne);
        assert_eq!(info.local_key.as_deref(), Some("classId"));
        assert_eq!(info.remote_key, None);
        assert_eq!(info.references, "id");
        assert_eq!(info.back_populates.as_deref(), Some("students"));
        assert_eq!(info.on_delete, Some(ReferentialAction::SetNull));
        assert!(info.is_owning());
        assert!(!info.is_to_many());
    }

    #[test]
    fn test_inverse_side() {
        let info = RelationshipInfo::new("students", "Student", RelationshipKind::OneToMany)
            .remote_key("classId");
        assert!(!info.is_owning());
        assert!(info.is_to_many());
    }
}
