//! The built-in school-management schema.
//!
//! Entities: School, User, Staff, Parent, Class, Student, Timetable and
//! Attendance. A School cannot be deleted while Classes or Students still
//! reference it; use [`school_document`] with
//! [`SchemaDocument::relation_mut`] to derive a variant with other delete
//! policies.

use roster_core::{Result, Schema};

use crate::document::SchemaDocument;

const SCHOOL_SCHEMA: &str = include_str!("school.json");

/// The school schema as an editable document.
pub fn school_document() -> Result<SchemaDocument> {
    SchemaDocument::from_json(SCHOOL_SCHEMA)
}

/// The validated school schema.
pub fn school_schema() -> Result<Schema> {
    school_document()?.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::{Error, FieldType, ReferentialAction, RelationshipKind};

    #[test]
    fn test_school_schema_builds() {
        let schema = school_schema().unwrap();
        let names: Vec<&str> = schema.entities().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "School",
                "User",
                "Staff",
                "Parent",
                "Class",
                "Student",
                "Timetable",
                "Attendance"
            ]
        );
    }

    #[test]
    fn test_school_schema_keys_and_constraints() {
        let schema = school_schema().unwrap();

        let user = schema.entity("User").unwrap();
        assert!(user.is_unique_field("email"));
        assert!(user.field("email").unwrap().pattern.is_some());
        assert_eq!(user.field("role").unwrap().enum_values.len(), 4);

        let staff = schema.entity("Staff").unwrap();
        assert_eq!(staff.field("subjects").unwrap().field_type, FieldType::StringList);

        let class = schema.entity("Class").unwrap();
        assert!(
            class
                .unique_sets()
                .contains(&vec!["schoolId".to_string(), "name".to_string()])
        );
        let student = schema.entity("Student").unwrap();
        let rel = student.relation("class").unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
        assert_eq!(rel.local_key.as_deref(), Some("classId"));
        assert!(schema.is_optional(student, rel));

        let attendance = schema.entity("Attendance").unwrap();
        assert!(
            attendance
                .unique_sets()
                .contains(&vec!["studentId".to_string(), "date".to_string()])
        );
    }

    #[test]
    fn test_school_delete_policies() {
        let schema = school_schema().unwrap();
        let class = schema.entity("Class").unwrap();
        let student = schema.entity("Student").unwrap();
        assert_eq!(
            schema.delete_policy(class, class.relation("school").unwrap()),
            ReferentialAction::Restrict
        );
        assert_eq!(
            schema.delete_policy(student, student.relation("class").unwrap()),
            ReferentialAction::SetNull
        );

        let inbound: Vec<String> = schema
            .inbound_relations("School")
            .iter()
            .map(|i| format!("{}.{}", i.entity.name, i.relation.name))
            .collect();
        assert_eq!(inbound, ["User.school", "Class.school", "Student.school"]);
    }

    #[test]
    fn test_cascade_variant() {
        let mut doc = school_document().unwrap();
        for entity in ["Class", "Student"] {
            doc.relation_mut(entity, "school").unwrap().on_delete = Some("cascade".into());
        }
        let schema = doc.build().unwrap();
        let class = schema.entity("Class").unwrap();
        assert_eq!(
            schema.delete_policy(class, class.relation("school").unwrap()),
            ReferentialAction::Cascade
        );
    }

    #[test]
    fn test_invalid_policy_is_schema_error() {
        let mut doc = school_document().unwrap();
        // Class.schoolId is required, so it cannot be nulled out.
        doc.relation_mut("Class", "school").unwrap().on_delete = Some("setNull".into());
        assert!(matches!(doc.build(), Err(Error::Schema(_))));
    }
}
