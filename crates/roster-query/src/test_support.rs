//! A small school graph used by the unit tests of this crate.

use roster_core::{
    Dataset, EntityInfo, FieldInfo, FieldType, Record, RelationshipInfo, RelationshipKind, Schema,
    UniqueConstraint, Value,
};

pub fn school_schema() -> Schema {
    Schema::builder()
        .entity(
            EntityInfo::new("School")
                .add_field(FieldInfo::new("id", FieldType::String).primary_key(true))
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_relation(
                    RelationshipInfo::new("classes", "Class", RelationshipKind::OneToMany)
                        .remote_key("schoolId")
                        .back_populates("school"),
                )
                .add_relation(
                    RelationshipInfo::new("students", "Student", RelationshipKind::OneToMany)
                        .remote_key("schoolId")
                        .back_populates("school"),
                ),
        )
        .entity(
            EntityInfo::new("Class")
                .add_field(FieldInfo::new("id", FieldType::String).primary_key(true))
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_field(FieldInfo::new("schoolId", FieldType::String))
                .add_relation(
                    RelationshipInfo::new("school", "School", RelationshipKind::ManyToOne)
                        .local_key("schoolId")
                        .back_populates("classes"),
                )
                .add_relation(
                    RelationshipInfo::new("students", "Student", RelationshipKind::OneToMany)
                        .remote_key("classId")
                        .back_populates("class"),
                )
                .add_unique(UniqueConstraint::new(["schoolId", "name"])),
        )
        .entity(
            EntityInfo::new("Student")
                .add_field(FieldInfo::new("id", FieldType::String).primary_key(true))
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_field(FieldInfo::new("grade", FieldType::Int).nullable(true))
                .add_field(FieldInfo::new("score", FieldType::Float).nullable(true))
                .add_field(FieldInfo::new("schoolId", FieldType::String))
                .add_field(FieldInfo::new("classId", FieldType::String).nullable(true))
                .add_field(FieldInfo::new("enrolledAt", FieldType::DateTime))
                .add_relation(
                    RelationshipInfo::new("school", "School", RelationshipKind::ManyToOne)
                        .local_key("schoolId")
                        .back_populates("students"),
                )
                .add_relation(
                    RelationshipInfo::new("class", "Class", RelationshipKind::ManyToOne)
                        .local_key("classId")
                        .back_populates("students"),
                ),
        )
        .entity(
            EntityInfo::new("Staff")
                .add_field(FieldInfo::new("id", FieldType::String).primary_key(true))
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_field(FieldInfo::new("subjects", FieldType::StringList)),
        )
        .build()
        .expect("test schema is valid")
}

fn student(
    id: &str,
    name: &str,
    grade: Option<i64>,
    score: Option<f64>,
    school: &str,
    class: Option<&str>,
    enrolled: i64,
) -> Record {
    Record::new()
        .with("id", id)
        .with("name", name)
        .with("grade", grade)
        .with("score", score)
        .with("schoolId", school)
        .with("classId", class)
        .with("enrolledAt", Value::Timestamp(enrolled))
}

fn subjects(items: &[&str]) -> Value {
    Value::List(items.iter().map(|s| Value::from(*s)).collect())
}

/// Two schools, three classes (one empty), four students (one without a
/// class or grade) and three staff members.
pub fn school_fixture() -> Dataset {
    let mut data = Dataset::new();
    data.insert_table(
        "School",
        vec![
            Record::new().with("id", "s1").with("name", "North"),
            Record::new().with("id", "s2").with("name", "South"),
        ],
    );
    data.insert_table(
        "Class",
        vec![
            Record::new().with("id", "c1").with("name", "1A").with("schoolId", "s1"),
            Record::new().with("id", "c2").with("name", "1B").with("schoolId", "s2"),
            Record::new().with("id", "c3").with("name", "2A").with("schoolId", "s1"),
        ],
    );
    data.insert_table(
        "Student",
        vec![
            student("t1", "Alice", Some(1), Some(72.5), "s1", Some("c1"), 3_000),
            student("t2", "Bob", Some(2), Some(88.0), "s1", Some("c1"), 1_000),
            student("t3", "Conor", Some(3), None, "s2", Some("c2"), 2_000),
            student("t4", "dana", None, Some(60.0), "s1", None, 4_000),
        ],
    );
    data.insert_table(
        "Staff",
        vec![
            Record::new().with("id", "st1").with("name", "Ms. Park").with("subjects", subjects(&["math", "art"])),
            Record::new().with("id", "st2").with("name", "Mr. Obi").with("subjects", subjects(&["music"])),
            Record::new().with("id", "st3").with("name", "Mx. Lane").with("subjects", subjects(&[])),
        ],
    );
    data
}
