//! School graph shared by this crate's unit tests.

use roster_core::{
    Dataset, DefaultValue, EntityInfo, FieldInfo, FieldType, Record, ReferentialAction,
    RelationshipInfo, RelationshipKind, Schema, UniqueConstraint, Value,
};

fn id_field() -> FieldInfo {
    FieldInfo::new("id", FieldType::String)
        .primary_key(true)
        .default_value(DefaultValue::Uuid)
}

fn owning(name: &str, target: &str, key: &str, policy: Option<ReferentialAction>) -> RelationshipInfo {
    let relation = RelationshipInfo::new(name, target, RelationshipKind::ManyToOne).local_key(key);
    match policy {
        Some(policy) => relation.on_delete(policy),
        None => relation,
    }
}

fn build(school_policy: Option<ReferentialAction>) -> Schema {
    Schema::builder()
        .entity(
            EntityInfo::new("User")
                .add_field(id_field())
                .add_field(FieldInfo::new("email", FieldType::String).unique(true))
                .add_relation(
                    RelationshipInfo::new("staff", "Staff", RelationshipKind::OneToOne)
                        .remote_key("userId"),
                ),
        )
        .entity(
            EntityInfo::new("School")
                .add_field(id_field())
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_relation(
                    RelationshipInfo::new("classes", "Class", RelationshipKind::OneToMany)
                        .remote_key("schoolId"),
                )
                .add_relation(
                    RelationshipInfo::new("students", "Student", RelationshipKind::OneToMany)
                        .remote_key("schoolId"),
                ),
        )
        .entity(
            EntityInfo::new("Class")
                .add_field(id_field())
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_field(FieldInfo::new("schoolId", FieldType::String))
                .add_relation(owning("school", "School", "schoolId", school_policy))
                .add_relation(
                    RelationshipInfo::new("students", "Student", RelationshipKind::OneToMany)
                        .remote_key("classId"),
                )
                .add_unique(UniqueConstraint::new(["schoolId", "name"])),
        )
        .entity(
            EntityInfo::new("Student")
                .add_field(id_field())
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_field(FieldInfo::new("grade", FieldType::Int).nullable(true))
                .add_field(FieldInfo::new("score", FieldType::Float).nullable(true))
                .add_field(FieldInfo::new("schoolId", FieldType::String))
                .add_field(FieldInfo::new("classId", FieldType::String).nullable(true))
                .add_field(
                    FieldInfo::new("enrolledAt", FieldType::DateTime)
                        .default_value(DefaultValue::Now),
                )
                .add_relation(owning("school", "School", "schoolId", school_policy))
                .add_relation(owning("class", "Class", "classId", None)),
        )
        .entity(
            EntityInfo::new("Staff")
                .add_field(id_field())
                .add_field(FieldInfo::new("name", FieldType::String))
                .add_field(FieldInfo::new("userId", FieldType::String).nullable(true).unique(true))
                .add_field(
                    FieldInfo::new("subjects", FieldType::StringList)
                        .default_value(DefaultValue::Static(Value::List(Vec::new()))),
                )
                .add_relation(
                    RelationshipInfo::new("user", "User", RelationshipKind::OneToOne)
                        .local_key("userId"),
                ),
        )
        .build()
        .expect("test schema is valid")
}

/// Required school links restrict deletes.
pub fn school_schema() -> Schema {
    build(None)
}

/// Required school links use `policy` on delete.
pub fn school_schema_with(policy: ReferentialAction) -> Schema {
    build(Some(policy))
}

fn student(id: &str, name: &str, grade: Option<i64>, score: Option<f64>, school: &str, class: Option<&str>) -> Record {
    Record::new()
        .with("id", id)
        .with("name", name)
        .with("grade", grade)
        .with("score", score)
        .with("schoolId", school)
        .with("classId", class)
        .with("enrolledAt", Value::Timestamp(1_000))
}

fn subjects(items: &[&str]) -> Value {
    Value::List(items.iter().map(|s| Value::from(*s)).collect())
}

pub fn school_fixture() -> Dataset {
    let mut data = Dataset::new();
    data.insert_table(
        "User",
        vec![
            Record::new().with("id", "u1").with("email", "park@north.edu"),
            Record::new().with("id", "u2").with("email", "obi@north.edu"),
        ],
    );
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
            student("t1", "Alice", Some(1), Some(72.5), "s1", Some("c1")),
            student("t2", "Bob", Some(2), Some(88.0), "s1", Some("c1")),
            student("t3", "Conor", Some(3), None, "s2", Some("c2")),
            student("t4", "dana", None, Some(60.0), "s1", None),
        ],
    );
    data.insert_table(
        "Staff",
        vec![
            Record::new()
                .with("id", "st1")
                .with("name", "Ms. Park")
                .with("userId", "u1")
                .with("subjects", subjects(&["math", "art"])),
            Record::new()
                .with("id", "st2")
                .with("name", "Mr. Obi")
                .with("userId", Value::Null)
                .with("subjects", subjects(&["music"])),
        ],
    );
    data
}
