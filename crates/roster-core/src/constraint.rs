//! Unique and referential integrity checks shared by the engine and stores.

use crate::entity::EntityInfo;
use crate::error::{ConstraintError, ConstraintErrorKind, Result};
use crate::record::Record;
use crate::schema::Schema;
use crate::table::TableSource;
use crate::value::Value;

/// Find a unique field set on which `candidate` collides with another row.
///
/// `skip` is the position of the candidate itself when it is already in
/// `rows`. Sets with a NULL component never collide.
#[must_use]
pub fn unique_conflict(
    entity: &EntityInfo,
    rows: &[Record],
    candidate: &Record,
    skip: Option<usize>,
) -> Option<Vec<String>> {
    entity.unique_sets().into_iter().find(|set| {
        if set.iter().any(|f| candidate.value(f).is_null()) {
            return false;
        }
        rows.iter().enumerate().any(|(i, row)| {
            Some(i) != skip && set.iter().all(|f| row.value(f).loose_eq(candidate.value(f)))
        })
    })
}

/// Fail with a unique violation if `candidate` collides with another row.
pub fn check_unique(
    entity: &EntityInfo,
    rows: &[Record],
    candidate: &Record,
    skip: Option<usize>,
) -> Result<()> {
    match unique_conflict(entity, rows, candidate, skip) {
        Some(fields) => {
            let values: Vec<String> = fields
                .iter()
                .map(|f| candidate.value(f).to_json().to_string())
                .collect();
            Err(ConstraintError::new(
                ConstraintErrorKind::Unique,
                &entity.name,
                fields,
                format!("a row with ({}) already exists", values.join(", ")),
            )
            .into())
        }
        None => Ok(()),
    }
}

/// Whether some row of `rows` has `field` equal to `key`.
#[must_use]
pub fn has_row_with(rows: &[Record], field: &str, key: &Value) -> bool {
    !key.is_null() && rows.iter().any(|row| row.value(field).loose_eq(key))
}

/// Fail with a foreign key violation if an owning relation of `record`
/// points at a row that does not exist.
pub fn check_foreign_keys(
    schema: &Schema,
    source: &dyn TableSource,
    entity: &EntityInfo,
    record: &Record,
) -> Result<()> {
    for relation in entity.relations.iter().filter(|r| r.is_owning()) {
        let Some(key) = relation.local_key.as_deref() else {
            continue;
        };
        let value = record.value(key);
        if value.is_null() {
            continue;
        }
        let target = schema.resolve_entity(&relation.related_entity)?;
        let rows = source.rows(&target.name)?;
        if !has_row_with(rows, &relation.references, value) {
            return Err(ConstraintError::new(
                ConstraintErrorKind::ForeignKey,
                &entity.name,
                vec![key.to_string()],
                format!(
                    "no {} with {} = {}",
                    target.name,
                    relation.references,
                    value.to_json()
                ),
            )
            .into());
        }
    }
    Ok(())
}

/// First `(dependent entity, relation)` whose rows still reference `record`.
pub fn first_dependent(
    schema: &Schema,
    source: &dyn TableSource,
    entity: &EntityInfo,
    record: &Record,
) -> Result<Option<(String, String)>> {
    for inbound in schema.inbound_relations(&entity.name) {
        let key = record.value(&inbound.relation.references);
        let rows = source.rows(&inbound.entity.name)?;
        if has_row_with(rows, inbound.key(), key) {
            return Ok(Some((
                inbound.entity.name.clone(),
                inbound.relation.name.clone(),
            )));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::UniqueConstraint;
    use crate::error::Error;
    use crate::field::{FieldInfo, FieldType};
    use crate::relationship::{RelationshipInfo, RelationshipKind};
    use crate::table::Dataset;

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntityInfo::new("School")
                    .add_field(FieldInfo::new("id", FieldType::String).primary_key(true)),
            )
            .entity(
                EntityInfo::new("Class")
                    .add_field(FieldInfo::new("id", FieldType::String).primary_key(true))
                    .add_field(FieldInfo::new("schoolId", FieldType::String))
                    .add_field(FieldInfo::new("name", FieldType::String).nullable(true))
                    .add_relation(
                        RelationshipInfo::new("school", "School", RelationshipKind::ManyToOne)
                            .local_key("schoolId"),
                    )
                    .add_unique(UniqueConstraint::new(["schoolId", "name"])),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_unique_conflict_ignores_nulls_and_self() {
        let schema = schema();
        let class = schema.entity("Class").unwrap();
        let rows = vec![
            Record::new().with("id", "c1").with("schoolId", "s1").with("name", "A"),
            Record::new().with("id", "c2").with("schoolId", "s1").with("name", Value::Null),
        ];
        let dup = Record::new().with("id", "c3").with("schoolId", "s1").with("name", "A");
        assert_eq!(
            unique_conflict(class, &rows, &dup, None),
            Some(vec!["schoolId".to_string(), "name".to_string()])
        );
        let null_name = Record::new().with("id", "c4").with("schoolId", "s1").with("name", Value::Null);
        assert_eq!(unique_conflict(class, &rows, &null_name, None), None);
        assert_eq!(unique_conflict(class, &rows, &rows[0], Some(0)), None);
    }

    #[test]
    fn test_foreign_keys_and_dependents() {
        let schema = schema();
        let mut data = Dataset::new();
        data.insert_table("School", vec![Record::new().with("id", "s1")]);
        data.insert_table(
            "Class",
            vec![Record::new().with("id", "c1").with("schoolId", "s1")],
        );
        let class = schema.entity("Class").unwrap();
        let school = schema.entity("School").unwrap();

        let orphan = Record::new().with("id", "c2").with("schoolId", "nope");
        let err = check_foreign_keys(&schema, &data, class, &orphan).unwrap_err();
        assert!(matches!(
            err,
            Error::Constraint(ConstraintError {
                kind: ConstraintErrorKind::ForeignKey,
                ..
            })
        ));

        let s1 = Record::new().with("id", "s1");
        assert_eq!(
            first_dependent(&schema, &data, school, &s1).unwrap(),
            Some(("Class".to_string(), "school".to_string()))
        );
        let s2 = Record::new().with("id", "s2");
        assert_eq!(first_dependent(&schema, &data, school, &s2).unwrap(), None);
    }
}
