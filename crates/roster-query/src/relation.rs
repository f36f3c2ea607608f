//! Resolving relation fields to the records behind them.

use std::collections::HashMap;

use roster_core::{Record, RelationshipInfo, Result, TableSource, ValueKey};

/// Which field holds the join key on each side of a relation.
///
/// Returns `(parent field, child field)`.
#[must_use]
pub fn join_fields(relation: &RelationshipInfo) -> (&str, &str) {
    match (&relation.local_key, &relation.remote_key) {
        (Some(local), _) => (local.as_str(), relation.references.as_str()),
        (None, Some(remote)) => (relation.references.as_str(), remote.as_str()),
        (None, None) => (relation.references.as_str(), relation.references.as_str()),
    }
}

/// Records linked to `record` through `relation`, in store order.
pub fn related_rows<'a>(
    source: &'a dyn TableSource,
    relation: &RelationshipInfo,
    record: &Record,
) -> Result<Vec<&'a Record>> {
    let (parent_field, child_field) = join_fields(relation);
    let key = record.value(parent_field);
    if key.is_null() {
        return Ok(Vec::new());
    }
    Ok(source
        .rows(&relation.related_entity)?
        .iter()
        .filter(|row| row.value(child_field).loose_eq(key))
        .collect())
}

/// Related rows grouped by join key, built once per relation per level.
#[derive(Debug)]
pub struct RelationIndex<'a> {
    parent_field: &'a str,
    by_key: HashMap<ValueKey, Vec<&'a Record>>,
}

impl<'a> RelationIndex<'a> {
    pub fn build(source: &'a dyn TableSource, relation: &'a RelationshipInfo) -> Result<Self> {
        let (parent_field, child_field) = join_fields(relation);
        let mut by_key: HashMap<ValueKey, Vec<&'a Record>> = HashMap::new();
        for row in source.rows(&relation.related_entity)? {
            let key = row.value(child_field);
            if key.is_null() {
                continue;
            }
            by_key
                .entry(ValueKey::single(key.clone()))
                .or_default()
                .push(row);
        }
        Ok(Self {
            parent_field,
            by_key,
        })
    }

    /// Rows linked to `parent`.
    #[must_use]
    pub fn lookup(&self, parent: &Record) -> &[&'a Record] {
        let key = parent.value(self.parent_field);
        if key.is_null() {
            return &[];
        }
        self.by_key
            .get(&ValueKey::single(key.clone()))
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{school_fixture, school_schema};

    #[test]
    fn test_index_matches_scan() {
        let schema = school_schema();
        let data = school_fixture();
        let relation = schema.resolve_relation("Class", "students").unwrap();
        let index = RelationIndex::build(&data, relation).unwrap();
        for class in data.rows("Class").unwrap() {
            let scanned = related_rows(&data, relation, class).unwrap();
            assert_eq!(index.lookup(class), scanned.as_slice());
        }
    }

    #[test]
    fn test_owning_side_lookup() {
        let schema = school_schema();
        let data = school_fixture();
        let relation = schema.resolve_relation("Student", "class").unwrap();
        let t4 = &data.rows("Student").unwrap()[3];
        assert!(related_rows(&data, relation, t4).unwrap().is_empty());
        let t1 = &data.rows("Student").unwrap()[0];
        let class = related_rows(&data, relation, t1).unwrap();
        assert_eq!(class[0].value("name").as_str(), Some("1A"));
    }
}
