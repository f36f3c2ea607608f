//! Row tables keyed by entity name.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::record::Record;
use crate::value::Value;

/// Read access to the rows of each entity.
pub trait TableSource {
    /// Rows of `entity` in store order.
    ///
    /// Fails when the table is not available to this source.
    fn rows(&self, entity: &str) -> Result<&[Record]>;
}

/// An owned set of tables.
///
/// Used as a transaction's working set and as the backing data of the
/// in-memory store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    tables: BTreeMap<String, Vec<Record>>,
}

impl Dataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, entity: &str) -> bool {
        self.tables.contains_key(entity)
    }

    /// Replace the rows of one table.
    pub fn insert_table(&mut self, entity: impl Into<String>, rows: Vec<Record>) {
        self.tables.insert(entity.into(), rows);
    }

    pub fn table(&self, entity: &str) -> Option<&Vec<Record>> {
        self.tables.get(entity)
    }

    pub fn table_mut(&mut self, entity: &str) -> Result<&mut Vec<Record>> {
        self.tables
            .get_mut(entity)
            .ok_or_else(|| Error::internal(format!("table `{entity}` is not loaded")))
    }

    /// Names of the tables held.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Position of the row whose `id_field` equals `id`.
    #[must_use]
    pub fn position(&self, entity: &str, id_field: &str, id: &Value) -> Option<usize> {
        self.tables
            .get(entity)?
            .iter()
            .position(|row| row.value(id_field).loose_eq(id))
    }

    /// Row whose `id_field` equals `id`.
    #[must_use]
    pub fn find(&self, entity: &str, id_field: &str, id: &Value) -> Option<&Record> {
        let pos = self.position(entity, id_field, id)?;
        self.tables.get(entity).map(|rows| &rows[pos])
    }
}

impl TableSource for Dataset {
    fn rows(&self, entity: &str) -> Result<&[Record]> {
        self.tables
            .get(entity)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::internal(format!("table `{entity}` is not loaded")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_lookup() {
        let mut data = Dataset::new();
        data.insert_table(
            "School",
            vec![Record::new().with("id", "s1"), Record::new().with("id", "s2")],
        );
        assert_eq!(data.position("School", "id", &Value::from("s2")), Some(1));
        assert!(data.find("School", "id", &Value::from("s3")).is_none());
        assert_eq!(data.rows("School").unwrap().len(), 2);
        assert!(data.rows("Class").is_err());
    }
}
