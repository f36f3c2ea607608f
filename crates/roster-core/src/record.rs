//! Entity instances as plain data.
//!
//! A [`Record`] is the request-scoped projection of one row: its scalar
//! values plus whichever relations the caller asked to populate.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::value::Value;

static NULL: Value = Value::Null;

/// Populated relation field.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// A to-one relation; `None` when nothing is linked.
    One(Option<Box<Record>>),
    /// A to-many relation.
    Many(Vec<Record>),
}

impl Related {
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Related::One(Some(record)) => record.to_json(),
            Related::One(None) => serde_json::Value::Null,
            Related::Many(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
        }
    }
}

/// One entity instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// Get a field value if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Get a field value, treating an absent field as NULL.
    #[must_use]
    pub fn value(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Scalar fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of scalar fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.relations.is_empty()
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// The linked record of a populated to-one relation.
    #[must_use]
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relations.get(name) {
            Some(Related::One(Some(record))) => Some(record),
            _ => None,
        }
    }

    /// The records of a populated to-many relation (empty when not populated).
    #[must_use]
    pub fn many(&self, name: &str) -> &[Record] {
        match self.relations.get(name) {
            Some(Related::Many(records)) => records,
            _ => &[],
        }
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    /// Populated relations in name order.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy of this record without populated relations.
    #[must_use]
    pub fn scalars(&self) -> Record {
        Record {
            values: self.values.clone(),
            relations: BTreeMap::new(),
        }
    }

    /// Render as a JSON object; relations nest under their field name.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.values {
            map.insert(k.clone(), v.to_json());
        }
        for (k, rel) in &self.relations {
            map.insert(k.clone(), rel.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// Payload of bulk mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub count: u64,
}

impl BatchResult {
    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self { count }
    }
}
