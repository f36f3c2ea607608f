//! Declarative schema loading for Roster.
//!
//! `roster-schema` turns a JSON schema document into a validated
//! [`roster_core::Schema`], and ships the school-management schema the
//! engine is exercised against.
//!
//! # Example
//!
//! ```rust,ignore
//! let schema = roster_schema::load_schema(&std::fs::read_to_string("schema.json")?)?;
//! let school = roster_schema::school_schema()?;
//! ```

pub mod document;
pub mod school;

pub use document::{EntityDocument, FieldDocument, RelationDocument, SchemaDocument};
pub use school::{school_document, school_schema};

use roster_core::{Result, Schema};

/// Parse and validate a JSON schema document.
pub fn load_schema(json: &str) -> Result<Schema> {
    SchemaDocument::from_json(json)?.build()
}
