//! Field definitions and metadata.

use crate::value::Value;

/// Referential action for foreign key constraints.
///
/// Decides what happens to dependent rows when the row they reference is
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// No action - raise error if any references exist.
    #[default]
    NoAction,
    /// Restrict - same as NO ACTION.
    Restrict,
    /// Cascade - delete the referencing rows too.
    Cascade,
    /// Set null - clear the referencing foreign key.
    SetNull,
    /// Set default - reset the referencing foreign key to its default value.
    SetDefault,
}

impl ReferentialAction {
    /// Canonical name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NoAction",
            ReferentialAction::Restrict => "Restrict",
            ReferentialAction::Cascade => "Cascade",
            ReferentialAction::SetNull => "SetNull",
            ReferentialAction::SetDefault => "SetDefault",
        }
    }

    /// Parse a referential action from a string (case-insensitive).
    ///
    /// Returns `None` if the string is not a recognized action.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NO ACTION" | "NOACTION" | "NO_ACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" | "SET_NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "SETDEFAULT" | "SET_DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }

    /// Whether the action rejects deletes while dependents exist.
    #[must_use]
    pub const fn rejects(&self) -> bool {
        matches!(self, ReferentialAction::NoAction | ReferentialAction::Restrict)
    }
}

/// Declared type of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Boolean,
    Int,
    Float,
    DateTime,
    StringList,
    /// A string restricted to the field's `enum_values`.
    Enum,
    Json,
}

impl FieldType {
    /// Parse the schema-document spelling of a type.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "string" | "String" => Some(FieldType::String),
            "boolean" | "Boolean" | "bool" => Some(FieldType::Boolean),
            "int" | "Int" | "integer" => Some(FieldType::Int),
            "float" | "Float" => Some(FieldType::Float),
            "datetime" | "DateTime" => Some(FieldType::DateTime),
            "string[]" | "String[]" => Some(FieldType::StringList),
            "enum" | "Enum" => Some(FieldType::Enum),
            "json" | "Json" => Some(FieldType::Json),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::DateTime => "datetime",
            FieldType::StringList => "string[]",
            FieldType::Enum => "enum",
            FieldType::Json => "json",
        }
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::Float)
    }

    /// Whether values of this type support `lt/gt`, sorting and `_min/_max`.
    #[must_use]
    pub const fn is_orderable(&self) -> bool {
        matches!(
            self,
            FieldType::String
                | FieldType::Boolean
                | FieldType::Int
                | FieldType::Float
                | FieldType::DateTime
                | FieldType::Enum
        )
    }

    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Enum)
    }

    /// Coerce a value into this type's canonical representation.
    ///
    /// NULL passes through unchanged; nullability is checked by the caller.
    /// Returns `None` when the value cannot represent this type.
    #[must_use]
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (FieldType::String | FieldType::Enum, v @ Value::Text(_)) => Some(v),
            (FieldType::Boolean, v @ Value::Bool(_)) => Some(v),
            (FieldType::Int, v @ Value::Int(_)) => Some(v),
            (FieldType::Int, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Some(Value::Int(f as i64))
            }
            (FieldType::Float, v @ Value::Float(_)) => Some(v),
            (FieldType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (FieldType::DateTime, v @ Value::Timestamp(_)) => Some(v),
            (FieldType::DateTime, Value::Int(ms)) => Some(Value::Timestamp(ms)),
            (FieldType::StringList, Value::List(items)) => items
                .into_iter()
                .map(|item| match item {
                    v @ Value::Text(_) => Some(v),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            (FieldType::Json, Value::Json(j)) => Some(Value::Json(j)),
            (FieldType::Json, other) => Some(Value::Json(other.to_json())),
            _ => None,
        }
    }
}

/// How a field is filled in when a create omits it.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// A literal value.
    Static(Value),
    /// A freshly generated v4 UUID string.
    Uuid,
    /// The current time.
    Now,
    /// One more than the largest existing value.
    AutoIncrement,
}

/// Metadata about an entity's scalar field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Field name as used in requests and records.
    pub name: String,
    pub field_type: FieldType,
    /// Whether the field may hold NULL.
    pub nullable: bool,
    /// Whether this is the entity's identity field.
    pub primary_key: bool,
    /// Whether this field alone is unique.
    pub unique: bool,
    pub default: Option<DefaultValue>,
    /// Allowed variants for `Enum` fields.
    pub enum_values: Vec<String>,
    /// Regex every non-null text value must match.
    pub pattern: Option<String>,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            primary_key: false,
            unique: false,
            default: None,
            enum_values: Vec::new(),
            pattern: None,
        }
    }

    #[must_use]
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark as the identity field. Identity fields are unique and never null.
    #[must_use]
    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        if value {
            self.nullable = false;
        }
        self
    }

    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    #[must_use]
    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Whether a create must supply this field.
    #[must_use]
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    /// The literal default, if the default is static.
    #[must_use]
    pub fn static_default(&self) -> Option<&Value> {
        match &self.default {
            Some(DefaultValue::Static(v)) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referential_action_from_str() {
        assert_eq!(
            ReferentialAction::from_str("cascade"),
            Some(ReferentialAction::Cascade)
        );
        assert_eq!(
            ReferentialAction::from_str("SetNull"),
            Some(ReferentialAction::SetNull)
        );
        assert_eq!(
            ReferentialAction::from_str("no_action"),
            Some(ReferentialAction::NoAction)
        );
        assert_eq!(ReferentialAction::from_str("explode"), None);
        assert!(ReferentialAction::Restrict.rejects());
        assert!(!ReferentialAction::Cascade.rejects());
    }

    #[test]
    fn test_coerce_widening_and_rejection() {
        assert_eq!(FieldType::Float.coerce(Value::Int(3)), Some(Value::Float(3.0)));
        assert_eq!(FieldType::Int.coerce(Value::Float(3.0)), Some(Value::Int(3)));
        assert_eq!(FieldType::Int.coerce(Value::Float(3.5)), None);
        assert_eq!(
            FieldType::DateTime.coerce(Value::Int(1_000)),
            Some(Value::Timestamp(1_000))
        );
        assert_eq!(FieldType::Boolean.coerce(Value::from("yes")), None);
        assert_eq!(FieldType::String.coerce(Value::Null), Some(Value::Null));
    }

    #[test]
    fn test_coerce_string_list_requires_text_items() {
        let ok = Value::List(vec![Value::from("math")]);
        assert!(FieldType::StringList.coerce(ok).is_some());
        let bad = Value::List(vec![Value::Int(1)]);
        assert!(FieldType::StringList.coerce(bad).is_none());
    }

    #[test]
    fn test_field_builder_chain() {
        let field = FieldInfo::new("role", FieldType::Enum)
            .enum_values(["ADMIN", "STAFF"])
            .default_value(DefaultValue::Static(Value::from("STAFF")));
        assert!(!field.is_required());
        assert_eq!(field.enum_values, vec!["ADMIN", "STAFF"]);
        assert_eq!(field.static_default(), Some(&Value::from("STAFF")));

        let id = FieldInfo::new("id", FieldType::String)
            .nullable(true)
            .primary_key(true);
        assert!(!id.nullable);
        assert!(id.is_required());
    }
}
