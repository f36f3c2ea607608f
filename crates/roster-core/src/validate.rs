//! Runtime validation of field values.
//!
//! Every value written through a create or update passes through
//! [`validate_field_value`], which coerces it to the declared type and
//! enforces nullability, enum variants and field patterns.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use regex::Regex;

use crate::error::{Result, ValidationError, ValidationErrorKind};
use crate::field::{FieldInfo, FieldType};
use crate::value::Value;

/// Thread-safe regex cache for compiled patterns.
///
/// Patterns are compiled lazily on first use and cached for the lifetime
/// of the program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> std::result::Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

/// Global regex cache singleton.
fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// Returns `false` if the pattern is invalid (logs a warning). Schema
/// patterns are checked with [`validate_pattern`] at build time, so this only
/// happens for patterns that bypassed the schema builder.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Validate a regex pattern.
///
/// Returns an error message if the pattern is invalid, None if valid.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    match Regex::new(pattern) {
        Ok(_) => None,
        Err(e) => Some(format!("invalid regex pattern: {e}")),
    }
}

/// Coerce and check one value destined for `field` on `entity`.
pub fn validate_field_value(entity: &str, field: &FieldInfo, value: Value) -> Result<Value> {
    let found = value.type_name();
    let value = field.field_type.coerce(value).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::TypeMismatch,
            format!("expected {}, got {found}", field.field_type.as_str()),
        )
        .entity(entity)
        .field(&field.name)
    })?;

    if value.is_null() {
        if field.nullable {
            return Ok(value);
        }
        return Err(ValidationError::new(
            ValidationErrorKind::MissingRequired,
            "field is not nullable",
        )
        .entity(entity)
        .field(&field.name)
        .into());
    }

    if field.field_type == FieldType::Enum {
        let text = value.as_str().unwrap_or_default();
        if !field.enum_values.iter().any(|v| v == text) {
            return Err(ValidationError::new(
                ValidationErrorKind::InvalidValue,
                format!(
                    "`{text}` is not one of [{}]",
                    field.enum_values.join(", ")
                ),
            )
            .entity(entity)
            .field(&field.name)
            .into());
        }
    }

    if let Some(pattern) = &field.pattern {
        let texts: Vec<&str> = match &value {
            Value::Text(s) => vec![s.as_str()],
            Value::List(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if let Some(bad) = texts.into_iter().find(|t| !matches_pattern(t, pattern)) {
            return Err(ValidationError::new(
                ValidationErrorKind::InvalidValue,
                format!("`{bad}` does not match pattern {pattern}"),
            )
            .entity(entity)
            .field(&field.name)
            .into());
        }
    }

    Ok(value)
}
