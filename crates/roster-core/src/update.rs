//! Field-level updates.
//!
//! An update is published to the store as the changes it makes, not as the
//! resulting row, so the store can re-apply them to the row it holds at
//! commit time. Both sides compute the new value with [`apply_field_update`].

use crate::entity::EntityInfo;
use crate::error::{Error, Result, ValidationError, ValidationErrorKind};
use crate::field::{FieldInfo, FieldType};
use crate::record::Record;
use crate::validate::validate_field_value;
use crate::value::Value;

/// Change applied to one scalar field by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    Increment(Value),
    Decrement(Value),
    Multiply(Value),
    Divide(Value),
    /// Append one element or a list of elements to a list field.
    Push(Value),
}

impl FieldUpdate {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            FieldUpdate::Set(_) => "set",
            FieldUpdate::Increment(_) => "increment",
            FieldUpdate::Decrement(_) => "decrement",
            FieldUpdate::Multiply(_) => "multiply",
            FieldUpdate::Divide(_) => "divide",
            FieldUpdate::Push(_) => "push",
        }
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Int(v) => *v == 0,
        Value::Float(v) => *v == 0.0,
        _ => false,
    }
}

/// Apply an arithmetic update. NULL stays NULL.
fn arithmetic(
    entity: &EntityInfo,
    field: &FieldInfo,
    current: &Value,
    update: &FieldUpdate,
) -> Result<Value> {
    let invalid = |kind: ValidationErrorKind, message: String| -> Error {
        ValidationError::new(kind, message)
            .entity(&entity.name)
            .field(&field.name)
            .into()
    };
    let op = update.name();
    let operand = match update {
        FieldUpdate::Increment(v)
        | FieldUpdate::Decrement(v)
        | FieldUpdate::Multiply(v)
        | FieldUpdate::Divide(v) => v,
        FieldUpdate::Set(_) | FieldUpdate::Push(_) => {
            return Err(Error::internal("not an arithmetic update"));
        }
    };
    if !field.field_type.is_numeric() {
        return Err(invalid(
            ValidationErrorKind::InvalidArgs,
            format!("{op} requires a numeric field"),
        ));
    }
    let operand = match field.field_type.coerce(operand.clone()) {
        Some(v) if !v.is_null() => v,
        _ => {
            return Err(invalid(
                ValidationErrorKind::TypeMismatch,
                format!(
                    "{op} expects a {} operand, got {}",
                    field.field_type.as_str(),
                    operand.type_name()
                ),
            ));
        }
    };
    if matches!(update, FieldUpdate::Divide(_)) && is_zero(&operand) {
        return Err(invalid(ValidationErrorKind::InvalidValue, "division by zero".into()));
    }
    if current.is_null() {
        return Ok(Value::Null);
    }

    match (current, &operand) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match update {
                FieldUpdate::Increment(_) => a.checked_add(*b),
                FieldUpdate::Decrement(_) => a.checked_sub(*b),
                FieldUpdate::Multiply(_) => a.checked_mul(*b),
                _ => a.checked_div(*b),
            };
            result.map(Value::Int).ok_or_else(|| {
                invalid(ValidationErrorKind::InvalidValue, format!("{op} overflows"))
            })
        }
        _ => {
            let (Some(a), Some(b)) = (current.as_f64(), operand.as_f64()) else {
                return Err(invalid(
                    ValidationErrorKind::TypeMismatch,
                    format!("stored value is {}", current.type_name()),
                ));
            };
            let result = match update {
                FieldUpdate::Increment(_) => a + b,
                FieldUpdate::Decrement(_) => a - b,
                FieldUpdate::Multiply(_) => a * b,
                _ => a / b,
            };
            if result.is_finite() {
                Ok(Value::Float(result))
            } else {
                Err(invalid(ValidationErrorKind::InvalidValue, format!("{op} overflows")))
            }
        }
    }
}

/// New value of `field` after `update`.
pub fn apply_field_update(
    entity: &EntityInfo,
    field: &FieldInfo,
    current: &Value,
    update: &FieldUpdate,
) -> Result<Value> {
    match update {
        FieldUpdate::Set(value) => validate_field_value(&entity.name, field, value.clone()),
        FieldUpdate::Push(item) => {
            if field.field_type != FieldType::StringList {
                return Err(ValidationError::new(
                    ValidationErrorKind::InvalidArgs,
                    "push requires a list field",
                )
                .entity(&entity.name)
                .field(&field.name)
                .into());
            }
            let mut items = current.as_list().map(<[Value]>::to_vec).unwrap_or_default();
            match item {
                Value::List(more) => items.extend(more.iter().cloned()),
                other => items.push(other.clone()),
            }
            validate_field_value(&entity.name, field, Value::List(items))
        }
        _ => arithmetic(entity, field, current, update),
    }
}

/// Apply every change in `changes` to a copy of `row`.
///
/// Fields the entity does not declare are rejected.
pub fn apply_changes(
    entity: &EntityInfo,
    row: &Record,
    changes: &[(String, FieldUpdate)],
) -> Result<Record> {
    let mut next = row.clone();
    for (name, update) in changes {
        let field = entity.field(name).ok_or_else(|| {
            Error::from(
                ValidationError::new(ValidationErrorKind::UnknownField, "unknown field")
                    .entity(&entity.name)
                    .field(name),
            )
        })?;
        let value = apply_field_update(entity, field, next.value(name), update)?;
        next.set(name.clone(), value);
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityInfo {
        EntityInfo::new("Student")
            .add_field(FieldInfo::new("id", FieldType::String).primary_key(true))
            .add_field(FieldInfo::new("grade", FieldType::Int).nullable(true))
            .add_field(FieldInfo::new("score", FieldType::Float).nullable(true))
    }

    fn validation_kind(err: &Error) -> Option<ValidationErrorKind> {
        match err {
            Error::Validation(e) => Some(e.kind),
            _ => None,
        }
    }

    #[test]
    fn test_changes_compose_on_the_current_row() {
        let entity = entity();
        let row = Record::new().with("id", "t1").with("grade", 3);
        let changes = vec![
            ("grade".to_string(), FieldUpdate::Increment(Value::from(1))),
            ("grade".to_string(), FieldUpdate::Multiply(Value::from(2))),
        ];
        let next = apply_changes(&entity, &row, &changes).unwrap();
        assert_eq!(next.value("grade"), &Value::from(8));
        assert_eq!(next.value("id"), &Value::from("t1"));
    }

    #[test]
    fn test_divide_by_zero_rejected_even_on_null() {
        let entity = entity();
        let field = entity.field("grade").unwrap();
        for current in [Value::Null, Value::from(4)] {
            let err =
                apply_field_update(&entity, field, &current, &FieldUpdate::Divide(Value::from(0)))
                    .unwrap_err();
            assert_eq!(validation_kind(&err), Some(ValidationErrorKind::InvalidValue));
        }
        let score = entity.field("score").unwrap();
        let err = apply_field_update(&entity, score, &Value::Null, &FieldUpdate::Divide(Value::from(0.0)))
            .unwrap_err();
        assert_eq!(validation_kind(&err), Some(ValidationErrorKind::InvalidValue));

        let halved =
            apply_field_update(&entity, field, &Value::Null, &FieldUpdate::Divide(Value::from(2)))
                .unwrap();
        assert!(halved.is_null());
    }

    #[test]
    fn test_unknown_field_in_changes() {
        let row = Record::new().with("id", "t1");
        let changes = vec![("nickname".to_string(), FieldUpdate::Set(Value::from("T")))];
        let err = apply_changes(&entity(), &row, &changes).unwrap_err();
        assert_eq!(validation_kind(&err), Some(ValidationErrorKind::UnknownField));
    }
}
