//! `where`-style predicate trees and their evaluation.
//!
//! A [`Filter`] is first checked and normalized against the schema with
//! [`prepare_filter`], which rejects unknown fields and misapplied operators
//! and coerces operands to the field types. [`FilterEvaluator::matches`] then
//! decides match or non-match for one record.
//!
//! Comparisons follow two-valued logic: any comparison against a NULL field
//! is false, except the explicit null checks (`equals: null`, the null
//! markers and `not: null`).

use roster_core::{
    EntityInfo, FieldInfo, FieldType, Record, Result, Schema, TableSource, ValidationError,
    ValidationErrorKind, Value,
};

use crate::relation::related_rows;

/// A recursive predicate over one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// All sub-filters match. Empty matches everything.
    And(Vec<Filter>),
    /// Some sub-filter matches. Empty matches nothing.
    Or(Vec<Filter>),
    /// No sub-filter matches. Empty matches everything.
    Not(Vec<Filter>),
    /// Condition on a scalar field.
    Field {
        field: String,
        condition: FieldFilter,
    },
    /// Condition on the records behind a relation field.
    Relation {
        field: String,
        condition: RelationFilter,
    },
}

impl Filter {
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Negate a single filter.
    pub fn not(filter: Filter) -> Self {
        Filter::Not(vec![filter])
    }

    /// Matches records where none of `filters` match.
    pub fn none_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Not(filters.into_iter().collect())
    }

    pub fn field(field: impl Into<String>, condition: FieldFilter) -> Self {
        Filter::Field {
            field: field.into(),
            condition,
        }
    }

    /// Shorthand for `field: { equals: value }`.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, FieldFilter::new().equals(value))
    }

    pub fn relation(field: impl Into<String>, condition: RelationFilter) -> Self {
        Filter::Relation {
            field: field.into(),
            condition,
        }
    }

    /// A filter that matches every record.
    #[must_use]
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }
}

/// String comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    #[default]
    Default,
    Insensitive,
}

/// Null-specific markers.
///
/// `DbNull` matches a database NULL, `JsonNull` a JSON field holding JSON
/// `null`, and `AnyNull` either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullMarker {
    DbNull,
    JsonNull,
    AnyNull,
}

/// Operand of a field-level `not`.
#[derive(Debug, Clone, PartialEq)]
pub enum NotCondition {
    Value(Value),
    Filter(FieldFilter),
}

/// Conditions on one scalar field. All set conditions must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldFilter {
    pub equals: Option<Value>,
    pub null: Option<NullMarker>,
    pub not: Option<Box<NotCondition>>,
    pub in_list: Option<Vec<Value>>,
    pub not_in: Option<Vec<Value>>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub mode: QueryMode,
    pub has: Option<Value>,
    pub has_every: Option<Vec<Value>>,
    pub has_some: Option<Vec<Value>>,
    pub is_empty: Option<bool>,
}

impl FieldFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn equals(mut self, value: impl Into<Value>) -> Self {
        self.equals = Some(value.into());
        self
    }

    #[must_use]
    pub fn null(mut self, marker: NullMarker) -> Self {
        self.null = Some(marker);
        self
    }

    #[must_use]
    pub fn not(mut self, value: impl Into<Value>) -> Self {
        self.not = Some(Box::new(NotCondition::Value(value.into())));
        self
    }

    #[must_use]
    pub fn not_filter(mut self, filter: FieldFilter) -> Self {
        self.not = Some(Box::new(NotCondition::Filter(filter)));
        self
    }

    #[must_use]
    pub fn in_list<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_list = Some(values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn not_in<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.not_in = Some(values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    #[must_use]
    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    #[must_use]
    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    #[must_use]
    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    #[must_use]
    pub fn contains(mut self, text: impl Into<String>) -> Self {
        self.contains = Some(text.into());
        self
    }

    #[must_use]
    pub fn starts_with(mut self, text: impl Into<String>) -> Self {
        self.starts_with = Some(text.into());
        self
    }

    #[must_use]
    pub fn ends_with(mut self, text: impl Into<String>) -> Self {
        self.ends_with = Some(text.into());
        self
    }

    /// Compare strings case-insensitively.
    #[must_use]
    pub fn insensitive(mut self) -> Self {
        self.mode = QueryMode::Insensitive;
        self
    }

    #[must_use]
    pub fn has(mut self, value: impl Into<Value>) -> Self {
        self.has = Some(value.into());
        self
    }

    #[must_use]
    pub fn has_every<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.has_every = Some(values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn has_some<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.has_some = Some(values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn is_empty(mut self, value: bool) -> Self {
        self.is_empty = Some(value);
        self
    }

    /// Evaluate against one field value.
    ///
    /// Expects a filter normalized by [`prepare_filter`].
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        let ci = self.mode == QueryMode::Insensitive;

        if let Some(expected) = &self.equals {
            if !equals_value(value, expected, ci) {
                return false;
            }
        }
        if let Some(marker) = self.null {
            let hit = match marker {
                NullMarker::DbNull => value.is_null(),
                NullMarker::JsonNull => value.is_json_null(),
                NullMarker::AnyNull => value.is_null() || value.is_json_null(),
            };
            if !hit {
                return false;
            }
        }
        if let Some(not) = &self.not {
            let negated = match not.as_ref() {
                NotCondition::Value(v) if v.is_null() => !value.is_null(),
                NotCondition::Value(v) => !value.is_null() && !equals_value(value, v, ci),
                NotCondition::Filter(inner) => !inner.matches(value),
            };
            if !negated {
                return false;
            }
        }
        if let Some(list) = &self.in_list {
            if value.is_null() || !list.iter().any(|v| equals_value(value, v, ci)) {
                return false;
            }
        }
        if let Some(list) = &self.not_in {
            if !list.is_empty()
                && (value.is_null() || list.iter().any(|v| equals_value(value, v, ci)))
            {
                return false;
            }
        }
        let ordering_checks = [
            (&self.lt, [std::cmp::Ordering::Less].as_slice()),
            (
                &self.lte,
                [std::cmp::Ordering::Less, std::cmp::Ordering::Equal].as_slice(),
            ),
            (&self.gt, [std::cmp::Ordering::Greater].as_slice()),
            (
                &self.gte,
                [std::cmp::Ordering::Greater, std::cmp::Ordering::Equal].as_slice(),
            ),
        ];
        for (bound, accepted) in ordering_checks {
            if let Some(bound) = bound {
                match compare_value(value, bound, ci) {
                    Some(ord) if accepted.contains(&ord) => {}
                    _ => return false,
                }
            }
        }
        if self.contains.is_some() || self.starts_with.is_some() || self.ends_with.is_some() {
            let Some(text) = value.as_str() else {
                return false;
            };
            let text = fold(text, ci);
            if let Some(needle) = &self.contains {
                if !text.contains(&fold(needle, ci)) {
                    return false;
                }
            }
            if let Some(prefix) = &self.starts_with {
                if !text.starts_with(&fold(prefix, ci)) {
                    return false;
                }
            }
            if let Some(suffix) = &self.ends_with {
                if !text.ends_with(&fold(suffix, ci)) {
                    return false;
                }
            }
        }
        if self.has.is_some()
            || self.has_every.is_some()
            || self.has_some.is_some()
            || self.is_empty.is_some()
        {
            let Some(items) = value.as_list() else {
                return false;
            };
            let contains = |needle: &Value| items.iter().any(|item| item.loose_eq(needle));
            if let Some(needle) = &self.has {
                if !contains(needle) {
                    return false;
                }
            }
            if let Some(all) = &self.has_every {
                if !all.iter().all(contains) {
                    return false;
                }
            }
            if let Some(any) = &self.has_some {
                if !any.iter().any(contains) {
                    return false;
                }
            }
            if let Some(empty) = self.is_empty {
                if items.is_empty() != empty {
                    return false;
                }
            }
        }
        true
    }
}

fn fold(text: &str, insensitive: bool) -> String {
    if insensitive {
        text.to_lowercase()
    } else {
        text.to_string()
    }
}

fn equals_value(value: &Value, expected: &Value, insensitive: bool) -> bool {
    match (value, expected) {
        (_, Value::Null) => value.is_null(),
        (Value::Null, _) => false,
        (Value::Text(a), Value::Text(b)) if insensitive => a.to_lowercase() == b.to_lowercase(),
        _ => value.loose_eq(expected),
    }
}

fn compare_value(value: &Value, bound: &Value, insensitive: bool) -> Option<std::cmp::Ordering> {
    match (value, bound) {
        (Value::Text(a), Value::Text(b)) if insensitive => {
            Some(a.to_lowercase().cmp(&b.to_lowercase()))
        }
        _ => value.compare(bound),
    }
}

/// Conditions on the records behind a relation field.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationFilter {
    /// To-one: the related record exists and matches, or with `None`, no
    /// record is linked.
    Is(Option<Box<Filter>>),
    /// To-one: the related record is absent or does not match, or with
    /// `None`, some record is linked.
    IsNot(Option<Box<Filter>>),
    /// To-many: every related record matches (true when there are none).
    Every(Box<Filter>),
    /// To-many: at least one related record matches.
    Some(Box<Filter>),
    /// To-many: no related record matches.
    None(Box<Filter>),
}

impl RelationFilter {
    pub fn is(filter: Filter) -> Self {
        RelationFilter::Is(Some(Box::new(filter)))
    }

    #[must_use]
    pub fn is_null() -> Self {
        RelationFilter::Is(None)
    }

    pub fn is_not(filter: Filter) -> Self {
        RelationFilter::IsNot(Some(Box::new(filter)))
    }

    #[must_use]
    pub fn is_not_null() -> Self {
        RelationFilter::IsNot(None)
    }

    pub fn every(filter: Filter) -> Self {
        RelationFilter::Every(Box::new(filter))
    }

    pub fn some(filter: Filter) -> Self {
        RelationFilter::Some(Box::new(filter))
    }

    pub fn none(filter: Filter) -> Self {
        RelationFilter::None(Box::new(filter))
    }

    fn for_to_many(&self) -> bool {
        matches!(
            self,
            RelationFilter::Every(_) | RelationFilter::Some(_) | RelationFilter::None(_)
        )
    }

    fn inner(&self) -> Option<&Filter> {
        match self {
            RelationFilter::Is(f) | RelationFilter::IsNot(f) => f.as_deref(),
            RelationFilter::Every(f) | RelationFilter::Some(f) | RelationFilter::None(f) => {
                Some(f)
            }
        }
    }
}

// ============================================================================
// Preparation
// ============================================================================

fn invalid(entity: &EntityInfo, field: &str, message: impl Into<String>) -> roster_core::Error {
    ValidationError::new(ValidationErrorKind::InvalidFilter, message)
        .entity(&entity.name)
        .field(field)
        .into()
}

/// Validate `filter` against `entity` and coerce its operands to the field types.
pub fn prepare_filter(schema: &Schema, entity: &EntityInfo, filter: &Filter) -> Result<Filter> {
    Ok(match filter {
        Filter::And(items) => Filter::And(prepare_all(schema, entity, items)?),
        Filter::Or(items) => Filter::Or(prepare_all(schema, entity, items)?),
        Filter::Not(items) => Filter::Not(prepare_all(schema, entity, items)?),
        Filter::Field { field, condition } => {
            let Some(info) = entity.field(field) else {
                let kind = if entity.relation(field).is_some() {
                    ValidationErrorKind::InvalidFilter
                } else {
                    ValidationErrorKind::UnknownField
                };
                return Err(ValidationError::new(kind, format!("`{field}` is not a scalar field"))
                    .entity(&entity.name)
                    .field(field)
                    .into());
            };
            Filter::Field {
                field: field.clone(),
                condition: prepare_field_filter(entity, info, condition)?,
            }
        }
        Filter::Relation { field, condition } => {
            let Some(relation) = entity.relation(field) else {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnknownRelation,
                    format!("`{field}` is not a relation field"),
                )
                .entity(&entity.name)
                .field(field)
                .into());
            };
            if condition.for_to_many() != relation.is_to_many() {
                return Err(invalid(
                    entity,
                    field,
                    if relation.is_to_many() {
                        "to-many relations accept every/some/none"
                    } else {
                        "to-one relations accept is/isNot"
                    },
                ));
            }
            let target = schema.resolve_entity(&relation.related_entity)?;
            let inner = condition
                .inner()
                .map(|f| prepare_filter(schema, target, f).map(Box::new))
                .transpose()?;
            let condition = match (condition, inner) {
                (RelationFilter::Is(_), inner) => RelationFilter::Is(inner),
                (RelationFilter::IsNot(_), inner) => RelationFilter::IsNot(inner),
                (RelationFilter::Every(_), Some(inner)) => RelationFilter::Every(inner),
                (RelationFilter::Some(_), Some(inner)) => RelationFilter::Some(inner),
                (RelationFilter::None(_), Some(inner)) => RelationFilter::None(inner),
                (other, None) => other.clone(),
            };
            Filter::Relation {
                field: field.clone(),
                condition,
            }
        }
    })
}

/// Check `filter` against `entity` without keeping the normalized form.
pub fn validate_filter(schema: &Schema, entity: &EntityInfo, filter: &Filter) -> Result<()> {
    prepare_filter(schema, entity, filter).map(|_| ())
}

fn prepare_all(schema: &Schema, entity: &EntityInfo, items: &[Filter]) -> Result<Vec<Filter>> {
    items
        .iter()
        .map(|f| prepare_filter(schema, entity, f))
        .collect()
}

fn coerce_operand(entity: &EntityInfo, field: &FieldInfo, value: &Value) -> Result<Value> {
    if field.field_type == FieldType::Int && matches!(value, Value::Float(_)) {
        return Ok(value.clone());
    }
    field.field_type.coerce(value.clone()).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::TypeMismatch,
            format!(
                "cannot compare {} field with {}",
                field.field_type.as_str(),
                value.type_name()
            ),
        )
        .entity(&entity.name)
        .field(&field.name)
        .into()
    })
}

fn coerce_element(entity: &EntityInfo, field: &FieldInfo, value: &Value) -> Result<Value> {
    match value {
        Value::Text(_) => Ok(value.clone()),
        other => Err(ValidationError::new(
            ValidationErrorKind::TypeMismatch,
            format!("list elements are strings, got {}", other.type_name()),
        )
        .entity(&entity.name)
        .field(&field.name)
        .into()),
    }
}

pub(crate) fn prepare_field_filter(
    entity: &EntityInfo,
    field: &FieldInfo,
    filter: &FieldFilter,
) -> Result<FieldFilter> {
    let ty = field.field_type;
    let name = field.name.as_str();
    let operand = |v: &Value| coerce_operand(entity, field, v);
    let operands = |vs: &[Value]| vs.iter().map(operand).collect::<Result<Vec<_>>>();
    let elements = |vs: &[Value]| {
        vs.iter()
            .map(|v| coerce_element(entity, field, v))
            .collect::<Result<Vec<_>>>()
    };

    let mut out = FieldFilter {
        mode: filter.mode,
        null: filter.null,
        contains: filter.contains.clone(),
        starts_with: filter.starts_with.clone(),
        ends_with: filter.ends_with.clone(),
        is_empty: filter.is_empty,
        ..FieldFilter::default()
    };

    if filter.mode == QueryMode::Insensitive && !ty.is_textual() {
        return Err(invalid(entity, name, "insensitive mode needs a string field"));
    }
    if matches!(filter.null, Some(NullMarker::JsonNull | NullMarker::AnyNull))
        && ty != FieldType::Json
    {
        return Err(invalid(entity, name, "JsonNull/AnyNull apply to json fields"));
    }
    let ordering = [&filter.lt, &filter.lte, &filter.gt, &filter.gte];
    if ordering.iter().any(|b| b.is_some()) && !ty.is_orderable() {
        return Err(invalid(entity, name, format!("{} fields are not orderable", ty.as_str())));
    }
    let string_ops = filter.contains.is_some()
        || filter.starts_with.is_some()
        || filter.ends_with.is_some();
    if string_ops && ty != FieldType::String {
        return Err(invalid(entity, name, "contains/startsWith/endsWith need a string field"));
    }
    let list_ops = filter.has.is_some()
        || filter.has_every.is_some()
        || filter.has_some.is_some()
        || filter.is_empty.is_some();
    if list_ops && ty != FieldType::StringList {
        return Err(invalid(entity, name, "has/hasEvery/hasSome/isEmpty need a list field"));
    }

    out.equals = filter.equals.as_ref().map(operand).transpose()?;
    out.in_list = filter.in_list.as_deref().map(operands).transpose()?;
    out.not_in = filter.not_in.as_deref().map(operands).transpose()?;
    out.lt = filter.lt.as_ref().map(operand).transpose()?;
    out.lte = filter.lte.as_ref().map(operand).transpose()?;
    out.gt = filter.gt.as_ref().map(operand).transpose()?;
    out.gte = filter.gte.as_ref().map(operand).transpose()?;
    out.has = filter
        .has
        .as_ref()
        .map(|v| coerce_element(entity, field, v))
        .transpose()?;
    out.has_every = filter.has_every.as_deref().map(elements).transpose()?;
    out.has_some = filter.has_some.as_deref().map(elements).transpose()?;
    out.not = match filter.not.as_deref() {
        None => None,
        Some(NotCondition::Value(v)) => Some(Box::new(NotCondition::Value(operand(v)?))),
        Some(NotCondition::Filter(inner)) => Some(Box::new(NotCondition::Filter(
            prepare_field_filter(entity, field, inner)?,
        ))),
    };
    Ok(out)
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluates prepared filters against records, following relation fields
/// through a [`TableSource`].
pub struct FilterEvaluator<'a> {
    schema: &'a Schema,
    source: &'a dyn TableSource,
}

impl<'a> FilterEvaluator<'a> {
    pub fn new(schema: &'a Schema, source: &'a dyn TableSource) -> Self {
        Self { schema, source }
    }

    /// Decide whether `record` of `entity` satisfies `filter`.
    pub fn matches(&self, entity: &EntityInfo, filter: &Filter, record: &Record) -> Result<bool> {
        match filter {
            Filter::And(items) => {
                for item in items {
                    if !self.matches(entity, item, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(items) => {
                for item in items {
                    if self.matches(entity, item, record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(items) => {
                for item in items {
                    if self.matches(entity, item, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Field { field, condition } => Ok(condition.matches(record.value(field))),
            Filter::Relation { field, condition } => {
                let relation = self.schema.resolve_relation(&entity.name, field)?;
                let target = self.schema.resolve_entity(&relation.related_entity)?;
                let related = related_rows(self.source, relation, record)?;
                match condition {
                    RelationFilter::Is(None) => Ok(related.is_empty()),
                    RelationFilter::IsNot(None) => Ok(!related.is_empty()),
                    RelationFilter::Is(Some(inner)) => match related.first() {
                        Some(row) => self.matches(target, inner, row),
                        None => Ok(false),
                    },
                    RelationFilter::IsNot(Some(inner)) => match related.first() {
                        Some(row) => Ok(!self.matches(target, inner, row)?),
                        None => Ok(true),
                    },
                    RelationFilter::Every(inner) => {
                        for row in related {
                            if !self.matches(target, inner, row)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    RelationFilter::Some(inner) => {
                        for row in related {
                            if self.matches(target, inner, row)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    RelationFilter::None(inner) => {
                        for row in related {
                            if self.matches(target, inner, row)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                }
            }
        }
    }
}
