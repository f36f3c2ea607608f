//! `aggregate` and `groupBy`.

use std::collections::{BTreeMap, HashMap};

use serde::{Serialize, Serializer};

use roster_core::{
    EntityInfo, FieldInfo, FieldType, Record, Result, ValidationError, ValidationErrorKind, Value,
    ValueKey,
};

use crate::args::{AggregateSelection, OrderBy, SortOrder};
use crate::filter::{FieldFilter, prepare_field_filter};
use crate::order::{compare_sort_values, page};

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Min,
    Max,
    Avg,
    Sum,
}

impl AggregateFn {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Count => "_count",
            AggregateFn::Min => "_min",
            AggregateFn::Max => "_max",
            AggregateFn::Avg => "_avg",
            AggregateFn::Sum => "_sum",
        }
    }
}

/// Computed aggregates. Only requested entries are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    pub count_all: Option<u64>,
    pub count: BTreeMap<String, u64>,
    pub min: BTreeMap<String, Value>,
    pub max: BTreeMap<String, Value>,
    pub avg: BTreeMap<String, Value>,
    pub sum: BTreeMap<String, Value>,
}

impl AggregateResult {
    /// Look up one computed aggregate.
    #[must_use]
    pub fn get(&self, func: AggregateFn, field: &str) -> Option<Value> {
        match func {
            AggregateFn::Count => self.count.get(field).map(|n| count_value(*n)),
            AggregateFn::Min => self.min.get(field).cloned(),
            AggregateFn::Max => self.max.get(field).cloned(),
            AggregateFn::Avg => self.avg.get(field).cloned(),
            AggregateFn::Sum => self.sum.get(field).cloned(),
        }
    }

    /// Render as `{ "_count": { "_all": n, .. }, "_min": { .. }, .. }`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        if self.count_all.is_some() || !self.count.is_empty() {
            let mut count = serde_json::Map::new();
            if let Some(all) = self.count_all {
                count.insert("_all".to_string(), all.into());
            }
            for (field, n) in &self.count {
                count.insert(field.clone(), (*n).into());
            }
            out.insert("_count".to_string(), serde_json::Value::Object(count));
        }
        for (func, values) in [
            (AggregateFn::Min, &self.min),
            (AggregateFn::Max, &self.max),
            (AggregateFn::Avg, &self.avg),
            (AggregateFn::Sum, &self.sum),
        ] {
            if !values.is_empty() {
                let map = values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<serde_json::Map<_, _>>();
                out.insert(func.as_str().to_string(), serde_json::Value::Object(map));
            }
        }
        serde_json::Value::Object(out)
    }
}

impl Serialize for AggregateResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn count_value(n: u64) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

// ============================================================================
// Computation
// ============================================================================

fn field_of<'a>(entity: &'a EntityInfo, name: &str) -> Result<&'a FieldInfo> {
    entity.field(name).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::UnknownField,
            format!("`{name}` is not a scalar field"),
        )
        .entity(&entity.name)
        .field(name)
        .into()
    })
}

fn check_function(entity: &EntityInfo, func: AggregateFn, field: &FieldInfo) -> Result<()> {
    let ok = match func {
        AggregateFn::Count => true,
        AggregateFn::Min | AggregateFn::Max => field.field_type.is_orderable(),
        AggregateFn::Avg | AggregateFn::Sum => field.field_type.is_numeric(),
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::new(
            ValidationErrorKind::InvalidArgs,
            format!(
                "{} is not defined for {} field `{}`",
                func.as_str(),
                field.field_type.as_str(),
                field.name
            ),
        )
        .entity(&entity.name)
        .field(&field.name)
        .into())
    }
}

/// Check that every requested aggregate applies to its field.
pub fn validate_aggregates(entity: &EntityInfo, selection: &AggregateSelection) -> Result<()> {
    for (func, fields) in [
        (AggregateFn::Count, &selection.count),
        (AggregateFn::Min, &selection.min),
        (AggregateFn::Max, &selection.max),
        (AggregateFn::Avg, &selection.avg),
        (AggregateFn::Sum, &selection.sum),
    ] {
        for name in fields {
            check_function(entity, func, field_of(entity, name)?)?;
        }
    }
    Ok(())
}

/// One aggregate over `rows`. NULL values are ignored; an empty input gives
/// NULL for everything but counts.
fn aggregate_value(func: AggregateFn, field: &str, field_type: FieldType, rows: &[&Record]) -> Value {
    let values = rows.iter().map(|r| r.value(field)).filter(|v| !v.is_null());
    match func {
        AggregateFn::Count => count_value(values.count() as u64),
        AggregateFn::Min => values
            .min_by(|a, b| a.compare(b).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
            .unwrap_or_default(),
        AggregateFn::Max => values
            .max_by(|a, b| a.compare(b).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
            .unwrap_or_default(),
        AggregateFn::Avg => {
            let nums: Vec<f64> = values.filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggregateFn::Sum => {
            let values: Vec<&Value> = values.collect();
            if values.is_empty() {
                return Value::Null;
            }
            if field_type == FieldType::Int {
                let total = values
                    .iter()
                    .filter_map(|v| v.as_i64())
                    .try_fold(0i64, i64::checked_add);
                if let Some(total) = total {
                    return Value::Int(total);
                }
            }
            Value::Float(values.iter().filter_map(|v| v.as_f64()).sum())
        }
    }
}

/// Compute the requested aggregates over `rows`.
pub fn compute_aggregates(
    entity: &EntityInfo,
    selection: &AggregateSelection,
    rows: &[&Record],
) -> Result<AggregateResult> {
    let mut out = AggregateResult {
        count_all: selection.count_all.then_some(rows.len() as u64),
        ..AggregateResult::default()
    };
    for name in &selection.count {
        let n = rows.iter().filter(|r| !r.value(name).is_null()).count();
        out.count.insert(name.clone(), n as u64);
    }
    for (func, fields, target) in [
        (AggregateFn::Min, &selection.min, &mut out.min),
        (AggregateFn::Max, &selection.max, &mut out.max),
        (AggregateFn::Avg, &selection.avg, &mut out.avg),
        (AggregateFn::Sum, &selection.sum, &mut out.sum),
    ] {
        for name in fields {
            let field = field_of(entity, name)?;
            target.insert(name.clone(), aggregate_value(func, name, field.field_type, rows));
        }
    }
    Ok(out)
}

// ============================================================================
// groupBy
// ============================================================================

/// Condition on a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Having {
    And(Vec<Having>),
    Or(Vec<Having>),
    Not(Vec<Having>),
    /// Condition on a `by` field value.
    Field { field: String, condition: FieldFilter },
    /// Condition on an aggregate of the group. `field: None` with
    /// [`AggregateFn::Count`] is `_count._all`.
    Aggregate {
        func: AggregateFn,
        field: Option<String>,
        condition: FieldFilter,
    },
}

impl Having {
    pub fn field(field: impl Into<String>, condition: FieldFilter) -> Self {
        Having::Field {
            field: field.into(),
            condition,
        }
    }

    pub fn aggregate(func: AggregateFn, field: impl Into<String>, condition: FieldFilter) -> Self {
        Having::Aggregate {
            func,
            field: Some(field.into()),
            condition,
        }
    }

    #[must_use]
    pub fn count_all(condition: FieldFilter) -> Self {
        Having::Aggregate {
            func: AggregateFn::Count,
            field: None,
            condition,
        }
    }
}

/// Sort key of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOrderBy {
    Field(OrderBy),
    CountAll(SortOrder),
    Aggregate {
        func: AggregateFn,
        field: String,
        direction: SortOrder,
    },
}

/// Arguments of `groupBy`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    pub filter: Option<crate::filter::Filter>,
    pub having: Option<Having>,
    pub order_by: Vec<GroupOrderBy>,
    pub take: Option<i64>,
    pub skip: Option<u64>,
    pub aggregates: AggregateSelection,
}

impl GroupByArgs {
    pub fn new<I, S>(by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            by: by.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: crate::filter::Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn having(mut self, having: Having) -> Self {
        self.having = Some(having);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: GroupOrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    #[must_use]
    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn aggregates(mut self, aggregates: AggregateSelection) -> Self {
        self.aggregates = aggregates;
        self
    }
}

/// One result row of `groupBy`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// Values of the `by` fields.
    pub key: BTreeMap<String, Value>,
    pub aggregates: AggregateResult,
}

impl GroupRow {
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = match self.aggregates.to_json() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (field, value) in &self.key {
            out.insert(field.clone(), value.to_json());
        }
        serde_json::Value::Object(out)
    }
}

impl Serialize for GroupRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn group_err(entity: &EntityInfo, message: impl Into<String>) -> roster_core::Error {
    ValidationError::new(ValidationErrorKind::InvalidGroupBy, message)
        .entity(&entity.name)
        .into()
}

/// Check cross-field rules of a `groupBy` and normalize its conditions.
pub fn prepare_group_by(entity: &EntityInfo, args: &GroupByArgs) -> Result<GroupByArgs> {
    if args.by.is_empty() {
        return Err(group_err(entity, "`by` must name at least one field"));
    }
    for name in &args.by {
        field_of(entity, name)?;
    }
    validate_aggregates(entity, &args.aggregates)?;

    let in_by = |name: &str| args.by.iter().any(|b| b == name);
    for order in &args.order_by {
        match order {
            GroupOrderBy::Field(o) if !in_by(&o.field) => {
                return Err(group_err(
                    entity,
                    format!("orderBy field `{}` is not in `by`", o.field),
                ));
            }
            GroupOrderBy::Aggregate { func, field, .. } => {
                if !in_by(field) {
                    return Err(group_err(
                        entity,
                        format!("orderBy {} of `{field}`, which is not in `by`", func.as_str()),
                    ));
                }
                check_function(entity, *func, field_of(entity, field)?)?;
            }
            _ => {}
        }
    }
    if (args.take.is_some() || args.skip.is_some()) && args.order_by.is_empty() {
        return Err(group_err(entity, "take/skip require orderBy"));
    }

    let having = args
        .having
        .as_ref()
        .map(|h| prepare_having(entity, &args.by, h))
        .transpose()?;
    Ok(GroupByArgs {
        having,
        ..args.clone()
    })
}

fn prepare_having(entity: &EntityInfo, by: &[String], having: &Having) -> Result<Having> {
    let all = |items: &[Having]| {
        items
            .iter()
            .map(|h| prepare_having(entity, by, h))
            .collect::<Result<Vec<_>>>()
    };
    let in_by = |name: &str| by.iter().any(|b| b == name);
    Ok(match having {
        Having::And(items) => Having::And(all(items)?),
        Having::Or(items) => Having::Or(all(items)?),
        Having::Not(items) => Having::Not(all(items)?),
        Having::Field { field, condition } => {
            if !in_by(field) {
                return Err(group_err(entity, format!("having field `{field}` is not in `by`")));
            }
            Having::Field {
                field: field.clone(),
                condition: prepare_field_filter(entity, field_of(entity, field)?, condition)?,
            }
        }
        Having::Aggregate {
            func,
            field: None,
            condition,
        } => {
            if *func != AggregateFn::Count {
                return Err(group_err(entity, format!("{} needs a field", func.as_str())));
            }
            let synthetic = FieldInfo::new("_count", FieldType::Int);
            Having::Aggregate {
                func: *func,
                field: None,
                condition: prepare_field_filter(entity, &synthetic, condition)?,
            }
        }
        Having::Aggregate {
            func,
            field: Some(field),
            condition,
        } => {
            if !in_by(field) {
                return Err(group_err(
                    entity,
                    format!("having {} of `{field}`, which is not in `by`", func.as_str()),
                ));
            }
            let info = field_of(entity, field)?;
            check_function(entity, *func, info)?;
            let result_type = match func {
                AggregateFn::Count => FieldType::Int,
                AggregateFn::Avg => FieldType::Float,
                AggregateFn::Min | AggregateFn::Max | AggregateFn::Sum => info.field_type,
            };
            let synthetic = FieldInfo::new(func.as_str(), result_type);
            Having::Aggregate {
                func: *func,
                field: Some(field.clone()),
                condition: prepare_field_filter(entity, &synthetic, condition)?,
            }
        }
    })
}

struct Group<'a> {
    key: BTreeMap<String, Value>,
    rows: Vec<&'a Record>,
}

impl Group<'_> {
    fn aggregate(&self, entity: &EntityInfo, func: AggregateFn, field: Option<&str>) -> Value {
        match field {
            None => count_value(self.rows.len() as u64),
            Some(name) => {
                let ty = entity.field(name).map_or(FieldType::Json, |f| f.field_type);
                aggregate_value(func, name, ty, &self.rows)
            }
        }
    }

    fn satisfies(&self, entity: &EntityInfo, having: &Having) -> bool {
        match having {
            Having::And(items) => items.iter().all(|h| self.satisfies(entity, h)),
            Having::Or(items) => items.iter().any(|h| self.satisfies(entity, h)),
            Having::Not(items) => !items.iter().any(|h| self.satisfies(entity, h)),
            Having::Field { field, condition } => {
                condition.matches(self.key.get(field).unwrap_or(&Value::Null))
            }
            Having::Aggregate {
                func,
                field,
                condition,
            } => condition.matches(&self.aggregate(entity, *func, field.as_deref())),
        }
    }

    fn sort_key(&self, entity: &EntityInfo, order: &GroupOrderBy) -> (Value, SortOrder, bool) {
        match order {
            GroupOrderBy::Field(o) => (
                self.key.get(&o.field).cloned().unwrap_or_default(),
                o.direction,
                o.nulls_first(),
            ),
            GroupOrderBy::CountAll(direction) => (
                self.aggregate(entity, AggregateFn::Count, None),
                *direction,
                false,
            ),
            GroupOrderBy::Aggregate {
                func,
                field,
                direction,
            } => (
                self.aggregate(entity, *func, Some(field)),
                *direction,
                *direction == SortOrder::Desc,
            ),
        }
    }
}

/// Group already filtered `rows` by `args.by` and evaluate `having`, order
/// and paging. `args` must come from [`prepare_group_by`].
pub fn group_rows(entity: &EntityInfo, args: &GroupByArgs, rows: &[&Record]) -> Result<Vec<GroupRow>> {
    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut index: HashMap<ValueKey, usize> = HashMap::new();
    for &row in rows {
        let values: Vec<Value> = args.by.iter().map(|f| row.value(f).clone()).collect();
        let slot = *index.entry(ValueKey(values.clone())).or_insert_with(|| {
            groups.push(Group {
                key: args.by.iter().cloned().zip(values).collect(),
                rows: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].rows.push(row);
    }

    if let Some(having) = &args.having {
        groups.retain(|g| g.satisfies(entity, having));
    }

    if !args.order_by.is_empty() {
        groups.sort_by(|a, b| {
            for order in &args.order_by {
                let (av, direction, nulls_first) = a.sort_key(entity, order);
                let (bv, _, _) = b.sort_key(entity, order);
                let ord = compare_sort_values(&av, &bv, direction, nulls_first);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    page(groups, None, args.skip, args.take)
        .into_iter()
        .map(|g| {
            Ok(GroupRow {
                aggregates: compute_aggregates(entity, &args.aggregates, &g.rows)?,
                key: g.key,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::NullsOrder;
    use crate::test_support::{school_fixture, school_schema};
    use roster_core::{Error, TableSource};

    fn students(data: &roster_core::Dataset) -> Vec<&Record> {
        data.rows("Student").unwrap().iter().collect()
    }

    #[test]
    fn test_aggregates_skip_nulls() {
        let schema = school_schema();
        let data = school_fixture();
        let entity = schema.entity("Student").unwrap();
        let selection = AggregateSelection::new()
            .count_all()
            .count("grade")
            .min("grade")
            .max("name")
            .avg("grade")
            .sum("grade");
        let result = compute_aggregates(entity, &selection, &students(&data)).unwrap();
        assert_eq!(result.count_all, Some(4));
        assert_eq!(result.count["grade"], 3);
        assert_eq!(result.min["grade"], Value::Int(1));
        assert_eq!(result.max["name"], Value::from("dana"));
        assert_eq!(result.avg["grade"], Value::Float(2.0));
        assert_eq!(result.sum["grade"], Value::Int(6));
        assert_eq!(
            result.to_json()["_count"],
            serde_json::json!({ "_all": 4, "grade": 3 })
        );
    }

    #[test]
    fn test_empty_input() {
        let schema = school_schema();
        let entity = schema.entity("Student").unwrap();
        let selection = AggregateSelection::new().count_all().avg("score").min("name");
        let result = compute_aggregates(entity, &selection, &[]).unwrap();
        assert_eq!(result.count_all, Some(0));
        assert!(result.avg["score"].is_null());
        assert!(result.min["name"].is_null());
    }

    #[test]
    fn test_numeric_only_functions() {
        let schema = school_schema();
        let entity = schema.entity("Student").unwrap();
        let err = validate_aggregates(entity, &AggregateSelection::new().avg("name")).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError {
                kind: ValidationErrorKind::InvalidArgs,
                ..
            })
        ));
    }

    #[test]
    fn test_group_by_rules() {
        let schema = school_schema();
        let entity = schema.entity("Student").unwrap();
        let invalid = |args: GroupByArgs| match prepare_group_by(entity, &args) {
            Err(Error::Validation(e)) => e.kind == ValidationErrorKind::InvalidGroupBy,
            _ => false,
        };

        assert!(invalid(GroupByArgs::new(Vec::<String>::new())));
        assert!(invalid(
            GroupByArgs::new(["schoolId"]).having(Having::field("grade", FieldFilter::new().gt(1)))
        ));
        assert!(invalid(
            GroupByArgs::new(["schoolId"]).order_by(GroupOrderBy::Field(OrderBy::asc("name")))
        ));
        assert!(invalid(GroupByArgs::new(["schoolId"]).take(1)));
        assert!(
            prepare_group_by(
                entity,
                &GroupByArgs::new(["schoolId"])
                    .having(Having::count_all(FieldFilter::new().gt(1)))
                    .order_by(GroupOrderBy::CountAll(SortOrder::Desc))
                    .take(1)
            )
            .is_ok()
        );
    }

    #[test]
    fn test_group_rows() {
        let schema = school_schema();
        let data = school_fixture();
        let entity = schema.entity("Student").unwrap();
        let args = prepare_group_by(
            entity,
            &GroupByArgs::new(["schoolId"])
                .aggregates(AggregateSelection::new().count_all().avg("score"))
                .order_by(GroupOrderBy::Field(OrderBy::asc("schoolId"))),
        )
        .unwrap();
        let groups = group_rows(entity, &args, &students(&data)).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key["schoolId"], Value::from("s1"));
        assert_eq!(groups[0].aggregates.count_all, Some(3));
        assert_eq!(groups[1].aggregates.avg["score"], Value::Null);

        let having = prepare_group_by(
            entity,
            &GroupByArgs::new(["schoolId"]).having(Having::count_all(FieldFilter::new().gte(2))),
        )
        .unwrap();
        let groups = group_rows(entity, &having, &students(&data)).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].to_json(),
            serde_json::json!({ "schoolId": "s1" })
        );
    }

    #[test]
    fn test_group_key_with_nulls() {
        let schema = school_schema();
        let data = school_fixture();
        let entity = schema.entity("Student").unwrap();
        let args = prepare_group_by(
            entity,
            &GroupByArgs::new(["classId"])
                .order_by(GroupOrderBy::Field(OrderBy::asc("classId").nulls(NullsOrder::First))),
        )
        .unwrap();
        let groups = group_rows(entity, &args, &students(&data)).unwrap();
        let keys: Vec<&Value> = groups.iter().map(|g| &g.key["classId"]).collect();
        assert_eq!(keys, [&Value::Null, &Value::from("c1"), &Value::from("c2")]);
    }
}
