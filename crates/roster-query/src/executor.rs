//! Read operations over a [`TableSource`].
//!
//! Every read runs the same pipeline over the entity's rows:
//!
//! 1. filter
//! 2. sort (stable, so ties keep store order)
//! 3. distinct (first row per combination wins)
//! 4. cursor (inclusive start position)
//! 5. skip / take (negative take pages backwards)
//!
//! Results are projected through the [`Selection`] by the relation loader.

use std::cmp::Ordering;
use std::collections::HashSet;

use roster_core::{
    EntityInfo, Record, Result, Schema, TableSource, ValidationError, ValidationErrorKind,
    ValueKey,
};

use crate::aggregate::{
    AggregateResult, GroupByArgs, GroupRow, compute_aggregates, group_rows, prepare_group_by,
    validate_aggregates,
};
use crate::args::{AggregateArgs, FindArgs, OrderBy, Selection, UniqueWhere};
use crate::filter::{Filter, FilterEvaluator, prepare_filter};
use crate::order::{compare_sort_values, page};

/// Default bound on nested relation reads.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Validated and normalized row-selection arguments.
#[derive(Debug, Clone)]
pub(crate) struct ReadPlan {
    filter: Option<Filter>,
    order_by: Vec<OrderBy>,
    cursor: Option<Filter>,
    take: Option<i64>,
    skip: Option<u64>,
    distinct: Vec<String>,
}

impl ReadPlan {
    pub(crate) fn prepare(schema: &Schema, entity: &EntityInfo, args: &FindArgs) -> Result<Self> {
        let filter = args
            .filter
            .as_ref()
            .map(|f| prepare_filter(schema, entity, f))
            .transpose()?;
        for order in &args.order_by {
            let field = scalar_field(entity, &order.field)?;
            if !field.field_type.is_orderable() {
                return Err(ValidationError::new(
                    ValidationErrorKind::InvalidArgs,
                    format!("cannot order by {} field", field.field_type.as_str()),
                )
                .entity(&entity.name)
                .field(&order.field)
                .into());
            }
        }
        for name in &args.distinct {
            scalar_field(entity, name)?;
        }
        let cursor = args
            .cursor
            .as_ref()
            .map(|c| {
                check_unique_where(entity, c)?;
                prepare_filter(schema, entity, &c.to_filter())
            })
            .transpose()?;
        Ok(Self {
            filter,
            order_by: args.order_by.clone(),
            cursor,
            take: args.take,
            skip: args.skip,
            distinct: args.distinct.clone(),
        })
    }
}

fn scalar_field<'e>(entity: &'e EntityInfo, name: &str) -> Result<&'e roster_core::FieldInfo> {
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

/// Check that `unique` fully specifies at least one unique constraint with
/// non-null values. Extra keys are allowed and narrow the match.
pub fn check_unique_where(entity: &EntityInfo, unique: &UniqueWhere) -> Result<()> {
    for name in unique.values.keys() {
        scalar_field(entity, name)?;
    }
    let covered = entity.unique_sets().iter().any(|set| {
        set.iter()
            .all(|f| unique.get(f).is_some_and(|v| !v.is_null()))
    });
    if covered {
        Ok(())
    } else {
        let sets: Vec<String> = entity
            .unique_sets()
            .iter()
            .map(|s| format!("({})", s.join(", ")))
            .collect();
        Err(ValidationError::new(
            ValidationErrorKind::InvalidUniqueWhere,
            format!("unique lookup must specify one of {}", sets.join(", ")),
        )
        .entity(&entity.name)
        .into())
    }
}

/// Runs read operations against one consistent view of the tables.
pub struct QueryExecutor<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) source: &'a dyn TableSource,
    pub(crate) max_depth: usize,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(schema: &'a Schema, source: &'a dyn TableSource) -> Self {
        Self {
            schema,
            source,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Bound on nested relation reads.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub(crate) fn check_depth(&self, entity: &EntityInfo, selection: &Selection) -> Result<()> {
        let depth = selection.depth();
        if depth > self.max_depth {
            return Err(ValidationError::new(
                ValidationErrorKind::DepthExceeded,
                format!(
                    "selection nests {depth} relation levels, the maximum is {}",
                    self.max_depth
                ),
            )
            .entity(&entity.name)
            .into());
        }
        Ok(())
    }

    /// Run the read pipeline over `rows`.
    pub(crate) fn run_plan(
        &self,
        entity: &EntityInfo,
        rows: Vec<&'a Record>,
        plan: &ReadPlan,
    ) -> Result<Vec<&'a Record>> {
        let mut rows = match &plan.filter {
            Some(filter) => self.filter_rows(entity, rows, filter)?,
            None => rows,
        };

        if !plan.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for order in &plan.order_by {
                    let ord = compare_sort_values(
                        a.value(&order.field),
                        b.value(&order.field),
                        order.direction,
                        order.nulls_first(),
                    );
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if !plan.distinct.is_empty() {
            let mut seen = HashSet::new();
            rows.retain(|row| {
                seen.insert(ValueKey(
                    plan.distinct.iter().map(|f| row.value(f).clone()).collect(),
                ))
            });
        }

        let anchor = match &plan.cursor {
            Some(cursor) => {
                let eval = FilterEvaluator::new(self.schema, self.source);
                let mut found = None;
                for (i, row) in rows.iter().enumerate() {
                    if eval.matches(entity, cursor, row)? {
                        found = Some(i);
                        break;
                    }
                }
                match found {
                    Some(i) => Some(i),
                    None => return Ok(Vec::new()),
                }
            }
            None => None,
        };

        Ok(page(rows, anchor, plan.skip, plan.take))
    }

    fn filter_rows(
        &self,
        entity: &EntityInfo,
        rows: Vec<&'a Record>,
        filter: &Filter,
    ) -> Result<Vec<&'a Record>> {
        let eval = FilterEvaluator::new(self.schema, self.source);
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if eval.matches(entity, filter, row)? {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Rows selected by `args`, in result order and unprojected.
    pub fn select_rows(&self, entity: &EntityInfo, args: &FindArgs) -> Result<Vec<&'a Record>> {
        let plan = ReadPlan::prepare(self.schema, entity, args)?;
        let rows = self.source.rows(&entity.name)?.iter().collect();
        self.run_plan(entity, rows, &plan)
    }

    /// Rows matching `filter` in store order.
    pub fn matching_rows(
        &self,
        entity: &EntityInfo,
        filter: Option<&Filter>,
    ) -> Result<Vec<&'a Record>> {
        let rows: Vec<&'a Record> = self.source.rows(&entity.name)?.iter().collect();
        match filter {
            Some(filter) => {
                let prepared = prepare_filter(self.schema, entity, filter)?;
                self.filter_rows(entity, rows, &prepared)
            }
            None => Ok(rows),
        }
    }

    /// The single row identified by `unique`.
    pub fn find_unique_row(
        &self,
        entity: &EntityInfo,
        unique: &UniqueWhere,
    ) -> Result<Option<&'a Record>> {
        check_unique_where(entity, unique)?;
        let filter = prepare_filter(self.schema, entity, &unique.to_filter())?;
        let eval = FilterEvaluator::new(self.schema, self.source);
        for row in self.source.rows(&entity.name)? {
            if eval.matches(entity, &filter, row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    #[tracing::instrument(level = "debug", skip(self, args))]
    pub fn find_many(&self, entity: &str, args: &FindArgs) -> Result<Vec<Record>> {
        let info = self.schema.request_entity(entity)?;
        self.check_depth(info, &args.selection)?;
        let rows = self.select_rows(info, args)?;
        tracing::debug!(entity = %entity, rows = rows.len(), "findMany matched");
        self.project(info, &rows, &args.selection, 0)
    }

    /// First row of the `findMany` result. A negative `take` selects the last.
    pub fn find_first(&self, entity: &str, args: &FindArgs) -> Result<Option<Record>> {
        let info = self.schema.request_entity(entity)?;
        self.check_depth(info, &args.selection)?;
        let mut args = args.clone();
        args.take = Some(if args.take.is_some_and(|t| t < 0) { -1 } else { 1 });
        let rows = self.select_rows(info, &args)?;
        Ok(self.project(info, &rows, &args.selection, 0)?.into_iter().next())
    }

    pub fn find_unique(
        &self,
        entity: &str,
        unique: &UniqueWhere,
        selection: &Selection,
    ) -> Result<Option<Record>> {
        let info = self.schema.request_entity(entity)?;
        self.check_depth(info, selection)?;
        match self.find_unique_row(info, unique)? {
            Some(row) => Ok(self.project(info, &[row], selection, 0)?.into_iter().next()),
            None => Ok(None),
        }
    }

    /// Number of rows `findMany` would return for `args`.
    pub fn count(&self, entity: &str, args: &FindArgs) -> Result<u64> {
        let info = self.schema.request_entity(entity)?;
        Ok(self.select_rows(info, args)?.len() as u64)
    }

    pub fn aggregate(&self, entity: &str, args: &AggregateArgs) -> Result<AggregateResult> {
        let info = self.schema.request_entity(entity)?;
        validate_aggregates(info, &args.aggregates)?;
        let rows = self.select_rows(info, &args.rows)?;
        compute_aggregates(info, &args.aggregates, &rows)
    }

    #[tracing::instrument(level = "debug", skip(self, args))]
    pub fn group_by(&self, entity: &str, args: &GroupByArgs) -> Result<Vec<GroupRow>> {
        let info = self.schema.request_entity(entity)?;
        let prepared = prepare_group_by(info, args)?;
        let rows = self.matching_rows(info, args.filter.as_ref())?;
        let groups = group_rows(info, &prepared, &rows)?;
        tracing::debug!(entity = %entity, rows = rows.len(), groups = groups.len(), "groupBy evaluated");
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{GroupOrderBy, Having};
    use crate::args::{AggregateSelection, NullsOrder, SortOrder};
    use crate::filter::{FieldFilter, RelationFilter};
    use crate::test_support::{school_fixture, school_schema};
    use roster_core::{Error, Value};

    fn ids(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r.value("id").as_str().unwrap())
            .collect()
    }

    fn validation_kind<T: std::fmt::Debug>(result: Result<T>) -> ValidationErrorKind {
        match result {
            Err(Error::Validation(e)) => e.kind,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_with_nulls() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);

        let asc = exec
            .find_many("Student", &FindArgs::new().order_by(OrderBy::asc("grade")))
            .unwrap();
        assert_eq!(ids(&asc), ["t1", "t2", "t3", "t4"]);

        let desc = exec
            .find_many("Student", &FindArgs::new().order_by(OrderBy::desc("grade")))
            .unwrap();
        assert_eq!(ids(&desc), ["t4", "t3", "t2", "t1"]);

        let desc_last = exec
            .find_many(
                "Student",
                &FindArgs::new().order_by(OrderBy::desc("grade").nulls(NullsOrder::Last)),
            )
            .unwrap();
        assert_eq!(ids(&desc_last), ["t3", "t2", "t1", "t4"]);
    }

    #[test]
    fn test_ties_keep_store_order() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let rows = exec
            .find_many("Student", &FindArgs::new().order_by(OrderBy::asc("schoolId")))
            .unwrap();
        assert_eq!(ids(&rows), ["t1", "t2", "t4", "t3"]);
    }

    #[test]
    fn test_cursor_pagination() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let by_enrollment = || FindArgs::new().order_by(OrderBy::asc("enrolledAt"));
        // enrolledAt order: t2, t3, t1, t4

        let page = exec
            .find_many("Student", &by_enrollment().cursor(UniqueWhere::id("t3")).take(2))
            .unwrap();
        assert_eq!(ids(&page), ["t3", "t1"]);

        let skipped = exec
            .find_many(
                "Student",
                &by_enrollment().cursor(UniqueWhere::id("t3")).skip(1).take(2),
            )
            .unwrap();
        assert_eq!(ids(&skipped), ["t1", "t4"]);

        let backwards = exec
            .find_many("Student", &by_enrollment().cursor(UniqueWhere::id("t1")).take(-2))
            .unwrap();
        assert_eq!(ids(&backwards), ["t3", "t1"]);

        let missing = exec
            .find_many("Student", &by_enrollment().cursor(UniqueWhere::id("zz")))
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_distinct_keeps_first_by_order() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let rows = exec
            .find_many(
                "Student",
                &FindArgs::new()
                    .order_by(OrderBy::desc("enrolledAt"))
                    .distinct(["schoolId"]),
            )
            .unwrap();
        assert_eq!(ids(&rows), ["t4", "t3"]);
    }

    #[test]
    fn test_and_is_intersection() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let a = Filter::equals("schoolId", "s1");
        let b = Filter::field("grade", FieldFilter::new().gte(2));
        let run = |f: Filter| {
            let rows = exec.find_many("Student", &FindArgs::new().filter(f)).unwrap();
            ids(&rows).into_iter().map(str::to_string).collect::<HashSet<_>>()
        };
        let both = run(Filter::and([a.clone(), b.clone()]));
        let expected: HashSet<String> = run(a).intersection(&run(b)).cloned().collect();
        assert_eq!(both, expected);
        assert_eq!(both, HashSet::from(["t2".to_string()]));
    }

    #[test]
    fn test_find_unique_rules() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let none = Selection::new();

        let found = exec
            .find_unique("Class", &UniqueWhere::new().eq("schoolId", "s1").eq("name", "2A"), &none)
            .unwrap();
        assert_eq!(found.unwrap().value("id"), &Value::from("c3"));

        assert_eq!(
            validation_kind(exec.find_unique("Class", &UniqueWhere::new().eq("name", "2A"), &none)),
            ValidationErrorKind::InvalidUniqueWhere
        );
        assert_eq!(
            validation_kind(exec.find_unique("Class", &UniqueWhere::id(Value::Null), &none)),
            ValidationErrorKind::InvalidUniqueWhere
        );
        // Extra keys narrow the match.
        let narrowed = exec
            .find_unique("Class", &UniqueWhere::id("c3").eq("name", "1A"), &none)
            .unwrap();
        assert!(narrowed.is_none());
        assert_eq!(
            validation_kind(exec.find_unique("Nope", &UniqueWhere::id("x"), &none)),
            ValidationErrorKind::UnknownEntity
        );
    }

    #[test]
    fn test_find_first_and_count() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let args = FindArgs::new()
            .filter(Filter::relation("class", RelationFilter::is_not_null()))
            .order_by(OrderBy::asc("name"));
        let first = exec.find_first("Student", &args).unwrap().unwrap();
        assert_eq!(first.value("id"), &Value::from("t1"));
        let last = exec.find_first("Student", &args.clone().take(-1)).unwrap().unwrap();
        assert_eq!(last.value("id"), &Value::from("t3"));
        assert_eq!(exec.count("Student", &args).unwrap(), 3);
        assert_eq!(exec.count("Student", &args.clone().skip(2)).unwrap(), 1);
    }

    #[test]
    fn test_aggregate_window() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let result = exec
            .aggregate(
                "Student",
                &AggregateArgs::new(AggregateSelection::new().count_all().sum("grade"))
                    .filter(Filter::equals("schoolId", "s1")),
            )
            .unwrap();
        assert_eq!(result.count_all, Some(3));
        assert_eq!(result.sum["grade"], Value::Int(3));

        let empty = exec
            .aggregate(
                "Student",
                &AggregateArgs::new(AggregateSelection::new().count_all().max("grade"))
                    .filter(Filter::equals("schoolId", "nowhere")),
            )
            .unwrap();
        assert_eq!(empty.count_all, Some(0));
        assert!(empty.max["grade"].is_null());
    }

    #[test]
    fn test_group_by_after_filter() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        let groups = exec
            .group_by(
                "Student",
                &GroupByArgs::new(["schoolId"])
                    .filter(Filter::field("grade", FieldFilter::new().gte(2)))
                    .aggregates(AggregateSelection::new().count_all())
                    .order_by(GroupOrderBy::CountAll(SortOrder::Desc)),
            )
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.aggregates.count_all == Some(1)));

        assert_eq!(
            validation_kind(exec.group_by(
                "Student",
                &GroupByArgs::new(["schoolId"])
                    .having(Having::field("name", FieldFilter::new().equals("Bob")))
            )),
            ValidationErrorKind::InvalidGroupBy
        );
    }

    #[test]
    fn test_order_by_validation() {
        let schema = school_schema();
        let data = school_fixture();
        let exec = QueryExecutor::new(&schema, &data);
        assert_eq!(
            validation_kind(exec.find_many("Staff", &FindArgs::new().order_by(OrderBy::asc("subjects")))),
            ValidationErrorKind::InvalidArgs
        );
        assert_eq!(
            validation_kind(exec.find_many("Staff", &FindArgs::new().order_by(OrderBy::asc("age")))),
            ValidationErrorKind::UnknownField
        );
    }
}
