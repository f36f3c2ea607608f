//! Request arguments shared by the read operations.

use std::collections::{BTreeMap, BTreeSet};

use roster_core::{Result, ValidationError, ValidationErrorKind, Value};

use crate::filter::Filter;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Placement of NULL values in a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortOrder,
    /// Defaults to last for ascending and first for descending sorts.
    pub nulls: Option<NullsOrder>,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Asc,
            nulls: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Desc,
            nulls: None,
        }
    }

    #[must_use]
    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }

    /// Effective NULL placement.
    #[must_use]
    pub fn nulls_first(&self) -> bool {
        match self.nulls {
            Some(NullsOrder::First) => true,
            Some(NullsOrder::Last) => false,
            None => self.direction == SortOrder::Desc,
        }
    }
}

/// Equality conditions that pin down at most one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniqueWhere {
    pub values: BTreeMap<String, Value>,
}

impl UniqueWhere {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup by the identity field `id`.
    pub fn id(value: impl Into<Value>) -> Self {
        Self::new().eq("id", value)
    }

    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The conditions as a conjunction of `equals` filters.
    #[must_use]
    pub fn to_filter(&self) -> Filter {
        Filter::and(
            self.values
                .iter()
                .map(|(field, value)| Filter::equals(field.clone(), value.clone())),
        )
    }
}

/// One entry of a `select` map.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// A scalar field.
    Field,
    /// A relation, with nested read arguments.
    Relation(FindArgs),
}

/// Which scalar fields and relations to populate in a result.
///
/// `select` is exclusive with both `include` and `omit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub select: Option<BTreeMap<String, SelectItem>>,
    pub include: Option<BTreeMap<String, FindArgs>>,
    pub omit: BTreeSet<String>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn select_field(mut self, field: impl Into<String>) -> Self {
        self.select
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), SelectItem::Field);
        self
    }

    #[must_use]
    pub fn select_relation(mut self, relation: impl Into<String>, args: FindArgs) -> Self {
        self.select
            .get_or_insert_with(BTreeMap::new)
            .insert(relation.into(), SelectItem::Relation(args));
        self
    }

    #[must_use]
    pub fn include(self, relation: impl Into<String>) -> Self {
        self.include_with(relation, FindArgs::default())
    }

    #[must_use]
    pub fn include_with(mut self, relation: impl Into<String>, args: FindArgs) -> Self {
        self.include
            .get_or_insert_with(BTreeMap::new)
            .insert(relation.into(), args);
        self
    }

    #[must_use]
    pub fn omit(mut self, field: impl Into<String>) -> Self {
        self.omit.insert(field.into());
        self
    }

    /// Whether this selection returns the plain scalar record.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.select.is_none() && self.include.is_none() && self.omit.is_empty()
    }

    /// Reject `select` combined with `include` or `omit`, at every level.
    pub fn check_exclusive(&self) -> Result<()> {
        if self.select.is_some() && self.include.is_some() {
            return Err(ValidationError::new(
                ValidationErrorKind::ConflictingSelection,
                "`select` and `include` cannot be used together",
            )
            .into());
        }
        if self.select.is_some() && !self.omit.is_empty() {
            return Err(ValidationError::new(
                ValidationErrorKind::ConflictingSelection,
                "`select` and `omit` cannot be used together",
            )
            .into());
        }
        for item in self.select.iter().flat_map(BTreeMap::values) {
            if let SelectItem::Relation(args) = item {
                args.selection.check_exclusive()?;
            }
        }
        for args in self.include.iter().flat_map(BTreeMap::values) {
            args.selection.check_exclusive()?;
        }
        Ok(())
    }

    /// Depth of the deepest nested relation request.
    #[must_use]
    pub fn depth(&self) -> usize {
        let selected = self.select.iter().flat_map(BTreeMap::values).filter_map(|item| match item {
            SelectItem::Relation(args) => Some(args),
            SelectItem::Field => None,
        });
        let included = self.include.iter().flat_map(BTreeMap::values);
        selected
            .chain(included)
            .map(|args| 1 + args.selection.depth())
            .max()
            .unwrap_or(0)
    }
}

/// Arguments of `findMany`/`findFirst`, and of nested to-many relation reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindArgs {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    /// Inclusive start position.
    pub cursor: Option<UniqueWhere>,
    /// Page size; negative pages backwards.
    pub take: Option<i64>,
    pub skip: Option<u64>,
    /// Keep only the first row per combination of these fields.
    pub distinct: Vec<String>,
    pub selection: Selection,
}

impl FindArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    #[must_use]
    pub fn cursor(mut self, cursor: UniqueWhere) -> Self {
        self.cursor = Some(cursor);
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
    pub fn distinct<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinct = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    #[must_use]
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.selection = self.selection.include(relation);
        self
    }

    #[must_use]
    pub fn include_with(mut self, relation: impl Into<String>, args: FindArgs) -> Self {
        self.selection = self.selection.include_with(relation, args);
        self
    }

    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self.selection = self.selection.select_field(field);
        }
        self
    }

    #[must_use]
    pub fn omit(mut self, field: impl Into<String>) -> Self {
        self.selection = self.selection.omit(field);
        self
    }

    /// Whether only a selection is set, as required for nested to-one reads.
    #[must_use]
    pub fn is_selection_only(&self) -> bool {
        self.filter.is_none()
            && self.order_by.is_empty()
            && self.cursor.is_none()
            && self.take.is_none()
            && self.skip.is_none()
            && self.distinct.is_empty()
    }
}

/// Which aggregates to compute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSelection {
    /// `_count._all`
    pub count_all: bool,
    /// `_count.<field>`: non-null values per field.
    pub count: Vec<String>,
    pub min: Vec<String>,
    pub max: Vec<String>,
    pub avg: Vec<String>,
    pub sum: Vec<String>,
}

impl AggregateSelection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count_all(mut self) -> Self {
        self.count_all = true;
        self
    }

    #[must_use]
    pub fn count(mut self, field: impl Into<String>) -> Self {
        self.count.push(field.into());
        self
    }

    #[must_use]
    pub fn min(mut self, field: impl Into<String>) -> Self {
        self.min.push(field.into());
        self
    }

    #[must_use]
    pub fn max(mut self, field: impl Into<String>) -> Self {
        self.max.push(field.into());
        self
    }

    #[must_use]
    pub fn avg(mut self, field: impl Into<String>) -> Self {
        self.avg.push(field.into());
        self
    }

    #[must_use]
    pub fn sum(mut self, field: impl Into<String>) -> Self {
        self.sum.push(field.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.count_all
            && self.count.is_empty()
            && self.min.is_empty()
            && self.max.is_empty()
            && self.avg.is_empty()
            && self.sum.is_empty()
    }
}

/// Arguments of `aggregate`: a row window plus the aggregates to compute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateArgs {
    /// Filter, order, cursor and paging of the rows aggregated over.
    /// Selection and `distinct` are ignored.
    pub rows: FindArgs,
    pub aggregates: AggregateSelection,
}

impl AggregateArgs {
    #[must_use]
    pub fn new(aggregates: AggregateSelection) -> Self {
        Self {
            rows: FindArgs::default(),
            aggregates,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.rows.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn rows(mut self, rows: FindArgs) -> Self {
        self.rows = rows;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::Error;

    #[test]
    fn test_select_conflicts() {
        let both = Selection::new().select_field("id").include("class");
        assert!(matches!(
            both.check_exclusive(),
            Err(Error::Validation(ValidationError {
                kind: ValidationErrorKind::ConflictingSelection,
                ..
            }))
        ));
        let with_omit = Selection::new().select_field("id").omit("name");
        assert!(with_omit.check_exclusive().is_err());

        let nested = Selection::new().include_with(
            "students",
            FindArgs::new().select(["id"]).include("class"),
        );
        assert!(nested.check_exclusive().is_err());
        assert!(Selection::new().include("class").omit("name").check_exclusive().is_ok());
    }

    #[test]
    fn test_selection_depth() {
        assert_eq!(Selection::new().depth(), 0);
        let deep = Selection::new().include_with(
            "classes",
            FindArgs::new().include_with("students", FindArgs::new().include("school")),
        );
        assert_eq!(deep.depth(), 3);
    }

    #[test]
    fn test_nulls_default_by_direction() {
        assert!(!OrderBy::asc("grade").nulls_first());
        assert!(OrderBy::desc("grade").nulls_first());
        assert!(OrderBy::asc("grade").nulls(NullsOrder::First).nulls_first());
    }

    #[test]
    fn test_unique_where_filter() {
        let w = UniqueWhere::new().eq("schoolId", "s1").eq("name", "1A");
        assert_eq!(
            w.to_filter(),
            Filter::and([Filter::equals("name", "1A"), Filter::equals("schoolId", "s1")])
        );
    }
}
