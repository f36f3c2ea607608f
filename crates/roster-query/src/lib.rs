//! Read side of Roster: filters, the query pipeline and relation loading.
//!
//! `roster-query` is the **read engine**. Everything here is synchronous and
//! works over any [`roster_core::TableSource`], so the same code serves a
//! transaction's working set and the in-memory store's tables.
//!
//! # Role In The Architecture
//!
//! - **Filters**: [`Filter`] trees are normalized against the schema with
//!   [`prepare_filter`] and evaluated by [`FilterEvaluator`].
//! - **Reads**: [`QueryExecutor`] implements `findUnique`, `findFirst`,
//!   `findMany`, `count`, `aggregate` and `groupBy`.
//! - **Relations**: the loader projects results through a [`Selection`],
//!   batching related rows per level.
//! - **Planning**: the `collect` helpers report which tables a request reads.

pub mod aggregate;
pub mod args;
pub mod collect;
pub mod executor;
pub mod filter;
mod loader;
pub mod order;
pub mod relation;

#[cfg(test)]
mod test_support;

pub use aggregate::{
    AggregateFn, AggregateResult, GroupByArgs, GroupOrderBy, GroupRow, Having, compute_aggregates,
};
pub use args::{
    AggregateArgs, AggregateSelection, FindArgs, NullsOrder, OrderBy, SelectItem, Selection,
    SortOrder, UniqueWhere,
};
pub use collect::{filter_entities, find_entities, group_entities, selection_entities};
pub use executor::{DEFAULT_MAX_DEPTH, QueryExecutor, check_unique_where};
pub use filter::{
    FieldFilter, Filter, FilterEvaluator, NotCondition, NullMarker, QueryMode, RelationFilter,
    prepare_filter, validate_filter,
};
pub use relation::{RelationIndex, related_rows};
