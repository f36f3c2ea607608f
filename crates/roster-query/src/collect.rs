//! Which tables a read touches.
//!
//! Callers that load tables lazily use these to fetch everything a request
//! needs before running it. Names that do not resolve are skipped; the read
//! itself reports them.

use std::collections::BTreeSet;

use roster_core::Schema;

use crate::aggregate::GroupByArgs;
use crate::args::{FindArgs, SelectItem, Selection};
use crate::filter::{Filter, RelationFilter};

/// Entities reached through relation filters of `filter` on `entity`.
pub fn filter_entities(schema: &Schema, entity: &str, filter: &Filter, out: &mut BTreeSet<String>) {
    match filter {
        Filter::And(items) | Filter::Or(items) | Filter::Not(items) => {
            for item in items {
                filter_entities(schema, entity, item, out);
            }
        }
        Filter::Field { .. } => {}
        Filter::Relation { field, condition } => {
            let Ok(relation) = schema.resolve_relation(entity, field) else {
                return;
            };
            let target = relation.related_entity.as_str();
            out.insert(target.to_string());
            let inner = match condition {
                RelationFilter::Is(inner) | RelationFilter::IsNot(inner) => inner.as_deref(),
                RelationFilter::Every(inner)
                | RelationFilter::Some(inner)
                | RelationFilter::None(inner) => Some(inner.as_ref()),
            };
            if let Some(inner) = inner {
                filter_entities(schema, target, inner, out);
            }
        }
    }
}

/// Entities needed to project `selection` on `entity`.
pub fn selection_entities(
    schema: &Schema,
    entity: &str,
    selection: &Selection,
    out: &mut BTreeSet<String>,
) {
    let selected = selection
        .select
        .iter()
        .flatten()
        .map(|(name, item)| match item {
            SelectItem::Relation(args) => (name, Some(args)),
            SelectItem::Field => (name, None),
        });
    let included = selection
        .include
        .iter()
        .flatten()
        .map(|(name, args)| (name, Some(args)));
    for (name, args) in selected.chain(included) {
        let Ok(relation) = schema.resolve_relation(entity, name) else {
            continue;
        };
        match args {
            Some(args) => find_entities_into(schema, &relation.related_entity, args, out),
            None => {
                out.insert(relation.related_entity.clone());
            }
        }
    }
}

fn find_entities_into(schema: &Schema, entity: &str, args: &FindArgs, out: &mut BTreeSet<String>) {
    out.insert(entity.to_string());
    if let Some(filter) = &args.filter {
        filter_entities(schema, entity, filter, out);
    }
    selection_entities(schema, entity, &args.selection, out);
}

/// Entities a `find*`, `count` or `aggregate` on `entity` reads.
#[must_use]
pub fn find_entities(schema: &Schema, entity: &str, args: &FindArgs) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    find_entities_into(schema, entity, args, &mut out);
    out
}

/// Entities a `groupBy` on `entity` reads.
#[must_use]
pub fn group_entities(schema: &Schema, entity: &str, args: &GroupByArgs) -> BTreeSet<String> {
    let mut out = BTreeSet::from([entity.to_string()]);
    if let Some(filter) = &args.filter {
        filter_entities(schema, entity, filter, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FieldFilter;
    use crate::test_support::school_schema;

    #[test]
    fn test_collects_filter_and_selection_paths() {
        let schema = school_schema();
        let args = FindArgs::new()
            .filter(Filter::relation(
                "class",
                RelationFilter::is(Filter::relation(
                    "school",
                    RelationFilter::is(Filter::equals("name", "North")),
                )),
            ))
            .include("class");
        let entities = find_entities(&schema, "Student", &args);
        assert_eq!(
            entities,
            BTreeSet::from(["Class".to_string(), "School".to_string(), "Student".to_string()])
        );

        let plain = find_entities(
            &schema,
            "Staff",
            &FindArgs::new().filter(Filter::field("name", FieldFilter::new().contains("a"))),
        );
        assert_eq!(plain, BTreeSet::from(["Staff".to_string()]));
    }
}
