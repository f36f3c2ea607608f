//! Selection projection and batched relation loading.
//!
//! Relations are loaded level by level: for each requested relation one
//! [`RelationIndex`] is built over the related table, the children of every
//! parent at this level are gathered, projected in one recursive call, and
//! split back to their parents. Lookups never go row by row against the
//! source.

use roster_core::{
    EntityInfo, Record, Related, RelationshipInfo, Result, ValidationError, ValidationErrorKind,
};

use crate::args::{FindArgs, SelectItem, Selection};
use crate::executor::{QueryExecutor, ReadPlan};
use crate::relation::RelationIndex;

/// Relations requested by a selection, with their nested arguments.
fn relation_requests<'s>(
    entity: &EntityInfo,
    selection: &'s Selection,
    default_args: &'s FindArgs,
) -> Result<Vec<(&'s str, &'s FindArgs)>> {
    let mut out = Vec::new();
    if let Some(select) = &selection.select {
        for (name, item) in select {
            match (item, entity.relation(name)) {
                (SelectItem::Relation(args), Some(_)) => out.push((name.as_str(), args)),
                (SelectItem::Field, Some(_)) => out.push((name.as_str(), default_args)),
                (SelectItem::Field, None) if entity.field(name).is_some() => {}
                (SelectItem::Relation(_), None) if entity.field(name).is_some() => {
                    return Err(ValidationError::new(
                        ValidationErrorKind::InvalidArgs,
                        format!("`{name}` is a scalar field and takes no nested arguments"),
                    )
                    .entity(&entity.name)
                    .field(name)
                    .into());
                }
                _ => return Err(unknown_field(entity, name)),
            }
        }
    }
    if let Some(include) = &selection.include {
        for (name, args) in include {
            if entity.relation(name).is_none() {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnknownRelation,
                    format!("`{name}` is not a relation field"),
                )
                .entity(&entity.name)
                .field(name)
                .into());
            }
            out.push((name.as_str(), args));
        }
    }
    for name in &selection.omit {
        if entity.field(name).is_none() {
            return Err(unknown_field(entity, name));
        }
    }
    Ok(out)
}

fn unknown_field(entity: &EntityInfo, name: &str) -> roster_core::Error {
    ValidationError::new(
        ValidationErrorKind::UnknownField,
        format!("unknown field `{name}`"),
    )
    .entity(&entity.name)
    .field(name)
    .into()
}

/// Scalar part of a projected record.
fn scalar_projection(entity: &EntityInfo, row: &Record, selection: &Selection) -> Record {
    match &selection.select {
        Some(select) => entity
            .fields
            .iter()
            .filter(|f| matches!(select.get(&f.name), Some(SelectItem::Field)))
            .map(|f| (f.name.clone(), row.value(&f.name).clone()))
            .collect(),
        None => entity
            .fields
            .iter()
            .filter(|f| !selection.omit.contains(&f.name))
            .map(|f| (f.name.clone(), row.value(&f.name).clone()))
            .collect(),
    }
}

impl<'a> QueryExecutor<'a> {
    /// Project `rows` through `selection`, loading requested relations.
    pub fn project(
        &self,
        entity: &EntityInfo,
        rows: &[&'a Record],
        selection: &Selection,
        depth: usize,
    ) -> Result<Vec<Record>> {
        selection.check_exclusive()?;
        let default_args = FindArgs::default();
        let requests = relation_requests(entity, selection, &default_args)?;
        let mut out: Vec<Record> = rows
            .iter()
            .map(|row| scalar_projection(entity, row, selection))
            .collect();
        if requests.is_empty() {
            return Ok(out);
        }
        if depth >= self.max_depth {
            return Err(ValidationError::new(
                ValidationErrorKind::DepthExceeded,
                format!("relation reads nest deeper than {}", self.max_depth),
            )
            .entity(&entity.name)
            .into());
        }

        for (name, args) in requests {
            let relation = self.schema.resolve_relation(&entity.name, name)?;
            if relation.is_to_many() {
                self.load_many(relation, rows, args, depth, &mut out)?;
            } else {
                self.load_one(relation, rows, args, depth, &mut out)?;
            }
        }
        Ok(out)
    }

    fn load_many(
        &self,
        relation: &'a RelationshipInfo,
        parents: &[&'a Record],
        args: &FindArgs,
        depth: usize,
        out: &mut [Record],
    ) -> Result<()> {
        let target = self.schema.resolve_entity(&relation.related_entity)?;
        let plan = ReadPlan::prepare(self.schema, target, args)?;
        let index = RelationIndex::build(self.source, relation)?;

        let mut counts = Vec::with_capacity(parents.len());
        let mut children: Vec<&'a Record> = Vec::new();
        for parent in parents {
            let page = self.run_plan(target, index.lookup(parent).to_vec(), &plan)?;
            counts.push(page.len());
            children.extend(page);
        }
        tracing::trace!(
            relation = %relation.name,
            parents = parents.len(),
            children = children.len(),
            "loaded to-many relation"
        );

        let mut projected = self
            .project(target, &children, &args.selection, depth + 1)?
            .into_iter();
        for (record, n) in out.iter_mut().zip(counts) {
            let batch: Vec<Record> = projected.by_ref().take(n).collect();
            record.set_relation(relation.name.clone(), Related::Many(batch));
        }
        Ok(())
    }

    fn load_one(
        &self,
        relation: &'a RelationshipInfo,
        parents: &[&'a Record],
        args: &FindArgs,
        depth: usize,
        out: &mut [Record],
    ) -> Result<()> {
        if !args.is_selection_only() {
            return Err(ValidationError::new(
                ValidationErrorKind::InvalidArgs,
                "to-one relations accept only select/include/omit",
            )
            .field(&relation.name)
            .into());
        }
        let target = self.schema.resolve_entity(&relation.related_entity)?;
        let index = RelationIndex::build(self.source, relation)?;

        let linked: Vec<Option<&'a Record>> = parents
            .iter()
            .map(|p| index.lookup(p).first().copied())
            .collect();
        let children: Vec<&'a Record> = linked.iter().flatten().copied().collect();

        let mut projected = self
            .project(target, &children, &args.selection, depth + 1)?
            .into_iter();
        for (record, link) in out.iter_mut().zip(&linked) {
            let one = link.and_then(|_| projected.next()).map(Box::new);
            record.set_relation(relation.name.clone(), Related::One(one));
        }
        Ok(())
    }
}
