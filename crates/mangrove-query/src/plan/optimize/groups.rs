//! Group inlining.
//!
//! `inline_group_projects` collapses the contiguous run of projections
//! feeding a `$group` by rewriting the accumulator arguments and the
//! grouping key through the collected reshapes. `$addToSet` and `$push`
//! accumulate whole values, so their rewritten argument must stay a plain
//! field reference; anything else aborts the rewrite.
//!
//! The companion rewrite handles `$group` → `$unwind` → rename-only
//! `$project`: the renames move into the group's output names, the unwind
//! follows, and the project disappears.

use indexmap::IndexMap;

use mangrove_core::{DocVar, FieldPath};

use crate::plan::pipeline::inline::{fix_expr, inline_project};
use crate::plan::pipeline::{Expression, GroupKey, Grouped, Reshape, ShapeValue, Workflow};

/// Inlines projection runs into the groups they feed, bottom-up.
#[must_use]
pub(crate) fn inline_group_projects(workflow: Workflow) -> Workflow {
    let node = workflow.map_sources(&mut inline_group_projects);
    match node {
        Workflow::Group { source, grouped, by } => {
            match try_inline(&source, &grouped, &by) {
                Some((new_source, new_grouped, new_by)) => Workflow::Group {
                    source: Box::new(new_source),
                    grouped: new_grouped,
                    by: new_by,
                },
                None => Workflow::Group { source, grouped, by },
            }
        }
        Workflow::Project { source, shape, id } => {
            match rewrite_project_unwind_group(&shape, &source) {
                Some(rewritten) => rewritten,
                None => Workflow::Project { source, shape, id },
            }
        }
        other => other,
    }
}

/// Collects the contiguous upstream projection run, nearest first, and
/// the stage feeding it.
fn collect_shapes(mut node: &Workflow) -> (Vec<Reshape>, &Workflow) {
    let mut shapes = Vec::new();
    while let Workflow::Project { source, shape, .. } = node {
        shapes.push(shape.clone());
        node = source;
    }
    (shapes, node)
}

fn try_inline(
    source: &Workflow,
    grouped: &Grouped,
    by: &GroupKey,
) -> Option<(Workflow, Grouped, GroupKey)> {
    let (shapes, base) = collect_shapes(source);
    if shapes.is_empty() {
        return None;
    }

    let mut new_grouped = Grouped::new();
    for (name, acc) in grouped.iter() {
        let fixed = fix_expr(&shapes, acc.expr())?;
        if acc.is_structural() && !matches!(fixed, Expression::Var(_)) {
            return None;
        }
        new_grouped.set(name.clone(), acc.with_expr(fixed));
    }

    let new_by = match by {
        GroupKey::Expr(e) => GroupKey::Expr(fix_expr(&shapes, e)?),
        GroupKey::Shape(shape) => GroupKey::Shape(inline_project(shape, &shapes)),
    };

    Some((base.clone(), new_grouped, new_by))
}

/// Maps each grouped output name to the project fields renaming it, in
/// insertion order.
///
/// Every shape entry must be a pure rename (`newName → $var(oldHead)`)
/// of a grouped output; otherwise the whole operation fails.
pub(crate) fn rename_project_group(
    shape: &Reshape,
    grouped: &Grouped,
) -> Option<IndexMap<String, Vec<String>>> {
    let mut renames: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, value) in shape.iter() {
        let new_name = key.as_name()?;
        let ShapeValue::Expr(Expression::Var(var)) = value else {
            return None;
        };
        let old_name = var.path.as_ref()?.as_single_name()?;
        if !grouped.contains(old_name) {
            return None;
        }
        renames.entry(old_name.to_string()).or_default().push(new_name.to_string());
    }
    Some(renames)
}

/// Rewrites `$project($unwind($group(...)))` when the project is a pure
/// rename of the group's outputs and the unwound field has a unique
/// rename target: the group emits the renamed fields, the unwind follows
/// the new name, and the project is elided.
fn rewrite_project_unwind_group(shape: &Reshape, source: &Workflow) -> Option<Workflow> {
    let Workflow::Unwind { source: unwind_source, field } = source else {
        return None;
    };
    let Workflow::Group { source: group_source, grouped, by } = unwind_source.as_ref() else {
        return None;
    };

    let renames = rename_project_group(shape, grouped)?;
    let unwound = field.path.as_ref()?.as_single_name()?;
    let [target] = renames.get(unwound)?.as_slice() else {
        return None;
    };

    let mut new_grouped = Grouped::new();
    for (old_name, new_names) in &renames {
        let acc = grouped.get(old_name)?;
        for new_name in new_names {
            new_grouped.set(new_name.clone(), acc.clone());
        }
    }

    Some(Workflow::Unwind {
        source: Box::new(Workflow::Group {
            source: Box::new((**group_source).clone()),
            grouped: new_grouped,
            by: by.clone(),
        }),
        field: DocVar::root_at(FieldPath::name(target.clone())),
    })
}
