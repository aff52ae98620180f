//! Unused-field pruning.
//!
//! A top-down traversal from the pipeline's sink carrying the set of
//! downstream-used references; `None` means "conservatively assume all
//! used". Definitions with no related downstream reference are pruned
//! from `$project`, `$group`, and object-literal `$simpleMap` stages; a
//! `$project` left empty is elided entirely.
//!
//! A definition and a reference are related when either path is a strict
//! sequence prefix of the other. The JavaScript stages are opaque: below
//! them the traversal reverts to the conservative mode.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use mangrove_core::DocVar;

use crate::plan::pipeline::{CardinalExpr, IdHandling, JsExpr, JsFn, Workflow};

/// The downstream-used reference set; `None` assumes everything is used.
type Used = Option<BTreeSet<DocVar>>;

/// Deletes field definitions no downstream stage uses.
#[must_use]
pub(crate) fn delete_unused_fields(workflow: Workflow) -> Workflow {
    prune(workflow, &None)
}

fn prune(node: Workflow, used: &Used) -> Workflow {
    let node = prune_defs(node, used);

    // An empty project defines nothing; elide it and keep walking with
    // the same downstream set.
    if let Workflow::Project { source, shape, .. } = &node {
        if shape.is_empty() {
            return prune((**source).clone(), used);
        }
    }

    let upstream = get_refs(&node, used);
    node.map_sources(&mut |source| prune(source, &upstream))
}

/// Removes this stage's unused definitions.
fn prune_defs(node: Workflow, used: &Used) -> Workflow {
    let Some(used) = used else {
        return node;
    };
    let is_live = |def: &DocVar| used.iter().any(|r| def.related(r));

    match node {
        Workflow::Project { source, mut shape, id } => {
            shape.retain(|key, _| is_live(&DocVar::root().descend(&[key.clone()])));
            Workflow::Project { source, shape, id }
        }
        Workflow::Group { source, mut grouped, by } => {
            grouped.retain(|name, _| is_live(&DocVar::field(name)));
            Workflow::Group { source, grouped, by }
        }
        Workflow::SimpleMap { source, mut exprs, scope } => {
            // Emitted keys are known only for a single object-literal map
            // expression.
            if exprs.len() == 1 {
                if let Some(expr) = exprs.pop() {
                    let expr = match expr {
                        CardinalExpr::Map(func) => {
                            CardinalExpr::Map(prune_map_body(func, &is_live))
                        }
                        flat => flat,
                    };
                    exprs.push(expr);
                }
            }
            Workflow::SimpleMap { source, exprs, scope }
        }
        other => other,
    }
}

fn prune_map_body(func: JsFn, is_live: &dyn Fn(&DocVar) -> bool) -> JsFn {
    let JsExpr::Obj(fields) = &func.body else {
        return func;
    };
    let kept: IndexMap<String, JsExpr> = fields
        .iter()
        .filter(|(key, _)| is_live(&DocVar::field(key.as_str())))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if kept.is_empty() {
        // Emitting nothing would change the shape; leave it alone.
        return func;
    }
    JsFn::new(func.param.clone(), JsExpr::Obj(kept))
}

/// The reference set passed up to this stage's sources.
fn get_refs(node: &Workflow, prev: &Used) -> Used {
    match node {
        // A group consumes only what its expressions reference.
        Workflow::Group { .. } => Some(node.refs().into_iter().collect()),
        Workflow::Project { id, .. } => {
            let mut set: BTreeSet<DocVar> = node.refs().into_iter().collect();
            if matches!(id, IdHandling::Include) {
                set.insert(DocVar::id());
            }
            Some(set)
        }
        Workflow::FoldLeft { .. } => prev.as_ref().map(|set| {
            let mut set = set.clone();
            set.insert(DocVar::id());
            set
        }),
        // JavaScript stages are opaque; force conservative mode upstream.
        Workflow::Map { .. }
        | Workflow::SimpleMap { .. }
        | Workflow::FlatMap { .. }
        | Workflow::Reduce { .. } => None,
        other => prev.as_ref().map(|set| {
            let mut set = set.clone();
            set.extend(other.refs());
            set
        }),
    }
}
