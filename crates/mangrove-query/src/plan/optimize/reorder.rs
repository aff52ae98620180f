//! Commutable-stage reordering.
//!
//! A bottom-up rewrite moving `$skip`/`$limit` below projections and
//! single-expression simple maps, and `$match` below rename-only
//! projections (and object-literal simple maps) with the selector's field
//! paths rewritten through the rename. Where no rule matches, local
//! coalescing runs as a fallback. The pass iterates to a fixed point,
//! capped so a non-progressing rewrite cannot loop.

use mangrove_core::{FieldPath, Leaf, Scope};

use crate::plan::pipeline::js::object_rename_map;
use crate::plan::pipeline::{
    CardinalExpr, Expression, Reshape, Selector, ShapeValue, Workflow,
};

/// Iteration cap for the fixed point.
const MAX_PASSES: usize = 64;

/// Reorders commutable stages until a fixed point.
#[must_use]
pub(crate) fn reorder_ops(workflow: Workflow) -> Workflow {
    let mut current = workflow;
    for _ in 0..MAX_PASSES {
        let (next, changed) = pass(current);
        current = next;
        if !changed {
            break;
        }
    }
    current
}

/// One bottom-up sweep; reports whether anything changed.
fn pass(node: Workflow) -> (Workflow, bool) {
    let mut changed = false;
    let node = node.map_sources(&mut |source| {
        let (rewritten, progressed) = pass(source);
        changed |= progressed;
        rewritten
    });
    match reorder_once(node) {
        Ok(rewritten) => (rewritten, true),
        Err(unchanged) => (unchanged, changed),
    }
}

/// Applies the first matching rule at this node.
fn reorder_once(node: Workflow) -> Result<Workflow, Workflow> {
    let node = match try_reorder(node) {
        Ok(rewritten) => return Ok(rewritten),
        Err(node) => node,
    };
    // Fallback: local coalesce. Adjacent matches are left as separate
    // stages here so a pushed-down match stays visible; the dedicated
    // coalesce pass may still merge them.
    if let Workflow::Match { source, .. } = &node {
        if matches!(source.as_ref(), Workflow::Match { .. }) {
            return Err(node);
        }
    }
    Workflow::coalesce_once(node)
}

fn try_reorder(node: Workflow) -> Result<Workflow, Workflow> {
    match node {
        Workflow::Skip { source, count } => match *source {
            Workflow::Project { source: inner, shape, id } => Ok(Workflow::Project {
                source: Box::new(Workflow::Skip { source: inner, count }),
                shape,
                id,
            }),
            Workflow::SimpleMap { source: inner, exprs, scope }
                if is_single_map(&exprs) =>
            {
                Ok(Workflow::SimpleMap {
                    source: Box::new(Workflow::Skip { source: inner, count }),
                    exprs,
                    scope,
                })
            }
            other => Err(Workflow::Skip { source: Box::new(other), count }),
        },
        Workflow::Limit { source, count } => match *source {
            Workflow::Project { source: inner, shape, id } => Ok(Workflow::Project {
                source: Box::new(Workflow::Limit { source: inner, count }),
                shape,
                id,
            }),
            Workflow::SimpleMap { source: inner, exprs, scope }
                if is_single_map(&exprs) =>
            {
                Ok(Workflow::SimpleMap {
                    source: Box::new(Workflow::Limit { source: inner, count }),
                    exprs,
                    scope,
                })
            }
            other => Err(Workflow::Limit { source: Box::new(other), count }),
        },
        Workflow::Match { source, selector } => match *source {
            Workflow::Project { source: inner, shape, id } => {
                match rewrite_selector_through_shape(&selector, &shape) {
                    Some(rewritten) => Ok(Workflow::Project {
                        source: Box::new(Workflow::Match {
                            source: inner,
                            selector: rewritten,
                        }),
                        shape,
                        id,
                    }),
                    None => Err(Workflow::Match {
                        source: Box::new(Workflow::Project { source: inner, shape, id }),
                        selector,
                    }),
                }
            }
            Workflow::SimpleMap { source: inner, exprs, scope } => {
                let rewritten = single_map(&exprs)
                    .and_then(object_rename_map)
                    .and_then(|renames| {
                        selector.map_fields(&mut |field| {
                            let Leaf::Name(head) = field.head() else {
                                return None;
                            };
                            let target = renames.get(head)?;
                            if target.scope != Scope::Root {
                                return None;
                            }
                            rebase(target.path.as_ref(), field.tail())
                        })
                    });
                match rewritten {
                    Some(selector) => Ok(Workflow::SimpleMap {
                        source: Box::new(Workflow::Match { source: inner, selector }),
                        exprs,
                        scope,
                    }),
                    None => Err(Workflow::Match {
                        source: Box::new(Workflow::SimpleMap {
                            source: inner,
                            exprs,
                            scope,
                        }),
                        selector,
                    }),
                }
            }
            other => Err(Workflow::Match { source: Box::new(other), selector }),
        },
        other => Err(other),
    }
}

fn is_single_map(exprs: &[CardinalExpr]) -> bool {
    matches!(exprs, [CardinalExpr::Map(_)])
}

fn single_map(exprs: &[CardinalExpr]) -> Option<&crate::plan::pipeline::JsFn> {
    match exprs {
        [CardinalExpr::Map(func)] => Some(func),
        _ => None,
    }
}

/// Rewrites a selector's field paths through a project shape when every
/// referenced field resolves to a pure `$var` rename.
///
/// For each selector field, the first shape key the field starts with is
/// taken: an exact match substitutes the rename target, a sub-path is
/// rebased onto the target plus the relative path.
fn rewrite_selector_through_shape(selector: &Selector, shape: &Reshape) -> Option<Selector> {
    selector.map_fields(&mut |field| {
        for (key, value) in shape.iter() {
            let key_path = FieldPath::from(key.clone());
            if !field.starts_with(&key_path) {
                continue;
            }
            let ShapeValue::Expr(Expression::Var(var)) = value else {
                return None;
            };
            if var.scope != Scope::Root {
                return None;
            }
            return rebase(var.path.as_ref(), field.strip_prefix(&key_path));
        }
        None
    })
}

/// `base ++ relative`, where either side may be absent.
fn rebase(base: Option<&FieldPath>, relative: Option<FieldPath>) -> Option<FieldPath> {
    match (base, relative) {
        (Some(base), Some(rest)) => Some(base.concat(&rest)),
        (Some(base), None) => Some(base.clone()),
        (None, Some(rest)) => Some(rest),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::pipeline::{Condition, IdHandling, JsExpr, JsFn, JsScope};
    use mangrove_core::Data;
    use serde_json::json;

    fn rename_shape() -> Reshape {
        Reshape::new()
            .with("a", ShapeValue::var("x"))
            .with("b", ShapeValue::var("y"))
    }

    #[test]
    fn match_pushes_through_a_rename_project() {
        // [$match p, $project {a: $x, b: $y}, $match {a: 1}]
        let wf = Workflow::Match {
            source: Box::new(Workflow::Project {
                source: Box::new(Workflow::Match {
                    source: Box::new(Workflow::read("zips")),
                    selector: Selector::eq(FieldPath::name("state"), "MA"),
                }),
                shape: rename_shape(),
                id: IdHandling::Ignore,
            }),
            selector: Selector::eq(FieldPath::name("a"), 1i64),
        };

        let reordered = reorder_ops(wf);

        // [$match p, $match {x: 1}, $project ...] - and the two matches stay
        // separate stages after this pass.
        let Workflow::Project { source, .. } = &reordered else {
            panic!("expected the project on top, got {reordered}");
        };
        let Workflow::Match { source: below, selector } = source.as_ref() else {
            panic!("expected the pushed match");
        };
        assert_eq!(selector.to_json(), json!({ "x": 1 }));
        let Workflow::Match { selector: original, .. } = below.as_ref() else {
            panic!("expected the original match below");
        };
        assert_eq!(original.to_json(), json!({ "state": "MA" }));
    }

    #[test]
    fn match_subpath_rides_the_rename() {
        let wf = Workflow::Match {
            source: Box::new(Workflow::Project {
                source: Box::new(Workflow::read("zips")),
                shape: rename_shape(),
                id: IdHandling::Ignore,
            }),
            selector: Selector::eq(FieldPath::dotted("a.zip").unwrap(), 1i64),
        };

        let reordered = reorder_ops(wf);
        let Workflow::Project { source, .. } = &reordered else {
            panic!("expected the project on top");
        };
        let Workflow::Match { selector, .. } = source.as_ref() else {
            panic!("expected the pushed match");
        };
        assert_eq!(selector.to_json(), json!({ "x.zip": 1 }));
    }

    #[test]
    fn match_stays_above_a_computed_project() {
        let computed = Reshape::new().with(
            "a",
            ShapeValue::Expr(Expression::Add(
                Box::new(Expression::field("x")),
                Box::new(Expression::literal(1i64)),
            )),
        );
        let wf = Workflow::Match {
            source: Box::new(Workflow::Project {
                source: Box::new(Workflow::read("zips")),
                shape: computed,
                id: IdHandling::Ignore,
            }),
            selector: Selector::eq(FieldPath::name("a"), 1i64),
        };

        let reordered = reorder_ops(wf.clone());
        assert_eq!(reordered, wf);
    }

    #[test]
    fn skip_and_limit_move_below_projections() {
        let wf = Workflow::Skip {
            source: Box::new(Workflow::Project {
                source: Box::new(Workflow::read("zips")),
                shape: rename_shape(),
                id: IdHandling::Ignore,
            }),
            count: 4,
        };
        let reordered = reorder_ops(wf);
        let Workflow::Project { source, .. } = &reordered else {
            panic!("expected the project on top");
        };
        assert!(matches!(source.as_ref(), Workflow::Skip { count: 4, .. }));
    }

    #[test]
    fn limit_moves_below_a_single_map_expression() {
        let map = CardinalExpr::Map(JsFn::identity("d"));
        let wf = Workflow::Limit {
            source: Box::new(Workflow::SimpleMap {
                source: Box::new(Workflow::read("zips")),
                exprs: vec![map.clone()],
                scope: JsScope::new(),
            }),
            count: 7,
        };
        let reordered = reorder_ops(wf);
        let Workflow::SimpleMap { source, .. } = &reordered else {
            panic!("expected the simple map on top");
        };
        assert!(matches!(source.as_ref(), Workflow::Limit { count: 7, .. }));

        // A flat-map expression changes cardinality; the limit must stay.
        let flat = CardinalExpr::Flat(JsFn::identity("d"));
        let wf = Workflow::Limit {
            source: Box::new(Workflow::SimpleMap {
                source: Box::new(Workflow::read("zips")),
                exprs: vec![flat],
                scope: JsScope::new(),
            }),
            count: 7,
        };
        let reordered = reorder_ops(wf.clone());
        assert_eq!(reordered, wf);
    }

    #[test]
    fn match_pushes_through_an_object_literal_simple_map() {
        let body = JsExpr::Obj(
            [
                ("a".to_string(), JsExpr::ident("d").access("x")),
                ("b".to_string(), JsExpr::ident("d").access("y").access("z")),
            ]
            .into_iter()
            .collect(),
        );
        let wf = Workflow::Match {
            source: Box::new(Workflow::SimpleMap {
                source: Box::new(Workflow::read("zips")),
                exprs: vec![CardinalExpr::Map(JsFn::new("d", body))],
                scope: JsScope::new(),
            }),
            selector: Selector::doc([
                (FieldPath::name("a"), Condition::Eq(Data::int(1))),
                (FieldPath::name("b"), Condition::Gt(Data::int(2))),
            ]),
        };

        let reordered = reorder_ops(wf);
        let Workflow::SimpleMap { source, .. } = &reordered else {
            panic!("expected the simple map on top");
        };
        let Workflow::Match { selector, .. } = source.as_ref() else {
            panic!("expected the pushed match");
        };
        assert_eq!(selector.to_json(), json!({ "x": 1, "y.z": { "$gt": 2 } }));
    }

    #[test]
    fn fallback_coalesces_adjacent_skips() {
        let wf = Workflow::Skip {
            source: Box::new(Workflow::Skip {
                source: Box::new(Workflow::read("zips")),
                count: 3,
            }),
            count: 4,
        };
        let reordered = reorder_ops(wf);
        assert!(matches!(reordered, Workflow::Skip { count: 7, .. }));
    }
}
