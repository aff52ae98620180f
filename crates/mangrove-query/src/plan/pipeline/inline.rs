//! The shape resolver.
//!
//! [`get0`] resolves a field path through a stack of upstream reshapes
//! (nearest first) into either a path reference, a fully inlined reshape,
//! or a rewritten expression. [`fix_expr`] lifts the resolution over whole
//! expressions, and [`inline_project`] rebuilds a reshape against the
//! stack. These drive project/project fusion and the group-inlining
//! passes.
//!
//! Path prefix comparisons here are strict sequence prefixes; insertion
//! order of reshape keys is preserved by every rebuild.

use mangrove_core::{DocVar, FieldPath, Leaf};

use super::expr::{Expression, Reshape, ShapeValue};

/// Resolves `leaves` through `reshapes`, nearest reshape first.
///
/// Returns `None` when the path cannot be resolved here (a missing field,
/// or a computed expression with leaves left to consume); the caller
/// decides what an unresolvable path means.
#[must_use]
pub(crate) fn get0(leaves: &[Leaf], reshapes: &[Reshape]) -> Option<ShapeValue> {
    let Some((first, rest)) = reshapes.split_first() else {
        // Past every reshape: the path refers to the upstream document.
        return Some(ShapeValue::Expr(Expression::Var(var_at(leaves))));
    };
    let Some((head, tail)) = leaves.split_first() else {
        // No leaves left: the whole reshape at this position, fully
        // inlined against the remaining stack.
        return Some(ShapeValue::Doc(inline_project(first, rest)));
    };
    match first.get(head)? {
        ShapeValue::Doc(nested) => {
            let mut stack = Vec::with_capacity(rest.len() + 1);
            stack.push(nested.clone());
            stack.extend(rest.iter().cloned());
            get0(tail, &stack)
        }
        ShapeValue::Expr(Expression::Include) => get0(leaves, rest),
        ShapeValue::Expr(Expression::Var(var)) => {
            let mut path = leaves_of(var);
            path.extend(tail.iter().cloned());
            get0(&path, rest)
        }
        ShapeValue::Expr(e) => {
            if tail.is_empty() {
                fix_expr(rest, e).map(ShapeValue::Expr)
            } else {
                // A computed value has no sub-fields to resolve into.
                None
            }
        }
    }
}

/// Rewrites every variable in `expr` through the reshape stack.
///
/// Returns `None` if any substitution fails, or if a variable resolves to
/// a reshape rather than an expression.
#[must_use]
pub(crate) fn fix_expr(reshapes: &[Reshape], expr: &Expression) -> Option<Expression> {
    expr.map_vars(&mut |var| match get0(&leaves_of(var), reshapes)? {
        ShapeValue::Expr(e) => Some(e),
        ShapeValue::Doc(_) => None,
    })
}

/// Rebuilds `shape` with every field resolved through the reshape stack.
///
/// Fields whose resolution fails are dropped from the output; caller
/// ordering is preserved.
#[must_use]
pub(crate) fn inline_project(shape: &Reshape, reshapes: &[Reshape]) -> Reshape {
    inline_at(&[], shape, reshapes)
}

fn inline_at(prefix: &[Leaf], shape: &Reshape, reshapes: &[Reshape]) -> Reshape {
    let mut out = Reshape::new();
    for (key, value) in shape.iter() {
        let mut source_path = prefix.to_vec();
        source_path.push(key.clone());
        let resolved = match value {
            ShapeValue::Doc(nested) => {
                let inlined = inline_at(&source_path, nested, reshapes);
                if inlined.is_empty() && !nested.is_empty() {
                    None
                } else {
                    Some(ShapeValue::Doc(inlined))
                }
            }
            ShapeValue::Expr(Expression::Include) => get0(&source_path, reshapes),
            ShapeValue::Expr(Expression::Var(var)) => get0(&leaves_of(var), reshapes),
            ShapeValue::Expr(e) => fix_expr(reshapes, e).map(ShapeValue::Expr),
        };
        if let Some(value) = resolved {
            out.set(key.clone(), value);
        }
    }
    out
}

fn leaves_of(var: &DocVar) -> Vec<Leaf> {
    var.path.as_ref().map(|p| p.leaves().to_vec()).unwrap_or_default()
}

fn var_at(leaves: &[Leaf]) -> DocVar {
    match FieldPath::from_leaves(leaves.to_vec()) {
        Some(path) => DocVar::root_at(path),
        None => DocVar::root(),
    }
}
