//! Pipeline optimization.
//!
//! The optimizer rewrites a [`Workflow`] without ever failing: a rewrite
//! that cannot apply is skipped and the input returned unchanged. The
//! canonical pass applies, to a fixed point:
//!
//! 1. **Unused-field pruning** - delete definitions no sink uses
//! 2. **Reordering** - move skips/limits/matches toward the source
//! 3. **Group inlining** - collapse projection runs into the groups they
//!    feed
//! 4. **Local coalescing** - fuse adjacent fusable stages
//!
//! Each pass is pure; repeating the optimizer on its own output changes
//! nothing. Cancellation is cooperative: a flagged token is checked at
//! the entry of each pass, and aborting simply returns the input seen so
//! far (no effects have been performed).

mod groups;
mod reorder;
mod unused_fields;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::plan::pipeline::Workflow;

/// Pipeline optimizer.
///
/// Carries pass toggles, an iteration cap for the outer fixed point, and
/// an optional cooperative cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    delete_unused_fields: bool,
    reorder_ops: bool,
    inline_groups: bool,
    coalesce: bool,
    max_iterations: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl Optimizer {
    /// Creates an optimizer with every pass enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            delete_unused_fields: true,
            reorder_ops: true,
            inline_groups: true,
            coalesce: true,
            max_iterations: 10,
            cancel: None,
        }
    }

    /// Disables unused-field pruning.
    #[must_use]
    pub const fn without_delete_unused_fields(mut self) -> Self {
        self.delete_unused_fields = false;
        self
    }

    /// Disables stage reordering.
    #[must_use]
    pub const fn without_reorder_ops(mut self) -> Self {
        self.reorder_ops = false;
        self
    }

    /// Disables group inlining.
    #[must_use]
    pub const fn without_inline_groups(mut self) -> Self {
        self.inline_groups = false;
        self
    }

    /// Disables local coalescing.
    #[must_use]
    pub const fn without_coalesce(mut self) -> Self {
        self.coalesce = false;
        self
    }

    /// Sets the outer fixed-point iteration cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Attaches a cooperative cancellation token.
    ///
    /// The token is checked at each pass entry; once set, the optimizer
    /// returns whatever tree it currently holds.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Optimizes a workflow.
    #[must_use]
    pub fn optimize(&self, workflow: Workflow) -> Workflow {
        let mut current = workflow;
        for iteration in 0..self.max_iterations {
            if self.cancelled() {
                return current;
            }
            let next = self.apply_passes(current.clone());
            if next == current {
                trace!(iteration, "optimizer reached a fixed point");
                break;
            }
            current = next;
        }
        current
    }

    fn apply_passes(&self, workflow: Workflow) -> Workflow {
        let mut current = workflow;
        if self.delete_unused_fields && !self.cancelled() {
            debug!("pass: delete_unused_fields");
            current = unused_fields::delete_unused_fields(current);
        }
        if self.reorder_ops && !self.cancelled() {
            debug!("pass: reorder_ops");
            current = reorder::reorder_ops(current);
        }
        if self.inline_groups && !self.cancelled() {
            debug!("pass: inline_group_projects");
            current = groups::inline_group_projects(current);
        }
        if self.coalesce && !self.cancelled() {
            debug!("pass: coalesce");
            current = coalesce_all(current);
        }
        current
    }
}

/// Optimizes a workflow with the default pass set.
#[must_use]
pub fn optimize(workflow: Workflow) -> Workflow {
    Optimizer::new().optimize(workflow)
}

/// Applies local coalescing at every node, bottom-up.
fn coalesce_all(node: Workflow) -> Workflow {
    node.map_sources(&mut coalesce_all).coalesce()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::pipeline::{
        Accumulator, Condition, Expression, GroupKey, Grouped, IdHandling, Reshape, Selector,
        ShapeValue,
    };
    use mangrove_core::{Data, FieldPath};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn project_pair_prunes_and_fuses() {
        // [$project {a: 1, b: 2}, $project {c: "$a"}] optimizes to a
        // single project computing the downstream field.
        let wf = Workflow::Project {
            source: Box::new(Workflow::Project {
                source: Box::new(Workflow::read("zips")),
                shape: Reshape::new()
                    .with("a", ShapeValue::Expr(Expression::literal(1i64)))
                    .with("b", ShapeValue::Expr(Expression::literal(2i64))),
                id: IdHandling::Ignore,
            }),
            shape: Reshape::new().with("c", ShapeValue::var("a")),
            id: IdHandling::Ignore,
        };

        let optimized = optimize(wf);
        match &optimized {
            Workflow::Project { source, shape, .. } => {
                assert!(matches!(source.as_ref(), Workflow::Read { .. }));
                assert_eq!(shape.to_json(), json!({ "c": 1 }));
            }
            other => panic!("expected one project, got {other}"),
        }
    }

    #[test]
    fn optimizer_never_fails_on_opaque_stages() {
        let wf = Workflow::read("zips")
            .js_reduce(
                crate::plan::pipeline::JsFn::identity("values"),
                crate::plan::pipeline::JsScope::new(),
            )
            .limit(3);
        let optimized = optimize(wf.clone());
        assert_eq!(optimized, wf);
    }

    #[test]
    fn cancellation_returns_the_input_untouched() {
        let flag = Arc::new(AtomicBool::new(true));
        let wf = Workflow::Skip {
            source: Box::new(Workflow::Skip {
                source: Box::new(Workflow::read("zips")),
                count: 1,
            }),
            count: 2,
        };
        let optimizer = Optimizer::new().with_cancel_token(flag);
        assert_eq!(optimizer.optimize(wf.clone()), wf);
    }

    fn arb_shape() -> impl Strategy<Value = Reshape> {
        let entry = prop_oneof![
            Just(ShapeValue::include()),
            Just(ShapeValue::var("x")),
            Just(ShapeValue::var("y")),
            Just(ShapeValue::Expr(Expression::literal(7i64))),
        ];
        proptest::collection::vec(("[abc]", entry), 1..3).prop_map(|fields| {
            fields
                .into_iter()
                .map(|(name, value)| (mangrove_core::Leaf::Name(name), value))
                .collect()
        })
    }

    fn arb_selector() -> impl Strategy<Value = Selector> {
        ("[abx]", 0i64..5).prop_map(|(field, value)| {
            Selector::doc([(FieldPath::name(field), Condition::Eq(Data::int(value)))])
        })
    }

    fn arb_workflow() -> impl Strategy<Value = Workflow> {
        let leaf = Just(Workflow::read("zips"));
        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                (inner.clone(), 0u64..16).prop_map(|(w, count)| Workflow::Skip {
                    source: Box::new(w),
                    count,
                }),
                (inner.clone(), 1u64..16).prop_map(|(w, count)| Workflow::Limit {
                    source: Box::new(w),
                    count,
                }),
                (inner.clone(), arb_shape()).prop_map(|(w, shape)| Workflow::Project {
                    source: Box::new(w),
                    shape,
                    id: IdHandling::Ignore,
                }),
                (inner.clone(), arb_selector()).prop_map(|(w, selector)| Workflow::Match {
                    source: Box::new(w),
                    selector,
                }),
                (inner, arb_shape()).prop_map(|(w, shape)| Workflow::Group {
                    source: Box::new(w),
                    grouped: Grouped::new()
                        .with("n", Accumulator::Sum(Expression::literal(1i64))),
                    by: GroupKey::Shape(shape),
                }),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn optimizer_is_idempotent(wf in arb_workflow()) {
            let once = optimize(wf);
            let twice = optimize(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
