//! Logical plan node.
//!
//! This module defines the [`LogicalPlan`] enum: a small recursive algebra
//! of reads, constants, lexical bindings, and invocations of catalog
//! functions. The compiler lowers annotated SQL into this algebra; an
//! external planner turns it into a physical pipeline.
//!
//! Binding references resolve lexically by name: a [`LogicalPlan::Free`]
//! inside a `Let` body refers to that `Let`'s binding.

// Allow long Display impl
#![allow(clippy::too_many_lines)]

use std::fmt;

use mangrove_core::{Data, FieldPath};

use super::func::Function;

/// A logical query plan.
///
/// This is a tree structure; subtrees are plain owned values and equality
/// is structural. These trees are small and rebuilding is cheap, so the
/// traversal helpers return fresh trees rather than sharing.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// A read of a named collection (possibly a path such as `/db/zips`).
    Read(FieldPath),

    /// A literal value.
    Constant(Data),

    /// A reference to an enclosing `Let` binding, resolved by name.
    Free(String),

    /// A lexical binding: `body` may reference `binding` as `Free(name)`.
    Let {
        /// The bound name.
        name: String,
        /// The bound plan.
        binding: Box<LogicalPlan>,
        /// The plan the binding is visible in.
        body: Box<LogicalPlan>,
    },

    /// An invocation of a catalog function.
    Invoke {
        /// The invoked function.
        func: Function,
        /// The arguments, in order.
        args: Vec<LogicalPlan>,
    },
}

/// One unfolding step for [`LogicalPlan::unfold`]: the shape of a node with
/// seeds where children will grow.
#[derive(Debug, Clone)]
pub enum PlanSeed<S> {
    /// Grow a `Read`.
    Read(FieldPath),
    /// Grow a `Constant`.
    Constant(Data),
    /// Grow a `Free`.
    Free(String),
    /// Grow a `Let` from two seeds.
    Let {
        /// The bound name.
        name: String,
        /// Seed for the binding.
        binding: S,
        /// Seed for the body.
        body: S,
    },
    /// Grow an `Invoke` from argument seeds.
    Invoke {
        /// The invoked function.
        func: Function,
        /// Seeds for the arguments.
        args: Vec<S>,
    },
}

impl LogicalPlan {
    // ========== Constructors ==========

    /// Creates a read of a named collection.
    #[must_use]
    pub fn read(name: impl Into<String>) -> Self {
        Self::Read(FieldPath::name(name))
    }

    /// Creates a constant plan.
    #[must_use]
    pub fn constant(data: impl Into<Data>) -> Self {
        Self::Constant(data.into())
    }

    /// Creates an integer constant.
    #[must_use]
    pub fn int(i: i64) -> Self {
        Self::Constant(Data::int(i))
    }

    /// Creates a string constant.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Constant(Data::str(s))
    }

    /// Creates a binding reference.
    #[must_use]
    pub fn free(name: impl Into<String>) -> Self {
        Self::Free(name.into())
    }

    /// Creates a lexical binding.
    #[must_use]
    pub fn let_in(name: impl Into<String>, binding: LogicalPlan, body: LogicalPlan) -> Self {
        Self::Let { name: name.into(), binding: Box::new(binding), body: Box::new(body) }
    }

    /// Builds an n-ary array from element plans:
    /// `ArrayConcat(... ArrayConcat(MakeArray(a), MakeArray(b)) ..., MakeArray(z))`.
    #[must_use]
    pub fn make_array_n(items: Vec<LogicalPlan>) -> Self {
        let mut iter = items.into_iter();
        let Some(first) = iter.next() else {
            return Self::Constant(Data::Arr(vec![]));
        };
        let mut acc = Function::MakeArray.of(vec![first]);
        for item in iter {
            acc = Function::ArrayConcat.of(vec![acc, Function::MakeArray.of(vec![item])]);
        }
        acc
    }

    // ========== Traversals ==========

    /// Returns the children of this node.
    #[must_use]
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            Self::Read(_) | Self::Constant(_) | Self::Free(_) => vec![],
            Self::Let { binding, body, .. } => vec![binding.as_ref(), body.as_ref()],
            Self::Invoke { args, .. } => args.iter().collect(),
        }
    }

    /// True if this is a leaf node.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Constant(_) | Self::Free(_))
    }

    /// Rewrites the tree top-down.
    ///
    /// Where `f` yields a replacement the subtree is replaced and not
    /// descended into; elsewhere children are rewritten in place.
    #[must_use]
    pub fn rewrite(&self, f: &mut impl FnMut(&LogicalPlan) -> Option<LogicalPlan>) -> Self {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        match self {
            Self::Read(_) | Self::Constant(_) | Self::Free(_) => self.clone(),
            Self::Let { name, binding, body } => Self::Let {
                name: name.clone(),
                binding: Box::new(binding.rewrite(f)),
                body: Box::new(body.rewrite(f)),
            },
            Self::Invoke { func, args } => Self::Invoke {
                func: *func,
                args: args.iter().map(|a| a.rewrite(f)).collect(),
            },
        }
    }

    /// Replaces every occurrence of `target` with `replacement`.
    #[must_use]
    pub fn substitute(&self, target: &LogicalPlan, replacement: &LogicalPlan) -> Self {
        self.rewrite(&mut |node| (node == target).then(|| replacement.clone()))
    }

    /// Folds the tree bottom-up (a catamorphism): `f` sees each node along
    /// with the results already computed for its children.
    pub fn fold<T>(&self, f: &mut impl FnMut(&LogicalPlan, Vec<T>) -> T) -> T {
        let child_results = self.children().into_iter().map(|c| c.fold(f)).collect();
        f(self, child_results)
    }

    /// Grows a tree from a seed (an anamorphism): `expand` is called on
    /// each seed and decides the node shape and the child seeds.
    pub fn unfold<S>(seed: S, expand: &mut impl FnMut(S) -> PlanSeed<S>) -> Self {
        match expand(seed) {
            PlanSeed::Read(path) => Self::Read(path),
            PlanSeed::Constant(data) => Self::Constant(data),
            PlanSeed::Free(name) => Self::Free(name),
            PlanSeed::Let { name, binding, body } => Self::Let {
                name,
                binding: Box::new(Self::unfold(binding, expand)),
                body: Box::new(Self::unfold(body, expand)),
            },
            PlanSeed::Invoke { func, args } => Self::Invoke {
                func,
                args: args.into_iter().map(|s| Self::unfold(s, expand)).collect(),
            },
        }
    }

    /// Applies the catalog simplifiers bottom-up until none fires.
    #[must_use]
    pub fn simplify(&self) -> Self {
        let node = match self {
            Self::Let { name, binding, body } => Self::Let {
                name: name.clone(),
                binding: Box::new(binding.simplify()),
                body: Box::new(body.simplify()),
            },
            Self::Invoke { func, args } => Self::Invoke {
                func: *func,
                args: args.iter().map(LogicalPlan::simplify).collect(),
            },
            other => other.clone(),
        };
        if let Self::Invoke { func, args } = &node {
            if let Some(simpler) = func.simplify(args) {
                // Each simplifier strictly shrinks the tree, so this
                // terminates.
                return simpler.simplify();
            }
        }
        node
    }

    /// Pretty prints the plan as a tree.
    #[must_use]
    pub fn display_tree(&self) -> DisplayTree<'_> {
        DisplayTree { plan: self }
    }
}

/// Helper for tree-style plan display.
pub struct DisplayTree<'a> {
    plan: &'a LogicalPlan,
}

impl fmt::Display for DisplayTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, self.plan, "", true)
    }
}

impl DisplayTree<'_> {
    fn fmt_node(
        &self,
        f: &mut fmt::Formatter<'_>,
        plan: &LogicalPlan,
        prefix: &str,
        is_last: bool,
    ) -> fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };

        write!(f, "{prefix}{connector}")?;
        match plan {
            LogicalPlan::Read(path) => write!(f, "Read: {path}")?,
            LogicalPlan::Constant(data) => write!(f, "Constant: {data}")?,
            LogicalPlan::Free(name) => write!(f, "Free: {name}")?,
            LogicalPlan::Let { name, .. } => write!(f, "Let: {name}")?,
            LogicalPlan::Invoke { func, .. } => write!(f, "Invoke: {}", func.name())?,
        }
        writeln!(f)?;

        let children = plan.children();
        let new_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        for (i, child) in children.iter().enumerate() {
            self.fmt_node(f, child, &new_prefix, i == children.len() - 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_tree())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        let a = Function::Filter.of(vec![LogicalPlan::read("zips"), LogicalPlan::int(1)]);
        let b = Function::Filter.of(vec![LogicalPlan::read("zips"), LogicalPlan::int(1)]);
        assert_eq!(a, b);
        assert_ne!(a, LogicalPlan::read("zips"));
    }

    #[test]
    fn rewrite_replaces_without_descending() {
        let target = LogicalPlan::free("t");
        let plan = Function::ObjectProject.of(vec![target.clone(), LogicalPlan::str("city")]);

        // Replace the free with an invoke that itself contains a free of the
        // same name; the replacement must not be rewritten again.
        let replacement =
            Function::Squash.of(vec![LogicalPlan::free("t")]);
        let rewritten = plan.substitute(&target, &replacement);

        assert_eq!(
            rewritten,
            Function::ObjectProject.of(vec![replacement, LogicalPlan::str("city")])
        );
    }

    #[test]
    fn fold_counts_nodes() {
        let plan = LogicalPlan::let_in(
            "tmp0",
            LogicalPlan::read("zips"),
            Function::ObjectProject.of(vec![LogicalPlan::free("tmp0"), LogicalPlan::str("city")]),
        );
        let count = plan.fold(&mut |_, children: Vec<usize>| {
            1 + children.into_iter().sum::<usize>()
        });
        assert_eq!(count, 5);
    }

    #[test]
    fn unfold_builds_nested_lets() {
        // Unfold a chain Let(tmp0, Read, Let(tmp1, Read, Free(tmp1))).
        let plan = LogicalPlan::unfold(0u32, &mut |depth| {
            if depth < 2 {
                PlanSeed::Let {
                    name: format!("tmp{depth}"),
                    binding: 100 + depth,
                    body: depth + 1,
                }
            } else if depth >= 100 {
                PlanSeed::Read(FieldPath::name("zips"))
            } else {
                PlanSeed::Free("tmp1".to_string())
            }
        });
        match plan {
            LogicalPlan::Let { name, body, .. } => {
                assert_eq!(name, "tmp0");
                assert!(matches!(*body, LogicalPlan::Let { .. }));
            }
            other => panic!("expected Let, got {other}"),
        }
    }

    #[test]
    fn make_array_n_shapes() {
        assert_eq!(
            LogicalPlan::make_array_n(vec![]),
            LogicalPlan::Constant(Data::Arr(vec![]))
        );
        assert_eq!(
            LogicalPlan::make_array_n(vec![LogicalPlan::int(1)]),
            Function::MakeArray.of(vec![LogicalPlan::int(1)])
        );
        assert_eq!(
            LogicalPlan::make_array_n(vec![LogicalPlan::int(1), LogicalPlan::int(2)]),
            Function::ArrayConcat.of(vec![
                Function::MakeArray.of(vec![LogicalPlan::int(1)]),
                Function::MakeArray.of(vec![LogicalPlan::int(2)]),
            ])
        );
    }

    #[test]
    fn display_tree() {
        let plan = LogicalPlan::let_in(
            "tmp0",
            LogicalPlan::read("zips"),
            Function::Squash.of(vec![LogicalPlan::free("tmp0")]),
        );
        let output = format!("{plan}");
        assert!(output.contains("Let: tmp0"));
        assert!(output.contains("Read: zips"));
        assert!(output.contains("Invoke: squash"));
    }
}
