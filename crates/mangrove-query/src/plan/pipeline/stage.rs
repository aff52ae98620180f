//! Workflow stages.
//!
//! A [`Workflow`] is the physical plan: a chain of aggregation stages,
//! each owning its upstream source, whose leaf is a read of a named
//! collection (`$FoldLeft` makes the chain a tree). Stages are immutable
//! values; the optimizer produces new trees.
//!
//! The smart constructors perform stage-adjacent fusion ("coalesce"):
//! consecutive matches conjoin, limits take the minimum, skips sum, and
//! consecutive projects fuse by inlining the inner shape into the outer.
//! Fusion is shape-preserving: the observable result multiset is
//! unchanged.

// Allow long Display and rendering impls
#![allow(clippy::too_many_lines)]

use std::fmt;

use indexmap::IndexMap;
use serde_json::{json, Map as JsonMap, Value as Json};

use mangrove_core::{Data, DocVar, FieldPath};

use super::expr::{GroupKey, Grouped, IdHandling, Reshape, Selector, SortDir};
use super::inline::inline_project;
use super::js::JsFn;

/// A map/reduce stage's free-variable scope.
pub type JsScope = IndexMap<String, Data>;

/// One mapping expression of a `$SimpleMap` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum CardinalExpr {
    /// A one-to-one mapping.
    Map(JsFn),
    /// A one-to-many mapping.
    Flat(JsFn),
}

/// A physical aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Workflow {
    /// The leaf: a read of a named collection.
    Read {
        /// The collection name.
        collection: String,
    },

    /// A `$project` stage.
    Project {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The output shape.
        shape: Reshape,
        /// Identifier policy.
        id: IdHandling,
    },

    /// A `$group` stage.
    Group {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The accumulators, by output name.
        grouped: Grouped,
        /// The grouping key.
        by: GroupKey,
    },

    /// A `$match` stage.
    Match {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The predicate document.
        selector: Selector,
    },

    /// A `$sort` stage.
    Sort {
        /// The upstream stage.
        source: Box<Workflow>,
        /// Sort keys, outermost first.
        keys: Vec<(FieldPath, SortDir)>,
    },

    /// A `$skip` stage.
    Skip {
        /// The upstream stage.
        source: Box<Workflow>,
        /// How many documents to skip.
        count: u64,
    },

    /// A `$limit` stage.
    Limit {
        /// The upstream stage.
        source: Box<Workflow>,
        /// How many documents to keep.
        count: u64,
    },

    /// A pipeline-translatable JavaScript mapping stage.
    SimpleMap {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The mapping expressions, applied in order.
        exprs: Vec<CardinalExpr>,
        /// Free variables of the functions.
        scope: JsScope,
    },

    /// A map-reduce `map` stage.
    Map {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The mapping function.
        func: JsFn,
        /// Free variables of the function.
        scope: JsScope,
    },

    /// A map-reduce flat-mapping stage.
    FlatMap {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The mapping function.
        func: JsFn,
        /// Free variables of the function.
        scope: JsScope,
    },

    /// A map-reduce `reduce` stage.
    Reduce {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The reducing function.
        func: JsFn,
        /// Free variables of the function.
        scope: JsScope,
    },

    /// A merge of several branches folded into one result set.
    FoldLeft {
        /// The first branch.
        head: Box<Workflow>,
        /// The remaining branches, folded in order.
        tail: Vec<Workflow>,
    },

    /// A `$unwind` stage.
    Unwind {
        /// The upstream stage.
        source: Box<Workflow>,
        /// The unwound array field.
        field: DocVar,
    },
}

impl Workflow {
    // ========== Constructors ==========

    /// Creates a collection read.
    #[must_use]
    pub fn read(collection: impl Into<String>) -> Self {
        Self::Read { collection: collection.into() }
    }

    /// Adds a `$project` stage, fusing with an adjacent project.
    #[must_use]
    pub fn project(self, shape: Reshape, id: IdHandling) -> Self {
        Self::Project { source: Box::new(self), shape, id }.coalesce()
    }

    /// Adds a `$group` stage.
    #[must_use]
    pub fn group(self, grouped: Grouped, by: GroupKey) -> Self {
        Self::Group { source: Box::new(self), grouped, by }
    }

    /// Adds a `$match` stage, conjoining with an adjacent match.
    #[must_use]
    pub fn filter(self, selector: Selector) -> Self {
        Self::Match { source: Box::new(self), selector }.coalesce()
    }

    /// Adds a `$sort` stage.
    #[must_use]
    pub fn sort(self, keys: Vec<(FieldPath, SortDir)>) -> Self {
        Self::Sort { source: Box::new(self), keys }
    }

    /// Adds a `$skip` stage, summing with an adjacent skip.
    #[must_use]
    pub fn skip(self, count: u64) -> Self {
        Self::Skip { source: Box::new(self), count }.coalesce()
    }

    /// Adds a `$limit` stage, taking the minimum with an adjacent limit.
    #[must_use]
    pub fn limit(self, count: u64) -> Self {
        Self::Limit { source: Box::new(self), count }.coalesce()
    }

    /// Adds a `$unwind` stage.
    #[must_use]
    pub fn unwind(self, field: DocVar) -> Self {
        Self::Unwind { source: Box::new(self), field }
    }

    /// Adds a `$SimpleMap` stage.
    #[must_use]
    pub fn simple_map(self, exprs: Vec<CardinalExpr>, scope: JsScope) -> Self {
        Self::SimpleMap { source: Box::new(self), exprs, scope }
    }

    /// Adds a map-reduce `map` stage.
    #[must_use]
    pub fn js_map(self, func: JsFn, scope: JsScope) -> Self {
        Self::Map { source: Box::new(self), func, scope }
    }

    /// Adds a map-reduce flat-map stage.
    #[must_use]
    pub fn js_flat_map(self, func: JsFn, scope: JsScope) -> Self {
        Self::FlatMap { source: Box::new(self), func, scope }
    }

    /// Adds a map-reduce `reduce` stage.
    #[must_use]
    pub fn js_reduce(self, func: JsFn, scope: JsScope) -> Self {
        Self::Reduce { source: Box::new(self), func, scope }
    }

    /// Folds several branches into one result set.
    #[must_use]
    pub fn fold_left(head: Workflow, tail: Vec<Workflow>) -> Self {
        Self::FoldLeft { head: Box::new(head), tail }
    }

    // ========== Structure ==========

    /// The single upstream source, if the stage has one.
    #[must_use]
    pub fn source(&self) -> Option<&Workflow> {
        match self {
            Self::Read { .. } | Self::FoldLeft { .. } => None,
            Self::Project { source, .. }
            | Self::Group { source, .. }
            | Self::Match { source, .. }
            | Self::Sort { source, .. }
            | Self::Skip { source, .. }
            | Self::Limit { source, .. }
            | Self::SimpleMap { source, .. }
            | Self::Map { source, .. }
            | Self::FlatMap { source, .. }
            | Self::Reduce { source, .. }
            | Self::Unwind { source, .. } => Some(source),
        }
    }

    /// Every upstream stage (branches for `FoldLeft`).
    #[must_use]
    pub fn sources(&self) -> Vec<&Workflow> {
        match self {
            Self::Read { .. } => vec![],
            Self::FoldLeft { head, tail } => {
                let mut out = vec![head.as_ref()];
                out.extend(tail.iter());
                out
            }
            other => other.source().into_iter().collect(),
        }
    }

    /// Rebuilds the stage with each upstream replaced through `f`.
    #[must_use]
    pub fn map_sources(self, f: &mut dyn FnMut(Workflow) -> Workflow) -> Self {
        match self {
            read @ Self::Read { .. } => read,
            Self::Project { source, shape, id } => {
                Self::Project { source: Box::new(f(*source)), shape, id }
            }
            Self::Group { source, grouped, by } => {
                Self::Group { source: Box::new(f(*source)), grouped, by }
            }
            Self::Match { source, selector } => {
                Self::Match { source: Box::new(f(*source)), selector }
            }
            Self::Sort { source, keys } => Self::Sort { source: Box::new(f(*source)), keys },
            Self::Skip { source, count } => Self::Skip { source: Box::new(f(*source)), count },
            Self::Limit { source, count } => {
                Self::Limit { source: Box::new(f(*source)), count }
            }
            Self::SimpleMap { source, exprs, scope } => {
                Self::SimpleMap { source: Box::new(f(*source)), exprs, scope }
            }
            Self::Map { source, func, scope } => {
                Self::Map { source: Box::new(f(*source)), func, scope }
            }
            Self::FlatMap { source, func, scope } => {
                Self::FlatMap { source: Box::new(f(*source)), func, scope }
            }
            Self::Reduce { source, func, scope } => {
                Self::Reduce { source: Box::new(f(*source)), func, scope }
            }
            Self::Unwind { source, field } => {
                Self::Unwind { source: Box::new(f(*source)), field }
            }
            Self::FoldLeft { head, tail } => Self::FoldLeft {
                head: Box::new(f(*head)),
                tail: tail.into_iter().map(f).collect(),
            },
        }
    }

    /// The field references this stage makes against its input.
    #[must_use]
    pub fn refs(&self) -> Vec<DocVar> {
        match self {
            Self::Project { shape, .. } => shape.refs(),
            Self::Group { grouped, by, .. } => {
                let mut out = grouped.refs();
                out.extend(by.refs());
                out
            }
            Self::Match { selector, .. } => {
                selector.fields().into_iter().map(DocVar::root_at).collect()
            }
            Self::Sort { keys, .. } => {
                keys.iter().map(|(path, _)| DocVar::root_at(path.clone())).collect()
            }
            Self::Unwind { field, .. } => vec![field.clone()],
            _ => vec![],
        }
    }

    /// The collection the pipeline reads, following `FoldLeft` heads.
    #[must_use]
    pub fn source_collection(&self) -> Option<&str> {
        match self {
            Self::Read { collection } => Some(collection),
            Self::FoldLeft { head, .. } => head.source_collection(),
            other => other.source().and_then(Workflow::source_collection),
        }
    }

    // ========== Coalescing ==========

    /// Applies stage-adjacent fusion at this node until none applies.
    #[must_use]
    pub fn coalesce(self) -> Self {
        let mut node = self;
        loop {
            match Self::coalesce_once(node) {
                Ok(fused) => node = fused,
                Err(unchanged) => return unchanged,
            }
        }
    }

    /// One fusion step at this node: `Ok` if something fused.
    pub(crate) fn coalesce_once(node: Workflow) -> Result<Workflow, Workflow> {
        match node {
            Self::Match { source, selector } => match *source {
                Self::Match { source: inner, selector: inner_selector } => Ok(Self::Match {
                    source: inner,
                    selector: inner_selector.and(selector),
                }),
                other => Err(Self::Match { source: Box::new(other), selector }),
            },
            Self::Skip { source, count } => match *source {
                Self::Skip { source: inner, count: inner_count } => Ok(Self::Skip {
                    source: inner,
                    count: inner_count.saturating_add(count),
                }),
                other => Err(Self::Skip { source: Box::new(other), count }),
            },
            Self::Limit { source, count } => match *source {
                Self::Limit { source: inner, count: inner_count } => {
                    Ok(Self::Limit { source: inner, count: count.min(inner_count) })
                }
                other => Err(Self::Limit { source: Box::new(other), count }),
            },
            Self::Project { source, shape, id } => match *source {
                Self::Project { source: inner, shape: inner_shape, id: inner_id } => {
                    let fused = inline_project(&shape, &[inner_shape.clone()]);
                    if fused.is_empty() && !shape.is_empty() {
                        // Nothing resolved; fusing would change the shape.
                        Err(Self::Project {
                            source: Box::new(Self::Project {
                                source: inner,
                                shape: inner_shape,
                                id: inner_id,
                            }),
                            shape,
                            id,
                        })
                    } else {
                        Ok(Self::Project { source: inner, shape: fused, id: id.fuse(inner_id) })
                    }
                }
                other => Err(Self::Project { source: Box::new(other), shape, id }),
            },
            other => Err(other),
        }
    }

    // ========== Rendering ==========

    /// Renders the pipeline as its external stage-document list.
    ///
    /// The leaf read does not appear; fetch it with
    /// [`Workflow::source_collection`].
    #[must_use]
    pub fn to_pipeline(&self) -> Vec<Json> {
        let mut out = Vec::new();
        self.emit(&mut out);
        out
    }

    fn emit(&self, out: &mut Vec<Json>) {
        if let Some(source) = self.source() {
            source.emit(out);
        }
        match self {
            Self::Read { .. } => {}
            Self::Project { shape, id, .. } => {
                let mut doc = shape.to_json_map();
                match id {
                    IdHandling::Include => {
                        if !doc.contains_key("_id") {
                            doc.insert("_id".to_string(), json!(true));
                        }
                    }
                    IdHandling::Exclude => {
                        doc.insert("_id".to_string(), json!(false));
                    }
                    IdHandling::Ignore => {}
                }
                out.push(json!({ "$project": doc }));
            }
            Self::Group { grouped, by, .. } => {
                let mut doc = JsonMap::new();
                doc.insert("_id".to_string(), by.to_json());
                for (name, acc) in grouped.iter() {
                    doc.insert(name.clone(), acc.to_json());
                }
                out.push(json!({ "$group": doc }));
            }
            Self::Match { selector, .. } => out.push(json!({ "$match": selector.to_json() })),
            Self::Sort { keys, .. } => {
                let doc: JsonMap<String, Json> = keys
                    .iter()
                    .map(|(path, dir)| (path.to_string(), json!(dir.to_json())))
                    .collect();
                out.push(json!({ "$sort": doc }));
            }
            Self::Skip { count, .. } => out.push(json!({ "$skip": count })),
            Self::Limit { count, .. } => out.push(json!({ "$limit": count })),
            Self::SimpleMap { exprs, scope, .. } => {
                let rendered: Vec<Json> = exprs
                    .iter()
                    .map(|e| match e {
                        CardinalExpr::Map(f) => json!({ "map": f.to_string() }),
                        CardinalExpr::Flat(f) => json!({ "flatMap": f.to_string() }),
                    })
                    .collect();
                out.push(json!({ "$simpleMap": { "exprs": rendered, "scope": scope_json(scope) } }));
            }
            Self::Map { func, scope, .. } => {
                out.push(json!({ "$map": { "function": func.to_string(), "scope": scope_json(scope) } }));
            }
            Self::FlatMap { func, scope, .. } => {
                out.push(
                    json!({ "$flatMap": { "function": func.to_string(), "scope": scope_json(scope) } }),
                );
            }
            Self::Reduce { func, scope, .. } => {
                out.push(
                    json!({ "$reduce": { "function": func.to_string(), "scope": scope_json(scope) } }),
                );
            }
            Self::FoldLeft { head, tail } => {
                let mut branches = vec![Json::Array(head.to_pipeline())];
                branches.extend(tail.iter().map(|b| Json::Array(b.to_pipeline())));
                out.push(json!({ "$foldLeft": branches }));
            }
            Self::Unwind { field, .. } => out.push(json!({ "$unwind": field.render() })),
        }
    }

    /// The stage name (for display/debugging).
    #[must_use]
    pub const fn stage_name(&self) -> &'static str {
        match self {
            Self::Read { .. } => "$read",
            Self::Project { .. } => "$project",
            Self::Group { .. } => "$group",
            Self::Match { .. } => "$match",
            Self::Sort { .. } => "$sort",
            Self::Skip { .. } => "$skip",
            Self::Limit { .. } => "$limit",
            Self::SimpleMap { .. } => "$simpleMap",
            Self::Map { .. } => "$map",
            Self::FlatMap { .. } => "$flatMap",
            Self::Reduce { .. } => "$reduce",
            Self::FoldLeft { .. } => "$foldLeft",
            Self::Unwind { .. } => "$unwind",
        }
    }
}

fn scope_json(scope: &JsScope) -> Json {
    Json::Object(scope.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, "", true)
    }
}

impl Workflow {
    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, prefix: &str, is_last: bool) -> fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        write!(f, "{prefix}{connector}{}", self.stage_name())?;
        match self {
            Self::Read { collection } => write!(f, ": {collection}")?,
            Self::Project { shape, .. } => write!(f, ": {} fields", shape.len())?,
            Self::Group { grouped, .. } => write!(f, ": {} accumulators", grouped.len())?,
            Self::Match { selector, .. } => write!(f, ": {selector}")?,
            Self::Sort { keys, .. } => write!(f, ": {} keys", keys.len())?,
            Self::Skip { count, .. } | Self::Limit { count, .. } => write!(f, ": {count}")?,
            Self::Unwind { field, .. } => write!(f, ": {field}")?,
            _ => {}
        }
        writeln!(f)?;

        let children = self.sources();
        let new_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        for (i, child) in children.iter().enumerate() {
            child.fmt_node(f, &new_prefix, i == children.len() - 1)?;
        }
        Ok(())
    }
}
