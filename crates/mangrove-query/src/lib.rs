//! Mangrove Query
//!
//! The compilation core of mangrove: lowering annotated SQL to a logical
//! plan, and optimizing physical aggregation pipelines.
//!
//! # Overview
//!
//! The crate is a pure, single-threaded transformation pipeline over
//! immutable values:
//!
//! ```text
//! annotated SQL AST ──compile──▶ LogicalPlan ──(planner)──▶ Workflow ──optimize──▶ Workflow
//! ```
//!
//! - [`ast`] - the annotated SQL surface handed in by the (external)
//!   parser and semantic analyzer
//! - [`compile`](crate::compile()) - lowering to [`plan::logical::LogicalPlan`]
//! - [`plan::logical`] - the logical IR and its function catalog
//! - [`plan::pipeline`] - the physical pipeline IR
//!   ([`plan::pipeline::Workflow`])
//! - [`plan::optimize`] - the pipeline optimizer
//!
//! Compilation is fallible and short-circuits at the first
//! [`SemanticError`]; the optimizer never fails and simply skips rewrites
//! that do not apply.
//!
//! # Example
//!
//! ```
//! use mangrove_query::ast::{AstNode, Projection, Provenance, Select, SqlRelation};
//! use mangrove_query::compile;
//!
//! // SELECT city FROM zips (as produced by the analyzer)
//! let select = Select::new(vec![Projection::new(
//!     AstNode::ident("city").with_provenance(Provenance::relation("zips")),
//! )])
//! .from(SqlRelation::table("zips"));
//!
//! let plan = compile(&AstNode::select(select)).unwrap();
//! assert!(format!("{plan}").contains("Read: zips"));
//! ```

pub mod ast;
mod compile;
pub mod error;
pub mod plan;

// Re-export the crate surface
pub use compile::compile;
pub use error::{SemanticError, SemanticResult};
pub use plan::logical::{Function, LogicalPlan};
pub use plan::optimize::{optimize, Optimizer};
pub use plan::pipeline::Workflow;
