//! Mangrove
//!
//! A SQL-to-document-store query compiler: annotated SQL lowers to a
//! relational/functional logical plan, and physical aggregation pipelines
//! ("workflows") are optimized before execution.
//!
//! This crate re-exports the public surface of the workspace:
//!
//! - [`mangrove_core`] - data atoms, the type lattice, field paths
//! - [`mangrove_query`] - the compiler, the plan IRs, and the optimizer
//!
//! # Example
//!
//! ```
//! use mangrove::query::ast::{AstNode, Projection, Provenance, Select, SqlRelation};
//! use mangrove::query::{compile, optimize, Workflow};
//! use mangrove::query::plan::pipeline::{IdHandling, Reshape, ShapeValue};
//!
//! // Lower a SELECT into a logical plan.
//! let select = Select::new(vec![Projection::new(
//!     AstNode::ident("city").with_provenance(Provenance::relation("zips")),
//! )])
//! .from(SqlRelation::table("zips"));
//! let plan = compile(&AstNode::select(select)).unwrap();
//! assert!(format!("{plan}").contains("Invoke: squash"));
//!
//! // Optimize a hand-built pipeline.
//! let wf = Workflow::read("zips")
//!     .project(Reshape::new().with("city", ShapeValue::include()), IdHandling::Ignore)
//!     .limit(10);
//! let optimized = optimize(wf.clone());
//! assert_eq!(optimized, optimize(optimized.clone()));
//! ```

pub use mangrove_core as core;
pub use mangrove_query as query;

// The most commonly used types, at the root.
pub use mangrove_core::{Data, DocVar, FieldPath, Type};
pub use mangrove_query::{compile, optimize, LogicalPlan, SemanticError, Workflow};
