//! Mangrove Core
//!
//! This crate provides the value model shared by the mangrove query
//! compiler and its pipeline optimizer.
//!
//! # Overview
//!
//! - **Data atoms**: [`Data`] - scalars, temporals, and collections with
//!   insertion-ordered objects, parsed from their ISO-8601 literal forms.
//! - **Types**: [`Type`] - a structural lattice with `Top`/`Bottom`,
//!   unions, object/array types, and singleton constant types; [`typecheck`]
//!   checks an observed type against an expected one.
//! - **Paths**: [`FieldPath`] and [`DocVar`] - element-wise field addressing
//!   and scoped document references used throughout the pipeline IR.
//!
//! # Example
//!
//! ```
//! use mangrove_core::{Data, DocVar, FieldPath, Type};
//!
//! let zip = Data::str("04005");
//! assert_eq!(zip.data_type(), Type::Str);
//!
//! let city = FieldPath::dotted("address.city").unwrap();
//! assert!(city.starts_with(&FieldPath::name("address")));
//!
//! assert_eq!(DocVar::field("city").render(), "$city");
//! assert_eq!(DocVar::root().render(), "$$ROOT");
//! ```
//!
//! # Modules
//!
//! - [`types`] - Data atoms, the type lattice, and field paths
//! - [`error`] - Error types ([`TypeError`], [`DateFormatError`])

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{DateFormatError, TemporalKind, TypeError};
pub use types::{typecheck, Data, DocVar, FieldPath, Leaf, Scope, Type};
