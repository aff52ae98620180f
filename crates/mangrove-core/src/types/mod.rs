//! Core data types for mangrove.
//!
//! This module defines the value model shared by the compiler and the
//! pipeline IR: data atoms, the structural type lattice, and field paths.

mod data;
mod lattice;
mod path;

pub use data::Data;
pub use lattice::{typecheck, Type};
pub use path::{DocVar, FieldPath, Leaf, Scope};
