//! The physical pipeline IR.
//!
//! A [`Workflow`] chains aggregation stages over a named source
//! collection. [`expr`] holds the value-level pieces (expressions,
//! reshapes, accumulators, selectors), [`js`] the JavaScript sub-IR for
//! the map/reduce stages, and [`inline`] the shape resolver that fuses
//! stacked reshapes.

pub mod expr;
pub(crate) mod inline;
pub mod js;
mod stage;

pub use expr::{
    Accumulator, Condition, Expression, GroupKey, Grouped, IdHandling, Reshape, Selector,
    ShapeValue, SortDir,
};
pub use js::{expression_to_js, JsBinOp, JsExpr, JsFn};
pub use stage::{CardinalExpr, JsScope, Workflow};
