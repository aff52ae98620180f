//! Error types for query compilation.
//!
//! Every compilation step is fallible and short-circuits at the first
//! error. The pipeline optimizer, by contrast, never fails: a rewrite that
//! cannot apply is skipped and the input returned unchanged.

use thiserror::Error;

use mangrove_core::{DateFormatError, TypeError};

/// Errors produced while lowering an annotated SQL tree to a logical plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    /// An identifier resolved semantically to an unknown function.
    #[error("unknown function: `{0}`")]
    FunctionNotBound(String),

    /// An expression referenced a table where no table context was
    /// established.
    #[error("no table context in scope")]
    CompiledTableMissing,

    /// An expression referenced a subtable that was never compiled.
    #[error("no compiled subtable named `{0}` in scope")]
    CompiledSubtableMissing(String),

    /// Provenance yielded no named relation for an identifier.
    #[error("no table defined for `{0}`")]
    NoTableDefined(String),

    /// Provenance yielded several named relations for an identifier.
    #[error("ambiguous reference: `{0}`")]
    AmbiguousReference(String),

    /// A position syntactically requiring a literal got a non-literal.
    #[error("expected a literal {0}")]
    ExpectedLiteral(String),

    /// A partial typer or untyper rejected a shape.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A temporal literal did not parse.
    #[error(transparent)]
    DateFormat(#[from] DateFormatError),

    /// Any other compilation-logic violation.
    #[error("{0}")]
    Generic(String),
}

impl SemanticError {
    /// Creates a generic error from a message.
    #[must_use]
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }
}

/// Result type for compilation operations.
pub type SemanticResult<T> = Result<T, SemanticError>;
