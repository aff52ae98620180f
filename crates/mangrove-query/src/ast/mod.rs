//! The annotated SQL surface.
//!
//! The lexer, parser, and semantic analyzer live outside this crate; what
//! arrives here is an already-parsed expression tree whose nodes carry an
//! [`Attr`] annotation: synthetic tags, provenance, an inferred type, and an
//! optional function binding. [`crate::compile::compile`] consumes this
//! surface.

use mangrove_core::{Data, Type};

use crate::plan::logical::Function;

/// A binary operator in the SQL surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
    /// Equality.
    Eq,
    /// Inequality.
    Neq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Addition.
    Plus,
    /// Subtraction.
    Minus,
    /// Multiplication.
    Mult,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// String concatenation (`||`).
    Concat,
}

/// A unary operator in the SQL surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
    /// `IS NULL`.
    IsNull,
}

/// A sort direction in `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl OrderType {
    /// The order token carried into the logical plan.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A join flavor in the `FROM` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT OUTER JOIN`.
    LeftOuter,
    /// `RIGHT OUTER JOIN`.
    RightOuter,
    /// `FULL OUTER JOIN`.
    FullOuter,
}

/// A synthetic tag attached by the semantic analyzer.
///
/// Synthetic projections (for example hidden sort keys) are injected into
/// the select list during analysis and must be stripped before user results
/// are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synthetic {
    /// A hidden sort key injected for `ORDER BY`.
    SortKey,
}

/// Which source relations an expression depends on, as tracked by the
/// semantic analyzer.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Provenance {
    /// No provenance (literals, missing analysis).
    #[default]
    Empty,
    /// Derived from a computed value rather than a relation.
    Value,
    /// A single named relation.
    Relation(String),
    /// Both sides contribute (e.g. a binary operation).
    Both(Box<Provenance>, Box<Provenance>),
    /// Either side may contribute (e.g. a conditional).
    Either(Box<Provenance>, Box<Provenance>),
}

impl Provenance {
    /// Provenance of a single named relation.
    #[must_use]
    pub fn relation(name: impl Into<String>) -> Self {
        Self::Relation(name.into())
    }

    /// Combines two provenances that both contribute.
    #[must_use]
    pub fn and(self, other: Provenance) -> Self {
        Self::Both(Box::new(self), Box::new(other))
    }

    /// Combines two provenances of which either may contribute.
    #[must_use]
    pub fn or(self, other: Provenance) -> Self {
        Self::Either(Box::new(self), Box::new(other))
    }

    /// The distinct named relations, in first-appearance order.
    #[must_use]
    pub fn relations(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_relations(&mut out);
        out
    }

    fn collect_relations<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Empty | Self::Value => {}
            Self::Relation(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Both(a, b) | Self::Either(a, b) => {
                a.collect_relations(out);
                b.collect_relations(out);
            }
        }
    }
}

/// The annotation attached to every AST node by the semantic analyzer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attr {
    /// Synthetic tag, if the node was injected during analysis.
    pub synthetic: Option<Synthetic>,
    /// Which relations the node depends on.
    pub provenance: Provenance,
    /// The inferred type, when analysis produced one.
    pub ty: Option<Type>,
    /// The resolved function binding for `InvokeFunction` nodes.
    pub func: Option<Function>,
}

/// An annotated expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    /// The expression itself.
    pub kind: ExprKind,
    /// The analyzer's annotation.
    pub attr: Attr,
}

/// An expression in the SQL surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A (sub)query.
    Select(Box<Select>),
    /// A binary operation.
    Binop {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<AstNode>,
        /// Right operand.
        rhs: Box<AstNode>,
    },
    /// A unary operation.
    Unop {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        expr: Box<AstNode>,
    },
    /// An identifier.
    Ident(String),
    /// A function invocation.
    InvokeFunction {
        /// The function name as written.
        name: String,
        /// The arguments.
        args: Vec<AstNode>,
    },
    /// `expr LIKE pattern [ESCAPE escape]`.
    Like {
        /// The searched expression.
        expr: Box<AstNode>,
        /// The pattern; must be a string literal.
        pattern: Box<AstNode>,
        /// The escape character; must be a string literal when present.
        escape: Option<Box<AstNode>>,
    },
    /// `expr BETWEEN low AND high`.
    Between {
        /// The tested expression.
        expr: Box<AstNode>,
        /// Lower bound.
        low: Box<AstNode>,
        /// Upper bound.
        high: Box<AstNode>,
    },
    /// `CASE` in both forms: with an operand (match) and without (switch).
    Case {
        /// The scrutinee for the match form; `None` for the switch form.
        operand: Option<Box<AstNode>>,
        /// `WHEN ... THEN ...` branches in order.
        when_then: Vec<(AstNode, AstNode)>,
        /// The `ELSE` result.
        otherwise: Option<Box<AstNode>>,
    },
    /// `*` (bare) or `expr.*` - merge a record into the projection.
    Splice(Option<Box<AstNode>>),
    /// A set literal; elements must be literals.
    SetLiteral(Vec<AstNode>),
    /// An array literal.
    ArrayLiteral(Vec<AstNode>),
    /// A literal value.
    Literal(Data),
}

impl AstNode {
    /// Creates a node with an empty annotation.
    #[must_use]
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, attr: Attr::default() }
    }

    /// Creates an identifier node.
    #[must_use]
    pub fn ident(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Ident(name.into()))
    }

    /// Creates a literal node.
    #[must_use]
    pub fn literal(data: impl Into<Data>) -> Self {
        Self::new(ExprKind::Literal(data.into()))
    }

    /// Creates a binary operation node.
    #[must_use]
    pub fn binop(op: BinaryOp, lhs: AstNode, rhs: AstNode) -> Self {
        Self::new(ExprKind::Binop { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    /// Creates a unary operation node.
    #[must_use]
    pub fn unop(op: UnaryOp, expr: AstNode) -> Self {
        Self::new(ExprKind::Unop { op, expr: Box::new(expr) })
    }

    /// Creates a function invocation node.
    #[must_use]
    pub fn invoke(name: impl Into<String>, args: Vec<AstNode>) -> Self {
        Self::new(ExprKind::InvokeFunction { name: name.into(), args })
    }

    /// Creates a bare `*` splice.
    #[must_use]
    pub fn splice_all() -> Self {
        Self::new(ExprKind::Splice(None))
    }

    /// Creates a subquery node.
    #[must_use]
    pub fn select(select: Select) -> Self {
        Self::new(ExprKind::Select(Box::new(select)))
    }

    /// Sets the provenance annotation.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.attr.provenance = provenance;
        self
    }

    /// Sets the type annotation.
    #[must_use]
    pub fn with_type(mut self, ty: Type) -> Self {
        self.attr.ty = Some(ty);
        self
    }

    /// Sets the function binding.
    #[must_use]
    pub fn with_func(mut self, func: Function) -> Self {
        self.attr.func = Some(func);
        self
    }

    /// Marks the node as an analyzer-injected sort key.
    #[must_use]
    pub fn synthetic_sort_key(mut self) -> Self {
        self.attr.synthetic = Some(Synthetic::SortKey);
        self
    }

    /// Returns the literal value if this node is a literal.
    #[must_use]
    pub const fn as_literal(&self) -> Option<&Data> {
        match &self.kind {
            ExprKind::Literal(d) => Some(d),
            _ => None,
        }
    }
}

/// One projection in a select list.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// The projected expression.
    pub expr: AstNode,
    /// The alias, when one was written (or injected by analysis).
    pub alias: Option<String>,
}

impl Projection {
    /// Creates an unaliased projection.
    #[must_use]
    pub fn new(expr: AstNode) -> Self {
        Self { expr, alias: None }
    }

    /// Creates an aliased projection.
    #[must_use]
    pub fn aliased(expr: AstNode, alias: impl Into<String>) -> Self {
        Self { expr, alias: Some(alias.into()) }
    }
}

/// A relation in the `FROM` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlRelation {
    /// A named table (possibly a path such as `/db/zips`).
    Table {
        /// The relation name.
        name: String,
        /// The alias, if any.
        alias: Option<String>,
    },
    /// A subquery relation.
    Subquery {
        /// The subquery; must be a `Select` node.
        select: Box<AstNode>,
        /// The mandatory alias.
        alias: String,
    },
    /// A join of two relations.
    Join {
        /// Left input.
        left: Box<SqlRelation>,
        /// Right input.
        right: Box<SqlRelation>,
        /// The join flavor.
        kind: JoinKind,
        /// The `ON` clause.
        clause: Box<AstNode>,
    },
}

impl SqlRelation {
    /// Creates a named table relation.
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table { name: name.into(), alias: None }
    }

    /// Creates a named table relation with an alias.
    #[must_use]
    pub fn table_aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Table { name: name.into(), alias: Some(alias.into()) }
    }

    /// Creates a join relation.
    #[must_use]
    pub fn join(left: SqlRelation, right: SqlRelation, kind: JoinKind, clause: AstNode) -> Self {
        Self::Join {
            left: Box::new(left),
            right: Box::new(right),
            kind,
            clause: Box::new(clause),
        }
    }
}

/// A `GROUP BY` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    /// The grouping keys.
    pub keys: Vec<AstNode>,
    /// The `HAVING` predicate.
    pub having: Option<AstNode>,
}

/// An `ORDER BY` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// The sort keys, outermost first.
    pub keys: Vec<(OrderType, AstNode)>,
}

/// `DISTINCT` flavor on a select.
#[derive(Debug, Clone, PartialEq)]
pub enum DistinctKind {
    /// Plain `SELECT DISTINCT`.
    Distinct,
    /// `DISTINCT BY (keys...)`.
    DistinctBy(Vec<AstNode>),
}

/// A `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Distinct flavor; `None` means `ALL`.
    pub distinct: Option<DistinctKind>,
    /// The select list.
    pub projections: Vec<Projection>,
    /// The `FROM` clause.
    pub relation: Option<SqlRelation>,
    /// The `WHERE` predicate.
    pub filter: Option<AstNode>,
    /// The `GROUP BY` clause.
    pub group_by: Option<GroupBy>,
    /// The `ORDER BY` clause.
    pub order_by: Option<OrderBy>,
    /// The `OFFSET` row count.
    pub offset: Option<u64>,
    /// The `LIMIT` row count.
    pub limit: Option<u64>,
}

impl Select {
    /// Creates a select with the given projections and nothing else.
    #[must_use]
    pub fn new(projections: Vec<Projection>) -> Self {
        Self {
            distinct: None,
            projections,
            relation: None,
            filter: None,
            group_by: None,
            order_by: None,
            offset: None,
            limit: None,
        }
    }

    /// Sets the `FROM` clause.
    #[must_use]
    pub fn from(mut self, relation: SqlRelation) -> Self {
        self.relation = Some(relation);
        self
    }

    /// Sets the `WHERE` predicate.
    #[must_use]
    pub fn filter(mut self, predicate: AstNode) -> Self {
        self.filter = Some(predicate);
        self
    }

    /// Sets the `GROUP BY` keys.
    #[must_use]
    pub fn group_by(mut self, keys: Vec<AstNode>) -> Self {
        self.group_by = Some(GroupBy { keys, having: None });
        self
    }

    /// Sets the `HAVING` predicate (requires a prior `group_by`).
    #[must_use]
    pub fn having(mut self, predicate: AstNode) -> Self {
        if let Some(group_by) = &mut self.group_by {
            group_by.having = Some(predicate);
        }
        self
    }

    /// Sets the `ORDER BY` keys.
    #[must_use]
    pub fn order_by(mut self, keys: Vec<(OrderType, AstNode)>) -> Self {
        self.order_by = Some(OrderBy { keys });
        self
    }

    /// Sets the `OFFSET`.
    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Sets the `LIMIT`.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Marks the select as `DISTINCT`.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = Some(DistinctKind::Distinct);
        self
    }
}
