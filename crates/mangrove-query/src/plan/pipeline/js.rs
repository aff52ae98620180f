//! The JavaScript sub-IR for map/reduce stages.
//!
//! `$simpleMap`, `$map`, `$flatMap`, and `$reduce` stages carry JavaScript
//! functions rather than pipeline expressions. [`JsExpr`] is the small
//! expression language those functions are built from, and
//! [`expression_to_js`] translates pipeline expressions into it.

use std::fmt;

use indexmap::IndexMap;

use mangrove_core::{Data, DocVar, Leaf};

use super::expr::Expression;

/// A JavaScript expression.
#[derive(Debug, Clone, PartialEq)]
pub enum JsExpr {
    /// An identifier.
    Ident(String),
    /// A literal value.
    Literal(Data),
    /// Member access, `obj.field`.
    Access {
        /// The accessed object.
        obj: Box<JsExpr>,
        /// The member name.
        field: String,
    },
    /// Computed access, `obj[index]`.
    Index {
        /// The accessed object.
        obj: Box<JsExpr>,
        /// The index expression.
        index: Box<JsExpr>,
    },
    /// A binary operation.
    BinOp {
        /// The operator source text.
        op: JsBinOp,
        /// Left operand.
        lhs: Box<JsExpr>,
        /// Right operand.
        rhs: Box<JsExpr>,
    },
    /// Logical negation.
    Not(Box<JsExpr>),
    /// The conditional operator.
    Ternary {
        /// The condition.
        cond: Box<JsExpr>,
        /// The value when true.
        then: Box<JsExpr>,
        /// The value when false.
        otherwise: Box<JsExpr>,
    },
    /// A function call.
    Call {
        /// The called expression.
        func: Box<JsExpr>,
        /// The arguments.
        args: Vec<JsExpr>,
    },
    /// A constructor call, `new Class(args...)`.
    New {
        /// The class name.
        class: String,
        /// The constructor arguments.
        args: Vec<JsExpr>,
    },
    /// An object literal.
    Obj(IndexMap<String, JsExpr>),
    /// An array literal.
    Arr(Vec<JsExpr>),
}

/// A JavaScript binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsBinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl JsBinOp {
    const fn source(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl JsExpr {
    /// An identifier expression.
    #[must_use]
    pub fn ident(name: impl Into<String>) -> Self {
        Self::Ident(name.into())
    }

    /// Member access off this expression.
    #[must_use]
    pub fn access(self, field: impl Into<String>) -> Self {
        Self::Access { obj: Box::new(self), field: field.into() }
    }

    /// A binary operation.
    #[must_use]
    pub fn binop(op: JsBinOp, lhs: JsExpr, rhs: JsExpr) -> Self {
        Self::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }
}

impl fmt::Display for JsExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::Literal(d) => write_js_literal(f, d),
            Self::Access { obj, field } => write!(f, "{obj}.{field}"),
            Self::Index { obj, index } => write!(f, "{obj}[{index}]"),
            Self::BinOp { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.source()),
            Self::Not(e) => write!(f, "!({e})"),
            Self::Ternary { cond, then, otherwise } => {
                write!(f, "({cond} ? {then} : {otherwise})")
            }
            Self::Call { func, args } => {
                write!(f, "{func}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::New { class, args } => {
                write!(f, "new {class}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::Obj(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Arr(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

fn write_js_literal(f: &mut fmt::Formatter<'_>, d: &Data) -> fmt::Result {
    match d {
        Data::Null => write!(f, "null"),
        Data::Bool(b) => write!(f, "{b}"),
        Data::Int(i) => write!(f, "{i}"),
        Data::Dec(x) => write!(f, "{x}"),
        Data::Str(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
        Data::Timestamp(t) => write!(f, "new Date({})", t.timestamp_millis()),
        Data::Date(date) => write!(f, "new Date(\"{date}\")"),
        Data::Time(t) => write!(f, "\"{t}\""),
        Data::Interval(d) => write!(f, "{}", d.num_milliseconds()),
        Data::Arr(items) => write_js_elements(f, items),
        // Sets render in their canonical order.
        Data::Set(items) => write_js_elements(f, &Data::canonical_set(items)),
        Data::Obj(fields) => {
            write!(f, "{{")?;
            for (i, (key, value)) in fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", serde_json::Value::String(key.clone()))?;
                write_js_literal(f, value)?;
            }
            write!(f, "}}")
        }
    }
}

fn write_js_elements(f: &mut fmt::Formatter<'_>, items: &[Data]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_js_literal(f, item)?;
    }
    write!(f, "]")
}

/// A single-parameter JavaScript function.
#[derive(Debug, Clone, PartialEq)]
pub struct JsFn {
    /// The parameter name (the binding base of the body).
    pub param: String,
    /// The returned expression.
    pub body: JsExpr,
}

impl JsFn {
    /// Creates a function.
    #[must_use]
    pub fn new(param: impl Into<String>, body: JsExpr) -> Self {
        Self { param: param.into(), body }
    }

    /// The identity function over `param`.
    #[must_use]
    pub fn identity(param: impl Into<String>) -> Self {
        let param = param.into();
        let body = JsExpr::Ident(param.clone());
        Self { param, body }
    }
}

impl fmt::Display for JsFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function ({}) {{ return {}; }}", self.param, self.body)
    }
}

/// Translates a pipeline expression into JavaScript with the given binding
/// base. Returns `None` for expressions with no JavaScript form
/// (`$include`).
#[must_use]
pub fn expression_to_js(expr: &Expression, base: &str) -> Option<JsExpr> {
    let go = |e: &Expression| expression_to_js(e, base);
    let bin = |op: JsBinOp, a: &Expression, b: &Expression| {
        Some(JsExpr::binop(op, expression_to_js(a, base)?, expression_to_js(b, base)?))
    };
    match expr {
        Expression::Var(var) => Some(var_to_js(var, base)),
        Expression::Include => None,
        Expression::Literal(d) => Some(JsExpr::Literal(d.clone())),
        Expression::Add(a, b) => {
            // Adding to the epoch renders as date construction.
            if let Expression::Literal(Data::Timestamp(t)) = a.as_ref() {
                if t.timestamp_millis() == 0 {
                    return Some(JsExpr::New { class: "Date".into(), args: vec![go(b)?] });
                }
            }
            if let Expression::Literal(Data::Timestamp(t)) = b.as_ref() {
                if t.timestamp_millis() == 0 {
                    return Some(JsExpr::New { class: "Date".into(), args: vec![go(a)?] });
                }
            }
            bin(JsBinOp::Add, a, b)
        }
        Expression::Subtract(a, b) => bin(JsBinOp::Sub, a, b),
        Expression::Multiply(a, b) => bin(JsBinOp::Mul, a, b),
        Expression::Divide(a, b) => bin(JsBinOp::Div, a, b),
        Expression::Concat(items) => {
            let mut iter = items.iter();
            let first = go(iter.next()?)?;
            iter.try_fold(first, |acc, item| Some(JsExpr::binop(JsBinOp::Add, acc, go(item)?)))
        }
        Expression::Cond(test, then, otherwise) => Some(JsExpr::Ternary {
            cond: Box::new(go(test)?),
            then: Box::new(go(then)?),
            otherwise: Box::new(go(otherwise)?),
        }),
        Expression::IfNull(a, b) => bin(JsBinOp::Or, a, b),
        Expression::And(items) => fold_bin(JsBinOp::And, items, base),
        Expression::Or(items) => fold_bin(JsBinOp::Or, items, base),
        Expression::Not(e) => Some(JsExpr::Not(Box::new(go(e)?))),
        Expression::Eq(a, b) => bin(JsBinOp::Eq, a, b),
        Expression::Neq(a, b) => bin(JsBinOp::Neq, a, b),
        Expression::Lt(a, b) => bin(JsBinOp::Lt, a, b),
        Expression::Lte(a, b) => bin(JsBinOp::Lte, a, b),
        Expression::Gt(a, b) => bin(JsBinOp::Gt, a, b),
        Expression::Gte(a, b) => bin(JsBinOp::Gte, a, b),
        Expression::ToLower(e) => Some(JsExpr::Call {
            func: Box::new(go(e)?.access("toLowerCase")),
            args: vec![],
        }),
        Expression::ToUpper(e) => Some(JsExpr::Call {
            func: Box::new(go(e)?.access("toUpperCase")),
            args: vec![],
        }),
    }
}

fn fold_bin(op: JsBinOp, items: &[Expression], base: &str) -> Option<JsExpr> {
    let mut iter = items.iter();
    let first = expression_to_js(iter.next()?, base)?;
    iter.try_fold(first, |acc, item| {
        Some(JsExpr::binop(op, acc, expression_to_js(item, base)?))
    })
}

fn var_to_js(var: &DocVar, base: &str) -> JsExpr {
    let mut out = JsExpr::ident(base);
    if let Some(path) = &var.path {
        for leaf in path.leaves() {
            out = match leaf {
                Leaf::Name(name) => out.access(name.clone()),
                Leaf::Index(i) => JsExpr::Index {
                    obj: Box::new(out),
                    index: Box::new(JsExpr::Literal(Data::int(*i))),
                },
            };
        }
    }
    out
}

/// Extracts a rename map from a function whose body is an object literal
/// of pure field copies: keys mapping to the parameter itself or member
/// accesses off it. Any other body shape yields `None`.
#[must_use]
pub(crate) fn object_rename_map(func: &JsFn) -> Option<IndexMap<String, DocVar>> {
    let JsExpr::Obj(fields) = &func.body else {
        return None;
    };
    fields
        .iter()
        .map(|(key, value)| Some((key.clone(), copied_path(value, &func.param)?)))
        .collect()
}

fn copied_path(expr: &JsExpr, param: &str) -> Option<DocVar> {
    match expr {
        JsExpr::Ident(name) if name == param => Some(DocVar::root()),
        JsExpr::Access { obj, field } => {
            Some(copied_path(obj, param)?.descend(&[Leaf::name(field.clone())]))
        }
        _ => None,
    }
}
