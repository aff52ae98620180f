//! Pipeline expressions, reshapes, accumulators, and match selectors.
//!
//! These are the value-level building blocks of [`super::stage::Workflow`]
//! stages. A [`Reshape`] is the insertion-ordered field map of a `$project`
//! stage; insertion order is the observable serialization order.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{json, Map as JsonMap, Value as Json};

use mangrove_core::{Data, DocVar, FieldPath, Leaf};

/// An expression evaluated against the document stream of a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A field or scope reference.
    Var(DocVar),
    /// Keep the source value at this position of a reshape.
    Include,
    /// A literal value.
    Literal(Data),
    /// Addition.
    Add(Box<Expression>, Box<Expression>),
    /// Subtraction.
    Subtract(Box<Expression>, Box<Expression>),
    /// Multiplication.
    Multiply(Box<Expression>, Box<Expression>),
    /// Division.
    Divide(Box<Expression>, Box<Expression>),
    /// String concatenation.
    Concat(Vec<Expression>),
    /// Conditional.
    Cond(Box<Expression>, Box<Expression>, Box<Expression>),
    /// First non-null of two values.
    IfNull(Box<Expression>, Box<Expression>),
    /// Conjunction.
    And(Vec<Expression>),
    /// Disjunction.
    Or(Vec<Expression>),
    /// Negation.
    Not(Box<Expression>),
    /// Equality.
    Eq(Box<Expression>, Box<Expression>),
    /// Inequality.
    Neq(Box<Expression>, Box<Expression>),
    /// Less than.
    Lt(Box<Expression>, Box<Expression>),
    /// Less than or equal.
    Lte(Box<Expression>, Box<Expression>),
    /// Greater than.
    Gt(Box<Expression>, Box<Expression>),
    /// Greater than or equal.
    Gte(Box<Expression>, Box<Expression>),
    /// Lower-cases a string.
    ToLower(Box<Expression>),
    /// Upper-cases a string.
    ToUpper(Box<Expression>),
}

impl Expression {
    /// A reference to a top-level field of the root document.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::Var(DocVar::field(name))
    }

    /// A reference to a path below the root document.
    #[must_use]
    pub const fn var(var: DocVar) -> Self {
        Self::Var(var)
    }

    /// A literal expression.
    #[must_use]
    pub fn literal(data: impl Into<Data>) -> Self {
        Self::Literal(data.into())
    }

    /// Collects every variable referenced by the expression.
    #[must_use]
    pub fn vars(&self) -> Vec<DocVar> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<DocVar>) {
        match self {
            Self::Var(var) => out.push(var.clone()),
            Self::Include | Self::Literal(_) => {}
            Self::Add(a, b)
            | Self::Subtract(a, b)
            | Self::Multiply(a, b)
            | Self::Divide(a, b)
            | Self::IfNull(a, b)
            | Self::Eq(a, b)
            | Self::Neq(a, b)
            | Self::Lt(a, b)
            | Self::Lte(a, b)
            | Self::Gt(a, b)
            | Self::Gte(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Self::Cond(a, b, c) => {
                a.collect_vars(out);
                b.collect_vars(out);
                c.collect_vars(out);
            }
            Self::Concat(items) | Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.collect_vars(out);
                }
            }
            Self::Not(a) | Self::ToLower(a) | Self::ToUpper(a) => a.collect_vars(out),
        }
    }

    /// Rebuilds the expression with every `Var` replaced through `f`
    /// (a catamorphism). Returns `None` if any replacement fails.
    #[must_use]
    pub fn map_vars(
        &self,
        f: &mut dyn FnMut(&DocVar) -> Option<Expression>,
    ) -> Option<Expression> {
        fn both(
            a: &Expression,
            b: &Expression,
            f: &mut dyn FnMut(&DocVar) -> Option<Expression>,
        ) -> Option<(Box<Expression>, Box<Expression>)> {
            Some((Box::new(a.map_vars(f)?), Box::new(b.map_vars(f)?)))
        }
        Some(match self {
            Self::Var(var) => f(var)?,
            Self::Include => Self::Include,
            Self::Literal(d) => Self::Literal(d.clone()),
            Self::Add(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Add(a, b)
            }
            Self::Subtract(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Subtract(a, b)
            }
            Self::Multiply(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Multiply(a, b)
            }
            Self::Divide(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Divide(a, b)
            }
            Self::IfNull(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::IfNull(a, b)
            }
            Self::Eq(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Eq(a, b)
            }
            Self::Neq(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Neq(a, b)
            }
            Self::Lt(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Lt(a, b)
            }
            Self::Lte(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Lte(a, b)
            }
            Self::Gt(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Gt(a, b)
            }
            Self::Gte(a, b) => {
                let (a, b) = both(a, b, f)?;
                Self::Gte(a, b)
            }
            Self::Cond(a, b, c) => Self::Cond(
                Box::new(a.map_vars(f)?),
                Box::new(b.map_vars(f)?),
                Box::new(c.map_vars(f)?),
            ),
            Self::Concat(items) => Self::Concat(
                items.iter().map(|i| i.map_vars(f)).collect::<Option<Vec<_>>>()?,
            ),
            Self::And(items) => {
                Self::And(items.iter().map(|i| i.map_vars(f)).collect::<Option<Vec<_>>>()?)
            }
            Self::Or(items) => {
                Self::Or(items.iter().map(|i| i.map_vars(f)).collect::<Option<Vec<_>>>()?)
            }
            Self::Not(a) => Self::Not(Box::new(a.map_vars(f)?)),
            Self::ToLower(a) => Self::ToLower(Box::new(a.map_vars(f)?)),
            Self::ToUpper(a) => Self::ToUpper(Box::new(a.map_vars(f)?)),
        })
    }

    /// Constant simplification used by the stage coalescer.
    #[must_use]
    pub fn simplify(&self) -> Expression {
        match self {
            Self::Cond(test, then, otherwise) => {
                let test = test.simplify();
                match test {
                    Self::Literal(Data::Bool(true)) => then.simplify(),
                    Self::Literal(Data::Bool(false)) => otherwise.simplify(),
                    test => Self::Cond(
                        Box::new(test),
                        Box::new(then.simplify()),
                        Box::new(otherwise.simplify()),
                    ),
                }
            }
            Self::And(items) => {
                let mut simplified: Vec<_> = items
                    .iter()
                    .map(Expression::simplify)
                    .filter(|i| !matches!(i, Self::Literal(Data::Bool(true))))
                    .collect();
                if simplified.iter().any(|i| matches!(i, Self::Literal(Data::Bool(false)))) {
                    return Self::Literal(Data::Bool(false));
                }
                match simplified.len() {
                    0 => Self::Literal(Data::Bool(true)),
                    1 => match simplified.pop() {
                        Some(only) => only,
                        None => Self::Literal(Data::Bool(true)),
                    },
                    _ => Self::And(simplified),
                }
            }
            Self::Or(items) => {
                let mut simplified: Vec<_> = items
                    .iter()
                    .map(Expression::simplify)
                    .filter(|i| !matches!(i, Self::Literal(Data::Bool(false))))
                    .collect();
                if simplified.iter().any(|i| matches!(i, Self::Literal(Data::Bool(true)))) {
                    return Self::Literal(Data::Bool(true));
                }
                match simplified.len() {
                    0 => Self::Literal(Data::Bool(false)),
                    1 => match simplified.pop() {
                        Some(only) => only,
                        None => Self::Literal(Data::Bool(false)),
                    },
                    _ => Self::Or(simplified),
                }
            }
            other => other.clone(),
        }
    }

    /// The external JSON rendering.
    ///
    /// Literal strings beginning with `$` - at the top level or nested
    /// inside literal arrays and documents - are wrapped as
    /// `{"$literal": ...}` so they cannot be read as operators.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Var(var) => Json::String(var.render()),
            Self::Include => json!(true),
            Self::Literal(d) => literal_json(d),
            Self::Add(a, b) => json!({ "$add": [a.to_json(), b.to_json()] }),
            Self::Subtract(a, b) => json!({ "$subtract": [a.to_json(), b.to_json()] }),
            Self::Multiply(a, b) => json!({ "$multiply": [a.to_json(), b.to_json()] }),
            Self::Divide(a, b) => json!({ "$divide": [a.to_json(), b.to_json()] }),
            Self::Concat(items) => {
                json!({ "$concat": items.iter().map(Expression::to_json).collect::<Vec<_>>() })
            }
            Self::Cond(test, then, otherwise) => {
                json!({ "$cond": [test.to_json(), then.to_json(), otherwise.to_json()] })
            }
            Self::IfNull(a, b) => json!({ "$ifNull": [a.to_json(), b.to_json()] }),
            Self::And(items) => {
                json!({ "$and": items.iter().map(Expression::to_json).collect::<Vec<_>>() })
            }
            Self::Or(items) => {
                json!({ "$or": items.iter().map(Expression::to_json).collect::<Vec<_>>() })
            }
            Self::Not(a) => json!({ "$not": [a.to_json()] }),
            Self::Eq(a, b) => json!({ "$eq": [a.to_json(), b.to_json()] }),
            Self::Neq(a, b) => json!({ "$ne": [a.to_json(), b.to_json()] }),
            Self::Lt(a, b) => json!({ "$lt": [a.to_json(), b.to_json()] }),
            Self::Lte(a, b) => json!({ "$lte": [a.to_json(), b.to_json()] }),
            Self::Gt(a, b) => json!({ "$gt": [a.to_json(), b.to_json()] }),
            Self::Gte(a, b) => json!({ "$gte": [a.to_json(), b.to_json()] }),
            Self::ToLower(a) => json!({ "$toLower": a.to_json() }),
            Self::ToUpper(a) => json!({ "$toUpper": a.to_json() }),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Renders a literal, wrapping `$`-prefixed strings wherever they occur.
fn literal_json(d: &Data) -> Json {
    match d {
        Data::Str(s) if s.starts_with('$') => json!({ "$literal": s }),
        Data::Arr(items) => Json::Array(items.iter().map(literal_json).collect()),
        Data::Obj(fields) => Json::Object(
            fields.iter().map(|(k, v)| (k.clone(), literal_json(v))).collect(),
        ),
        other => other.to_json(),
    }
}

/// The value at one position of a [`Reshape`].
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeValue {
    /// A nested sub-document shape.
    Doc(Reshape),
    /// An expression computing the value.
    Expr(Expression),
}

impl ShapeValue {
    /// A plain field-rename value.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Expr(Expression::field(name))
    }

    /// A keep-the-source-value marker.
    #[must_use]
    pub const fn include() -> Self {
        Self::Expr(Expression::Include)
    }

    fn to_json(&self) -> Json {
        match self {
            Self::Doc(reshape) => reshape.to_json(),
            Self::Expr(e) => e.to_json(),
        }
    }
}

/// The insertion-ordered field map of a `$project` stage.
///
/// Keys are single leaves; nesting goes through [`ShapeValue::Doc`], so
/// keys are trivially pairwise prefix-free.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reshape {
    fields: IndexMap<Leaf, ShapeValue>,
}

impl Reshape {
    /// Creates an empty reshape.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, key: impl Into<Leaf>, value: ShapeValue) -> Self {
        self.set(key.into(), value);
        self
    }

    /// Inserts or replaces a field.
    pub fn set(&mut self, key: impl Into<Leaf>, value: ShapeValue) {
        self.fields.insert(key.into(), value);
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, key: &Leaf) -> Option<&ShapeValue> {
        self.fields.get(key)
    }

    /// Removes a field, preserving the order of the rest.
    pub fn remove(&mut self, key: &Leaf) -> Option<ShapeValue> {
        self.fields.shift_remove(key)
    }

    /// Keeps only the fields satisfying the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&Leaf, &ShapeValue) -> bool) {
        self.fields.retain(|k, v| keep(k, v));
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Leaf, &ShapeValue)> {
        self.fields.iter()
    }

    /// The field keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &Leaf> {
        self.fields.keys()
    }

    /// The number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the reshape has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Collects every upstream reference the reshape makes: expression
    /// variables, plus the source position of every `Include`.
    #[must_use]
    pub fn refs(&self) -> Vec<DocVar> {
        let mut out = Vec::new();
        self.collect_refs(&[], &mut out);
        out
    }

    fn collect_refs(&self, prefix: &[Leaf], out: &mut Vec<DocVar>) {
        for (key, value) in &self.fields {
            match value {
                ShapeValue::Doc(nested) => {
                    let mut path = prefix.to_vec();
                    path.push(key.clone());
                    nested.collect_refs(&path, out);
                }
                ShapeValue::Expr(Expression::Include) => {
                    let mut path = prefix.to_vec();
                    path.push(key.clone());
                    out.push(DocVar::root().descend(&path));
                }
                ShapeValue::Expr(e) => out.extend(e.vars()),
            }
        }
    }

    /// The external JSON rendering.
    #[must_use]
    pub fn to_json(&self) -> Json {
        Json::Object(self.to_json_map())
    }

    /// The external rendering as a bare document, for embedding in a
    /// stage document.
    #[must_use]
    pub fn to_json_map(&self) -> JsonMap<String, Json> {
        self.fields.iter().map(|(k, v)| (k.to_string(), v.to_json())).collect()
    }
}

impl FromIterator<(Leaf, ShapeValue)> for Reshape {
    fn from_iter<I: IntoIterator<Item = (Leaf, ShapeValue)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

/// Policy for retaining the document identifier across a `$project`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdHandling {
    /// Preserve the root `_id`.
    Include,
    /// Drop the root `_id`.
    Exclude,
    /// Inherit the upstream behavior.
    Ignore,
}

impl IdHandling {
    const fn rank(self) -> u8 {
        match self {
            Self::Include => 2,
            Self::Exclude => 1,
            Self::Ignore => 0,
        }
    }

    /// Composition under stage fusion: `Include` dominates `Exclude`
    /// dominates `Ignore`.
    #[must_use]
    pub const fn fuse(self, other: IdHandling) -> IdHandling {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

/// A grouping operator applied within a `$group` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Collects distinct values.
    AddToSet(Expression),
    /// Collects values in encounter order.
    Push(Expression),
    /// The first value per group.
    First(Expression),
    /// The last value per group.
    Last(Expression),
    /// The maximum value per group.
    Max(Expression),
    /// The minimum value per group.
    Min(Expression),
    /// The mean of the values per group.
    Avg(Expression),
    /// The sum of the values per group.
    Sum(Expression),
}

impl Accumulator {
    /// The accumulated expression.
    #[must_use]
    pub const fn expr(&self) -> &Expression {
        match self {
            Self::AddToSet(e)
            | Self::Push(e)
            | Self::First(e)
            | Self::Last(e)
            | Self::Max(e)
            | Self::Min(e)
            | Self::Avg(e)
            | Self::Sum(e) => e,
        }
    }

    /// The same accumulator over a different expression.
    #[must_use]
    pub fn with_expr(&self, e: Expression) -> Accumulator {
        match self {
            Self::AddToSet(_) => Self::AddToSet(e),
            Self::Push(_) => Self::Push(e),
            Self::First(_) => Self::First(e),
            Self::Last(_) => Self::Last(e),
            Self::Max(_) => Self::Max(e),
            Self::Min(_) => Self::Min(e),
            Self::Avg(_) => Self::Avg(e),
            Self::Sum(_) => Self::Sum(e),
        }
    }

    /// True for the accumulators that collect whole values; inlining
    /// upstream projections must resolve their argument to a plain field
    /// reference.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::AddToSet(_) | Self::Push(_))
    }

    /// The external operator name.
    #[must_use]
    pub const fn operator(&self) -> &'static str {
        match self {
            Self::AddToSet(_) => "$addToSet",
            Self::Push(_) => "$push",
            Self::First(_) => "$first",
            Self::Last(_) => "$last",
            Self::Max(_) => "$max",
            Self::Min(_) => "$min",
            Self::Avg(_) => "$avg",
            Self::Sum(_) => "$sum",
        }
    }

    /// The external JSON rendering.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut doc = JsonMap::new();
        doc.insert(self.operator().to_string(), self.expr().to_json());
        Json::Object(doc)
    }
}

/// The insertion-ordered accumulator map of a `$group` stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grouped {
    fields: IndexMap<String, Accumulator>,
}

impl Grouped {
    /// Creates an empty accumulator map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, acc: Accumulator) -> Self {
        self.fields.insert(name.into(), acc);
        self
    }

    /// Inserts or replaces an accumulator.
    pub fn set(&mut self, name: impl Into<String>, acc: Accumulator) {
        self.fields.insert(name.into(), acc);
    }

    /// Looks up an accumulator.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Accumulator> {
        self.fields.get(name)
    }

    /// True if the name is an accumulator output.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Keeps only the accumulators satisfying the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &Accumulator) -> bool) {
        self.fields.retain(|k, v| keep(k, v));
    }

    /// Iterates accumulators in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Accumulator)> {
        self.fields.iter()
    }

    /// The output names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// The number of accumulators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if there are no accumulators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every upstream reference the accumulators make.
    #[must_use]
    pub fn refs(&self) -> Vec<DocVar> {
        self.fields.values().flat_map(|acc| acc.expr().vars()).collect()
    }
}

impl FromIterator<(String, Accumulator)> for Grouped {
    fn from_iter<I: IntoIterator<Item = (String, Accumulator)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

/// The `_id` key of a `$group` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// A single expression key.
    Expr(Expression),
    /// A composite document key.
    Shape(Reshape),
}

impl GroupKey {
    /// Every upstream reference the key makes.
    #[must_use]
    pub fn refs(&self) -> Vec<DocVar> {
        match self {
            Self::Expr(e) => e.vars(),
            Self::Shape(r) => r.refs(),
        }
    }

    /// The external JSON rendering.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Expr(e) => e.to_json(),
            Self::Shape(r) => r.to_json(),
        }
    }
}

/// A single field condition inside a match selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value.
    Eq(Data),
    /// Field differs from the value.
    Neq(Data),
    /// Field is greater than the value.
    Gt(Data),
    /// Field is at least the value.
    Gte(Data),
    /// Field is less than the value.
    Lt(Data),
    /// Field is at most the value.
    Lte(Data),
    /// Field is one of the values.
    In(Vec<Data>),
    /// Field matches the regex.
    Regex(String),
    /// Field existence test.
    Exists(bool),
}

impl Condition {
    fn to_json(&self) -> Json {
        match self {
            Self::Eq(d) => d.to_json(),
            Self::Neq(d) => json!({ "$ne": d.to_json() }),
            Self::Gt(d) => json!({ "$gt": d.to_json() }),
            Self::Gte(d) => json!({ "$gte": d.to_json() }),
            Self::Lt(d) => json!({ "$lt": d.to_json() }),
            Self::Lte(d) => json!({ "$lte": d.to_json() }),
            Self::In(items) => {
                json!({ "$in": items.iter().map(Data::to_json).collect::<Vec<_>>() })
            }
            Self::Regex(source) => json!({ "$regex": source }),
            Self::Exists(yes) => json!({ "$exists": yes }),
        }
    }
}

/// The predicate document of a `$match` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// All clauses must hold.
    And(Vec<Selector>),
    /// Any clause may hold.
    Or(Vec<Selector>),
    /// Field conditions, in insertion order.
    Doc(IndexMap<FieldPath, Condition>),
}

impl Selector {
    /// A selector over field/condition pairs.
    #[must_use]
    pub fn doc(pairs: impl IntoIterator<Item = (FieldPath, Condition)>) -> Self {
        Self::Doc(pairs.into_iter().collect())
    }

    /// A single-field equality selector.
    #[must_use]
    pub fn eq(path: FieldPath, value: impl Into<Data>) -> Self {
        Self::doc([(path, Condition::Eq(value.into()))])
    }

    /// Conjunction, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Selector) -> Selector {
        let mut clauses = match self {
            Self::And(cs) => cs,
            s => vec![s],
        };
        match other {
            Self::And(cs) => clauses.extend(cs),
            s => clauses.push(s),
        }
        Self::And(clauses)
    }

    /// Every field path the selector references.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldPath> {
        match self {
            Self::And(cs) | Self::Or(cs) => cs.iter().flat_map(Selector::fields).collect(),
            Self::Doc(fields) => fields.keys().cloned().collect(),
        }
    }

    /// Rebuilds the selector with every field path replaced through `f`.
    /// Returns `None` if any replacement fails.
    #[must_use]
    pub fn map_fields(
        &self,
        f: &mut impl FnMut(&FieldPath) -> Option<FieldPath>,
    ) -> Option<Selector> {
        Some(match self {
            Self::And(cs) => {
                Self::And(cs.iter().map(|c| c.map_fields(f)).collect::<Option<Vec<_>>>()?)
            }
            Self::Or(cs) => {
                Self::Or(cs.iter().map(|c| c.map_fields(f)).collect::<Option<Vec<_>>>()?)
            }
            Self::Doc(fields) => Self::Doc(
                fields
                    .iter()
                    .map(|(path, cond)| Some((f(path)?, cond.clone())))
                    .collect::<Option<IndexMap<_, _>>>()?,
            ),
        })
    }

    /// The external JSON rendering.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::And(cs) => {
                json!({ "$and": cs.iter().map(Selector::to_json).collect::<Vec<_>>() })
            }
            Self::Or(cs) => {
                json!({ "$or": cs.iter().map(Selector::to_json).collect::<Vec<_>>() })
            }
            Self::Doc(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(path, cond)| (path.to_string(), cond.to_json()))
                    .collect::<JsonMap<String, Json>>(),
            ),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// A sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDir {
    /// The external rendering (`1` / `-1`).
    #[must_use]
    pub const fn to_json(self) -> i8 {
        match self {
            Self::Asc => 1,
            Self::Desc => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_literals_are_escaped() {
        let e = Expression::literal("$city");
        assert_eq!(e.to_json(), json!({ "$literal": "$city" }));

        // Nested occurrences wrap too.
        let nested = Expression::Literal(Data::Arr(vec![
            Data::str("plain"),
            Data::str("$dotted"),
            Data::obj([("k".to_string(), Data::str("$v"))]),
        ]));
        assert_eq!(
            nested.to_json(),
            json!(["plain", { "$literal": "$dotted" }, { "k": { "$literal": "$v" } }])
        );
    }

    #[test]
    fn expression_rendering() {
        let e = Expression::Add(
            Box::new(Expression::field("pop")),
            Box::new(Expression::literal(1i64)),
        );
        assert_eq!(e.to_json(), json!({ "$add": ["$pop", 1] }));
    }

    #[test]
    fn map_vars_fails_atomically() {
        let e = Expression::Add(
            Box::new(Expression::field("a")),
            Box::new(Expression::field("b")),
        );
        // Replacing only `a` fails the whole rewrite.
        let out = e.map_vars(&mut |var| {
            (var == &DocVar::field("a")).then(|| Expression::literal(1i64))
        });
        assert_eq!(out, None);

        let out = e.map_vars(&mut |_| Some(Expression::literal(1i64))).unwrap();
        assert_eq!(
            out,
            Expression::Add(
                Box::new(Expression::literal(1i64)),
                Box::new(Expression::literal(1i64)),
            )
        );
    }

    #[test]
    fn reshape_preserves_insertion_order() {
        let shape = Reshape::new()
            .with("b", ShapeValue::var("x"))
            .with("a", ShapeValue::include());
        let keys: Vec<String> = shape.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(shape.to_json(), json!({ "b": "$x", "a": true }));
    }

    #[test]
    fn reshape_refs_track_include_positions() {
        let shape = Reshape::new()
            .with("a", ShapeValue::include())
            .with(
                "n",
                ShapeValue::Doc(Reshape::new().with("inner", ShapeValue::include())),
            )
            .with("r", ShapeValue::var("x"));
        let refs = shape.refs();
        assert!(refs.contains(&DocVar::field("a")));
        assert!(refs.contains(&DocVar::root_at(FieldPath::dotted("n.inner").unwrap())));
        assert!(refs.contains(&DocVar::field("x")));
    }

    #[test]
    fn id_handling_dominance() {
        use IdHandling::{Exclude, Ignore, Include};
        assert_eq!(Include.fuse(Exclude), Include);
        assert_eq!(Exclude.fuse(Include), Include);
        assert_eq!(Exclude.fuse(Ignore), Exclude);
        assert_eq!(Ignore.fuse(Ignore), Ignore);
    }

    #[test]
    fn selector_and_flattens() {
        let a = Selector::eq(FieldPath::name("x"), 1i64);
        let b = Selector::eq(FieldPath::name("y"), 2i64);
        let c = Selector::eq(FieldPath::name("z"), 3i64);
        let combined = a.and(b).and(c);
        match &combined {
            Selector::And(clauses) => assert_eq!(clauses.len(), 3),
            other => panic!("expected a flat and, got {other}"),
        }
    }

    #[test]
    fn selector_field_rewrite() {
        let sel = Selector::eq(FieldPath::name("a"), 1i64);
        let rewritten = sel
            .map_fields(&mut |path| {
                (path == &FieldPath::name("a")).then(|| FieldPath::name("x"))
            })
            .unwrap();
        assert_eq!(rewritten.to_json(), json!({ "x": 1 }));

        assert_eq!(sel.map_fields(&mut |_| None), None);
    }

    #[test]
    fn simplify_boolean_shortcuts() {
        let t = Expression::literal(true);
        let x = Expression::field("x");
        assert_eq!(Expression::And(vec![t.clone(), x.clone()]).simplify(), x);
        assert_eq!(
            Expression::Cond(
                Box::new(Expression::literal(false)),
                Box::new(Expression::field("a")),
                Box::new(Expression::field("b")),
            )
            .simplify(),
            Expression::field("b")
        );
    }
}
