//! The function catalog.
//!
//! Every [`LogicalPlan::Invoke`] names a [`Function`] from this catalog.
//! Each function carries an arity, a declared domain and codomain, and
//! three partial operations:
//!
//! - a **simplifier** rewriting invocations with known arguments
//!   (`AND(true, x)` → `x`, `x + 0` → `x`),
//! - a **typer** computing a result type from argument types, folding to a
//!   [`Type::Const`] when the arguments are constants,
//! - an **untyper** inferring required argument types from an expected
//!   result type.

// Allow the long per-function match arms
#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]

use std::fmt;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use regex::Regex;

use mangrove_core::{typecheck, Data, Type, TypeError};

use crate::error::{SemanticError, SemanticResult};

use super::node::LogicalPlan;

/// How many arguments a function takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments.
    Fixed(usize),
    /// At least this many arguments.
    Variadic(usize),
}

impl Arity {
    /// True if an invocation with `n` arguments is well-formed.
    #[must_use]
    pub const fn accepts(self, n: usize) -> bool {
        match self {
            Self::Fixed(k) => n == k,
            Self::Variadic(min) => n >= min,
        }
    }
}

/// A named operator in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    // ========== Relational comparison ==========
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
    /// Range containment: `between(x, lo, hi)`.
    Between,

    // ========== Boolean ==========
    /// Conjunction.
    And,
    /// Disjunction.
    Or,
    /// Negation.
    Not,
    /// Conditional: `cond(test, then, else)`.
    Cond,
    /// First non-null of two values.
    Coalesce,
    /// Null test.
    IsNull,
    /// A constant projected over every row of a table:
    /// `constantly(value, table)`.
    Constantly,

    // ========== Arithmetic ==========
    /// Addition; a timestamp plus an interval is a timestamp.
    Add,
    /// Subtraction; two timestamps subtract to an interval.
    Subtract,
    /// Multiplication; an interval times an integer is an interval.
    Multiply,
    /// Division; division by a constant zero is rejected at type-check
    /// time.
    Divide,
    /// Remainder; the same zero rule as division applies.
    Modulo,
    /// Arithmetic negation.
    Negate,

    // ========== Temporal ==========
    /// Parses a `YYYY-MM-DD` date literal.
    Date,
    /// Parses an `HH:MM:SS[.sss]` time literal.
    Time,
    /// Parses an ISO-8601 UTC instant literal.
    Timestamp,
    /// Parses an ISO-8601 duration literal.
    Interval,
    /// Extracts a named field (year, month, ...) from a temporal value.
    Extract,
    /// The time-of-day part of a timestamp.
    TimeOfDay,
    /// Converts epoch milliseconds to a timestamp.
    ToTimestamp,

    // ========== String ==========
    /// String concatenation.
    Concat,
    /// Regular-expression search: `search(str, pattern)`.
    Search,

    // ========== Structural ==========
    /// A one-field object: `make_object(key, value)`.
    MakeObject,
    /// A one-element array.
    MakeArray,
    /// Merges two objects; the right side wins on duplicate fields.
    ObjectConcat,
    /// Concatenates two arrays.
    ArrayConcat,
    /// Projects a field out of an object.
    ObjectProject,
    /// Removes a field from an object.
    DeleteField,
    /// Merges any number of objects onto one level.
    Splice,

    // ========== Sets and relations ==========
    /// Keeps the rows satisfying a predicate.
    Filter,
    /// Groups rows by a key array.
    GroupBy,
    /// Orders rows by key and order-token arrays.
    OrderBy,
    /// Removes duplicate rows.
    Distinct,
    /// Removes rows duplicated under a key.
    DistinctBy,
    /// Keeps the first n rows.
    Take,
    /// Skips the first n rows.
    Drop,
    /// Flattens the nested join shape onto a single level.
    Squash,

    // ========== Joins ==========
    /// Inner join: `inner_join(left, right, clause)`.
    InnerJoin,
    /// Left outer join.
    LeftOuterJoin,
    /// Right outer join.
    RightOuterJoin,
    /// Full outer join.
    FullOuterJoin,

    // ========== Aggregation ==========
    /// Row count.
    Count,
    /// Sum of a numeric column.
    Sum,
    /// Average of a numeric column.
    Avg,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Any one of the grouped values.
    Arbitrary,
}

impl Function {
    /// Wraps this function around arguments as an invocation plan.
    #[must_use]
    pub fn of(self, args: Vec<LogicalPlan>) -> LogicalPlan {
        LogicalPlan::Invoke { func: self, args }
    }

    /// The stable catalog name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Between => "between",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Cond => "cond",
            Self::Coalesce => "coalesce",
            Self::IsNull => "is_null",
            Self::Constantly => "constantly",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Modulo => "modulo",
            Self::Negate => "negate",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Interval => "interval",
            Self::Extract => "extract",
            Self::TimeOfDay => "time_of_day",
            Self::ToTimestamp => "to_timestamp",
            Self::Concat => "concat",
            Self::Search => "search",
            Self::MakeObject => "make_object",
            Self::MakeArray => "make_array",
            Self::ObjectConcat => "object_concat",
            Self::ArrayConcat => "array_concat",
            Self::ObjectProject => "object_project",
            Self::DeleteField => "delete_field",
            Self::Splice => "splice",
            Self::Filter => "filter",
            Self::GroupBy => "group_by",
            Self::OrderBy => "order_by",
            Self::Distinct => "distinct",
            Self::DistinctBy => "distinct_by",
            Self::Take => "take",
            Self::Drop => "drop",
            Self::Squash => "squash",
            Self::InnerJoin => "inner_join",
            Self::LeftOuterJoin => "left_outer_join",
            Self::RightOuterJoin => "right_outer_join",
            Self::FullOuterJoin => "full_outer_join",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Arbitrary => "arbitrary",
        }
    }

    /// Resolves a function by its SQL-surface name, case-insensitively.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        let lowered = name.to_ascii_lowercase();
        let func = match lowered.as_str() {
            "eq" => Self::Eq,
            "neq" => Self::Neq,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "between" => Self::Between,
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "cond" => Self::Cond,
            "coalesce" => Self::Coalesce,
            "is_null" | "isnull" => Self::IsNull,
            "constantly" => Self::Constantly,
            "add" => Self::Add,
            "subtract" => Self::Subtract,
            "multiply" => Self::Multiply,
            "divide" => Self::Divide,
            "modulo" | "mod" => Self::Modulo,
            "negate" => Self::Negate,
            "date" => Self::Date,
            "time" => Self::Time,
            "timestamp" => Self::Timestamp,
            "interval" => Self::Interval,
            "extract" => Self::Extract,
            "time_of_day" | "timeofday" => Self::TimeOfDay,
            "to_timestamp" | "totimestamp" => Self::ToTimestamp,
            "concat" => Self::Concat,
            "search" => Self::Search,
            "make_object" => Self::MakeObject,
            "make_array" => Self::MakeArray,
            "object_concat" => Self::ObjectConcat,
            "array_concat" => Self::ArrayConcat,
            "object_project" => Self::ObjectProject,
            "delete_field" => Self::DeleteField,
            "splice" => Self::Splice,
            "filter" => Self::Filter,
            "group_by" => Self::GroupBy,
            "order_by" => Self::OrderBy,
            "distinct" => Self::Distinct,
            "distinct_by" => Self::DistinctBy,
            "take" => Self::Take,
            "drop" => Self::Drop,
            "squash" => Self::Squash,
            "inner_join" => Self::InnerJoin,
            "left_outer_join" => Self::LeftOuterJoin,
            "right_outer_join" => Self::RightOuterJoin,
            "full_outer_join" => Self::FullOuterJoin,
            "count" => Self::Count,
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "arbitrary" => Self::Arbitrary,
            _ => return None,
        };
        Some(func)
    }

    /// A one-line description for diagnostics.
    #[must_use]
    pub const fn help(self) -> &'static str {
        match self {
            Self::Eq | Self::Neq | Self::Lt | Self::Lte | Self::Gt | Self::Gte => {
                "compares two values"
            }
            Self::Between => "tests whether a value lies in a closed range",
            Self::And | Self::Or | Self::Not => "combines boolean values",
            Self::Cond => "chooses between two values by a condition",
            Self::Coalesce => "returns the first non-null of two values",
            Self::IsNull => "tests a value for null",
            Self::Constantly => "projects a constant over every row of a table",
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulo => {
                "numeric or temporal arithmetic"
            }
            Self::Negate => "negates a number",
            Self::Date | Self::Time | Self::Timestamp | Self::Interval => {
                "parses a temporal literal"
            }
            Self::Extract => "extracts a named field from a temporal value",
            Self::TimeOfDay => "the time-of-day part of a timestamp",
            Self::ToTimestamp => "converts epoch milliseconds to a timestamp",
            Self::Concat => "concatenates two strings",
            Self::Search => "matches a string against a regular expression",
            Self::MakeObject => "builds a one-field object",
            Self::MakeArray => "builds a one-element array",
            Self::ObjectConcat | Self::Splice => "merges objects",
            Self::ArrayConcat => "concatenates arrays",
            Self::ObjectProject => "projects a field out of an object",
            Self::DeleteField => "removes a field from an object",
            Self::Filter => "keeps the rows satisfying a predicate",
            Self::GroupBy => "groups rows by a key array",
            Self::OrderBy => "orders rows",
            Self::Distinct | Self::DistinctBy => "removes duplicate rows",
            Self::Take => "keeps the first n rows",
            Self::Drop => "skips the first n rows",
            Self::Squash => "flattens the nested join shape",
            Self::InnerJoin
            | Self::LeftOuterJoin
            | Self::RightOuterJoin
            | Self::FullOuterJoin => "joins two relations",
            Self::Count | Self::Sum | Self::Avg | Self::Min | Self::Max | Self::Arbitrary => {
                "aggregates grouped values"
            }
        }
    }

    /// The number of arguments this function takes.
    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::Not
            | Self::IsNull
            | Self::Negate
            | Self::Date
            | Self::Time
            | Self::Timestamp
            | Self::Interval
            | Self::TimeOfDay
            | Self::ToTimestamp
            | Self::MakeArray
            | Self::Distinct
            | Self::Squash
            | Self::Count
            | Self::Sum
            | Self::Avg
            | Self::Min
            | Self::Max
            | Self::Arbitrary => Arity::Fixed(1),
            Self::Between | Self::Cond | Self::OrderBy => Arity::Fixed(3),
            Self::InnerJoin
            | Self::LeftOuterJoin
            | Self::RightOuterJoin
            | Self::FullOuterJoin => Arity::Fixed(3),
            Self::Splice => Arity::Variadic(1),
            _ => Arity::Fixed(2),
        }
    }

    /// The declared argument types.
    #[must_use]
    pub fn domain(self) -> Vec<Type> {
        let num_or_temporal = Type::union(Type::numeric(), Type::temporal());
        match self {
            Self::Eq | Self::Neq | Self::Lt | Self::Lte | Self::Gt | Self::Gte => {
                vec![Type::Top, Type::Top]
            }
            Self::Between => vec![Type::Top, Type::Top, Type::Top],
            Self::And | Self::Or => vec![Type::Bool, Type::Bool],
            Self::Not => vec![Type::Bool],
            Self::Cond => vec![Type::Bool, Type::Top, Type::Top],
            Self::Coalesce => vec![Type::Top, Type::Top],
            Self::IsNull => vec![Type::Top],
            Self::Constantly => vec![Type::Top, Type::Top],
            Self::Add | Self::Subtract | Self::Multiply => {
                vec![num_or_temporal.clone(), num_or_temporal]
            }
            Self::Divide | Self::Modulo => vec![Type::numeric(), Type::numeric()],
            Self::Negate => vec![Type::numeric()],
            Self::Date | Self::Time | Self::Timestamp | Self::Interval => vec![Type::Str],
            Self::Extract => vec![Type::Str, Type::temporal()],
            Self::TimeOfDay => vec![Type::Timestamp],
            Self::ToTimestamp => vec![Type::Int],
            Self::Concat => vec![Type::Str, Type::Str],
            Self::Search => vec![Type::Str, Type::Str],
            Self::MakeObject => vec![Type::Str, Type::Top],
            Self::MakeArray => vec![Type::Top],
            Self::ObjectConcat | Self::DeleteField => vec![Type::Top, Type::Top],
            Self::ArrayConcat => vec![Type::Top, Type::Top],
            Self::ObjectProject => vec![Type::Top, Type::Str],
            Self::Splice => vec![Type::Top],
            Self::Filter => vec![Type::Top, Type::Bool],
            Self::GroupBy | Self::DistinctBy => vec![Type::Top, Type::Top],
            Self::OrderBy => vec![Type::Top, Type::Top, Type::Top],
            Self::Distinct | Self::Squash => vec![Type::Top],
            Self::Take | Self::Drop => vec![Type::Top, Type::Int],
            Self::InnerJoin
            | Self::LeftOuterJoin
            | Self::RightOuterJoin
            | Self::FullOuterJoin => vec![Type::Top, Type::Top, Type::Bool],
            Self::Count | Self::Min | Self::Max | Self::Arbitrary => vec![Type::Top],
            Self::Sum | Self::Avg => vec![Type::numeric()],
        }
    }

    /// The declared result type, before any typer refinement.
    #[must_use]
    pub fn codomain(self) -> Type {
        match self {
            Self::Eq
            | Self::Neq
            | Self::Lt
            | Self::Lte
            | Self::Gt
            | Self::Gte
            | Self::Between
            | Self::And
            | Self::Or
            | Self::Not
            | Self::IsNull
            | Self::Search => Type::Bool,
            Self::Add | Self::Subtract | Self::Multiply => {
                Type::union(Type::numeric(), Type::temporal())
            }
            Self::Divide | Self::Modulo | Self::Negate | Self::Sum => Type::numeric(),
            Self::Date => Type::Date,
            Self::Time => Type::Time,
            Self::Timestamp | Self::ToTimestamp => Type::Timestamp,
            Self::Interval => Type::Interval,
            Self::Extract | Self::Avg => Type::Dec,
            Self::TimeOfDay => Type::Time,
            Self::Concat => Type::Str,
            Self::MakeObject
            | Self::ObjectConcat
            | Self::DeleteField
            | Self::Splice
            | Self::InnerJoin
            | Self::LeftOuterJoin
            | Self::RightOuterJoin
            | Self::FullOuterJoin => Type::obj_open([], Type::Top),
            Self::Count => Type::Int,
            _ => Type::Top,
        }
    }

    /// True for the aggregation operators used under grouping.
    #[must_use]
    pub const fn is_aggregation(self) -> bool {
        matches!(
            self,
            Self::Count | Self::Sum | Self::Avg | Self::Min | Self::Max | Self::Arbitrary
        )
    }

    /// True for the join operators.
    #[must_use]
    pub const fn is_join(self) -> bool {
        matches!(
            self,
            Self::InnerJoin | Self::LeftOuterJoin | Self::RightOuterJoin | Self::FullOuterJoin
        )
    }

    /// Rewrites an invocation with known arguments to a simpler plan.
    ///
    /// Returns `None` when no rule applies. Every rule strictly shrinks the
    /// tree.
    #[must_use]
    pub fn simplify(self, args: &[LogicalPlan]) -> Option<LogicalPlan> {
        use LogicalPlan::{Constant, Invoke};

        let const_bool = |plan: &LogicalPlan| match plan {
            Constant(Data::Bool(b)) => Some(*b),
            _ => None,
        };

        match self {
            Self::And => {
                if args.iter().any(|a| const_bool(a) == Some(false)) {
                    return Some(Constant(Data::Bool(false)));
                }
                let mut kept: Vec<_> =
                    args.iter().filter(|a| const_bool(a) != Some(true)).cloned().collect();
                match kept.len() {
                    n if n == args.len() => None,
                    0 => Some(Constant(Data::Bool(true))),
                    1 => kept.pop(),
                    _ => Some(Self::And.of(kept)),
                }
            }
            Self::Or => {
                if args.iter().any(|a| const_bool(a) == Some(true)) {
                    return Some(Constant(Data::Bool(true)));
                }
                let mut kept: Vec<_> =
                    args.iter().filter(|a| const_bool(a) != Some(false)).cloned().collect();
                match kept.len() {
                    n if n == args.len() => None,
                    0 => Some(Constant(Data::Bool(false))),
                    1 => kept.pop(),
                    _ => Some(Self::Or.of(kept)),
                }
            }
            Self::Not => match &args[0] {
                Constant(Data::Bool(b)) => Some(Constant(Data::Bool(!b))),
                Invoke { func: Self::Not, args: inner } => Some(inner[0].clone()),
                _ => None,
            },
            Self::Cond => match const_bool(&args[0]) {
                Some(true) => Some(args[1].clone()),
                Some(false) => Some(args[2].clone()),
                None => None,
            },
            Self::Coalesce => match (&args[0], &args[1]) {
                (Constant(Data::Null), other) => Some(other.clone()),
                (Constant(d), _) => Some(Constant(d.clone())),
                (first, Constant(Data::Null)) => Some(first.clone()),
                _ => None,
            },
            Self::Add => match (&args[0], &args[1]) {
                (Constant(z), other) | (other, Constant(z)) if is_zero(z) => Some(other.clone()),
                _ => None,
            },
            Self::Subtract => match &args[1] {
                Constant(z) if is_zero(z) => Some(args[0].clone()),
                _ => None,
            },
            Self::Multiply => match (&args[0], &args[1]) {
                (Constant(one), other) | (other, Constant(one)) if is_one(one) => {
                    Some(other.clone())
                }
                _ => None,
            },
            Self::Divide => match &args[1] {
                Constant(one) if is_one(one) => Some(args[0].clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// The partial typer: computes a result type from argument types.
    ///
    /// Folds to a constant type when the arguments are constants; otherwise
    /// refines the declared codomain where the argument types allow it.
    pub fn type_of(self, args: &[Type]) -> SemanticResult<Type> {
        if !self.arity().accepts(args.len()) {
            return Err(SemanticError::generic(format!(
                "{} expects {} argument(s), got {}",
                self.name(),
                match self.arity() {
                    Arity::Fixed(k) => k.to_string(),
                    Arity::Variadic(min) => format!("at least {min}"),
                },
                args.len()
            )));
        }

        match self {
            Self::Eq | Self::Neq => {
                if let (Some(a), Some(b)) = (args[0].as_const(), args[1].as_const()) {
                    let equal = a == b;
                    return Ok(Type::Const(Data::Bool(if self == Self::Eq {
                        equal
                    } else {
                        !equal
                    })));
                }
                Ok(Type::Bool)
            }
            Self::Lt | Self::Lte | Self::Gt | Self::Gte => {
                if let (Some(a), Some(b)) = (args[0].as_const(), args[1].as_const()) {
                    let ord = a.try_cmp(b).ok_or_else(|| {
                        TypeError::new(
                            args[0].widen(),
                            args[1].widen(),
                            Some("incomparable values".to_string()),
                        )
                    })?;
                    let holds = match self {
                        Self::Lt => ord.is_lt(),
                        Self::Lte => ord.is_le(),
                        Self::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    };
                    return Ok(Type::Const(Data::Bool(holds)));
                }
                Ok(Type::Bool)
            }
            Self::Between => {
                if let (Some(x), Some(lo), Some(hi)) =
                    (args[0].as_const(), args[1].as_const(), args[2].as_const())
                {
                    if let (Some(a), Some(b)) = (lo.try_cmp(x), x.try_cmp(hi)) {
                        return Ok(Type::Const(Data::Bool(a.is_le() && b.is_le())));
                    }
                }
                Ok(Type::Bool)
            }
            Self::And | Self::Or => {
                for arg in args {
                    check(arg, &Type::Bool)?;
                }
                let bools: Option<Vec<bool>> =
                    args.iter().map(|t| t.as_const().and_then(Data::as_bool)).collect();
                Ok(match bools {
                    Some(bs) if self == Self::And => Type::Const(Data::Bool(bs.iter().all(|b| *b))),
                    Some(bs) => Type::Const(Data::Bool(bs.iter().any(|b| *b))),
                    None => Type::Bool,
                })
            }
            Self::Not => {
                check(&args[0], &Type::Bool)?;
                Ok(match args[0].as_const().and_then(Data::as_bool) {
                    Some(b) => Type::Const(Data::Bool(!b)),
                    None => Type::Bool,
                })
            }
            Self::Cond => {
                check(&args[0], &Type::Bool)?;
                Ok(match args[0].as_const().and_then(Data::as_bool) {
                    Some(true) => args[1].clone(),
                    Some(false) => args[2].clone(),
                    None => args[1].lub(&args[2]),
                })
            }
            Self::Coalesce => Ok(match args[0].as_const() {
                Some(Data::Null) => args[1].clone(),
                Some(_) => args[0].clone(),
                None => args[0].lub(&args[1]),
            }),
            Self::IsNull => Ok(match args[0].as_const() {
                Some(d) => Type::Const(Data::Bool(d.is_null())),
                None => Type::Bool,
            }),
            Self::Constantly => Ok(args[0].clone()),

            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulo => {
                self.type_arith(args)
            }
            Self::Negate => {
                check(&args[0], &Type::numeric())?;
                match args[0].as_const() {
                    Some(Data::Int(i)) => Ok(Type::Const(Data::Int(-i.clone()))),
                    Some(Data::Dec(d)) => Ok(Type::Const(Data::Dec(-d.clone()))),
                    _ => Ok(args[0].widen()),
                }
            }

            Self::Date => self.type_temporal_parse(args, Data::date_from_iso, Type::Date),
            Self::Time => self.type_temporal_parse(args, Data::time_from_iso, Type::Time),
            Self::Timestamp => {
                self.type_temporal_parse(args, Data::timestamp_from_iso, Type::Timestamp)
            }
            Self::Interval => {
                self.type_temporal_parse(args, Data::interval_from_iso, Type::Interval)
            }
            Self::Extract => {
                check(&args[0], &Type::Str)?;
                check(&args[1], &Type::temporal())?;
                Ok(Type::Dec)
            }
            Self::TimeOfDay => {
                check(&args[0], &Type::Timestamp)?;
                Ok(match args[0].as_const() {
                    Some(Data::Timestamp(t)) => Type::Const(Data::Time(t.time())),
                    _ => Type::Time,
                })
            }
            Self::ToTimestamp => {
                check(&args[0], &Type::Int)?;
                match args[0].as_const() {
                    Some(Data::Int(i)) => {
                        let ms = i64::try_from(i).map_err(|_| {
                            SemanticError::generic("epoch milliseconds out of range")
                        })?;
                        let data = Data::timestamp_millis(ms).ok_or_else(|| {
                            SemanticError::generic("epoch milliseconds out of range")
                        })?;
                        Ok(Type::Const(data))
                    }
                    _ => Ok(Type::Timestamp),
                }
            }

            Self::Concat => {
                check(&args[0], &Type::Str)?;
                check(&args[1], &Type::Str)?;
                match (args[0].as_const(), args[1].as_const()) {
                    (Some(Data::Str(a)), Some(Data::Str(b))) => {
                        Ok(Type::Const(Data::Str(format!("{a}{b}"))))
                    }
                    _ => Ok(Type::Str),
                }
            }
            Self::Search => {
                check(&args[0], &Type::Str)?;
                check(&args[1], &Type::Str)?;
                match (args[0].as_const(), args[1].as_const()) {
                    (Some(Data::Str(s)), Some(Data::Str(pattern))) => {
                        let regex = Regex::new(pattern).map_err(|e| {
                            SemanticError::generic(format!("invalid regex {pattern:?}: {e}"))
                        })?;
                        Ok(Type::Const(Data::Bool(regex.is_match(s))))
                    }
                    _ => Ok(Type::Bool),
                }
            }

            Self::MakeObject => {
                check(&args[0], &Type::Str)?;
                match (args[0].as_const(), args[1].as_const()) {
                    (Some(Data::Str(k)), Some(v)) => Ok(Type::Const(Data::obj([(
                        k.clone(),
                        v.clone(),
                    )]))),
                    (Some(Data::Str(k)), None) => Ok(Type::obj([(k.clone(), args[1].clone())])),
                    _ => Ok(Type::obj_open([], args[1].clone())),
                }
            }
            Self::MakeArray => Ok(match args[0].as_const() {
                Some(d) => Type::Const(Data::Arr(vec![d.clone()])),
                None => Type::Arr(vec![args[0].clone()]),
            }),
            Self::ObjectConcat => Ok(merge_objects(&args[0], &args[1])),
            Self::ArrayConcat => Ok(concat_arrays(&args[0], &args[1])),
            Self::ObjectProject => self.type_object_project(args),
            Self::DeleteField => self.type_delete_field(args),
            Self::Splice => {
                let mut acc = args[0].clone();
                for arg in &args[1..] {
                    acc = merge_objects(&acc, arg);
                }
                Ok(acc)
            }

            Self::Filter => {
                check(&args[1], &Type::Bool)?;
                Ok(args[0].clone())
            }
            Self::GroupBy | Self::DistinctBy => Ok(args[0].clone()),
            Self::OrderBy => Ok(args[0].clone()),
            Self::Distinct | Self::Squash => Ok(args[0].clone()),
            Self::Take | Self::Drop => {
                check(&args[1], &Type::Int)?;
                Ok(args[0].clone())
            }

            Self::InnerJoin
            | Self::LeftOuterJoin
            | Self::RightOuterJoin
            | Self::FullOuterJoin => {
                check(&args[2], &Type::Bool)?;
                Ok(Type::obj([
                    ("left".to_string(), args[0].clone()),
                    ("right".to_string(), args[1].clone()),
                ]))
            }

            Self::Count => Ok(Type::Int),
            Self::Sum => {
                check(&args[0], &Type::numeric())?;
                Ok(args[0].widen())
            }
            Self::Avg => {
                check(&args[0], &Type::numeric())?;
                Ok(Type::Dec)
            }
            Self::Min | Self::Max => Ok(args[0].widen()),
            Self::Arbitrary => Ok(args[0].clone()),
        }
    }

    /// The untyper: infers required argument types from an expected result.
    pub fn untype(self, expected: &Type) -> SemanticResult<Vec<Type>> {
        match self {
            Self::Add => match expected.widen() {
                Type::Timestamp => Ok(vec![Type::Timestamp, Type::Interval]),
                Type::Interval => Ok(vec![Type::Interval, Type::Interval]),
                Type::Int => Ok(vec![Type::Int, Type::Int]),
                Type::Dec => Ok(vec![Type::numeric(), Type::numeric()]),
                _ => self.untype_default(expected),
            },
            Self::Subtract => match expected.widen() {
                Type::Timestamp => Ok(vec![Type::Timestamp, Type::Interval]),
                Type::Interval => {
                    let side = Type::union(Type::Timestamp, Type::Interval);
                    Ok(vec![side.clone(), side])
                }
                Type::Int => Ok(vec![Type::Int, Type::Int]),
                Type::Dec => Ok(vec![Type::numeric(), Type::numeric()]),
                _ => self.untype_default(expected),
            },
            Self::Multiply => match expected.widen() {
                Type::Interval => {
                    let side = Type::union(Type::Interval, Type::Int);
                    Ok(vec![side.clone(), side])
                }
                Type::Int => Ok(vec![Type::Int, Type::Int]),
                Type::Dec => Ok(vec![Type::numeric(), Type::numeric()]),
                _ => self.untype_default(expected),
            },
            Self::Negate => match expected.widen() {
                t @ (Type::Int | Type::Dec) => Ok(vec![t]),
                _ => self.untype_default(expected),
            },
            Self::Cond => Ok(vec![Type::Bool, expected.clone(), expected.clone()]),
            Self::Coalesce => Ok(vec![expected.clone(), expected.clone()]),
            Self::Constantly => Ok(vec![expected.clone(), Type::Top]),
            Self::Min | Self::Max | Self::Arbitrary => Ok(vec![expected.clone()]),
            Self::Sum => match expected.widen() {
                t @ (Type::Int | Type::Dec) => Ok(vec![t]),
                _ => self.untype_default(expected),
            },
            Self::MakeArray => match expected {
                Type::Arr(es) if es.len() == 1 => Ok(vec![es[0].clone()]),
                _ => self.untype_default(expected),
            },
            _ => self.untype_default(expected),
        }
    }

    fn untype_default(self, expected: &Type) -> SemanticResult<Vec<Type>> {
        let codomain = self.codomain();
        if expected.contains(&codomain) || codomain.contains(expected) {
            Ok(self.domain())
        } else {
            Err(TypeError::new(expected.clone(), codomain, None).into())
        }
    }

    fn type_arith(self, args: &[Type]) -> SemanticResult<Type> {
        // A constant zero divisor is a compile-time failure even when the
        // dividend is unknown.
        if matches!(self, Self::Divide | Self::Modulo) {
            if let Some(d) = args[1].as_const() {
                if is_zero(d) {
                    return Err(SemanticError::generic("division by zero"));
                }
            }
        }

        if let (Some(a), Some(b)) = (args[0].as_const(), args[1].as_const()) {
            if let Some(folded) = compute_arith(self, a, b)? {
                return Ok(Type::Const(folded));
            }
        }

        let (wa, wb) = (args[0].widen(), args[1].widen());
        match (self, &wa, &wb) {
            (Self::Add, Type::Timestamp, Type::Interval)
            | (Self::Add, Type::Interval, Type::Timestamp)
            | (Self::Subtract, Type::Timestamp, Type::Interval) => Ok(Type::Timestamp),
            (Self::Add | Self::Subtract, Type::Interval, Type::Interval)
            | (Self::Subtract, Type::Timestamp, Type::Timestamp)
            | (Self::Multiply, Type::Interval, Type::Int)
            | (Self::Multiply, Type::Int, Type::Interval) => Ok(Type::Interval),
            _ => {
                check(&wa, &Type::numeric())?;
                check(&wb, &Type::numeric())?;
                if wa == Type::Dec || wb == Type::Dec {
                    Ok(Type::Dec)
                } else if wa == Type::Int && wb == Type::Int {
                    Ok(Type::Int)
                } else {
                    Ok(Type::numeric())
                }
            }
        }
    }

    fn type_temporal_parse(
        self,
        args: &[Type],
        parse: impl Fn(&str) -> Result<Data, mangrove_core::DateFormatError>,
        result: Type,
    ) -> SemanticResult<Type> {
        check(&args[0], &Type::Str)?;
        match args[0].as_const() {
            Some(Data::Str(s)) => Ok(Type::Const(parse(s)?)),
            _ => Ok(result),
        }
    }

    fn type_object_project(self, args: &[Type]) -> SemanticResult<Type> {
        check(&args[1], &Type::Str)?;
        let key = match args[1].as_const() {
            Some(Data::Str(k)) => k.clone(),
            _ => return Ok(Type::Top),
        };
        match &args[0] {
            Type::Const(Data::Obj(fields)) => fields.get(&key).map_or_else(
                || {
                    Err(TypeError::new(
                        Type::obj([(key.clone(), Type::Top)]),
                        args[0].clone(),
                        Some(format!("missing field `{key}`")),
                    )
                    .into())
                },
                |v| Ok(Type::Const(v.clone())),
            ),
            Type::Obj { known, rest } => match known.get(&key) {
                Some(t) => Ok(t.clone()),
                None => match rest {
                    Some(r) => Ok((**r).clone()),
                    None => Err(TypeError::new(
                        Type::obj([(key.clone(), Type::Top)]),
                        args[0].clone(),
                        Some(format!("missing field `{key}`")),
                    )
                    .into()),
                },
            },
            _ => Ok(Type::Top),
        }
    }

    fn type_delete_field(self, args: &[Type]) -> SemanticResult<Type> {
        check(&args[1], &Type::Str)?;
        let key = match args[1].as_const() {
            Some(Data::Str(k)) => k.clone(),
            _ => return Ok(Type::obj_open([], Type::Top)),
        };
        match &args[0] {
            Type::Const(Data::Obj(fields)) => {
                let mut fields = fields.clone();
                fields.shift_remove(&key);
                Ok(Type::Const(Data::Obj(fields)))
            }
            Type::Obj { known, rest } => {
                let mut known = known.clone();
                known.shift_remove(&key);
                Ok(Type::Obj { known, rest: rest.clone() })
            }
            _ => Ok(Type::obj_open([], Type::Top)),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tolerant containment check: an unknown (`Top`) observed type passes.
fn check(observed: &Type, expected: &Type) -> SemanticResult<()> {
    if matches!(observed, Type::Top) {
        return Ok(());
    }
    typecheck(observed, expected)?;
    Ok(())
}

fn is_zero(d: &Data) -> bool {
    match d {
        Data::Int(i) => *i == BigInt::from(0),
        Data::Dec(x) => *x == BigDecimal::from(0),
        _ => false,
    }
}

fn is_one(d: &Data) -> bool {
    match d {
        Data::Int(i) => *i == BigInt::from(1),
        Data::Dec(x) => *x == BigDecimal::from(1),
        _ => false,
    }
}

/// Structural merge of two object types; the right side wins on duplicates.
fn merge_objects(a: &Type, b: &Type) -> Type {
    match (a, b) {
        (Type::Const(Data::Obj(fa)), Type::Const(Data::Obj(fb))) => {
            let mut merged = fa.clone();
            for (k, v) in fb {
                merged.insert(k.clone(), v.clone());
            }
            Type::Const(Data::Obj(merged))
        }
        (Type::Obj { known: k1, rest: r1 }, Type::Obj { known: k2, rest: r2 }) => {
            let mut known = k1.clone();
            for (k, v) in k2 {
                known.insert(k.clone(), v.clone());
            }
            let rest = match (r1, r2) {
                (Some(a), Some(b)) => Some(Box::new(a.lub(b))),
                (Some(a), None) => Some(a.clone()),
                (None, Some(b)) => Some(b.clone()),
                (None, None) => None,
            };
            Type::Obj { known, rest }
        }
        (Type::Const(Data::Obj(_)), Type::Obj { .. }) => merge_objects(&a.widen(), b),
        (Type::Obj { .. }, Type::Const(Data::Obj(_))) => merge_objects(a, &b.widen()),
        _ => Type::Top,
    }
}

fn concat_arrays(a: &Type, b: &Type) -> Type {
    match (a, b) {
        (Type::Const(Data::Arr(xs)), Type::Const(Data::Arr(ys))) => {
            let mut items = xs.clone();
            items.extend(ys.iter().cloned());
            Type::Const(Data::Arr(items))
        }
        _ => match (a.array_like(), b.array_like()) {
            (Some(xs), Some(ys)) => {
                let mut items = xs;
                items.extend(ys);
                Type::Arr(items)
            }
            _ => Type::Top,
        },
    }
}

/// Folds arithmetic over two constant atoms. `Ok(None)` means the pair is
/// not foldable (the typer falls back to the widened rules).
fn compute_arith(func: Function, a: &Data, b: &Data) -> SemanticResult<Option<Data>> {
    use Data::{Dec, Int, Interval, Timestamp};
    use Function::{Add, Divide, Modulo, Multiply, Subtract};

    let result = match (func, a, b) {
        (Add, Int(x), Int(y)) => Some(Int(x + y)),
        (Subtract, Int(x), Int(y)) => Some(Int(x - y)),
        (Multiply, Int(x), Int(y)) => Some(Int(x * y)),
        (Divide, Int(x), Int(y)) => Some(Int(x / y)),
        (Modulo, Int(x), Int(y)) => Some(Int(x % y)),

        (Add, Timestamp(t), Interval(d)) | (Add, Interval(d), Timestamp(t)) => {
            Some(Timestamp(*t + *d))
        }
        (Subtract, Timestamp(t), Interval(d)) => Some(Timestamp(*t - *d)),
        (Subtract, Timestamp(x), Timestamp(y)) => Some(Interval(*x - *y)),
        (Add, Interval(x), Interval(y)) => Some(Interval(*x + *y)),
        (Subtract, Interval(x), Interval(y)) => Some(Interval(*x - *y)),
        (Multiply, Interval(d), Int(n)) | (Multiply, Int(n), Interval(d)) => {
            match i32::try_from(n) {
                Ok(n) => Some(Interval(*d * n)),
                Err(_) => None,
            }
        }

        _ => match (a.as_decimal(), b.as_decimal()) {
            (Some(x), Some(y)) => match func {
                Add => Some(Dec(x + y)),
                Subtract => Some(Dec(x - y)),
                Multiply => Some(Dec(x * y)),
                Divide => Some(Dec(x / y)),
                Modulo => Some(Dec(x % y)),
                _ => None,
            },
            _ => None,
        },
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_const(i: i64) -> Type {
        Type::Const(Data::int(i))
    }

    #[test]
    fn simplify_boolean_identities() {
        let x = LogicalPlan::free("x");
        let t = LogicalPlan::constant(true);
        let f = LogicalPlan::constant(false);

        assert_eq!(Function::And.of(vec![t.clone(), x.clone()]).simplify(), x);
        assert_eq!(Function::Or.of(vec![f.clone(), x.clone()]).simplify(), x);
        assert_eq!(Function::And.of(vec![x.clone(), f.clone()]).simplify(), f);
        assert_eq!(
            Function::Cond.of(vec![t.clone(), LogicalPlan::int(1), LogicalPlan::int(2)]).simplify(),
            LogicalPlan::int(1)
        );
        assert_eq!(
            Function::Cond.of(vec![f, LogicalPlan::int(1), LogicalPlan::int(2)]).simplify(),
            LogicalPlan::int(2)
        );
    }

    #[test]
    fn simplify_arithmetic_identities() {
        let x = LogicalPlan::free("x");
        assert_eq!(Function::Add.of(vec![x.clone(), LogicalPlan::int(0)]).simplify(), x);
        assert_eq!(Function::Add.of(vec![LogicalPlan::int(0), x.clone()]).simplify(), x);
        assert_eq!(Function::Multiply.of(vec![x.clone(), LogicalPlan::int(1)]).simplify(), x);
        assert_eq!(Function::Subtract.of(vec![x.clone(), LogicalPlan::int(0)]).simplify(), x);
        assert_eq!(Function::Divide.of(vec![x.clone(), LogicalPlan::int(1)]).simplify(), x);
    }

    #[test]
    fn simplify_coalesce() {
        let x = LogicalPlan::free("x");
        let null = LogicalPlan::constant(Data::Null);
        assert_eq!(Function::Coalesce.of(vec![null.clone(), x.clone()]).simplify(), x);
        assert_eq!(Function::Coalesce.of(vec![x.clone(), null]).simplify(), x);
    }

    #[test]
    fn typer_promotes_to_dec() {
        assert_eq!(Function::Add.type_of(&[Type::Int, Type::Int]).unwrap(), Type::Int);
        assert_eq!(Function::Add.type_of(&[Type::Int, Type::Dec]).unwrap(), Type::Dec);
        assert_eq!(Function::Multiply.type_of(&[Type::Dec, Type::Int]).unwrap(), Type::Dec);
        assert!(Function::Add.type_of(&[Type::Str, Type::Int]).is_err());
    }

    #[test]
    fn typer_temporal_rules() {
        assert_eq!(
            Function::Add.type_of(&[Type::Timestamp, Type::Interval]).unwrap(),
            Type::Timestamp
        );
        assert_eq!(
            Function::Subtract.type_of(&[Type::Timestamp, Type::Timestamp]).unwrap(),
            Type::Interval
        );
        assert_eq!(
            Function::Multiply.type_of(&[Type::Interval, Type::Int]).unwrap(),
            Type::Interval
        );
    }

    #[test]
    fn typer_rejects_constant_zero_divisor() {
        let err = Function::Divide.type_of(&[Type::Int, int_const(0)]).unwrap_err();
        assert!(matches!(err, SemanticError::Generic(_)));
        let err = Function::Modulo.type_of(&[Type::Int, int_const(0)]).unwrap_err();
        assert!(matches!(err, SemanticError::Generic(_)));
        assert!(Function::Divide.type_of(&[Type::Int, Type::Int]).is_ok());
    }

    #[test]
    fn typer_folds_constants() {
        assert_eq!(Function::Add.type_of(&[int_const(2), int_const(3)]).unwrap(), int_const(5));
        assert_eq!(
            Function::Lt.type_of(&[int_const(2), int_const(3)]).unwrap(),
            Type::Const(Data::Bool(true))
        );
        assert_eq!(
            Function::Concat
                .type_of(&[
                    Type::Const(Data::str("foo")),
                    Type::Const(Data::str("bar"))
                ])
                .unwrap(),
            Type::Const(Data::str("foobar"))
        );
    }

    #[test]
    fn typer_parses_temporal_literals() {
        assert!(matches!(
            Function::Date.type_of(&[Type::Const(Data::str("2015-05-12"))]).unwrap(),
            Type::Const(Data::Date(_))
        ));
        assert!(matches!(
            Function::Date.type_of(&[Type::Const(Data::str("nope"))]),
            Err(SemanticError::DateFormat(_))
        ));
        assert_eq!(Function::Date.type_of(&[Type::Str]).unwrap(), Type::Date);
    }

    #[test]
    fn typer_search_folds_with_regex() {
        let s = Type::Const(Data::str("A_city"));
        let pattern = Type::Const(Data::str("^A_.*$"));
        assert_eq!(
            Function::Search.type_of(&[s, pattern]).unwrap(),
            Type::Const(Data::Bool(true))
        );
        assert!(Function::Search
            .type_of(&[Type::Const(Data::str("x")), Type::Const(Data::str("("))])
            .is_err());
    }

    #[test]
    fn typer_object_project() {
        let obj = Type::obj([("city".to_string(), Type::Str)]);
        let key = Type::Const(Data::str("city"));
        assert_eq!(Function::ObjectProject.type_of(&[obj.clone(), key]).unwrap(), Type::Str);

        let missing = Type::Const(Data::str("nope"));
        assert!(Function::ObjectProject.type_of(&[obj, missing]).is_err());
    }

    #[test]
    fn typer_join_shape() {
        let t = Function::InnerJoin
            .type_of(&[Type::Top, Type::Top, Type::Bool])
            .unwrap();
        match t {
            Type::Obj { known, .. } => {
                assert_eq!(known.keys().collect::<Vec<_>>(), vec!["left", "right"]);
            }
            other => panic!("expected object type, got {other}"),
        }
    }

    #[test]
    fn untyper_contravariance() {
        assert_eq!(
            Function::Add.untype(&Type::Timestamp).unwrap(),
            vec![Type::Timestamp, Type::Interval]
        );
        assert_eq!(Function::Add.untype(&Type::Int).unwrap(), vec![Type::Int, Type::Int]);
        assert_eq!(
            Function::Cond.untype(&Type::Str).unwrap(),
            vec![Type::Bool, Type::Str, Type::Str]
        );
        assert!(Function::Concat.untype(&Type::Int).is_err());
    }

    #[test]
    fn by_name_round_trips() {
        for func in [
            Function::Eq,
            Function::Coalesce,
            Function::ObjectProject,
            Function::LeftOuterJoin,
            Function::Arbitrary,
        ] {
            assert_eq!(Function::by_name(func.name()), Some(func));
        }
        assert_eq!(Function::by_name("COUNT"), Some(Function::Count));
        assert_eq!(Function::by_name("no_such_fn"), None);
    }
}
