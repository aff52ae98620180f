//! The structural type lattice.
//!
//! [`Type`] forms a lattice with `Top` and `Bottom`, primitive types for
//! each data atom, structural object/array types, unions, and singleton
//! [`Type::Const`] types carrying a literal value. Containment drives
//! [`typecheck`]; [`Type::lub`] and [`Type::glb`] are the join and meet.
//!
//! A constant is a subtype of its widened data type, and narrowing a type
//! against a constant constraint lowers it to that constant.

use std::fmt;

use indexmap::IndexMap;

use super::data::Data;
use crate::error::TypeError;

/// A type in the structural lattice.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// The top of the lattice; contains every type.
    Top,
    /// The bottom of the lattice; contained in every type.
    Bottom,
    /// Boolean values.
    Bool,
    /// Arbitrary-precision integers.
    Int,
    /// Arbitrary-precision decimals.
    Dec,
    /// Strings.
    Str,
    /// UTC instants.
    Timestamp,
    /// Calendar dates.
    Date,
    /// Times of day.
    Time,
    /// Durations.
    Interval,
    /// The null value.
    Null,
    /// A structural object type: known fields plus an optional type for the
    /// remaining (unknown) fields. `rest: None` means a closed record.
    Obj {
        /// Types of the known fields, in declaration order.
        known: IndexMap<String, Type>,
        /// Type of any field not listed in `known`.
        rest: Option<Box<Type>>,
    },
    /// A positional array type: one element type per position.
    Arr(Vec<Type>),
    /// A set type with the given element type.
    Set(Box<Type>),
    /// The union of two types.
    Union(Box<Type>, Box<Type>),
    /// A singleton type holding exactly one value.
    Const(Data),
}

impl Type {
    /// Builds an object type from name/type pairs (closed record).
    #[must_use]
    pub fn obj(fields: impl IntoIterator<Item = (String, Type)>) -> Self {
        Self::Obj { known: fields.into_iter().collect(), rest: None }
    }

    /// Builds an open object type accepting any further fields of `rest`.
    #[must_use]
    pub fn obj_open(fields: impl IntoIterator<Item = (String, Type)>, rest: Type) -> Self {
        Self::Obj { known: fields.into_iter().collect(), rest: Some(Box::new(rest)) }
    }

    /// Builds the union of two types.
    #[must_use]
    pub fn union(a: Type, b: Type) -> Self {
        if a == b {
            a
        } else {
            Self::Union(Box::new(a), Box::new(b))
        }
    }

    /// The numeric view: `Int | Dec`.
    #[must_use]
    pub fn numeric() -> Self {
        Self::union(Self::Int, Self::Dec)
    }

    /// The temporal view: `Timestamp | Date | Time | Interval`.
    #[must_use]
    pub fn temporal() -> Self {
        Self::union(
            Self::union(Self::Timestamp, Self::Date),
            Self::union(Self::Time, Self::Interval),
        )
    }

    /// Widens a constant to its data type; other types are unchanged.
    #[must_use]
    pub fn widen(&self) -> Type {
        match self {
            Self::Const(d) => d.data_type(),
            other => other.clone(),
        }
    }

    /// Returns the constant value if this is a singleton type.
    #[must_use]
    pub const fn as_const(&self) -> Option<&Data> {
        match self {
            Self::Const(d) => Some(d),
            _ => None,
        }
    }

    /// True if every value of `other` is a value of `self`.
    #[must_use]
    pub fn contains(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::Top, _) | (_, Self::Bottom) => true,
            (_, Self::Top) | (Self::Bottom, _) => false,
            // Split unions on the right first so `Int | Dec` contains itself
            // piecewise.
            (a, Self::Union(x, y)) => a.contains(x) && a.contains(y),
            (Self::Union(x, y), b) => x.contains(b) || y.contains(b),
            (a, Self::Const(d)) => a.contains(&d.data_type()),
            (Self::Const(_), _) => false,
            (Self::Obj { known: k1, rest: r1 }, Self::Obj { known: k2, rest: r2 }) => {
                for (name, t1) in k1 {
                    match k2.get(name) {
                        Some(t2) if t1.contains(t2) => {}
                        _ => return false,
                    }
                }
                match (r1, r2) {
                    (Some(r1), _) => {
                        k2.iter().all(|(name, t2)| k1.contains_key(name) || r1.contains(t2))
                            && r2.as_ref().map_or(true, |r2| r1.contains(r2))
                    }
                    // Closed on the left: extra known fields on the right are
                    // fine (width subtyping), an open right side is not.
                    (None, Some(_)) => false,
                    (None, None) => true,
                }
            }
            (Self::Arr(xs), Self::Arr(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| x.contains(y))
            }
            (Self::Set(x), Self::Set(y)) => x.contains(y),
            _ => false,
        }
    }

    /// The least upper bound (join) of two types.
    #[must_use]
    pub fn lub(&self, other: &Type) -> Type {
        if self.contains(other) {
            return self.clone();
        }
        if other.contains(self) {
            return other.clone();
        }
        match (self, other) {
            (Self::Const(a), Self::Const(b)) => a.data_type().lub(&b.data_type()),
            (Self::Obj { known: k1, rest: r1 }, Self::Obj { known: k2, rest: r2 }) => {
                let mut known = IndexMap::new();
                for (name, t1) in k1 {
                    match k2.get(name) {
                        Some(t2) => known.insert(name.clone(), t1.lub(t2)),
                        None => known.insert(name.clone(), t1.clone()),
                    };
                }
                for (name, t2) in k2 {
                    if !known.contains_key(name) {
                        known.insert(name.clone(), t2.clone());
                    }
                }
                let rest = match (r1, r2) {
                    (Some(a), Some(b)) => Some(Box::new(a.lub(b))),
                    (Some(a), None) => Some(a.clone()),
                    (None, Some(b)) => Some(b.clone()),
                    (None, None) => None,
                };
                Self::Obj { known, rest }
            }
            (Self::Arr(xs), Self::Arr(ys)) if xs.len() == ys.len() => {
                Self::Arr(xs.iter().zip(ys).map(|(x, y)| x.lub(y)).collect())
            }
            _ => Self::union(self.clone(), other.clone()),
        }
    }

    /// The greatest lower bound (meet) of two types.
    ///
    /// Meeting a type with a constant it contains narrows to the constant.
    #[must_use]
    pub fn glb(&self, other: &Type) -> Type {
        if self.contains(other) {
            return other.clone();
        }
        if other.contains(self) {
            return self.clone();
        }
        match (self, other) {
            (Self::Union(x, y), b) => x.glb(b).lub(&y.glb(b)),
            (a, Self::Union(x, y)) => a.glb(x).lub(&a.glb(y)),
            _ => Self::Bottom,
        }
    }

    /// True if the type is contained in the numeric view.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        Self::numeric().contains(self)
    }

    /// True if the type is contained in the temporal view.
    #[must_use]
    pub fn is_temporal(&self) -> bool {
        Self::temporal().contains(self)
    }

    /// The element types if this is an array-like type.
    #[must_use]
    pub fn array_like(&self) -> Option<Vec<Type>> {
        match self {
            Self::Arr(es) => Some(es.clone()),
            Self::Const(Data::Arr(items)) => {
                Some(items.iter().map(|d| Type::Const(d.clone())).collect())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => write!(f, "Top"),
            Self::Bottom => write!(f, "Bottom"),
            Self::Bool => write!(f, "Bool"),
            Self::Int => write!(f, "Int"),
            Self::Dec => write!(f, "Dec"),
            Self::Str => write!(f, "Str"),
            Self::Timestamp => write!(f, "Timestamp"),
            Self::Date => write!(f, "Date"),
            Self::Time => write!(f, "Time"),
            Self::Interval => write!(f, "Interval"),
            Self::Null => write!(f, "Null"),
            Self::Obj { known, rest } => {
                write!(f, "{{")?;
                for (i, (name, t)) in known.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {t}")?;
                }
                if let Some(rest) = rest {
                    if !known.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "..: {rest}")?;
                }
                write!(f, "}}")
            }
            Self::Arr(es) => {
                write!(f, "[")?;
                for (i, t) in es.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            Self::Set(e) => write!(f, "Set({e})"),
            Self::Union(a, b) => write!(f, "{a} | {b}"),
            Self::Const(d) => write!(f, "Const({d})"),
        }
    }
}

impl Data {
    /// The primitive or structural type of this value.
    #[must_use]
    pub fn data_type(&self) -> Type {
        match self {
            Data::Null => Type::Null,
            Data::Bool(_) => Type::Bool,
            Data::Int(_) => Type::Int,
            Data::Dec(_) => Type::Dec,
            Data::Str(_) => Type::Str,
            Data::Timestamp(_) => Type::Timestamp,
            Data::Date(_) => Type::Date,
            Data::Time(_) => Type::Time,
            Data::Interval(_) => Type::Interval,
            Data::Arr(items) => Type::Arr(items.iter().map(Data::data_type).collect()),
            Data::Obj(fields) => Type::Obj {
                known: fields.iter().map(|(k, v)| (k.clone(), v.data_type())).collect(),
                rest: None,
            },
            Data::Set(items) => {
                let elem = items
                    .iter()
                    .map(Data::data_type)
                    .reduce(|a, b| a.lub(&b))
                    .unwrap_or(Type::Bottom);
                Type::Set(Box::new(elem))
            }
        }
    }
}

/// Checks an observed type against an expected one.
///
/// Succeeds when `expected` contains `observed`; otherwise reports a
/// [`TypeError`] carrying both types and, for object mismatches, a hint
/// naming the first offending field.
pub fn typecheck(observed: &Type, expected: &Type) -> Result<(), TypeError> {
    if expected.contains(observed) {
        return Ok(());
    }
    let hint = match (expected, observed) {
        (Type::Obj { known: k1, .. }, Type::Obj { known: k2, .. }) => k1
            .keys()
            .find(|name| !k2.contains_key(*name))
            .map(|name| format!("missing field `{name}`")),
        _ => None,
    };
    Err(TypeError::new(expected.clone(), observed.clone(), hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_is_subtype_of_its_data_type() {
        let five = Type::Const(Data::int(5));
        assert!(Type::Int.contains(&five));
        assert!(Type::numeric().contains(&five));
        assert!(!Type::Str.contains(&five));
    }

    #[test]
    fn glb_narrows_to_const() {
        let five = Type::Const(Data::int(5));
        assert_eq!(Type::Int.glb(&five), five);
        assert_eq!(Type::numeric().glb(&Type::Int), Type::Int);
        assert_eq!(Type::Int.glb(&Type::Str), Type::Bottom);
    }

    #[test]
    fn lub_of_unrelated_types_is_a_union() {
        let t = Type::Int.lub(&Type::Str);
        assert!(t.contains(&Type::Int));
        assert!(t.contains(&Type::Str));
        assert!(!t.contains(&Type::Bool));
    }

    #[test]
    fn lub_merges_objects_fieldwise() {
        let a = Type::obj([("x".to_string(), Type::Int)]);
        let b = Type::obj([("x".to_string(), Type::Dec), ("y".to_string(), Type::Str)]);
        let joined = a.lub(&b);
        match joined {
            Type::Obj { known, rest } => {
                assert_eq!(known.get("x"), Some(&Type::union(Type::Int, Type::Dec)));
                assert_eq!(known.get("y"), Some(&Type::Str));
                assert!(rest.is_none());
            }
            other => panic!("expected object type, got {other}"),
        }
    }

    #[test]
    fn object_width_subtyping() {
        let wide = Type::obj([("a".to_string(), Type::Int), ("b".to_string(), Type::Str)]);
        let narrow = Type::obj([("a".to_string(), Type::Int)]);
        assert!(narrow.contains(&wide));
        assert!(!wide.contains(&narrow));
    }

    #[test]
    fn typecheck_reports_missing_field() {
        let expected = Type::obj([("city".to_string(), Type::Str)]);
        let observed = Type::obj([("state".to_string(), Type::Str)]);
        let err = typecheck(&observed, &expected).unwrap_err();
        assert_eq!(err.hint.as_deref(), Some("missing field `city`"));
    }

    #[test]
    fn typecheck_accepts_containment() {
        assert!(typecheck(&Type::Const(Data::int(1)), &Type::numeric()).is_ok());
        assert!(typecheck(&Type::Dec, &Type::Int).is_err());
    }

    #[test]
    fn views() {
        assert!(Type::Int.is_numeric());
        assert!(Type::Timestamp.is_temporal());
        assert!(!Type::Str.is_numeric());

        let arr = Type::Const(Data::Arr(vec![Data::int(1), Data::str("x")]));
        let elems = arr.array_like().unwrap();
        assert_eq!(elems.len(), 2);
    }
}
