//! Data atoms.
//!
//! [`Data`] is the value model shared by the compiler and the pipeline IR:
//! scalars, temporals, and collections, with insertion-ordered objects.
//! Temporal atoms parse from their ISO-8601 forms; see the `*_from_iso`
//! constructors.

use std::cmp::Ordering;
use std::fmt;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use num_bigint::BigInt;
use serde_json::{json, Value as Json};

use crate::error::{DateFormatError, TemporalKind};

/// A value in the document data model.
///
/// `Number = Int | Dec` and `Temporal = Timestamp | Date | Time | Interval`;
/// see [`Data::is_number`] and [`Data::is_temporal`].
///
/// Equality is structural except for `Set`, which compares as a set:
/// element order and duplicates are not observable.
#[derive(Debug, Clone)]
pub enum Data {
    /// Null/missing value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Arbitrary-precision integer.
    Int(BigInt),
    /// Arbitrary-precision decimal.
    Dec(BigDecimal),
    /// UTF-8 string.
    Str(String),
    /// An instant in UTC.
    Timestamp(DateTime<Utc>),
    /// A calendar date without time zone.
    Date(NaiveDate),
    /// A time of day without time zone.
    Time(NaiveTime),
    /// A duration. Year and month components are not representable.
    Interval(Duration),
    /// An ordered sequence of values.
    Arr(Vec<Data>),
    /// An insertion-ordered mapping from field names to values.
    Obj(IndexMap<String, Data>),
    /// An unordered collection of values.
    ///
    /// Stored as a vector, but equality and rendering go through the
    /// canonical form ([`Data::canonical_set`]), so the stored order and
    /// any duplicates are unobservable. [`Data::set`] stores the
    /// canonical form directly.
    Set(Vec<Data>),
}

impl PartialEq for Data {
    fn eq(&self, other: &Data) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Dec(a), Self::Dec(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Interval(a), Self::Interval(b)) => a == b,
            (Self::Arr(a), Self::Arr(b)) => a == b,
            (Self::Obj(a), Self::Obj(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => {
                Self::canonical_set(a) == Self::canonical_set(b)
            }
            _ => false,
        }
    }
}

impl Data {
    /// Creates an integer atom from a machine integer.
    #[must_use]
    pub fn int(i: i64) -> Self {
        Self::Int(BigInt::from(i))
    }

    /// Creates a string atom.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Creates an object atom from field/value pairs, preserving order.
    #[must_use]
    pub fn obj(fields: impl IntoIterator<Item = (String, Data)>) -> Self {
        Self::Obj(fields.into_iter().collect())
    }

    /// Creates a set atom, storing the canonical form (sorted and
    /// deduplicated) directly.
    #[must_use]
    pub fn set(items: impl IntoIterator<Item = Data>) -> Self {
        let items: Vec<Data> = items.into_iter().collect();
        Self::Set(Self::canonical_set(&items))
    }

    /// Creates a timestamp atom from milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_millis(ms: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(ms).map(Self::Timestamp)
    }

    /// Returns `true` if the value is null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for `Int` and `Dec` atoms.
    #[must_use]
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Dec(_))
    }

    /// Returns `true` for `Timestamp`, `Date`, `Time`, and `Interval` atoms.
    #[must_use]
    pub const fn is_temporal(&self) -> bool {
        matches!(self, Self::Timestamp(_) | Self::Date(_) | Self::Time(_) | Self::Interval(_))
    }

    /// Returns the value as a boolean if it is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as an integer if it is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<&BigInt> {
        match self {
            Self::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an array slice if it is one.
    #[must_use]
    pub fn as_arr(&self) -> Option<&[Data]> {
        match self {
            Self::Arr(items) => Some(items),
            _ => None,
        }
    }

    /// Returns a numeric value widened to a decimal, if it is a number.
    #[must_use]
    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Self::Int(i) => Some(BigDecimal::from(i.clone())),
            Self::Dec(d) => Some(d.clone()),
            _ => None,
        }
    }

    /// The canonical element list of a set: sorted under a total
    /// kind-then-value ordering and deduplicated. `Set` atoms compare and
    /// render through this form.
    #[must_use]
    pub fn canonical_set(items: &[Data]) -> Vec<Data> {
        let mut out = items.to_vec();
        out.sort_by(Data::total_cmp);
        out.dedup();
        out
    }

    /// A total, deterministic ordering for canonicalization. Values of
    /// different kinds order by kind; this is not a semantic comparison
    /// (see [`Data::try_cmp`] for that).
    fn total_cmp(&self, other: &Data) -> Ordering {
        fn elements(a: &[Data], b: &[Data]) -> Ordering {
            for (x, y) in a.iter().zip(b) {
                let ord = x.total_cmp(y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Dec(a), Self::Dec(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Interval(a), Self::Interval(b)) => a.cmp(b),
            (Self::Arr(a), Self::Arr(b)) => elements(a, b),
            (Self::Obj(a), Self::Obj(b)) => {
                let mut left: Vec<(&String, &Data)> = a.iter().collect();
                let mut right: Vec<(&String, &Data)> = b.iter().collect();
                left.sort_by(|(ka, _), (kb, _)| ka.cmp(kb));
                right.sort_by(|(ka, _), (kb, _)| ka.cmp(kb));
                for ((ka, va), (kb, vb)) in left.iter().zip(&right) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                left.len().cmp(&right.len())
            }
            (Self::Set(a), Self::Set(b)) => {
                elements(&Self::canonical_set(a), &Self::canonical_set(b))
            }
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    const fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Dec(_) => 3,
            Self::Str(_) => 4,
            Self::Timestamp(_) => 5,
            Self::Date(_) => 6,
            Self::Time(_) => 7,
            Self::Interval(_) => 8,
            Self::Arr(_) => 9,
            Self::Obj(_) => 10,
            Self::Set(_) => 11,
        }
    }

    /// Compares two atoms of the same comparable family.
    ///
    /// Numbers compare across `Int`/`Dec`; strings, booleans, and temporals
    /// compare within their own kind. Everything else is incomparable.
    #[must_use]
    pub fn try_cmp(&self, other: &Data) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Dec(a), Self::Dec(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Dec(_), Self::Int(_) | Self::Dec(_)) => {
                Some(self.as_decimal()?.cmp(&other.as_decimal()?))
            }
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Interval(a), Self::Interval(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Parses a `YYYY-MM-DD` date literal.
    pub fn date_from_iso(input: &str) -> Result<Self, DateFormatError> {
        NaiveDate::parse_from_str(input, "%Y-%m-%d").map(Self::Date).map_err(|e| {
            DateFormatError::new(TemporalKind::Date, input, format!("expected YYYY-MM-DD: {e}"))
        })
    }

    /// Parses an `HH:MM:SS[.sss]` time literal.
    pub fn time_from_iso(input: &str) -> Result<Self, DateFormatError> {
        NaiveTime::parse_from_str(input, "%H:%M:%S%.f").map(Self::Time).map_err(|e| {
            DateFormatError::new(
                TemporalKind::Time,
                input,
                format!("expected HH:MM:SS[.sss]: {e}"),
            )
        })
    }

    /// Parses an RFC 3339 / ISO-8601 UTC timestamp literal such as
    /// `2015-05-12T12:22:00Z`.
    pub fn timestamp_from_iso(input: &str) -> Result<Self, DateFormatError> {
        DateTime::parse_from_rfc3339(input)
            .map(|t| Self::Timestamp(t.with_timezone(&Utc)))
            .map_err(|e| {
                DateFormatError::new(
                    TemporalKind::Timestamp,
                    input,
                    format!("expected an ISO-8601 instant: {e}"),
                )
            })
    }

    /// Parses an ISO-8601 duration literal such as `P3DT12H30M15.0S`.
    ///
    /// Week and day components are supported; year and month components have
    /// no fixed length and are rejected.
    pub fn interval_from_iso(input: &str) -> Result<Self, DateFormatError> {
        parse_interval(input).map(Self::Interval)
    }

    /// Renders the value as its external JSON form.
    ///
    /// Integers that fit in 64 bits and decimals that fit in a double render
    /// as JSON numbers; larger values fall back to strings. Temporals use
    /// tagged forms (`{"$date": ...}`, `{"$interval": ...}`).
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => match i64::try_from(i) {
                Ok(n) => json!(n),
                Err(_) => Json::String(i.to_string()),
            },
            Self::Dec(d) => match d.to_f64().and_then(serde_json::Number::from_f64) {
                Some(n) => Json::Number(n),
                None => Json::String(d.to_string()),
            },
            Self::Str(s) => Json::String(s.clone()),
            Self::Timestamp(t) => {
                json!({ "$date": t.to_rfc3339_opts(SecondsFormat::Millis, true) })
            }
            Self::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Json::String(t.format("%H:%M:%S%.3f").to_string()),
            Self::Interval(d) => json!({ "$interval": render_interval(d) }),
            Self::Arr(items) => Json::Array(items.iter().map(Data::to_json).collect()),
            Self::Obj(fields) => {
                Json::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Self::Set(items) => json!({
                "$set": Self::canonical_set(items).iter().map(Data::to_json).collect::<Vec<_>>()
            }),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl serde::Serialize for Data {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for Data {
    fn from(i: i64) -> Self {
        Self::int(i)
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<BigInt> for Data {
    fn from(i: BigInt) -> Self {
        Self::Int(i)
    }
}

impl From<BigDecimal> for Data {
    fn from(d: BigDecimal) -> Self {
        Self::Dec(d)
    }
}

impl From<Vec<Data>> for Data {
    fn from(items: Vec<Data>) -> Self {
        Self::Arr(items)
    }
}

fn parse_interval(input: &str) -> Result<Duration, DateFormatError> {
    let fail = |hint: &str| DateFormatError::new(TemporalKind::Interval, input, hint);

    let body = input.strip_prefix('P').ok_or_else(|| fail("expected a leading 'P'"))?;
    if body.is_empty() {
        return Err(fail("empty duration"));
    }
    let (date_part, time_part) = match body.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };

    let mut total = Duration::zero();
    for (number, unit) in segments(date_part).map_err(|h| fail(h))? {
        match unit {
            'W' => total = total + Duration::weeks(parse_whole(&number).map_err(|h| fail(h))?),
            'D' => total = total + Duration::days(parse_whole(&number).map_err(|h| fail(h))?),
            'Y' | 'M' => {
                return Err(fail("year and month components are not supported"));
            }
            _ => return Err(fail("unrecognized date component")),
        }
    }
    if let Some(time_part) = time_part {
        if time_part.is_empty() {
            return Err(fail("empty time component after 'T'"));
        }
        for (number, unit) in segments(time_part).map_err(|h| fail(h))? {
            match unit {
                'H' => total = total + Duration::hours(parse_whole(&number).map_err(|h| fail(h))?),
                'M' => total = total + Duration::minutes(parse_whole(&number).map_err(|h| fail(h))?),
                'S' => total = total + parse_seconds(&number).map_err(|h| fail(h))?,
                _ => return Err(fail("unrecognized time component")),
            }
        }
    }
    Ok(total)
}

/// Splits `3D12H` style component runs into (digits, unit letter) pairs.
fn segments(part: &str) -> Result<Vec<(String, char)>, &'static str> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else if number.is_empty() {
            return Err("component with no leading digits");
        } else {
            out.push((std::mem::take(&mut number), c));
        }
    }
    if !number.is_empty() {
        return Err("trailing digits with no unit");
    }
    Ok(out)
}

fn parse_whole(number: &str) -> Result<i64, &'static str> {
    number.parse::<i64>().map_err(|_| "expected a whole number")
}

fn parse_seconds(number: &str) -> Result<Duration, &'static str> {
    let (whole, frac) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    let secs = parse_whole(whole)?;
    let millis = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<3}");
        padded[..3].parse::<i64>().map_err(|_| "expected fractional seconds")?
    };
    Ok(Duration::seconds(secs) + Duration::milliseconds(millis))
}

fn render_interval(d: &Duration) -> String {
    let mut millis = d.num_milliseconds();
    let mut out = String::new();
    if millis < 0 {
        out.push('-');
        millis = -millis;
    }
    out.push('P');
    let days = millis / 86_400_000;
    millis %= 86_400_000;
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if millis > 0 || days == 0 {
        out.push('T');
        let hours = millis / 3_600_000;
        millis %= 3_600_000;
        let minutes = millis / 60_000;
        millis %= 60_000;
        let seconds = millis / 1000;
        let ms = millis % 1000;
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if ms > 0 {
            out.push_str(&format!("{seconds}.{ms:03}S"));
        } else if seconds > 0 || (hours == 0 && minutes == 0) {
            out.push_str(&format!("{seconds}S"));
        }
    }
    out
}
