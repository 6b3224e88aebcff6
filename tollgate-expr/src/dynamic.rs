//! Dynamic values.
//!
//! Entities, literals and operator results all share the [`Dynamic`] type.
//! Equality, ordering, truthiness and string conversion follow the loosely
//! typed rules rule authors expect: `1 Eq 1.0` holds, empty collections are
//! falsy, and `Concat` stringifies numbers the same way across
//! implementations so hashed ids stay stable.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;

/// Anything with named fields that expressions can read.
///
/// Maps are read by key; any other type can implement this trait to expose
/// attribute-style fields, including lazily computed ones via
/// [`Dynamic::Functor`].
pub trait Entity: Send + Sync + fmt::Debug {
    /// Look up a field. Missing fields return `None`.
    fn field(&self, name: &str) -> Option<Dynamic>;

    /// Type name used to key cached assignments.
    fn type_name(&self) -> &str {
        "object"
    }

    /// JSON snapshot of the entity for decision logs.
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

type FunctorFn = dyn Fn(&Context) -> Result<Dynamic> + Send + Sync;

/// A lazily computed value.
#[derive(Clone)]
pub struct Functor(Arc<FunctorFn>);

impl Functor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<Dynamic> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the functor with the evaluation context.
    pub fn call(&self, context: &Context) -> Result<Dynamic> {
        (self.0)(context)
    }

    fn ptr_eq(&self, other: &Functor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Functor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Functor(..)")
    }
}

/// Runtime value.
#[derive(Debug, Clone, Default)]
pub enum Dynamic {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
    List(Vec<Dynamic>),
    Map(BTreeMap<String, Dynamic>),
    Object(Arc<dyn Entity>),
    Functor(Functor),
}

impl Dynamic {
    /// Wrap an entity implementation.
    pub fn object(entity: impl Entity + 'static) -> Self {
        Dynamic::Object(Arc::new(entity))
    }

    /// Wrap a lazily computed value.
    pub fn functor<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<Dynamic> + Send + Sync + 'static,
    {
        Dynamic::Functor(Functor::new(f))
    }

    /// Build a map from key/value pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Dynamic>,
        I: IntoIterator<Item = (K, V)>,
    {
        Dynamic::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Type name, as reported in type errors and cache keys.
    pub fn type_name(&self) -> &str {
        match self {
            Dynamic::Null => "NoneType",
            Dynamic::Bool(_) => "bool",
            Dynamic::Int(_) => "int",
            Dynamic::Float(_) => "float",
            Dynamic::Str(_) => "str",
            Dynamic::Time(_) => "datetime",
            Dynamic::List(_) => "list",
            Dynamic::Map(_) => "dict",
            Dynamic::Object(entity) => entity.type_name(),
            Dynamic::Functor(_) => "function",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Dynamic::Null)
    }

    /// Truthiness: null, false, zero and empty collections are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Dynamic::Null => false,
            Dynamic::Bool(b) => *b,
            Dynamic::Int(i) => *i != 0,
            Dynamic::Float(f) => *f != 0.0,
            Dynamic::Str(s) => !s.is_empty(),
            Dynamic::List(items) => !items.is_empty(),
            Dynamic::Map(map) => !map.is_empty(),
            Dynamic::Time(_) | Dynamic::Object(_) | Dynamic::Functor(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dynamic::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Dynamic::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Dynamic::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integer or float as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Dynamic::Int(i) => Some(*i as f64),
            Dynamic::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Dynamic::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Dynamic]> {
        match self {
            Dynamic::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Dynamic>> {
        match self {
            Dynamic::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Numeric view used for cross-type comparisons; booleans count as 0/1.
    fn as_number(&self) -> Option<f64> {
        match self {
            Dynamic::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        }
    }

    /// Read a field by name. Non-containers and missing keys yield `Null`.
    pub fn get(&self, name: &str) -> Dynamic {
        match self {
            Dynamic::Map(map) => map.get(name).cloned().unwrap_or_default(),
            Dynamic::Object(entity) => entity.field(name).unwrap_or_default(),
            _ => Dynamic::Null,
        }
    }

    /// Length of a string (in characters), list or map.
    pub fn len(&self) -> Option<usize> {
        match self {
            Dynamic::Str(s) => Some(s.chars().count()),
            Dynamic::List(items) => Some(items.len()),
            Dynamic::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Ordering between comparable values, `None` when the pair is not
    /// comparable.
    pub fn try_cmp(&self, other: &Dynamic) -> Option<Ordering> {
        match (self, other) {
            (Dynamic::Int(a), Dynamic::Int(b)) => Some(a.cmp(b)),
            (Dynamic::Str(a), Dynamic::Str(b)) => Some(a.cmp(b)),
            (Dynamic::Time(a), Dynamic::Time(b)) => Some(a.cmp(b)),
            (Dynamic::List(a), Dynamic::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    if x == y {
                        continue;
                    }
                    return x.try_cmp(y);
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => {
                let (a, b) = (self.as_number()?, other.as_number()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Membership test with `self` as the container.
    ///
    /// Lists compare elements by equality, strings test for a substring and
    /// maps test for a key. `Null` behaves as an empty container. Returns
    /// `None` when `self` cannot contain `item`.
    pub fn contains(&self, item: &Dynamic) -> Option<bool> {
        match self {
            Dynamic::Null => Some(false),
            Dynamic::List(items) => Some(items.iter().any(|x| x == item)),
            Dynamic::Str(s) => item.as_str().map(|needle| s.contains(needle)),
            Dynamic::Map(map) => Some(item.as_str().is_some_and(|k| map.contains_key(k))),
            _ => None,
        }
    }

    /// Canonical source form of the value, as used in expression rendering.
    ///
    /// `None`, booleans, finite numbers, strings and lists of them parse back
    /// to an equal literal. The rule language has no syntax for maps, NaN or
    /// infinities, entities and functions, so their rendering is for display
    /// only, and times come back as strings.
    pub fn repr(&self) -> String {
        match self {
            Dynamic::Null => "None".to_string(),
            Dynamic::Bool(true) => "True".to_string(),
            Dynamic::Bool(false) => "False".to_string(),
            Dynamic::Int(i) => i.to_string(),
            Dynamic::Float(f) => format_float(*f),
            Dynamic::Str(s) => quote(s),
            Dynamic::Time(_) => quote(&self.to_string()),
            Dynamic::List(items) => {
                let items: Vec<String> = items.iter().map(Dynamic::repr).collect();
                format!("[{}]", items.join(", "))
            }
            Dynamic::Map(map) => {
                let entries: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote(k), v.repr()))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            Dynamic::Object(entity) => format!("<{}>", entity.type_name()),
            Dynamic::Functor(_) => "<function>".to_string(),
        }
    }

    /// JSON form for logs and serialization.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            Dynamic::Null | Dynamic::Functor(_) => Value::Null,
            Dynamic::Bool(b) => Value::Bool(*b),
            Dynamic::Int(i) => Value::from(*i),
            Dynamic::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Dynamic::Str(s) => Value::String(s.clone()),
            Dynamic::Time(t) => Value::String(t.to_rfc3339()),
            Dynamic::List(items) => Value::Array(items.iter().map(Dynamic::to_json).collect()),
            Dynamic::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Dynamic::Object(entity) => entity.to_json(),
        }
    }
}

impl PartialEq for Dynamic {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Dynamic::Null, Dynamic::Null) => true,
            (Dynamic::Int(a), Dynamic::Int(b)) => a == b,
            (Dynamic::Str(a), Dynamic::Str(b)) => a == b,
            (Dynamic::Time(a), Dynamic::Time(b)) => a == b,
            (Dynamic::List(a), Dynamic::List(b)) => a == b,
            (Dynamic::Map(a), Dynamic::Map(b)) => a == b,
            (Dynamic::Object(a), Dynamic::Object(b)) => Arc::ptr_eq(a, b),
            (Dynamic::Functor(a), Dynamic::Functor(b)) => a.ptr_eq(b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl PartialEq<str> for Dynamic {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for Dynamic {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

/// String conversion used by `Concat` and `Hash`: strings are written raw,
/// everything else uses its canonical form.
impl fmt::Display for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dynamic::Str(s) => f.write_str(s),
            Dynamic::Time(t) => {
                if t.timestamp_subsec_micros() == 0 {
                    write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S+00:00"))
                } else {
                    write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.6f+00:00"))
                }
            }
            other => f.write_str(&other.repr()),
        }
    }
}

impl Serialize for Dynamic {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for Dynamic {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Dynamic::Null,
            Value::Bool(b) => Dynamic::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Dynamic::Int(i),
                None => Dynamic::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Dynamic::Str(s),
            Value::Array(items) => Dynamic::List(items.into_iter().map(Dynamic::from).collect()),
            Value::Object(map) => Dynamic::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Dynamic::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Dynamic {
    fn from(value: bool) -> Self {
        Dynamic::Bool(value)
    }
}

impl From<i64> for Dynamic {
    fn from(value: i64) -> Self {
        Dynamic::Int(value)
    }
}

impl From<i32> for Dynamic {
    fn from(value: i32) -> Self {
        Dynamic::Int(i64::from(value))
    }
}

impl From<u32> for Dynamic {
    fn from(value: u32) -> Self {
        Dynamic::Int(i64::from(value))
    }
}

impl From<f64> for Dynamic {
    fn from(value: f64) -> Self {
        Dynamic::Float(value)
    }
}

impl From<&str> for Dynamic {
    fn from(value: &str) -> Self {
        Dynamic::Str(value.to_string())
    }
}

impl From<String> for Dynamic {
    fn from(value: String) -> Self {
        Dynamic::Str(value)
    }
}

impl From<DateTime<Utc>> for Dynamic {
    fn from(value: DateTime<Utc>) -> Self {
        Dynamic::Time(value)
    }
}

impl From<BTreeMap<String, Dynamic>> for Dynamic {
    fn from(value: BTreeMap<String, Dynamic>) -> Self {
        Dynamic::Map(value)
    }
}

impl<T: Into<Dynamic>> From<Vec<T>> for Dynamic {
    fn from(value: Vec<T>) -> Self {
        Dynamic::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Dynamic>> From<Option<T>> for Dynamic {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Shortest round-trip float rendering, with the fixed/scientific cutover
/// and exponent style used by the rule language (`1e-05`, `1e+16`, `0.5`).
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{f:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => ("-", m),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if (-4..16).contains(&exp) {
        let body = if exp < 0 {
            format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
        } else {
            let point = exp as usize + 1;
            if digits.len() <= point {
                format!("{}{}.0", digits, "0".repeat(point - digits.len()))
            } else {
                format!("{}.{}", &digits[..point], &digits[point..])
            }
        };
        format!("{sign}{body}")
    } else {
        let mantissa = if digits.len() > 1 {
            format!("{}.{}", &digits[..1], &digits[1..])
        } else {
            digits
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!("{sign}{mantissa}e{exp_sign}{:02}", exp.abs())
    }
}

/// Quote a string so the lexer reads it back unchanged.
fn quote(s: &str) -> String {
    let delim = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(s.len() + 2);
    out.push(delim);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[derive(Debug)]
    struct User {
        id: String,
    }

    impl Entity for User {
        fn field(&self, name: &str) -> Option<Dynamic> {
            match name {
                "id" => Some(Dynamic::from(self.id.as_str())),
                _ => None,
            }
        }

        fn type_name(&self) -> &str {
            "User"
        }
    }

    #[test]
    fn test_float_rendering() {
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(55.123), "55.123");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(0.00001), "1e-05");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(123456789.0), "123456789.0");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
    }

    #[test]
    fn test_string_repr() {
        assert_eq!(Dynamic::from("foo").repr(), "'foo'");
        assert_eq!(Dynamic::from("it's").repr(), "\"it's\"");
        assert_eq!(Dynamic::from("a'b\"c").repr(), "'a\\'b\"c'");
        assert_eq!(Dynamic::from("tab\there").repr(), "'tab\\there'");
        assert_eq!(Dynamic::from("back\\slash").repr(), "'back\\\\slash'");
    }

    #[test]
    fn test_list_repr_and_display() {
        let list = Dynamic::from(vec![Dynamic::Int(1), Dynamic::Int(2), Dynamic::from("foo")]);
        assert_eq!(list.repr(), "[1, 2, 'foo']");
        assert_eq!(list.to_string(), "[1, 2, 'foo']");
        assert_eq!(Dynamic::Null.to_string(), "None");
        assert_eq!(Dynamic::from("raw").to_string(), "raw");
    }

    #[test]
    fn test_time_display() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(Dynamic::Time(ts).to_string(), "2024-01-02 03:04:05+00:00");
    }

    #[test]
    fn test_equality_across_numbers() {
        assert_eq!(Dynamic::Int(1), Dynamic::Float(1.0));
        assert_eq!(Dynamic::Bool(true), Dynamic::Int(1));
        assert_ne!(Dynamic::from("1"), Dynamic::Int(1));
        assert_eq!(Dynamic::from("abc"), "abc");
    }

    #[test]
    fn test_ordering() {
        assert_eq!(
            Dynamic::Int(1).try_cmp(&Dynamic::Float(1.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Dynamic::from("b").try_cmp(&Dynamic::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(Dynamic::from("b").try_cmp(&Dynamic::Int(1)), None);
        assert_eq!(
            Dynamic::from(vec![1, 2]).try_cmp(&Dynamic::from(vec![1, 3])),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Dynamic::Null.is_truthy());
        assert!(!Dynamic::from("").is_truthy());
        assert!(!Dynamic::from(Vec::<i64>::new()).is_truthy());
        assert!(Dynamic::Int(-1).is_truthy());
        assert!(Dynamic::from("x").is_truthy());
    }

    #[test]
    fn test_contains() {
        let list = Dynamic::from(vec!["a", "b"]);
        assert_eq!(list.contains(&Dynamic::from("a")), Some(true));
        assert_eq!(Dynamic::Null.contains(&Dynamic::from("a")), Some(false));
        assert_eq!(
            Dynamic::from("hello").contains(&Dynamic::from("ell")),
            Some(true)
        );
        assert_eq!(Dynamic::from("hello").contains(&Dynamic::Int(1)), None);
        assert_eq!(Dynamic::Int(3).contains(&Dynamic::Int(3)), None);
    }

    #[test]
    fn test_json_round_trip() {
        let value = Dynamic::from(json!({"id": "1", "n": 2, "f": 0.5, "tags": ["a"], "x": null}));
        assert_eq!(value.get("id"), "1");
        assert_eq!(value.get("n"), Dynamic::Int(2));
        assert_eq!(value.get("missing"), Dynamic::Null);
        assert_eq!(
            value.to_json(),
            json!({"id": "1", "n": 2, "f": 0.5, "tags": ["a"], "x": null})
        );
    }

    #[test]
    fn test_object_fields() {
        let user = Dynamic::object(User {
            id: "u-1".to_string(),
        });
        assert_eq!(user.get("id"), "u-1");
        assert_eq!(user.get("email"), Dynamic::Null);
        assert_eq!(user.type_name(), "User");
        assert_eq!(Dynamic::from(json!({})).type_name(), "dict");
    }
}
