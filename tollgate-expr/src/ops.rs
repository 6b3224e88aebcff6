//! Operator library.
//!
//! Every operator receives its already-evaluated operands and produces a
//! value; the expression tree takes care of evaluation order and tracing.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::dynamic::Dynamic;
use crate::error::{EvalError, Result};
use crate::hash::hash_id;

/// How an operator application is written in rule source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notation {
    /// `left OP right`
    Infix,
    /// `Name(a, b)`
    Prefix,
    /// `[a, b]`
    List,
}

/// Number of operands an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exactly(expected) => *expected == n,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{n}"),
            Arity::Variadic => f.write_str("any number of"),
        }
    }
}

/// An operator usable in expressions.
pub trait Operator: Send + Sync + fmt::Debug {
    /// Name used in rule source and traces.
    fn name(&self) -> &str;

    fn notation(&self) -> Notation {
        Notation::Prefix
    }

    fn arity(&self) -> Arity;

    /// Compute the result from evaluated operands.
    fn apply(&self, args: &[Dynamic], context: &Context) -> Result<Dynamic>;
}

/// Built-in operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Eq,
    Lt,
    Le,
    And,
    Or,
    Not,
    In,
    Matches,
    Concat,
    Hash,
    Len,
    Now,
    TimeSince,
    TrimPrefix,
    TrimSuffix,
    List,
}

impl Builtin {
    pub const ALL: [Builtin; 16] = [
        Builtin::Eq,
        Builtin::Lt,
        Builtin::Le,
        Builtin::And,
        Builtin::Or,
        Builtin::Not,
        Builtin::In,
        Builtin::Matches,
        Builtin::Concat,
        Builtin::Hash,
        Builtin::Len,
        Builtin::Now,
        Builtin::TimeSince,
        Builtin::TrimPrefix,
        Builtin::TrimSuffix,
        Builtin::List,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Builtin::Eq => "Eq",
            Builtin::Lt => "Lt",
            Builtin::Le => "Le",
            Builtin::And => "And",
            Builtin::Or => "Or",
            Builtin::Not => "Not",
            Builtin::In => "In",
            Builtin::Matches => "Matches",
            Builtin::Concat => "Concat",
            Builtin::Hash => "Hash",
            Builtin::Len => "Len",
            Builtin::Now => "Now",
            Builtin::TimeSince => "TimeSince",
            Builtin::TrimPrefix => "TrimPrefix",
            Builtin::TrimSuffix => "TrimSuffix",
            Builtin::List => "List",
        }
    }

    /// Shared handle for building expression nodes.
    pub fn op(self) -> Arc<dyn Operator> {
        Arc::new(self)
    }

    fn binary<'a>(&self, args: &'a [Dynamic]) -> Result<(&'a Dynamic, &'a Dynamic)> {
        match args {
            [left, right] => Ok((left, right)),
            _ => Err(self.arity_error(args.len())),
        }
    }

    fn unary<'a>(&self, args: &'a [Dynamic]) -> Result<&'a Dynamic> {
        match args {
            [arg] => Ok(arg),
            _ => Err(self.arity_error(args.len())),
        }
    }

    fn arity_error(&self, actual: usize) -> EvalError {
        EvalError::type_error(
            self.as_str(),
            format!("expected {} argument(s), got {actual}", self.arity()),
        )
    }

    fn compare(&self, left: &Dynamic, right: &Dynamic, symbol: &str) -> Result<std::cmp::Ordering> {
        left.try_cmp(right).ok_or_else(|| {
            EvalError::type_error(
                self.as_str(),
                format!(
                    "'{symbol}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ),
            )
        })
    }

    fn string_operand<'a>(&self, value: &'a Dynamic) -> Result<&'a str> {
        value.as_str().ok_or_else(|| {
            EvalError::type_error(
                self.as_str(),
                format!("expected str, got {}", value.type_name()),
            )
        })
    }

    fn membership(&self, left: &Dynamic, right: &Dynamic) -> Result<bool> {
        let check = |item: &Dynamic| {
            right.contains(item).ok_or_else(|| {
                EvalError::type_error(
                    self.as_str(),
                    format!(
                        "'{}' cannot contain '{}'",
                        right.type_name(),
                        item.type_name()
                    ),
                )
            })
        };

        match left {
            Dynamic::List(items) => {
                for item in items {
                    if check(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            item => check(item),
        }
    }

    fn time_since(&self, args: &[Dynamic], context: &Context) -> Result<Dynamic> {
        let (moment, unit) = self.binary(args)?;
        let moment = moment.as_time().ok_or_else(|| {
            EvalError::type_error(
                self.as_str(),
                format!(
                    "unsupported operand type(s) for -: 'datetime' and '{}'",
                    moment.type_name()
                ),
            )
        })?;
        let unit = self.string_operand(unit)?;
        let factor = unit_seconds(unit).ok_or_else(|| EvalError::InvalidUnit(unit.to_string()))?;

        let delta = context.now() - moment;
        let seconds = match delta.num_microseconds() {
            Some(micros) => micros as f64 / 1_000_000.0,
            None => delta.num_milliseconds() as f64 / 1_000.0,
        };
        Ok(Dynamic::Float(seconds / factor))
    }
}

impl Operator for Builtin {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn notation(&self) -> Notation {
        match self {
            Builtin::Eq
            | Builtin::Lt
            | Builtin::Le
            | Builtin::And
            | Builtin::Or
            | Builtin::In
            | Builtin::Matches => Notation::Infix,
            Builtin::List => Notation::List,
            _ => Notation::Prefix,
        }
    }

    fn arity(&self) -> Arity {
        match self {
            Builtin::Now => Arity::Exactly(0),
            Builtin::Not | Builtin::Hash | Builtin::Len => Arity::Exactly(1),
            Builtin::Concat | Builtin::List => Arity::Variadic,
            _ => Arity::Exactly(2),
        }
    }

    fn apply(&self, args: &[Dynamic], context: &Context) -> Result<Dynamic> {
        match self {
            Builtin::Eq => {
                let (left, right) = self.binary(args)?;
                Ok(Dynamic::Bool(left == right))
            }
            Builtin::Lt => {
                let (left, right) = self.binary(args)?;
                Ok(Dynamic::Bool(self.compare(left, right, "<")?.is_lt()))
            }
            Builtin::Le => {
                let (left, right) = self.binary(args)?;
                Ok(Dynamic::Bool(self.compare(left, right, "<=")?.is_le()))
            }
            Builtin::And => {
                let (left, right) = self.binary(args)?;
                Ok(if left.is_truthy() { right } else { left }.clone())
            }
            Builtin::Or => {
                let (left, right) = self.binary(args)?;
                Ok(if left.is_truthy() { left } else { right }.clone())
            }
            Builtin::Not => Ok(Dynamic::Bool(!self.unary(args)?.is_truthy())),
            Builtin::In => {
                let (left, right) = self.binary(args)?;
                Ok(Dynamic::Bool(self.membership(left, right)?))
            }
            Builtin::Matches => {
                let (left, right) = self.binary(args)?;
                let text = if left.is_null() { "" } else { self.string_operand(left)? };
                let pattern = if right.is_null() { "" } else { self.string_operand(right)? };
                Ok(Dynamic::Bool(compiled_regex(pattern)?.is_match(text)))
            }
            Builtin::Concat => Ok(Dynamic::Str(args.iter().map(|a| a.to_string()).collect())),
            Builtin::Hash => Ok(Dynamic::Float(hash_id(&self.unary(args)?.to_string()))),
            Builtin::Len => {
                let arg = self.unary(args)?;
                let len = arg.len().ok_or_else(|| {
                    EvalError::type_error(
                        self.as_str(),
                        format!("object of type '{}' has no len()", arg.type_name()),
                    )
                })?;
                Ok(Dynamic::Int(len as i64))
            }
            Builtin::Now => Ok(Dynamic::Time(context.now())),
            Builtin::TimeSince => self.time_since(args, context),
            Builtin::TrimPrefix => {
                let (s, prefix) = self.binary(args)?;
                let s = self.string_operand(s)?;
                let prefix = self.string_operand(prefix)?;
                Ok(Dynamic::from(s.strip_prefix(prefix).unwrap_or(s)))
            }
            Builtin::TrimSuffix => {
                let (s, suffix) = self.binary(args)?;
                let s = self.string_operand(s)?;
                let suffix = self.string_operand(suffix)?;
                Ok(Dynamic::from(s.strip_suffix(suffix).unwrap_or(s)))
            }
            Builtin::List => Ok(Dynamic::List(args.to_vec())),
        }
    }
}

/// Seconds per time unit accepted by `TimeSince`. Case-insensitive.
pub fn unit_seconds(unit: &str) -> Option<f64> {
    let seconds = match unit.to_lowercase().as_str() {
        "s" | "sec" | "second" | "seconds" => 1.0,
        "m" | "min" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hour" | "hours" => 3_600.0,
        "d" | "day" | "days" => 86_400.0,
        "w" | "wk" | "week" | "weeks" => 604_800.0,
        "mo" | "mon" | "month" | "months" => 2_628_288.0,
        "y" | "yr" | "year" | "years" => 31_536_000.0,
        _ => return None,
    };
    Some(seconds)
}

const REGEX_CACHE_LIMIT: usize = 256;

static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(Default::default);

fn compiled_regex(pattern: &str) -> Result<Regex> {
    if let Some(re) = REGEX_CACHE.read().get(pattern) {
        return Ok(re.clone());
    }

    let re = Regex::new(pattern).map_err(|e| EvalError::Regex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut cache = REGEX_CACHE.write();
    if cache.len() >= REGEX_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

type OperatorFn = dyn Fn(&[Dynamic], &Context) -> Result<Dynamic> + Send + Sync;

/// Operator backed by a closure, for registering custom functions.
#[derive(Clone)]
pub struct FnOperator {
    name: String,
    arity: Arity,
    f: Arc<OperatorFn>,
}

impl FnOperator {
    pub fn new<F>(name: impl Into<String>, arity: Arity, f: F) -> Self
    where
        F: Fn(&[Dynamic], &Context) -> Result<Dynamic> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for FnOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperator")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Operator for FnOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn apply(&self, args: &[Dynamic], context: &Context) -> Result<Dynamic> {
        (self.f)(args, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn apply(op: Builtin, args: Vec<Dynamic>) -> Result<Dynamic> {
        op.apply(&args, &Context::new())
    }

    #[test]
    fn test_name_lookup() {
        for op in Builtin::ALL {
            assert_eq!(Builtin::from_name(op.as_str()), Some(op));
        }
        assert_eq!(Builtin::from_name("Gte"), None);
    }

    #[test]
    fn test_logical_returns_operands() {
        let a = Dynamic::from("a");
        let empty = Dynamic::from("");
        assert_eq!(apply(Builtin::Or, vec![empty.clone(), a.clone()]).unwrap(), a);
        assert_eq!(apply(Builtin::And, vec![empty.clone(), a.clone()]).unwrap(), empty);
        assert_eq!(
            apply(Builtin::And, vec![Dynamic::Int(1), a.clone()]).unwrap(),
            a
        );
    }

    #[test]
    fn test_in_any_of_list() {
        let right = Dynamic::from(vec!["x", "y"]);
        assert_eq!(
            apply(Builtin::In, vec![Dynamic::from(vec!["a", "y"]), right.clone()]).unwrap(),
            Dynamic::Bool(true)
        );
        assert_eq!(
            apply(Builtin::In, vec![Dynamic::from(vec!["a"]), right]).unwrap(),
            Dynamic::Bool(false)
        );
        assert_eq!(
            apply(Builtin::In, vec![Dynamic::from("a"), Dynamic::Null]).unwrap(),
            Dynamic::Bool(false)
        );
    }

    #[test]
    fn test_in_rejects_scalar_container() {
        assert!(apply(Builtin::In, vec![Dynamic::Int(1), Dynamic::Int(2)]).is_err());
    }

    #[test]
    fn test_matches() {
        let result = apply(
            Builtin::Matches,
            vec![Dynamic::from("foo bar"), Dynamic::from("o b")],
        );
        assert_eq!(result.unwrap(), Dynamic::Bool(true));

        let result = apply(Builtin::Matches, vec![Dynamic::Null, Dynamic::from("^$")]);
        assert_eq!(result.unwrap(), Dynamic::Bool(true));

        let err = apply(Builtin::Matches, vec![Dynamic::from("x"), Dynamic::from("(")]);
        assert!(matches!(err, Err(EvalError::Regex { .. })));
    }

    #[test]
    fn test_concat_and_hash() {
        let joined = apply(
            Builtin::Concat,
            vec![Dynamic::from("pfx"), Dynamic::from(":"), Dynamic::Int(123)],
        )
        .unwrap();
        assert_eq!(joined, "pfx:123");
        assert_eq!(
            apply(Builtin::Hash, vec![joined]).unwrap(),
            Dynamic::Float(0.07302924453117249)
        );
    }

    #[test]
    fn test_len() {
        assert_eq!(
            apply(Builtin::Len, vec![Dynamic::from("héllo")]).unwrap(),
            Dynamic::Int(5)
        );
        assert!(apply(Builtin::Len, vec![Dynamic::Int(5)]).is_err());
    }

    #[test]
    fn test_comparison_type_error() {
        let err = apply(Builtin::Lt, vec![Dynamic::from("a"), Dynamic::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("'<' not supported"));
    }

    #[test]
    fn test_time_since_units() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let moment = Dynamic::Time(now - Duration::days(1));
        let context = Context::fixed(now);
        let since = |unit: &str| {
            Builtin::TimeSince
                .apply(&[moment.clone(), Dynamic::from(unit)], &context)
                .unwrap()
                .as_f64()
                .unwrap()
        };

        assert_eq!(since("seconds"), 86_400.0);
        assert_eq!(since("MINUTES"), 1_440.0);
        assert_eq!(since("h"), 24.0);
        assert_eq!(since("d"), 1.0);
        assert_eq!(since("w"), 1.0 / 7.0);
        assert_eq!(since("mo"), 86_400.0 / 2_628_288.0);
        assert_eq!(since("y"), 1.0 / 365.0);

        let err = Builtin::TimeSince
            .apply(&[moment.clone(), Dynamic::from("fortnight")], &context)
            .unwrap_err();
        assert_eq!(err, EvalError::InvalidUnit("fortnight".to_string()));

        let err = Builtin::TimeSince
            .apply(&[Dynamic::Null, Dynamic::from("d")], &context)
            .unwrap_err();
        assert!(matches!(err, EvalError::Type { .. }));
    }

    #[test]
    fn test_trim() {
        assert_eq!(
            apply(
                Builtin::TrimPrefix,
                vec![Dynamic::from("user:42"), Dynamic::from("user:")]
            )
            .unwrap(),
            "42"
        );
        assert_eq!(
            apply(
                Builtin::TrimSuffix,
                vec![Dynamic::from("file.txt"), Dynamic::from(".txt")]
            )
            .unwrap(),
            "file"
        );
        assert!(apply(Builtin::TrimPrefix, vec![Dynamic::Int(42), Dynamic::from("4")]).is_err());
    }

    #[test]
    fn test_fn_operator() {
        let op = FnOperator::new("Double", Arity::Exactly(1), |args, _| {
            Ok(Dynamic::Int(args[0].as_i64().unwrap_or(0) * 2))
        });
        assert_eq!(op.name(), "Double");
        assert_eq!(
            op.apply(&[Dynamic::Int(21)], &Context::new()).unwrap(),
            Dynamic::Int(42)
        );
    }
}
