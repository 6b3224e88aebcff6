//! Expression trees.
//!
//! An [`Expr`] is either a literal, a field reference, or an operator applied
//! to sub-expressions. Expressions can be built in code with the helper
//! functions in this module or parsed from rule source with
//! [`crate::parse`]; both produce the same tree and the same rendering.

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::context::{Context, Tracer};
use crate::dynamic::Dynamic;
use crate::error::{ParseError, ParseResult, Result};
use crate::field::Field;
use crate::ops::{Builtin, Notation, Operator};

/// An operator applied to argument expressions.
#[derive(Debug, Clone)]
pub struct Call {
    op: Arc<dyn Operator>,
    args: Vec<Expr>,
}

impl Call {
    pub fn op(&self) -> &Arc<dyn Operator> {
        &self.op
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }
}

/// A compiled rule expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Dynamic),
    Field(Field),
    Call(Call),
}

impl Expr {
    /// Apply `op` to `args`, checking the operator's arity.
    pub fn call(op: Arc<dyn Operator>, args: Vec<Expr>) -> ParseResult<Self> {
        let arity = op.arity();
        if !arity.accepts(args.len()) {
            return Err(ParseError::Arity {
                name: op.name().to_string(),
                expected: arity.to_string(),
                actual: args.len(),
            });
        }
        Ok(Self::apply(op, args))
    }

    fn apply(op: Arc<dyn Operator>, args: Vec<Expr>) -> Self {
        Expr::Call(Call { op, args })
    }

    fn builtin(op: Builtin, args: Vec<Expr>) -> Self {
        Self::apply(op.op(), args)
    }

    /// Evaluate against `entity`.
    pub fn evaluate(&self, entity: &Dynamic, context: &Context) -> Result<Dynamic> {
        self.evaluate_traced(entity, context, None)
    }

    /// Evaluate against `entity`, reporting every operator application and
    /// field lookup to `tracer`.
    pub fn evaluate_traced(
        &self,
        entity: &Dynamic,
        context: &Context,
        tracer: Option<&dyn Tracer>,
    ) -> Result<Dynamic> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(field) => field.evaluate(entity, context, tracer),
            Expr::Call(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| arg.evaluate_traced(entity, context, tracer))
                    .collect::<Result<Vec<_>>>()?;
                let result = call.op.apply(&args, context)?;
                if let Some(tracer) = tracer {
                    tracer.trace(call.op.name(), &args, &result);
                }
                Ok(result)
            }
        }
    }

    /// Two expressions are equivalent when they render identically.
    pub fn equivalent(&self, other: &Expr) -> bool {
        self.to_string() == other.to_string()
    }

    fn is_infix(&self) -> bool {
        matches!(self, Expr::Call(call) if call.op.notation() == Notation::Infix)
    }

    pub fn equals(self, other: impl Into<Expr>) -> Expr {
        eq(self, other)
    }

    pub fn not_equals(self, other: impl Into<Expr>) -> Expr {
        ne(self, other)
    }

    pub fn less_than(self, other: impl Into<Expr>) -> Expr {
        lt(self, other)
    }

    pub fn less_or_equal(self, other: impl Into<Expr>) -> Expr {
        le(self, other)
    }

    pub fn greater_than(self, other: impl Into<Expr>) -> Expr {
        gt(self, other)
    }

    pub fn greater_or_equal(self, other: impl Into<Expr>) -> Expr {
        ge(self, other)
    }

    pub fn and(self, other: impl Into<Expr>) -> Expr {
        and(self, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Expr {
        or(self, other)
    }

    pub fn is_in(self, other: impl Into<Expr>) -> Expr {
        is_in(self, other)
    }

    pub fn has(self, other: impl Into<Expr>) -> Expr {
        has(self, other)
    }

    pub fn matches(self, pattern: impl Into<Expr>) -> Expr {
        matches(self, pattern)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        not(self)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => f.write_str(&value.repr()),
            Expr::Field(field) => write!(f, "{field}"),
            Expr::Call(call) => match call.op.notation() {
                Notation::Infix => {
                    let parts: Vec<String> = call
                        .args
                        .iter()
                        .map(|arg| {
                            if arg.is_infix() {
                                format!("({arg})")
                            } else {
                                arg.to_string()
                            }
                        })
                        .collect();
                    f.write_str(&parts.join(&format!(" {} ", call.op.name())))
                }
                Notation::Prefix => write!(f, "{}({})", call.op.name(), join(&call.args)),
                Notation::List => write!(f, "[{}]", join(&call.args)),
            },
        }
    }
}

fn join(args: &[Expr]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Expressions serialize to their source form.
impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<Dynamic> for Expr {
    fn from(value: Dynamic) -> Self {
        Expr::Literal(value)
    }
}

impl From<Field> for Expr {
    fn from(field: Field) -> Self {
        Expr::Field(field)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(value.into())
    }
}

/// Reference a (possibly nested) field: `field(["a", "b"])` is `$a.$b`.
pub fn field<I, S>(path: I) -> Expr
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Expr::Field(Field::new(path))
}

pub fn eq(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Eq, vec![a.into(), b.into()])
}

/// `Not(a Eq b)`.
pub fn ne(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    not(eq(a, b))
}

pub fn lt(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Lt, vec![a.into(), b.into()])
}

pub fn le(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Le, vec![a.into(), b.into()])
}

/// `Not(a Le b)`.
pub fn gt(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    not(le(a, b))
}

/// `Not(a Lt b)`.
pub fn ge(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    not(lt(a, b))
}

pub fn and(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::And, vec![a.into(), b.into()])
}

pub fn or(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Or, vec![a.into(), b.into()])
}

pub fn not(a: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Not, vec![a.into()])
}

pub fn is_in(item: impl Into<Expr>, container: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::In, vec![item.into(), container.into()])
}

/// `container Has item`, stored as `item In container`.
pub fn has(container: impl Into<Expr>, item: impl Into<Expr>) -> Expr {
    is_in(item, container)
}

pub fn matches(text: impl Into<Expr>, pattern: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Matches, vec![text.into(), pattern.into()])
}

pub fn concat<I>(parts: I) -> Expr
where
    I: IntoIterator,
    I::Item: Into<Expr>,
{
    Expr::builtin(Builtin::Concat, parts.into_iter().map(Into::into).collect())
}

pub fn hash(a: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Hash, vec![a.into()])
}

pub fn len(a: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::Len, vec![a.into()])
}

pub fn now() -> Expr {
    Expr::builtin(Builtin::Now, Vec::new())
}

pub fn time_since(moment: impl Into<Expr>, unit: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::TimeSince, vec![moment.into(), unit.into()])
}

pub fn trim_prefix(s: impl Into<Expr>, prefix: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::TrimPrefix, vec![s.into(), prefix.into()])
}

pub fn trim_suffix(s: impl Into<Expr>, suffix: impl Into<Expr>) -> Expr {
    Expr::builtin(Builtin::TrimSuffix, vec![s.into(), suffix.into()])
}

/// List whose elements are evaluated expressions.
pub fn list<I>(items: I) -> Expr
where
    I: IntoIterator,
    I::Item: Into<Expr>,
{
    Expr::builtin(Builtin::List, items.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn id() -> Expr {
        field(["id"])
    }

    #[test]
    fn test_render_compositions() {
        assert_eq!(ne("foo", "bar").to_string(), "Not('foo' Eq 'bar')");
        assert_eq!(gt(10, 9).to_string(), "Not(10 Le 9)");
        assert_eq!(ge(10, 9).to_string(), "Not(10 Lt 9)");
        assert_eq!(has(field(["outcomes"]), "xyz").to_string(), "'xyz' In $outcomes");
    }

    #[test]
    fn test_render_nested_infix() {
        let expr = id().equals("foo").and(hash(id()).less_than(0.5));
        assert_eq!(expr.to_string(), "($id Eq 'foo') And (Hash($id) Lt 0.5)");

        let expr = concat([field(["first_name"]), " ".into(), field(["last_name"])])
            .matches("foo")
            .or(field(["outcomes"]).has("xyz"));
        assert_eq!(
            expr.to_string(),
            "(Concat($first_name, ' ', $last_name) Matches 'foo') Or ('xyz' In $outcomes)"
        );
    }

    #[test]
    fn test_render_list() {
        let expr = list([Expr::from(1), Expr::from(2), id()]);
        assert_eq!(expr.to_string(), "[1, 2, $id]");
        let entity = Dynamic::from(json!({"id": 3}));
        assert_eq!(
            expr.evaluate(&entity, &Context::new()).unwrap(),
            Dynamic::from(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_evaluate() {
        let expr = hash(concat([Expr::from("test-"), id()])).less_than(0.5);
        let entity = Dynamic::from(json!({"id": "foo"}));
        assert_eq!(
            expr.evaluate(&entity, &Context::new()).unwrap(),
            Dynamic::Bool(false)
        );

        let expr = hash(id())
            .less_than(0.5)
            .or(id().is_in(Dynamic::from(vec!["a", "b", "c"])));
        let entity = Dynamic::from(json!({"id": "c"}));
        assert_eq!(
            expr.evaluate(&entity, &Context::new()).unwrap(),
            Dynamic::Bool(true)
        );
    }

    #[test]
    fn test_trace_order() {
        let calls = RefCell::new(Vec::new());
        let tracer = |name: &str, args: &[Dynamic], result: &Dynamic| {
            calls
                .borrow_mut()
                .push(format!("{name}{}={}", Dynamic::from(args.to_vec()), result));
        };

        let expr = !id().equals("a");
        let entity = Dynamic::from(json!({"id": "a"}));
        let result = expr
            .evaluate_traced(&entity, &Context::new(), Some(&tracer))
            .unwrap();
        assert_eq!(result, Dynamic::Bool(false));
        assert_eq!(
            calls.into_inner(),
            vec![
                "Field[{'id': 'a'}, '$id']=a",
                "Eq['a', 'a']=True",
                "Not[True]=False",
            ]
        );
    }

    #[test]
    fn test_arity_checked() {
        let err = Expr::call(Builtin::Hash.op(), vec![]).unwrap_err();
        assert!(matches!(err, ParseError::Arity { actual: 0, .. }));
        assert!(Expr::call(Builtin::Concat.op(), vec![]).is_ok());
    }

    #[test]
    fn test_serialize_as_source() {
        let expr = id().equals("foo");
        assert_eq!(serde_json::to_value(&expr).unwrap(), json!("$id Eq 'foo'"));
    }
}
