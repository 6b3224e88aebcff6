//! Function registry.
//!
//! Rule source resolves `Name(...)` calls against the custom functions
//! registered here first and the built-in operators second.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::context::Context;
use crate::dynamic::Dynamic;
use crate::error::{ParseError, ParseResult, Result};
use crate::expr::Expr;
use crate::ops::{Arity, Builtin, FnOperator, Operator};

static FUNCTIONS: Lazy<RwLock<HashMap<String, Arc<dyn Operator>>>> = Lazy::new(Default::default);

/// Builds an expression node for a named function.
#[derive(Debug, Clone)]
pub enum Constructor {
    /// Apply the operator directly.
    Op(Arc<dyn Operator>),
    /// `outer(inner(args...))`, e.g. `Ne` is `Not(a Eq b)`.
    Composed {
        outer: Arc<dyn Operator>,
        inner: Arc<dyn Operator>,
    },
    /// Binary operator with its operands swapped, e.g. `a Has b` is `b In a`.
    Flipped(Arc<dyn Operator>),
}

impl Constructor {
    /// Build the node from parsed arguments.
    pub fn build(&self, args: Vec<Expr>) -> ParseResult<Expr> {
        match self {
            Constructor::Op(op) => Expr::call(op.clone(), args),
            Constructor::Composed { outer, inner } => {
                let inner = Expr::call(inner.clone(), args)?;
                Expr::call(outer.clone(), vec![inner])
            }
            Constructor::Flipped(op) => {
                let mut args = args;
                if args.len() != 2 {
                    return Err(ParseError::Arity {
                        name: op.name().to_string(),
                        expected: Arity::Exactly(2).to_string(),
                        actual: args.len(),
                    });
                }
                args.reverse();
                Expr::call(op.clone(), args)
            }
        }
    }
}

/// Constructor for a built-in name, including the composed comparison
/// aliases.
pub fn builtin_constructor(name: &str) -> Option<Constructor> {
    let composed = |outer: Builtin, inner: Builtin| Constructor::Composed {
        outer: outer.op(),
        inner: inner.op(),
    };

    match name {
        "Ne" => Some(composed(Builtin::Not, Builtin::Eq)),
        "Gt" => Some(composed(Builtin::Not, Builtin::Le)),
        "Ge" => Some(composed(Builtin::Not, Builtin::Lt)),
        "Has" => Some(Constructor::Flipped(Builtin::In.op())),
        _ => Builtin::from_name(name).map(|op| Constructor::Op(op.op())),
    }
}

/// Resolve a function name, preferring custom registrations.
pub fn lookup(name: &str) -> Option<Constructor> {
    if let Some(op) = FUNCTIONS.read().get(name) {
        return Some(Constructor::Op(op.clone()));
    }
    builtin_constructor(name)
}

/// Register a custom operator under its own name, replacing any previous
/// registration.
pub fn register_function(op: impl Operator + 'static) {
    let name = op.name().to_string();
    debug!(function = %name, "Registering expression function");
    FUNCTIONS.write().insert(name, Arc::new(op));
}

/// Register a closure as a custom function.
///
/// # Examples
///
/// ```
/// use tollgate_expr::{parse, register_fn, Arity, Context, Dynamic};
///
/// register_fn("Shout", Arity::Exactly(1), |args, _| {
///     Ok(Dynamic::from(format!("{}!", args[0])))
/// });
///
/// let expr = parse("Shout('hi')").unwrap();
/// let value = expr.evaluate(&Dynamic::Null, &Context::new()).unwrap();
/// assert_eq!(value, "hi!");
/// ```
pub fn register_fn<F>(name: impl Into<String>, arity: Arity, f: F)
where
    F: Fn(&[Dynamic], &Context) -> Result<Dynamic> + Send + Sync + 'static,
{
    register_function(FnOperator::new(name, arity, f));
}

/// Remove a custom function. Returns whether one was registered.
pub fn unregister_function(name: &str) -> bool {
    FUNCTIONS.write().remove(name).is_some()
}

/// Names of all registered custom functions.
pub fn registered_functions() -> Vec<String> {
    let mut names: Vec<String> = FUNCTIONS.read().keys().cloned().collect();
    names.sort();
    names
}
