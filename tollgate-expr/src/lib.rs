//! Rule Expressions for Tollgate
//!
//! A small, strongly-ordered expression language for describing who belongs
//! to a population and how entities are bucketed into experiment arms.
//!
//! # Features
//!
//! - 🧮 **Expressions** - Comparisons, boolean logic, membership and regex matching
//! - 🔤 **Rule Source** - Parse `$field Eq 'value'` style rules from configuration
//! - 🎲 **Stable Hashing** - MurmurHash3-based bucketing shared across implementations
//! - 🔌 **Custom Functions** - Register your own operators by name
//! - 🔍 **Tracing** - Observe every operator application during evaluation
//!
//! # Quick Start
//!
//! ```
//! use tollgate_expr::*;
//! use serde_json::json;
//!
//! let rule = parse("$country In ['CA', 'US'] And Hash($id) Lt 0.5").unwrap();
//!
//! let user = Dynamic::from(json!({"id": "abc", "country": "US"}));
//! let member = rule.evaluate(&user, &Context::new()).unwrap();
//! assert_eq!(member, Dynamic::Bool(false));
//! ```
//!
//! # Building Expressions in Code
//!
//! ```
//! use tollgate_expr::*;
//!
//! let rule = hash(concat([Expr::from("test-"), field(["id"])])).less_than(0.5);
//! assert_eq!(rule.to_string(), "Hash(Concat('test-', $id)) Lt 0.5");
//! assert!(rule.equivalent(&parse("Hash(Concat('test-', $id)) Lt 0.5").unwrap()));
//! ```
//!
//! # Custom Functions
//!
//! ```
//! use tollgate_expr::*;
//!
//! register_fn("Domain", Arity::Exactly(1), |args, _| {
//!     let email = args[0].as_str().unwrap_or_default();
//!     Ok(Dynamic::from(email.rsplit('@').next().unwrap_or_default()))
//! });
//!
//! let rule = parse("Domain($email) Eq 'example.com'").unwrap();
//! let user = Dynamic::map([("email", "jo@example.com")]);
//! assert_eq!(rule.evaluate(&user, &Context::new()).unwrap(), Dynamic::Bool(true));
//! ```

pub mod compiler;
pub mod context;
pub mod dynamic;
pub mod error;
pub mod expr;
pub mod field;
pub mod hash;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod registry;
pub mod tree;

pub use compiler::{ExprCompiler, parse};
pub use context::{Clock, Context, Tracer};
pub use dynamic::{Dynamic, Entity, Functor};
pub use error::{EvalError, ParseError, ParseResult, Result};
pub use expr::{
    Call, Expr, and, concat, eq, field, ge, gt, has, hash, is_in, le, len, list, lt, matches, ne,
    not, now, or, time_since, trim_prefix, trim_suffix,
};
pub use field::{Field, MAX_FUNCTOR_DEPTH, resolve_functor};
pub use hash::{hash_id, murmur3_x64_128};
pub use ops::{Arity, Builtin, FnOperator, Notation, Operator};
pub use registry::{
    Constructor, lookup, register_fn, register_function, registered_functions,
    unregister_function,
};
