//! Compiles a [`ParseTree`] into an [`Expr`].

use std::collections::HashMap;
use std::str::FromStr;

use crate::dynamic::Dynamic;
use crate::error::{ParseError, ParseResult};
use crate::expr::{Expr, not};
use crate::field::Field;
use crate::lexer::Span;
use crate::ops::Builtin;
use crate::parser::parse_tree;
use crate::registry::{Constructor, builtin_constructor, lookup};
use crate::tree::{Listener, NodeId, NodeKind, ParseTree, TreeWalker};

/// What to do with a node's children once they are all compiled.
#[derive(Debug)]
enum Pending {
    Identity,
    Negate,
    Construct(Constructor),
    Array,
    Args,
    Field(Field),
    Literal(Dynamic),
}

#[derive(Debug)]
struct Frame {
    pending: Pending,
    args: Vec<Expr>,
}

enum Built {
    Expr(Expr),
    Args(Vec<Expr>),
}

/// Listener that builds expressions bottom-up: each node collects its
/// children's results and hands its own result to its parent on exit.
#[derive(Debug, Default)]
pub struct ExprCompiler {
    frames: HashMap<NodeId, Frame>,
    root: Option<Expr>,
}

impl ExprCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compiled expression, once the walk has finished.
    pub fn into_root(self) -> ParseResult<Expr> {
        self.root
            .ok_or_else(|| ParseError::internal("expression is empty"))
    }

    fn pending_for(kind: &NodeKind, span: Span) -> ParseResult<Pending> {
        let pending = match kind {
            NodeKind::Program => Pending::Identity,
            NodeKind::Parens { negated: true } => Pending::Negate,
            NodeKind::Parens { negated: false } => Pending::Identity,
            NodeKind::Logical(op) | NodeKind::Compare(op) => {
                let ctor = builtin_constructor(op.as_str()).ok_or_else(|| {
                    ParseError::internal(format!("no operator for '{}'", op.as_str()))
                })?;
                Pending::Construct(ctor)
            }
            NodeKind::Function(name) => {
                let ctor = lookup(name)
                    .ok_or_else(|| ParseError::UnknownFunction { name: name.clone() })?;
                Pending::Construct(ctor)
            }
            NodeKind::Array => Pending::Array,
            NodeKind::Args => Pending::Args,
            NodeKind::Attribute(path) => Pending::Field(Field::new(path.iter().cloned())),
            NodeKind::Str(s) => Pending::Literal(Dynamic::Str(s.clone())),
            NodeKind::Int(text) => Pending::Literal(Dynamic::Int(
                text.parse().map_err(|_| malformed(text, span))?,
            )),
            NodeKind::Float(text) => Pending::Literal(Dynamic::Float(
                text.parse().map_err(|_| malformed(text, span))?,
            )),
            NodeKind::Bool(b) => Pending::Literal(Dynamic::Bool(*b)),
            NodeKind::Null => Pending::Literal(Dynamic::Null),
        };
        Ok(pending)
    }

    fn build(frame: Frame) -> ParseResult<Built> {
        let Frame { pending, args } = frame;
        let expr = match pending {
            Pending::Identity => single(args)?,
            Pending::Negate => not(single(args)?),
            Pending::Construct(ctor) => ctor.build(args)?,
            Pending::Array => {
                let literals: Option<Vec<Dynamic>> = args
                    .iter()
                    .map(|arg| match arg {
                        Expr::Literal(value) => Some(value.clone()),
                        _ => None,
                    })
                    .collect();
                match literals {
                    Some(values) => Expr::Literal(Dynamic::List(values)),
                    None => Expr::call(Builtin::List.op(), args)?,
                }
            }
            Pending::Args => return Ok(Built::Args(args)),
            Pending::Field(field) => Expr::Field(field),
            Pending::Literal(value) => Expr::Literal(value),
        };
        Ok(Built::Expr(expr))
    }
}

fn single(mut args: Vec<Expr>) -> ParseResult<Expr> {
    match (args.pop(), args.is_empty()) {
        (Some(inner), true) => Ok(inner),
        _ => Err(ParseError::internal("expected a single sub-expression")),
    }
}

fn malformed(text: &str, span: Span) -> ParseError {
    ParseError::MalformedLiteral {
        line: span.line,
        column: span.column,
        text: text.to_string(),
    }
}

impl Listener for ExprCompiler {
    type Error = ParseError;

    fn enter(&mut self, tree: &ParseTree, id: NodeId) -> ParseResult<()> {
        let node = tree.node(id);
        let pending = Self::pending_for(&node.kind, node.span)?;
        self.frames.insert(
            id,
            Frame {
                pending,
                args: Vec::new(),
            },
        );
        Ok(())
    }

    fn exit(&mut self, tree: &ParseTree, id: NodeId) -> ParseResult<()> {
        let frame = self
            .frames
            .remove(&id)
            .ok_or_else(|| ParseError::internal("node exited before it was entered"))?;
        let built = Self::build(frame)?;

        if let Some(parent) = tree
            .node(id)
            .parent
            .and_then(|parent| self.frames.get_mut(&parent))
        {
            match built {
                Built::Expr(expr) => parent.args.push(expr),
                Built::Args(args) => parent.args.extend(args),
            }
            return Ok(());
        }

        match built {
            Built::Args(_) => Err(ParseError::internal("unexpected top-level function args")),
            Built::Expr(expr) => {
                if !self.frames.is_empty() {
                    return Err(ParseError::internal("orphaned nodes left after compiling"));
                }
                self.root = Some(expr);
                Ok(())
            }
        }
    }
}

/// Parse rule source into an expression.
///
/// # Examples
///
/// ```
/// use tollgate_expr::{parse, Context, Dynamic};
/// use serde_json::json;
///
/// let expr = parse("Hash(Concat($prefix, ':', $id)) Lt 0.5").unwrap();
/// let entity = Dynamic::from(json!({"prefix": "pfx", "id": "123"}));
/// assert_eq!(expr.evaluate(&entity, &Context::new()).unwrap(), Dynamic::Bool(true));
/// ```
pub fn parse(src: &str) -> ParseResult<Expr> {
    let tree = parse_tree(src)?;
    let mut compiler = ExprCompiler::new();
    TreeWalker::walk(&mut compiler, &tree)?;
    compiler.into_root()
}

impl FromStr for Expr {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        parse(s)
    }
}
