//! Field references.

use std::fmt;

use crate::context::{Context, Tracer};
use crate::dynamic::Dynamic;
use crate::error::{EvalError, Result};

/// Upper bound on functor calls while resolving a single path segment.
pub const MAX_FUNCTOR_DEPTH: usize = 1000;

/// A dotted path into an entity, written `$a.$b` in rule source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    path: Vec<String>,
}

impl Field {
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// The `$id` field every entity is bucketed by by default.
    pub fn id() -> Self {
        Self::new(["id"])
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Resolve the path against `entity`.
    ///
    /// Missing segments resolve to `Null`. Callable values are invoked with
    /// the context until they produce a plain value.
    pub fn resolve(&self, entity: &Dynamic, context: &Context) -> Result<Dynamic> {
        let mut current = entity.clone();
        for name in &self.path {
            current = resolve_functor(current.get(name), context)?;
        }
        Ok(current)
    }

    /// Resolve and report the lookup to `tracer`.
    pub fn evaluate(
        &self,
        entity: &Dynamic,
        context: &Context,
        tracer: Option<&dyn Tracer>,
    ) -> Result<Dynamic> {
        let result = self.resolve(entity, context)?;
        if let Some(tracer) = tracer {
            tracer.trace(
                "Field",
                &[entity.clone(), Dynamic::Str(self.to_string())],
                &result,
            );
        }
        Ok(result)
    }
}

/// Call functors until a non-callable value comes out.
pub fn resolve_functor(mut value: Dynamic, context: &Context) -> Result<Dynamic> {
    for _ in 0..MAX_FUNCTOR_DEPTH {
        match value {
            Dynamic::Functor(f) => value = f.call(context)?,
            other => return Ok(other),
        }
    }
    Err(EvalError::ResolutionDepth)
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.path.iter().map(|name| format!("${name}")).collect();
        f.write_str(&parts.join("."))
    }
}
