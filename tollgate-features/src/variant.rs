//! Variants
//!
//! A variant is a named treatment. Its payload is either a literal value,
//! another feature (evaluated in the same call), or a function of the entity.

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tollgate_expr::{Context, Dynamic};

use crate::error::{Result, ValidationError};
use crate::events::{EventKind, Scope};
use crate::feature::EvalOptions;

/// Computes a variant's value from the entity.
pub type VariantFn = Arc<dyn Fn(&Dynamic, &Context) -> tollgate_expr::Result<Dynamic> + Send + Sync>;

#[derive(Clone)]
pub enum Payload {
    Literal(Dynamic),
    /// Name of a feature to evaluate in turn
    Feature(String),
    Functor(VariantFn),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Feature(name) => f.debug_tuple("Feature").field(name).finish(),
            Self::Functor(_) => f.write_str("Functor(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variant {
    name: String,
    payload: Payload,
}

impl Variant {
    /// Create a variant with a literal value
    pub fn new(name: impl Into<String>, value: impl Into<Dynamic>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Literal(value.into()),
        }
    }

    /// Create a variant that delegates to the feature named `feature`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::Variant;
    ///
    /// let variant = Variant::nested("on", "checkout_experiment");
    /// assert!(variant.is_nested());
    /// ```
    pub fn nested(name: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Feature(feature.into()),
        }
    }

    /// Create a variant whose value is computed per entity
    pub fn functor<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Dynamic, &Context) -> tollgate_expr::Result<Dynamic> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            payload: Payload::Functor(Arc::new(f)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_nested(&self) -> bool {
        !matches!(self.payload, Payload::Literal(_))
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::UnnamedVariant);
        }
        Ok(())
    }

    pub fn describe(&self) -> serde_json::Value {
        let value = match &self.payload {
            Payload::Literal(value) => value.to_json(),
            Payload::Feature(name) => json!({"type": "Feature", "name": name}),
            Payload::Functor(_) => serde_json::Value::Null,
        };
        json!({
            "type": "Variant",
            "name": self.name,
            "value": value,
            "nested": self.is_nested(),
        })
    }

    pub(crate) async fn evaluate(
        &self,
        entity: &Dynamic,
        scope: &Scope<'_>,
        opts: &EvalOptions,
    ) -> Result<Dynamic> {
        scope.emit(|| EventKind::EnterVariant {
            variant: self.name.clone(),
        });

        match &self.payload {
            Payload::Literal(value) => {
                scope.emit(|| EventKind::LeaveVariant {
                    value: value.clone(),
                });
                Ok(value.clone())
            }
            Payload::Feature(name) => {
                scope.emit(|| EventKind::VariantRecurse {
                    inner: name.clone(),
                });
                let feature = opts.resolve(name)?;
                let nested = opts.nested(scope.call_id());
                let value = feature.evaluate(entity, &nested).await?;
                Ok(value.into_value())
            }
            Payload::Functor(f) => {
                scope.emit(|| EventKind::VariantRecurse {
                    inner: "<function>".to_string(),
                });
                Ok(f(entity, &opts.context)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(variant: &Variant, entity: &Dynamic) -> Result<Dynamic> {
        let context = Context::new();
        let scope = Scope::new(None, "test", &context);
        tokio_test::block_on(variant.evaluate(entity, &scope, &EvalOptions::default()))
    }

    #[test]
    fn test_literal() {
        let variant = Variant::new("a", "A");
        assert!(!variant.is_nested());
        assert_eq!(evaluate(&variant, &Dynamic::Null).unwrap(), "A");
    }

    #[test]
    fn test_functor() {
        let variant = Variant::functor("greet", |entity, _| {
            Ok(Dynamic::from(format!("hello {}", entity.get("name"))))
        });
        assert!(variant.is_nested());
        let entity = Dynamic::map([("name", "jo")]);
        assert_eq!(evaluate(&variant, &entity).unwrap(), "hello jo");
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            Variant::new("", 1).validate(),
            Err(ValidationError::UnnamedVariant)
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            Variant::new("foo", "Foo").describe(),
            json!({"type": "Variant", "name": "foo", "value": "Foo", "nested": false})
        );
    }
}
