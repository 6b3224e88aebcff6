//! Population selectors
//!
//! A population decides whether an entity takes part in a rollout at all.

use serde_json::json;
use tollgate_expr::{Dynamic, Expr, Field, concat, hash, is_in, le};

use crate::error::{Result, ValidationError};
use crate::events::{EventKind, Scope};
use crate::feature::EvalOptions;
use crate::value::CallType;

#[derive(Debug, Clone, Default)]
pub enum Population {
    /// Everyone
    #[default]
    Default,

    /// A stable, seeded percentage of entities
    Percent { value: f64, seed: String, expr: Expr },

    /// Entities whose id is in a fixed list
    Explicit { ids: Vec<Dynamic>, expr: Expr },

    /// Entities matching a rule
    Expression(Expr),

    /// Entities whose assignment in another feature matches a rule over
    /// `$value`, `$variant` and `$assigned`
    Feature { name: String, expr: Expr },
}

impl Population {
    /// Select `value` (in [0, 1]) of entities by hashing `$id` with `seed`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::Population;
    ///
    /// let population = Population::percent(0.2, "my_seed");
    /// assert_eq!(
    ///     population.describe()["expression"],
    ///     "Hash(Concat('my_seed', $id)) Le 0.2"
    /// );
    /// ```
    pub fn percent(value: f64, seed: impl Into<String>) -> Self {
        Self::percent_on(value, seed, Field::id())
    }

    /// Like [`percent`](Self::percent), hashing `id_field` instead of `$id`.
    pub fn percent_on(value: f64, seed: impl Into<String>, id_field: impl Into<Expr>) -> Self {
        let seed = seed.into();
        let expr = le(hash(concat([Expr::from(seed.as_str()), id_field.into()])), value);
        Self::Percent { value, seed, expr }
    }

    /// Select entities whose `$id` is one of `ids`.
    pub fn explicit<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Dynamic>,
    {
        Self::explicit_on(ids, Field::id())
    }

    /// Select entities whose `id_field` is one of `ids`.
    pub fn explicit_on<I, T>(ids: I, id_field: impl Into<Expr>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Dynamic>,
    {
        let ids: Vec<Dynamic> = ids.into_iter().map(Into::into).collect();
        let expr = is_in(id_field, Dynamic::List(ids.clone()));
        Self::Explicit { ids, expr }
    }

    pub fn expression(expr: impl Into<Expr>) -> Self {
        Self::Expression(expr.into())
    }

    /// Select entities by their assignment in the feature `name`.
    pub fn feature(name: impl Into<String>, expr: impl Into<Expr>) -> Self {
        Self::Feature {
            name: name.into(),
            expr: expr.into(),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// Membership rule, if this isn't the default population
    pub fn expr(&self) -> Option<&Expr> {
        match self {
            Self::Default => None,
            Self::Percent { expr, .. }
            | Self::Explicit { expr, .. }
            | Self::Expression(expr)
            | Self::Feature { expr, .. } => Some(expr),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if let Self::Percent { value, .. } = self {
            if *value < 0.0 {
                return Err(ValidationError::NegativePercent);
            }
            if *value > 1.0 {
                return Err(ValidationError::PercentTooLarge);
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> serde_json::Value {
        match self {
            Self::Default => json!({"type": "Population", "name": "Default"}),
            Self::Feature { name, expr } => json!({
                "type": "Population",
                "name": "Expression",
                "feature": name,
                "expression": expr.to_string(),
            }),
            other => json!({
                "type": "Population",
                "name": "Expression",
                "expression": other.expr().map(ToString::to_string),
            }),
        }
    }

    pub(crate) async fn evaluate(
        &self,
        entity: &Dynamic,
        scope: &Scope<'_>,
        opts: &EvalOptions,
    ) -> Result<bool> {
        let (subject, member) = match self {
            Self::Default => (entity.clone(), true),
            Self::Feature { name, expr } => {
                let subject = feature_subject(name, entity, opts).await?;
                let member = scope.eval(expr, &subject)?.is_truthy();
                (subject, member)
            }
            Self::Percent { expr, .. } | Self::Explicit { expr, .. } | Self::Expression(expr) => {
                (entity.clone(), scope.eval(expr, entity)?.is_truthy())
            }
        };

        scope.emit(|| EventKind::EvaluatePopulation {
            population: self.describe(),
            entity: subject,
            member,
        });
        Ok(member)
    }
}

/// Evaluate feature `name` for `entity` as its own call and describe the
/// outcome for a population rule.
///
/// The inner assignment is logged, its exposure is not.
async fn feature_subject(name: &str, entity: &Dynamic, opts: &EvalOptions) -> Result<Dynamic> {
    let feature = opts.resolve(name)?;
    let inner = opts.top_level();
    let mut value = feature.evaluate(entity, &inner).await?;
    if value.call_type() == CallType::Assignment {
        value.log(None);
    }

    Ok(Dynamic::map([
        ("value", value.value().clone()),
        ("variant", Dynamic::from(value.variant())),
        ("assigned", Dynamic::Time(value.ts())),
    ]))
}
