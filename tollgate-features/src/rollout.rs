//! Rollouts
//!
//! A rollout selects a population, then splits it into weighted arms using a
//! randomizer expression. The default randomizer hashes the rollout name with
//! the entity id, so assignments are stable across processes and
//! independent between rollouts.

use std::collections::BTreeMap;
use tollgate_expr::{Dynamic, EvalError, Expr, Field, concat, hash};

use crate::arm::Arm;
use crate::error::{GateError, Result, ValidationError};
use crate::events::{EventKind, Scope};
use crate::feature::EvalOptions;
use crate::population::Population;
use crate::variant::Variant;

/// Name of the catch-all rollout every feature ends with.
pub const DEFAULT_ROLLOUT: &str = "default";

#[derive(Debug, Clone)]
pub struct Rollout {
    name: String,
    population: Population,
    arms: Vec<Arm>,
    randomizer: Expr,
    sticky: Option<bool>,
}

impl Rollout {
    /// Create a rollout; arms without a weight share the remaining weight
    /// evenly.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::{Arm, Population, Rollout};
    ///
    /// let rollout = Rollout::new(
    ///     "beta",
    ///     Population::percent(0.1, "beta"),
    ///     [Arm::new("a"), Arm::weighted("b", 0.5)],
    /// );
    /// assert_eq!(rollout.arms()[0].weight(), 0.5);
    /// ```
    pub fn new<I, A>(name: impl Into<String>, population: Population, arms: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arm>,
    {
        let name = name.into();
        let randomizer = default_randomizer(&name);
        Self {
            name,
            population,
            arms: fill_weights(arms.into_iter().map(Into::into).collect()),
            randomizer,
            sticky: None,
        }
    }

    /// Create the catch-all rollout over the default population.
    pub fn default_rollout<I, A>(arms: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arm>,
    {
        Self::new(DEFAULT_ROLLOUT, Population::Default, arms)
    }

    /// Replace the randomizer. It must evaluate to a number in [0, 1].
    pub fn with_randomizer(mut self, randomizer: impl Into<Expr>) -> Self {
        self.randomizer = randomizer.into();
        self
    }

    /// Override stickiness; by default assignments are sticky whenever a
    /// sticky fetcher is configured.
    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = Some(sticky);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn arms(&self) -> &[Arm] {
        &self.arms
    }

    pub fn randomizer(&self) -> &Expr {
        &self.randomizer
    }

    pub fn sticky(&self) -> Option<bool> {
        self.sticky
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_ROLLOUT
    }

    /// Check the rollout against the variants of its feature.
    pub fn validate(
        &self,
        variants: &BTreeMap<String, Variant>,
    ) -> std::result::Result<(), ValidationError> {
        if self.arms.is_empty() {
            return Err(ValidationError::NoArms);
        }

        let mut total = 0.0;
        for arm in &self.arms {
            if !variants.contains_key(&arm.variant) {
                return Err(ValidationError::UnknownVariant(arm.variant.clone()));
            }
            arm.validate()?;
            total += arm.weight();
        }

        // Weights are compared exactly
        if total != 1.0 {
            return Err(ValidationError::WeightSum(total));
        }

        self.population.validate()?;

        if self.is_default() && !self.population.is_default() {
            return Err(ValidationError::DefaultPopulation);
        }
        Ok(())
    }

    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Rollout",
            "name": self.name,
            "arms": self.arms.iter().map(Arm::describe).collect::<Vec<_>>(),
            "population": self.population.describe(),
            "randomizer": self.randomizer.to_string(),
            "sticky": self.sticky,
        })
    }

    /// Name of the variant `entity` is assigned, or `None` when it is not
    /// part of the population.
    pub(crate) async fn evaluate(
        &self,
        entity: &Dynamic,
        scope: &Scope<'_>,
        opts: &EvalOptions,
    ) -> Result<Option<&str>> {
        scope.emit(|| EventKind::EnterRollout {
            rollout: self.name.clone(),
        });

        if !self.population.evaluate(entity, scope, opts).await? {
            scope.emit(|| EventKind::LeaveRollout { member: false });
            return Ok(None);
        }

        let result = scope.eval(&self.randomizer, entity)?;
        scope.emit(|| EventKind::Randomize {
            entity: entity.clone(),
            function: self.randomizer.to_string(),
            result: result.clone(),
        });

        let x = match result.as_f64() {
            Some(x) if (0.0..=1.0).contains(&x) => x,
            _ => {
                return Err(EvalError::type_error(
                    "randomizer",
                    format!("expected a number in [0, 1], got {}", result.repr()),
                )
                .into());
            }
        };

        let mut cutoff = 0.0;
        for arm in &self.arms {
            cutoff += arm.weight();
            scope.emit(|| EventKind::EnterArm {
                arm: arm.variant.clone(),
                cutoff,
                x,
            });
            if x <= cutoff {
                scope.emit(|| EventKind::LeaveArm { matched: true });
                scope.emit(|| EventKind::LeaveRollout { member: true });
                return Ok(Some(arm.variant.as_str()));
            }
            scope.emit(|| EventKind::LeaveArm { matched: false });
        }

        Err(GateError::NoArm {
            rollout: self.name.clone(),
        })
    }
}

/// `Hash(Concat(name, ':', $id))`
fn default_randomizer(name: &str) -> Expr {
    hash(concat([Expr::from(name), Expr::from(":"), Field::id().into()]))
}

fn fill_weights(mut arms: Vec<Arm>) -> Vec<Arm> {
    let mut remainder = 1.0;
    let mut unknown = arms.len();
    for weight in arms.iter().filter_map(|arm| arm.weight) {
        remainder -= weight;
        unknown -= 1;
    }

    if unknown > 0 {
        let share = remainder / unknown as f64;
        for arm in arms.iter_mut().filter(|arm| arm.weight.is_none()) {
            arm.weight = Some(share);
        }
    }
    arms
}
