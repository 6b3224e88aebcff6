//! Features
//!
//! A feature is a set of variants plus an ordered list of rollouts. The
//! first rollout whose population contains the entity picks the variant;
//! the last rollout is always the catch-all `default` rollout.

use futures::future::BoxFuture;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tollgate_expr::{Context, Dynamic};
use tracing::warn;

use crate::arm::Arm;
use crate::cache::AssignmentCache;
use crate::error::{GateError, Result, ValidationError};
use crate::events::{AssignmentSource, EventKind, EventSink, Scope};
use crate::ids::{CallIdGenerator, UuidCallIds};
use crate::registry::FeatureSet;
use crate::rollout::{DEFAULT_ROLLOUT, Rollout};
use crate::sticky::{StickyAssignment, StickyFetcher};
use crate::value::{CallType, Value};
use crate::variant::Variant;

/// Everything an evaluation needs besides the feature and the entity.
#[derive(Clone)]
pub struct EvalOptions {
    /// Receives evaluation events
    pub sink: Option<Arc<dyn EventSink>>,

    /// Looks up existing assignments
    pub sticky: Option<Arc<dyn StickyFetcher>>,

    /// Local cache of sticky assignments
    pub cache: Option<Arc<AssignmentCache>>,

    /// Features that nested variants and feature populations refer to
    pub features: Option<Arc<FeatureSet>>,

    /// Clock for events, timestamps and time-based rules
    pub context: Context,

    /// Generates the id of each top-level call
    pub call_ids: Arc<dyn CallIdGenerator>,

    /// Id of the enclosing call; set when evaluating a nested feature
    pub call_id: Option<String>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            sink: None,
            sticky: None,
            cache: None,
            features: None,
            context: Context::new(),
            call_ids: Arc::new(UuidCallIds),
            call_id: None,
        }
    }
}

impl EvalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_sticky(mut self, sticky: Arc<dyn StickyFetcher>) -> Self {
        self.sticky = Some(sticky);
        self
    }

    pub fn with_cache(mut self, cache: Arc<AssignmentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_features(mut self, features: Arc<FeatureSet>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_call_ids(mut self, call_ids: Arc<dyn CallIdGenerator>) -> Self {
        self.call_ids = call_ids;
        self
    }

    /// Look up a feature that this evaluation refers to by name.
    pub(crate) fn resolve(&self, name: &str) -> Result<Arc<Feature>> {
        self.features
            .as_ref()
            .and_then(|features| features.get(name))
            .ok_or_else(|| GateError::MissingFeature(name.to_string()))
    }

    /// Options for a nested feature within the call `call_id`.
    pub(crate) fn nested(&self, call_id: &str) -> Self {
        Self {
            call_id: Some(call_id.to_string()),
            ..self.clone()
        }
    }

    /// Options for a separate top-level call.
    pub(crate) fn top_level(&self) -> Self {
        Self {
            call_id: None,
            ..self.clone()
        }
    }
}

impl fmt::Debug for EvalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalOptions")
            .field("sink", &self.sink.is_some())
            .field("sticky", &self.sticky.is_some())
            .field("cache", &self.cache)
            .field("features", &self.features)
            .field("context", &self.context)
            .field("call_ids", &self.call_ids)
            .field("call_id", &self.call_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    name: String,
    variants: BTreeMap<String, Variant>,
    rollouts: Vec<Rollout>,
}

impl Feature {
    /// Start building a feature
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::*;
    ///
    /// let feature = Feature::builder("ab_feature")
    ///     .with_variant(Variant::new("a", "A"))
    ///     .with_variant(Variant::new("b", "B"))
    ///     .with_rollout(Rollout::default_rollout(["a", "b"]))
    ///     .build()
    ///     .unwrap();
    ///
    /// # tokio_test::block_on(async {
    /// let user = tollgate_expr::Dynamic::map([("id", "1")]);
    /// let value = feature.evaluate(&user, &EvalOptions::default()).await.unwrap();
    /// assert_eq!(value, "A");
    /// # });
    /// ```
    pub fn builder(name: impl Into<String>) -> FeatureBuilder {
        FeatureBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &BTreeMap<String, Variant> {
        &self.variants
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.get(name)
    }

    pub fn rollouts(&self) -> &[Rollout] {
        &self.rollouts
    }

    /// Ensure the feature configuration makes sense.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.variants.is_empty() {
            return Err(ValidationError::NoVariants);
        }
        for variant in self.variants.values() {
            variant.validate()?;
        }

        if self.rollouts.is_empty() {
            return Err(ValidationError::NoRollouts);
        }
        if !self.rollouts.iter().any(Rollout::is_default) {
            return Err(ValidationError::MissingDefaultRollout(DEFAULT_ROLLOUT));
        }
        if !self.rollouts.last().is_some_and(Rollout::is_default) {
            return Err(ValidationError::DefaultRolloutNotLast(DEFAULT_ROLLOUT));
        }

        for rollout in &self.rollouts {
            rollout.validate(&self.variants)?;
        }
        Ok(())
    }

    pub fn describe(&self) -> serde_json::Value {
        let variants: serde_json::Map<String, serde_json::Value> = self
            .variants
            .iter()
            .map(|(name, variant)| (name.clone(), variant.describe()))
            .collect();
        json!({
            "type": "Feature",
            "name": self.name,
            "variants": variants,
            "rollouts": self.rollouts.iter().map(Rollout::describe).collect::<Vec<_>>(),
        })
    }

    /// Assign a variant to `entity`.
    ///
    /// A sticky assignment (from the local cache or the sticky fetcher) is
    /// returned as an exposure. Otherwise the rollouts are tried in order
    /// and the first winning arm's variant is returned as a fresh
    /// assignment.
    pub fn evaluate<'a>(
        &'a self,
        entity: &'a Dynamic,
        opts: &'a EvalOptions,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let nested = opts.call_id.is_some();
            let call_id = match &opts.call_id {
                Some(call_id) => call_id.clone(),
                None => opts.call_ids.next_id(),
            };

            let result = self.assign(entity, opts, &call_id, nested).await;
            // No Value exists on failure to release the record
            if result.is_err()
                && !nested
                && let Some(sink) = &opts.sink
            {
                sink.drop_log(&call_id);
            }
            result
        })
    }

    async fn assign(
        &self,
        entity: &Dynamic,
        opts: &EvalOptions,
        call_id: &str,
        nested: bool,
    ) -> Result<Value> {
        let scope = Scope::new(opts.sink.as_deref(), call_id, &opts.context);
        // Nested values belong to the enclosing call's log
        let sink = if nested { None } else { opts.sink.clone() };

        if !nested {
            scope.emit(|| EventKind::EnterGate {
                feature: self.name.clone(),
                entity: entity.clone(),
                entity_type: entity.type_name().to_string(),
                definition: self.describe(),
            });
        }
        scope.emit(|| EventKind::EnterFeature {
            feature: self.name.clone(),
            entity: entity.clone(),
        });

        if let Some(fetcher) = &opts.sticky
            && let Some(existing) = self.sticky_assignment(fetcher.as_ref(), entity, &scope, opts).await?
        {
            self.leave(&scope, nested, &existing.value);
            return Ok(Value::new(
                existing.value,
                existing.variant,
                existing.ts,
                call_id,
                CallType::Exposure,
                sink,
            ));
        }

        for rollout in &self.rollouts {
            let Some(name) = rollout.evaluate(entity, &scope, opts).await? else {
                continue;
            };

            let sticky = rollout.sticky().unwrap_or(opts.sticky.is_some());
            if sticky && opts.sticky.is_none() {
                warn!(
                    feature = %self.name,
                    rollout = %rollout.name(),
                    "Sticky assignment requested without a sticky fetcher"
                );
            }

            let variant = self
                .variants
                .get(name)
                .ok_or_else(|| ValidationError::UnknownVariant(name.to_string()))?;
            scope.emit(|| EventKind::ChoseVariant {
                variant: variant.name().to_string(),
                sticky,
                definition: variant.describe(),
            });

            let value = variant.evaluate(entity, &scope, opts).await?;
            let ts = opts.context.now();

            if sticky
                && opts.sticky.is_some()
                && let Some(cache) = &opts.cache
            {
                cache.set(
                    &self.name,
                    entity,
                    StickyAssignment::new(variant.name(), value.clone(), ts),
                );
            }

            self.leave(&scope, nested, &value);
            return Ok(Value::new(
                value,
                variant.name(),
                ts,
                call_id,
                CallType::Assignment,
                sink,
            ));
        }

        scope.emit(|| EventKind::Error {
            message: "No variant found".to_string(),
        });
        self.leave(&scope, nested, &Dynamic::Null);
        Err(GateError::NoVariant {
            feature: self.name.clone(),
        })
    }

    /// Existing assignment from the local cache, falling back to the
    /// fetcher.
    async fn sticky_assignment(
        &self,
        fetcher: &dyn StickyFetcher,
        entity: &Dynamic,
        scope: &Scope<'_>,
        opts: &EvalOptions,
    ) -> Result<Option<StickyAssignment>> {
        let cached = opts
            .cache
            .as_ref()
            .and_then(|cache| cache.get(&self.name, entity));

        let (existing, source) = match cached {
            Some(hit) => (Some(hit), AssignmentSource::Local),
            None => match fetcher.fetch(self, entity).await {
                Ok(existing) => (existing, AssignmentSource::Remote),
                Err(source) => {
                    scope.emit(|| EventKind::Error {
                        message: format!("Error evaluating sticky assignment: {source}"),
                    });
                    scope.emit(|| EventKind::StickyAssignment {
                        variant: None,
                        value: Dynamic::Null,
                        assigned: false,
                        ts: None,
                        source: AssignmentSource::Remote,
                    });
                    return Err(GateError::StickyFetch {
                        feature: self.name.clone(),
                        source,
                    });
                }
            },
        };

        scope.emit(|| EventKind::StickyAssignment {
            variant: existing.as_ref().map(|e| e.variant.clone()),
            value: existing
                .as_ref()
                .map(|e| e.value.clone())
                .unwrap_or_default(),
            assigned: existing.is_some(),
            ts: existing.as_ref().map(|e| e.ts),
            source,
        });
        Ok(existing)
    }

    fn leave(&self, scope: &Scope<'_>, nested: bool, value: &Dynamic) {
        scope.emit(|| EventKind::LeaveFeature {
            value: value.clone(),
        });
        if !nested {
            scope.emit(|| EventKind::LeaveGate {
                value: value.clone(),
            });
        }
    }
}

/// Builder for [`Feature`]
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    name: String,
    variants: BTreeMap<String, Variant>,
    rollouts: Vec<Rollout>,
    default_arm: Option<Arm>,
}

impl FeatureBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: BTreeMap::new(),
            rollouts: Vec::new(),
            default_arm: None,
        }
    }

    /// Add a variant, replacing any variant with the same name
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.insert(variant.name().to_string(), variant);
        self
    }

    pub fn with_variants(mut self, variants: impl IntoIterator<Item = Variant>) -> Self {
        for variant in variants {
            self = self.with_variant(variant);
        }
        self
    }

    pub fn with_rollout(mut self, rollout: Rollout) -> Self {
        self.rollouts.push(rollout);
        self
    }

    pub fn with_rollouts(mut self, rollouts: impl IntoIterator<Item = Rollout>) -> Self {
        self.rollouts.extend(rollouts);
        self
    }

    /// Append a `default` rollout giving everyone `arm`.
    pub fn with_default_arm(mut self, arm: impl Into<Arm>) -> Self {
        self.default_arm = Some(arm.into());
        self
    }

    /// Build and validate the feature
    pub fn build(self) -> std::result::Result<Feature, ValidationError> {
        let mut rollouts = self.rollouts;
        if let Some(arm) = self.default_arm {
            rollouts.push(Rollout::default_rollout([arm]));
        }

        let feature = Feature {
            name: self.name,
            variants: self.variants,
            rollouts,
        };
        feature.validate()?;
        Ok(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::Population;

    fn user(id: &str) -> Dynamic {
        Dynamic::map([("id", id)])
    }

    fn ab_feature() -> Feature {
        Feature::builder("ab_feature")
            .with_variant(Variant::new("a", "A"))
            .with_variant(Variant::new("b", "B"))
            .with_rollout(Rollout::default_rollout([
                Arm::weighted("a", 0.5),
                Arm::weighted("b", 0.5),
            ]))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_simplest() {
        let feature = Feature::builder("test_feature")
            .with_variant(Variant::new("foo", "Foo"))
            .with_default_arm("foo")
            .build()
            .unwrap();

        let opts = EvalOptions::default();
        for id in ["one", "two", "three", "four"] {
            assert_eq!(feature.evaluate(&user(id), &opts).await.unwrap(), "Foo");
        }
    }

    #[tokio::test]
    async fn test_ab() {
        let feature = ab_feature();
        let opts = EvalOptions::default();

        // default:N hashes to 0.281, 0.011, 0.833 and 0.937
        for (id, expected) in [("1", "A"), ("2", "A"), ("3", "B"), ("4", "B")] {
            let value = feature.evaluate(&user(id), &opts).await.unwrap();
            assert_eq!(value, expected);
            assert_eq!(value.call_type(), CallType::Assignment);
        }
    }

    #[tokio::test]
    async fn test_complex() {
        let feature = Feature::builder("multi_rollout_feature_full")
            .with_variant(Variant::new("a", "A"))
            .with_variant(Variant::new("b", "B"))
            .with_variant(Variant::new("off", Dynamic::Null))
            .with_rollout(Rollout::new(
                "test_segment_1",
                Population::percent(0.2, "my_seed"),
                [Arm::weighted("a", 0.5), Arm::weighted("b", 0.5)],
            ))
            .with_rollout(Rollout::new(
                "test_segment_2",
                Population::explicit(["id_1", "id_2", "id_26"]),
                [Arm::weighted("a", 1.0)],
            ))
            .with_default_arm(Arm::new("off"))
            .build()
            .unwrap();
        let opts = EvalOptions::default();

        assert!(feature.evaluate(&user("1"), &opts).await.unwrap().is_null());
        assert_eq!(feature.evaluate(&user("MemberID"), &opts).await.unwrap(), "A");
        // In the percent population, so the explicit rollout never applies
        assert_eq!(feature.evaluate(&user("id_26"), &opts).await.unwrap(), "B");
        assert_eq!(feature.evaluate(&user("id_2"), &opts).await.unwrap(), "A");
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            Feature::builder("f").with_default_arm("a").build().unwrap_err(),
            ValidationError::NoVariants
        );
        assert_eq!(
            Feature::builder("f")
                .with_variant(Variant::new("a", 1))
                .build()
                .unwrap_err(),
            ValidationError::NoRollouts
        );
        assert_eq!(
            Feature::builder("f")
                .with_variant(Variant::new("a", 1))
                .with_rollout(Rollout::new("other", Population::Default, ["a"]))
                .build()
                .unwrap_err(),
            ValidationError::MissingDefaultRollout(DEFAULT_ROLLOUT)
        );
        assert_eq!(
            Feature::builder("f")
                .with_variant(Variant::new("a", 1))
                .with_rollout(Rollout::default_rollout(["a"]))
                .with_rollout(Rollout::new("other", Population::Default, ["a"]))
                .build()
                .unwrap_err(),
            ValidationError::DefaultRolloutNotLast(DEFAULT_ROLLOUT)
        );
        assert_eq!(
            Feature::builder("f")
                .with_variant(Variant::new("a", 1))
                .with_default_arm("b")
                .build()
                .unwrap_err(),
            ValidationError::UnknownVariant("b".into())
        );
    }

    #[tokio::test]
    async fn test_nested_feature() {
        let inner = Feature::builder("inner")
            .with_variant(Variant::new("x", "X"))
            .with_default_arm("x")
            .build()
            .unwrap();
        let outer = Feature::builder("outer")
            .with_variant(Variant::nested("on", "inner"))
            .with_default_arm("on")
            .build()
            .unwrap();

        let features = Arc::new(FeatureSet::from_features([inner, outer.clone()]));
        let opts = EvalOptions::default().with_features(features);
        let value = outer.evaluate(&user("1"), &opts).await.unwrap();
        assert_eq!(value, "X");
        assert_eq!(value.variant(), "on");

        let missing = outer.evaluate(&user("1"), &EvalOptions::default()).await;
        assert!(matches!(missing, Err(GateError::MissingFeature(name)) if name == "inner"));
    }

    #[test]
    fn test_describe() {
        let feature = Feature::builder("test_feature")
            .with_variant(Variant::new("foo", "Foo"))
            .with_default_arm("foo")
            .build()
            .unwrap();
        assert_eq!(
            feature.describe(),
            json!({
                "type": "Feature",
                "name": "test_feature",
                "variants": {
                    "foo": {"type": "Variant", "name": "foo", "value": "Foo", "nested": false},
                },
                "rollouts": [{
                    "type": "Rollout",
                    "name": "default",
                    "arms": [{"type": "Arm", "variant": "foo", "weight": 1.0}],
                    "population": {"type": "Population", "name": "Default"},
                    "randomizer": "Hash(Concat('default', ':', $id))",
                    "sticky": null,
                }],
            })
        );
    }
}
