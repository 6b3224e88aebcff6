//! Gater
//!
//! The [`Gater`] owns the current feature set and everything evaluations
//! share: the event sink, the sticky fetcher, the local assignment cache,
//! the clock and the call id generator. Reloading swaps the whole feature
//! set at once; evaluations already running keep the snapshot they started
//! with.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tollgate_expr::{Clock, Context, Dynamic};
use tracing::{debug, error, info, warn};

use crate::cache::AssignmentCache;
use crate::config::{ConfigFormat, FeatureConfig};
use crate::error::{GateError, Result};
use crate::events::EventSink;
use crate::feature::{EvalOptions, Feature};
use crate::ids::{CallIdGenerator, UuidCallIds};
use crate::registry::FeatureSet;
use crate::sink::TracingSink;
use crate::sticky::StickyFetcher;
use crate::value::{CallType, Value};

/// Per-call options for [`Gater::evaluate_with`]
#[derive(Debug, Clone, Default)]
pub struct GateOptions {
    /// Don't emit any events
    pub silent: bool,

    /// Leave logging exposures to the caller, through [`Value::log`]
    pub deferred: bool,

    /// Evaluate as if it were this time
    pub now: Option<DateTime<Utc>>,
}

impl GateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

pub struct Gater {
    features: RwLock<Arc<FeatureSet>>,
    /// Features defined in code; reloaded config is overlaid on these
    original: Arc<FeatureSet>,
    /// Checksum of the last loaded config source
    checksum: Mutex<Option<String>>,
    sink: Option<Arc<dyn EventSink>>,
    sticky: Option<Arc<dyn StickyFetcher>>,
    cache: Arc<AssignmentCache>,
    context: Context,
    call_ids: Arc<dyn CallIdGenerator>,
}

impl Gater {
    /// Start building a gater
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::*;
    /// use tollgate_expr::Dynamic;
    ///
    /// let feature = Feature::builder("greeting")
    ///     .with_variant(Variant::new("hi", "Hello!"))
    ///     .with_default_arm("hi")
    ///     .build()
    ///     .unwrap();
    ///
    /// let gater = Gater::builder().with_feature(feature).build().unwrap();
    ///
    /// # tokio_test::block_on(async {
    /// let user = Dynamic::map([("id", "42")]);
    /// let value = gater.evaluate("greeting", &user).await.unwrap();
    /// assert_eq!(value, "Hello!");
    /// # });
    /// ```
    pub fn builder() -> GaterBuilder {
        GaterBuilder::new()
    }

    /// Gater over `features` with the default sink and no sticky fetcher
    pub fn new(features: FeatureSet) -> Self {
        let original = Arc::new(features);
        Self {
            features: RwLock::new(original.clone()),
            original,
            checksum: Mutex::new(None),
            sink: Some(Arc::new(TracingSink::new(true))),
            sticky: None,
            cache: Arc::new(AssignmentCache::new()),
            context: Context::new(),
            call_ids: Arc::new(UuidCallIds),
        }
    }

    /// Evaluate the feature `name` for `entity`.
    pub async fn evaluate(&self, name: &str, entity: &Dynamic) -> Result<Value> {
        self.evaluate_with(name, entity, GateOptions::default())
            .await
    }

    /// Evaluate the feature `name` for `entity` with per-call options.
    ///
    /// Fresh assignments are always logged. Exposures are logged too unless
    /// the call is deferred.
    pub async fn evaluate_with(
        &self,
        name: &str,
        entity: &Dynamic,
        options: GateOptions,
    ) -> Result<Value> {
        let features = self.features();
        let feature = features
            .get(name)
            .ok_or_else(|| GateError::MissingFeature(name.to_string()))?;

        let context = match options.now {
            Some(now) => Context::fixed(now),
            None => self.context.clone(),
        };

        let mut opts = EvalOptions::new()
            .with_features(features)
            .with_cache(self.cache.clone())
            .with_context(context)
            .with_call_ids(self.call_ids.clone());
        if let Some(sticky) = &self.sticky {
            opts = opts.with_sticky(sticky.clone());
        }
        if !options.silent
            && let Some(sink) = &self.sink
        {
            opts = opts.with_sink(sink.clone());
        }

        let mut value = feature.evaluate(entity, &opts).await?;
        if value.call_type() == CallType::Assignment || !options.deferred {
            value.log(None);
        }
        Ok(value)
    }

    /// Current feature set snapshot
    pub fn features(&self) -> Arc<FeatureSet> {
        self.features.read().clone()
    }

    pub fn feature(&self, name: &str) -> Option<Arc<Feature>> {
        self.features.read().get(name)
    }

    /// Local cache of sticky assignments
    pub fn cache(&self) -> &Arc<AssignmentCache> {
        &self.cache
    }

    /// Replace the feature set with `configs` overlaid on the predefined
    /// features.
    pub fn reload_from_configs(
        &self,
        configs: impl IntoIterator<Item = FeatureConfig>,
    ) -> Result<()> {
        let set = FeatureSet::from_configs(configs, &self.original)?;
        self.swap(set);
        Ok(())
    }

    /// Reload from a config document.
    ///
    /// Returns `Ok(false)` without reparsing when the source is unchanged
    /// since the last load. On failure the current features are kept.
    pub fn reload_from_str(&self, source: &str, format: ConfigFormat) -> Result<bool> {
        let checksum = checksum(source);
        let mut current = self.checksum.lock();
        if current.as_deref() == Some(checksum.as_str()) {
            debug!(checksum = %checksum, "Feature config unchanged");
            return Ok(false);
        }

        match FeatureSet::load(source, format, &self.original) {
            Ok(set) => {
                self.swap(set);
                *current = Some(checksum);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Failed to reload feature config, keeping previous features");
                Err(e)
            }
        }
    }

    /// Reload from a config file, detecting its format from the extension.
    pub async fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let source = tokio::fs::read_to_string(path).await?;
        self.reload_from_str(&source, format)
    }

    /// Shut down the sink
    pub fn stop(&self) {
        if let Some(sink) = &self.sink {
            sink.stop();
        }
    }

    fn swap(&self, set: FeatureSet) {
        let count = set.len();
        *self.features.write() = Arc::new(set);
        info!(features = count, "Reloaded feature config");
    }
}

impl fmt::Debug for Gater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gater")
            .field("features", &self.features.read().len())
            .field("checksum", &self.checksum.lock())
            .field("sink", &self.sink.is_some())
            .field("sticky", &self.sticky.is_some())
            .field("cache", &self.cache.len())
            .finish()
    }
}

/// Hex SHA-256 of a config source
fn checksum(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Builder for [`Gater`]
pub struct GaterBuilder {
    features: FeatureSet,
    config: Option<(String, ConfigFormat)>,
    sink: Option<Arc<dyn EventSink>>,
    sticky: Option<Arc<dyn StickyFetcher>>,
    clock: Option<Clock>,
    call_ids: Arc<dyn CallIdGenerator>,
}

impl GaterBuilder {
    pub fn new() -> Self {
        Self {
            features: FeatureSet::new(),
            config: None,
            sink: Some(Arc::new(TracingSink::new(true))),
            sticky: None,
            clock: None,
            call_ids: Arc::new(UuidCallIds),
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        for feature in features {
            self.features.insert(feature);
        }
        self
    }

    /// Config document to overlay on the features given in code
    pub fn with_config(mut self, source: impl Into<String>, format: ConfigFormat) -> Self {
        self.config = Some((source.into(), format));
        self
    }

    /// Replace the default [`TracingSink`]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn without_sink(mut self) -> Self {
        self.sink = None;
        self
    }

    pub fn with_sticky(mut self, sticky: Arc<dyn StickyFetcher>) -> Self {
        self.sticky = Some(sticky);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_call_ids(mut self, call_ids: Arc<dyn CallIdGenerator>) -> Self {
        self.call_ids = call_ids;
        self
    }

    pub fn build(self) -> Result<Gater> {
        let original = Arc::new(self.features);
        let (features, checksum) = match self.config {
            Some((source, format)) => {
                let set = FeatureSet::load(&source, format, &original)?;
                (Arc::new(set), Some(checksum(&source)))
            }
            None => (original.clone(), None),
        };

        if features.is_empty() {
            warn!("Gater has no features");
        }

        Ok(Gater {
            features: RwLock::new(features),
            original,
            checksum: Mutex::new(checksum),
            sink: self.sink,
            sticky: self.sticky,
            cache: Arc::new(AssignmentCache::new()),
            context: self.clock.map(Context::with_clock).unwrap_or_default(),
            call_ids: self.call_ids,
        })
    }
}

impl Default for GaterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GaterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaterBuilder")
            .field("features", &self.features)
            .field("config", &self.config)
            .field("sink", &self.sink.is_some())
            .field("sticky", &self.sticky.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::variant::Variant;
    use chrono::TimeZone;

    fn greeting() -> Feature {
        Feature::builder("greeting")
            .with_variant(Variant::new("hi", "Hello!"))
            .with_variant(Variant::new("yo", "Yo!"))
            .with_default_arm("hi")
            .build()
            .unwrap()
    }

    fn user() -> Dynamic {
        Dynamic::map([("id", "1")])
    }

    const OVERLAY: &str = r#"{"features": [{"name": "greeting", "default_arm": "yo"}]}"#;

    #[tokio::test]
    async fn test_missing_feature() {
        let gater = Gater::new(FeatureSet::new());
        let result = gater.evaluate("nope", &user()).await;
        assert!(matches!(result, Err(GateError::MissingFeature(name)) if name == "nope"));
    }

    #[tokio::test]
    async fn test_silent_emits_nothing() {
        let sink = Arc::new(MemorySink::new());
        let gater = Gater::builder()
            .with_feature(greeting())
            .with_sink(sink.clone())
            .build()
            .unwrap();

        gater
            .evaluate_with("greeting", &user(), GateOptions::new().silent())
            .await
            .unwrap();
        assert!(sink.events().is_empty());

        gater.evaluate("greeting", &user()).await.unwrap();
        assert_eq!(sink.names().first(), Some(&"EnterGate"));
    }

    #[tokio::test]
    async fn test_now_override() {
        let gater = Gater::builder()
            .with_feature(greeting())
            .without_sink()
            .build()
            .unwrap();
        let ts = Utc.with_ymd_and_hms(2020, 2, 2, 12, 0, 0).unwrap();
        let value = gater
            .evaluate_with("greeting", &user(), GateOptions::new().at(ts))
            .await
            .unwrap();
        assert_eq!(value.ts(), ts);
    }

    #[tokio::test]
    async fn test_reload_checksum() {
        let gater = Gater::builder()
            .with_feature(greeting())
            .without_sink()
            .build()
            .unwrap();
        assert_eq!(gater.evaluate("greeting", &user()).await.unwrap(), "Hello!");

        assert!(gater.reload_from_str(OVERLAY, ConfigFormat::Json).unwrap());
        assert_eq!(gater.evaluate("greeting", &user()).await.unwrap(), "Yo!");
        assert!(!gater.reload_from_str(OVERLAY, ConfigFormat::Json).unwrap());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_features() {
        let gater = Gater::builder()
            .with_feature(greeting())
            .with_config(OVERLAY, ConfigFormat::Json)
            .without_sink()
            .build()
            .unwrap();
        assert_eq!(gater.evaluate("greeting", &user()).await.unwrap(), "Yo!");

        let broken = r#"{"features": [{"name": "greeting", "default_arm": "nope"}]}"#;
        assert!(gater.reload_from_str(broken, ConfigFormat::Json).is_err());
        assert_eq!(gater.evaluate("greeting", &user()).await.unwrap(), "Yo!");

        let dangling = r#"{"features": [{"name": "greeting", "rollouts": [
            {"name": "fans", "population": {"type": "feature", "name": "gone", "where": "$assigned"}, "arms": ["hi"]},
            {"name": "default", "arms": ["hi"]}
        ]}]}"#;
        let result = gater.reload_from_str(dangling, ConfigFormat::Json);
        assert!(matches!(
            result,
            Err(GateError::Validation(crate::ValidationError::UnknownFeature { name, .. })) if name == "gone"
        ));
        assert_eq!(gater.evaluate("greeting", &user()).await.unwrap(), "Yo!");
    }

    #[test]
    fn test_reload_from_configs_overlays_original() {
        let gater = Gater::new(FeatureSet::from_features([greeting()]));
        let configs = crate::config::FeatureDocument::parse(OVERLAY, ConfigFormat::Json)
            .unwrap()
            .features;
        gater.reload_from_configs(configs).unwrap();

        let feature = gater.feature("greeting").unwrap();
        assert_eq!(feature.rollouts().len(), 1);
        assert_eq!(feature.rollouts()[0].arms()[0].variant, "yo");
        assert_eq!(feature.variants().len(), 2);
    }

    #[test]
    fn test_checksum() {
        assert_eq!(
            checksum(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
