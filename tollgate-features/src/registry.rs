//! Feature sets
//!
//! A [`FeatureSet`] indexes features by name. Nested variants and feature
//! populations refer to other features by name and are resolved through
//! the set they are evaluated with.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigFormat, FeatureConfig, FeatureDocument, build_feature};
use crate::error::{GateError, Result, ValidationError};
use crate::feature::Feature;
use crate::population::Population;
use crate::variant::Payload;

#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    features: BTreeMap<String, Arc<Feature>>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_features(features: impl IntoIterator<Item = Feature>) -> Self {
        let mut set = Self::new();
        for feature in features {
            set.insert(feature);
        }
        set
    }

    /// Build features from config, overlaying each one on the predefined
    /// feature of the same name in `defaults`.
    ///
    /// Features in `defaults` that the config doesn't mention are kept.
    /// Fails if any feature refers to a feature missing from the result.
    pub fn from_configs(
        configs: impl IntoIterator<Item = FeatureConfig>,
        defaults: &FeatureSet,
    ) -> Result<Self> {
        let mut set = defaults.clone();
        for config in configs {
            let base = defaults.get(&config.name);
            let feature = build_feature(config, base.as_deref(), &mut set)?;
            set.insert(feature);
        }
        set.validate()?;
        Ok(set)
    }

    /// Check that every nested variant and feature population names a
    /// feature in this set.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        for feature in self.iter() {
            let populations = feature
                .rollouts()
                .iter()
                .filter_map(|rollout| match rollout.population() {
                    Population::Feature { name, .. } => Some(name),
                    _ => None,
                });
            let nested = feature
                .variants()
                .values()
                .filter_map(|variant| match variant.payload() {
                    Payload::Feature(name) => Some(name),
                    _ => None,
                });

            if let Some(name) = populations.chain(nested).find(|name| !self.contains(name)) {
                return Err(ValidationError::UnknownFeature {
                    feature: feature.name().to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parse a feature document and build it on top of `defaults`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::{ConfigFormat, FeatureSet};
    ///
    /// let source = r#"
    ///     [[features]]
    ///     name = "greeting"
    ///     default_arm = "hi"
    ///
    ///     [features.variants]
    ///     hi = "Hello!"
    /// "#;
    ///
    /// let set = FeatureSet::load(source, ConfigFormat::Toml, &FeatureSet::new()).unwrap();
    /// assert!(set.contains("greeting"));
    /// ```
    pub fn load(source: &str, format: ConfigFormat, defaults: &FeatureSet) -> Result<Self> {
        let document = FeatureDocument::parse(source, format)?;
        Self::from_configs(document.features, defaults)
    }

    pub fn load_json(source: &str, defaults: &FeatureSet) -> Result<Self> {
        Self::load(source, ConfigFormat::Json, defaults)
    }

    pub fn load_toml(source: &str, defaults: &FeatureSet) -> Result<Self> {
        Self::load(source, ConfigFormat::Toml, defaults)
    }

    /// Load a feature document from a file, detecting the format from its
    /// extension.
    pub async fn load_file(path: impl AsRef<Path>, defaults: &FeatureSet) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let source = tokio::fs::read_to_string(path).await?;
        Self::load(&source, format, defaults)
    }

    /// Add a feature, returning the one it replaced
    pub fn insert(&mut self, feature: Feature) -> Option<Arc<Feature>> {
        self.features
            .insert(feature.name().to_string(), Arc::new(feature))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Feature>> {
        self.features.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Feature>> {
        self.features.values()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self::from_features(iter)
    }
}

impl TryFrom<FeatureDocument> for FeatureSet {
    type Error = GateError;

    fn try_from(document: FeatureDocument) -> Result<Self> {
        Self::from_configs(document.features, &FeatureSet::new())
    }
}
