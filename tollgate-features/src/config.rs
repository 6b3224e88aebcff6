//! Feature configuration
//!
//! Serde shapes for features defined in JSON or TOML documents, and their
//! conversion into validated [`Feature`]s. A document looks like:
//!
//! ```json
//! {
//!   "features": [{
//!     "name": "checkout",
//!     "variants": {"on": true, "off": false},
//!     "rollouts": [{
//!       "name": "beta",
//!       "population": {"type": "percent", "value": 0.1, "seed": "beta"},
//!       "arms": ["on"]
//!     }],
//!     "default_arm": "off"
//!   }]
//! }
//! ```
//!
//! Rules (`randomizer`, population `field`, `value` and `where`) use the
//! expression syntax of `tollgate-expr`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tollgate_expr::{Dynamic, parse};

use crate::arm::Arm;
use crate::error::{GateError, Result};
use crate::feature::Feature;
use crate::population::Population;
use crate::registry::FeatureSet;
use crate::rollout::Rollout;
use crate::variant::Variant;

/// Supported configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| GateError::config("No file extension found"))?;

        Self::from_extension(ext).ok_or_else(|| GateError::config(format!("Unsupported format: {ext}")))
    }
}

/// Top-level config document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureDocument {
    pub features: Vec<FeatureConfig>,
}

impl FeatureDocument {
    pub fn parse(source: &str, format: ConfigFormat) -> Result<Self> {
        let value = match format {
            ConfigFormat::Json => serde_json::from_str::<serde_json::Value>(source)
                .map_err(|e| GateError::config(format!("JSON parse error: {e}")))?,
            ConfigFormat::Toml => {
                let toml_value: toml::Value = toml::from_str(source)
                    .map_err(|e| GateError::config(format!("TOML parse error: {e}")))?;
                serde_json::to_value(toml_value)
                    .map_err(|e| GateError::config(format!("TOML conversion error: {e}")))?
            }
        };

        serde_json::from_value(value).map_err(|e| GateError::config(e.to_string()))
    }
}

/// One feature.
///
/// When overlaid on a predefined feature, only the parts given here are
/// replaced.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureConfig {
    pub name: String,

    #[serde(default)]
    pub variants: Option<BTreeMap<String, VariantConfig>>,

    #[serde(default)]
    pub rollouts: Option<Vec<RolloutConfig>>,

    /// Variant everyone outside the other rollouts receives
    #[serde(default)]
    pub default_arm: Option<String>,
}

/// A variant value, or `{"feature": {...}}` to nest another feature.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VariantConfig {
    Nested(NestedConfig),
    Literal(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NestedConfig {
    pub feature: FeatureConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RolloutConfig {
    pub name: String,

    #[serde(default)]
    pub population: Option<PopulationConfig>,

    #[serde(default)]
    pub arms: Vec<ArmConfig>,

    #[serde(default)]
    pub randomizer: Option<String>,

    #[serde(default)]
    pub sticky: Option<bool>,
}

/// `"default"`, or a tagged selector
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PopulationConfig {
    Named(String),
    Selector(SelectorConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SelectorConfig {
    #[serde(alias = "Percent")]
    Percent {
        value: f64,
        seed: String,
        #[serde(default)]
        field: Option<String>,
    },

    #[serde(alias = "Explicit")]
    Explicit {
        value: Vec<serde_json::Value>,
        #[serde(default)]
        field: Option<String>,
    },

    #[serde(alias = "Expression")]
    Expression { value: String },

    #[serde(alias = "Feature")]
    Feature {
        name: String,
        #[serde(rename = "where")]
        condition: String,
    },
}

/// A variant name, or `{"variant": name, "weight": w}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ArmConfig {
    Name(String),
    Weighted {
        #[serde(alias = "variant_name")]
        variant: String,
        #[serde(default)]
        weight: Option<f64>,
    },
}

impl FeatureConfig {
    /// Build the feature, overlaid on `base` if given.
    ///
    /// Nested features are built too and added to `set`.
    pub fn build(self, base: Option<&Feature>, set: &mut FeatureSet) -> Result<Feature> {
        if let Some(base) = base
            && base.name() != self.name
        {
            return Err(GateError::config(format!(
                "Names of default feature and config feature differ! Got {}, expected {}",
                base.name(),
                self.name
            )));
        }

        let variants: Vec<Variant> = match self.variants {
            Some(variants) => variants
                .into_iter()
                .map(|(name, config)| config.build(name, set))
                .collect::<Result<_>>()?,
            None => base
                .map(|base| base.variants().values().cloned().collect())
                .unwrap_or_default(),
        };

        let mut rollouts: Vec<Rollout> = base
            .map(|base| base.rollouts().to_vec())
            .unwrap_or_default();
        if self.default_arm.is_some() {
            rollouts.retain(|rollout| !rollout.is_default());
        }
        if let Some(configs) = self.rollouts {
            rollouts = configs
                .into_iter()
                .map(RolloutConfig::build)
                .collect::<Result<_>>()?;
        }

        let mut builder = Feature::builder(self.name)
            .with_variants(variants)
            .with_rollouts(rollouts);
        if let Some(arm) = self.default_arm {
            builder = builder.with_default_arm(Arm::weighted(arm, 1.0));
        }
        Ok(builder.build()?)
    }
}

/// Build features from config, overlaying predefined features of the same
/// name.
pub(crate) fn build_feature(
    config: FeatureConfig,
    base: Option<&Feature>,
    set: &mut FeatureSet,
) -> Result<Feature> {
    config.build(base, set)
}

impl VariantConfig {
    fn build(self, name: String, set: &mut FeatureSet) -> Result<Variant> {
        match self {
            Self::Literal(value) => Ok(Variant::new(name, Dynamic::from(value))),
            Self::Nested(nested) => {
                let inner = nested.feature.build(None, set)?;
                let inner_name = inner.name().to_string();
                set.insert(inner);
                Ok(Variant::nested(name, inner_name))
            }
        }
    }
}

impl RolloutConfig {
    fn build(self) -> Result<Rollout> {
        let population = match self.population {
            None => Population::Default,
            Some(PopulationConfig::Named(name)) if name.eq_ignore_ascii_case("default") => {
                Population::Default
            }
            Some(PopulationConfig::Named(name)) => {
                return Err(GateError::config(format!("Invalid population name {name}")));
            }
            Some(PopulationConfig::Selector(selector)) => selector.build()?,
        };

        let arms = self.arms.into_iter().map(|arm| match arm {
            ArmConfig::Name(variant) => Arm::new(variant),
            ArmConfig::Weighted { variant, weight } => Arm { variant, weight },
        });

        let mut rollout = Rollout::new(self.name, population, arms);
        if let Some(randomizer) = self.randomizer {
            rollout = rollout.with_randomizer(parse(&randomizer)?);
        }
        if let Some(sticky) = self.sticky {
            rollout = rollout.with_sticky(sticky);
        }
        Ok(rollout)
    }
}

impl SelectorConfig {
    fn build(self) -> Result<Population> {
        let population = match self {
            Self::Percent { value, seed, field } => match field {
                Some(field) => Population::percent_on(value, seed, parse(&field)?),
                None => Population::percent(value, seed),
            },
            Self::Explicit { value, field } => {
                let ids = value.into_iter().map(Dynamic::from);
                match field {
                    Some(field) => Population::explicit_on(ids, parse(&field)?),
                    None => Population::explicit(ids),
                }
            }
            Self::Expression { value } => Population::expression(parse(&value)?),
            Self::Feature { name, condition } => Population::feature(name, parse(&condition)?),
        };
        Ok(population)
    }
}
