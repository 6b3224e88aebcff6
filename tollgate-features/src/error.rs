//! Error types for feature evaluation

use thiserror::Error;
use tollgate_expr::{EvalError, ParseError};

/// Error returned by a [`StickyFetcher`](crate::StickyFetcher).
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// A feature definition that doesn't make sense.
///
/// These are raised while building features and are always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Variant must be given a name")]
    UnnamedVariant,

    #[error("At least one variant must be defined")]
    NoVariants,

    #[error("At least one rollout needs to be defined")]
    NoRollouts,

    #[error("At least one rollout named {0} must be defined")]
    MissingDefaultRollout(&'static str),

    #[error("The {0} rollout must be the last rollout in the list")]
    DefaultRolloutNotLast(&'static str),

    #[error("Expected at least one arm")]
    NoArms,

    #[error("Arm refers to unexpected variant `{0}`")]
    UnknownVariant(String),

    #[error("Arm weight must be positive")]
    NegativeWeight,

    #[error("Arm weight can't be greater than 1.0")]
    WeightTooLarge,

    #[error("Arm weights of rollout must sum to 1.0 (got {0:.2})")]
    WeightSum(f64),

    #[error("PercentSelector has to have a positive value")]
    NegativePercent,

    #[error("PercentSelector has to be less than 1.0")]
    PercentTooLarge,

    #[error("The default Rollout must use the default Population")]
    DefaultPopulation,

    #[error("Feature {feature} refers to unknown feature {name}")]
    UnknownFeature { feature: String, name: String },
}

/// Errors raised while loading or evaluating features.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Invalid feature: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid expression: {0}")]
    Parse(#[from] ParseError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Error evaluating sticky assignment for `{feature}`: {source}")]
    StickyFetch {
        feature: String,
        #[source]
        source: FetchError,
    },

    #[error("Feature not found: {0}")]
    MissingFeature(String),

    #[error("Could not find arm for entity in rollout `{rollout}`")]
    NoArm { rollout: String },

    #[error("No variant found for feature `{feature}`")]
    NoVariant { feature: String },

    #[error("Invalid feature config: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
