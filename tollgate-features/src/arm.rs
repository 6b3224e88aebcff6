//! Rollout arms

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A treatment group: a share of a rollout's population that receives one
/// variant.
///
/// The weight may be left unset; the owning [`Rollout`](crate::Rollout)
/// divides whatever weight remains evenly among unset arms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    /// Name of the variant this arm receives
    pub variant: String,

    /// Share of the rollout population, in [0, 1]
    pub weight: Option<f64>,
}

impl Arm {
    /// Create an arm with its weight left unset
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            weight: None,
        }
    }

    /// Create an arm with a fixed weight
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::Arm;
    ///
    /// let arm = Arm::weighted("treatment", 0.25);
    /// assert_eq!(arm.weight(), 0.25);
    /// ```
    pub fn weighted(variant: impl Into<String>, weight: f64) -> Self {
        Self {
            variant: variant.into(),
            weight: Some(weight),
        }
    }

    /// Effective weight; unset weights count as zero.
    pub fn weight(&self) -> f64 {
        self.weight.unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let weight = self.weight();
        if weight < 0.0 {
            return Err(ValidationError::NegativeWeight);
        }
        if weight > 1.0 {
            return Err(ValidationError::WeightTooLarge);
        }
        Ok(())
    }

    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Arm",
            "variant": self.variant,
            "weight": self.weight,
        })
    }
}

impl From<&str> for Arm {
    fn from(variant: &str) -> Self {
        Arm::new(variant)
    }
}

impl From<String> for Arm {
    fn from(variant: String) -> Self {
        Arm::new(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_validation() {
        assert!(Arm::weighted("a", 0.5).validate().is_ok());
        assert_eq!(
            Arm::weighted("a", -0.1).validate(),
            Err(ValidationError::NegativeWeight)
        );
        assert_eq!(
            Arm::weighted("a", 1.5).validate(),
            Err(ValidationError::WeightTooLarge)
        );
    }

    #[test]
    fn test_arm_describe() {
        assert_eq!(
            Arm::weighted("foo", 1.0).describe(),
            serde_json::json!({"type": "Arm", "variant": "foo", "weight": 1.0})
        );
    }
}
