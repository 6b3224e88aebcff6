//! Feature Gates for Tollgate
//!
//! Feature gating and experiment assignment: features hold named variants
//! and ordered rollouts, rollouts pick a population and split it into
//! weighted arms, and every decision can be logged, traced and made sticky.
//!
//! # Features
//!
//! - 🚦 **Feature Gates** - Variants with literal, computed or nested-feature values
//! - 🎯 **Populations** - Percentages, explicit id lists, rules and other features' assignments
//! - 🎲 **Stable Bucketing** - Hash-based arm assignment, reproducible across processes
//! - 📌 **Sticky Assignments** - Reuse earlier assignments from a fetcher and a local cache
//! - 📜 **Decision Logs** - Per-call event traces, deferred exposure logging
//! - 🔄 **Hot Reload** - Overlay JSON or TOML config on features defined in code
//!
//! # Quick Start
//!
//! ```
//! use tollgate_features::*;
//! use tollgate_expr::Dynamic;
//!
//! let feature = Feature::builder("checkout_flow")
//!     .with_variant(Variant::new("control", "classic"))
//!     .with_variant(Variant::new("treatment", "one-page"))
//!     .with_rollout(Rollout::default_rollout(["control", "treatment"]))
//!     .build()
//!     .unwrap();
//!
//! let gater = Gater::builder().with_feature(feature).build().unwrap();
//!
//! # tokio_test::block_on(async {
//! let user = Dynamic::map([("id", "1")]);
//! let value = gater.evaluate("checkout_flow", &user).await.unwrap();
//! assert_eq!(value.variant(), "control");
//! # });
//! ```
//!
//! # Targeted Rollouts
//!
//! ```
//! use tollgate_features::*;
//! use tollgate_expr::{Dynamic, parse};
//!
//! let feature = Feature::builder("new_search")
//!     .with_variant(Variant::new("on", true))
//!     .with_variant(Variant::new("off", false))
//!     .with_rollout(Rollout::new(
//!         "staff",
//!         Population::expression(parse("$email Matches '@example.com$'").unwrap()),
//!         ["on"],
//!     ))
//!     .with_rollout(Rollout::new("beta", Population::percent(0.1, "search"), ["on"]))
//!     .with_default_arm("off")
//!     .build()
//!     .unwrap();
//!
//! # tokio_test::block_on(async {
//! let staff = Dynamic::map([("id", "7"), ("email", "jo@example.com")]);
//! let value = feature.evaluate(&staff, &EvalOptions::default()).await.unwrap();
//! assert_eq!(value, Dynamic::Bool(true));
//! # });
//! ```
//!
//! # Configuration
//!
//! ```
//! use tollgate_features::*;
//!
//! let gater = Gater::builder()
//!     .with_config(
//!         r#"{"features": [{
//!             "name": "banner",
//!             "variants": {"show": true, "hide": false},
//!             "rollouts": [{
//!                 "name": "half",
//!                 "population": {"type": "percent", "value": 0.5, "seed": "banner"},
//!                 "arms": ["show"]
//!             }],
//!             "default_arm": "hide"
//!         }]}"#,
//!         ConfigFormat::Json,
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert!(gater.feature("banner").is_some());
//! ```

pub mod arm;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod feature;
pub mod gater;
pub mod ids;
pub mod population;
pub mod registry;
pub mod rollout;
pub mod sink;
pub mod sticky;
pub mod value;
pub mod variant;

pub use arm::Arm;
pub use cache::AssignmentCache;
pub use config::{
    ArmConfig, ConfigFormat, FeatureConfig, FeatureDocument, NestedConfig, PopulationConfig,
    RolloutConfig, SelectorConfig, VariantConfig,
};
pub use error::{FetchError, GateError, Result, ValidationError};
pub use events::{AssignmentSource, Event, EventKind, EventSink};
pub use feature::{EvalOptions, Feature, FeatureBuilder};
pub use gater::{GateOptions, Gater, GaterBuilder};
pub use ids::{CallIdGenerator, SeededCallIds, UuidCallIds, seq_id};
pub use population::Population;
pub use registry::FeatureSet;
pub use rollout::{DEFAULT_ROLLOUT, Rollout};
pub use sink::{DecisionRecord, FnSink, MemorySink, RecordSink, TracingSink};
pub use sticky::{FnFetcher, StickyAssignment, StickyFetcher};
pub use value::{CallType, Value};
pub use variant::{Payload, Variant, VariantFn};
