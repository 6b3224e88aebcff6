// Tollgate - Feature gates and experiment assignment for Rust
//
// This library re-exports the rule expression language and the feature
// gating engine, plus a prelude of the types most applications need.

// Re-export member crates
pub use tollgate_expr as expr;
pub use tollgate_features as features;

pub use tollgate_expr::{Context, Dynamic, Entity, Expr, parse};
pub use tollgate_features::*;

// Re-export for implementing `StickyFetcher`
pub use async_trait::async_trait;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Arm,
        AssignmentCache,
        CallType,
        ConfigFormat,
        Context,
        DecisionRecord,
        Dynamic,
        Entity,
        EventSink,
        Expr,
        Feature,
        FeatureSet,
        FnFetcher,
        GateError,
        GateOptions,
        Gater,
        Population,
        RecordSink,
        Rollout,
        StickyAssignment,
        StickyFetcher,
        TracingSink,
        Value,
        Variant,
        async_trait,
        parse,
    };
}
