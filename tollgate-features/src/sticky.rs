//! Sticky assignments
//!
//! A sticky fetcher looks up an entity's earlier assignment, typically from
//! a datastore fed by the decision log. A hit short-circuits evaluation so
//! the entity keeps its variant even after rollouts change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tollgate_expr::Dynamic;

use crate::error::FetchError;
use crate::feature::Feature;

/// A previously made assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StickyAssignment {
    /// Variant name
    pub variant: String,

    /// Variant value
    pub value: Dynamic,

    /// When the assignment was made
    pub ts: DateTime<Utc>,
}

impl StickyAssignment {
    pub fn new(variant: impl Into<String>, value: impl Into<Dynamic>, ts: DateTime<Utc>) -> Self {
        Self {
            variant: variant.into(),
            value: value.into(),
            ts,
        }
    }
}

/// Looks up existing assignments.
///
/// Return `Ok(None)` when the entity has no assignment yet; errors abort
/// the evaluation.
#[async_trait]
pub trait StickyFetcher: Send + Sync {
    async fn fetch(
        &self,
        feature: &Feature,
        entity: &Dynamic,
    ) -> Result<Option<StickyAssignment>, FetchError>;
}

type FetchFn =
    dyn Fn(&Feature, &Dynamic) -> Result<Option<StickyAssignment>, FetchError> + Send + Sync;

/// Adapts a synchronous closure into a [`StickyFetcher`].
pub struct FnFetcher {
    f: Box<FetchFn>,
}

impl FnFetcher {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Feature, &Dynamic) -> Result<Option<StickyAssignment>, FetchError>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl fmt::Debug for FnFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFetcher(..)")
    }
}

#[async_trait]
impl StickyFetcher for FnFetcher {
    async fn fetch(
        &self,
        feature: &Feature,
        entity: &Dynamic,
    ) -> Result<Option<StickyAssignment>, FetchError> {
        (self.f)(feature, entity)
    }
}
