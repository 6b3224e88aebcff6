//! Evaluation events
//!
//! Every step of a feature evaluation is reported to an [`EventSink`] as an
//! [`Event`]. Events for one call share a call id and arrive in evaluation
//! order: each `Enter*` precedes the events of its children and each
//! `Leave*` follows them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tollgate_expr::{Context, Dynamic, Expr};

/// Where a sticky assignment was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentSource {
    /// The gater's in-process assignment cache
    Local,
    /// The sticky fetcher
    Remote,
}

/// A single evaluation event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Id of the top-level evaluation this event belongs to
    pub call_id: String,

    /// Clock reading when the event was emitted
    pub ts: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payloads, serialized as `{"type": name, "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EventKind {
    EnterGate {
        feature: String,
        entity: Dynamic,
        entity_type: String,
        /// Full description of the feature
        definition: serde_json::Value,
    },
    LeaveGate {
        value: Dynamic,
    },
    EnterFeature {
        feature: String,
        entity: Dynamic,
    },
    LeaveFeature {
        value: Dynamic,
    },
    StickyAssignment {
        variant: Option<String>,
        value: Dynamic,
        assigned: bool,
        ts: Option<DateTime<Utc>>,
        source: AssignmentSource,
    },
    EnterRollout {
        rollout: String,
    },
    LeaveRollout {
        member: bool,
    },
    EvaluatePopulation {
        population: serde_json::Value,
        entity: Dynamic,
        member: bool,
    },
    Randomize {
        entity: Dynamic,
        function: String,
        result: Dynamic,
    },
    EnterArm {
        arm: String,
        cutoff: f64,
        x: f64,
    },
    LeaveArm {
        matched: bool,
    },
    ChoseVariant {
        variant: String,
        sticky: bool,
        /// Full description of the variant
        definition: serde_json::Value,
    },
    EnterVariant {
        variant: String,
    },
    VariantRecurse {
        inner: String,
    },
    LeaveVariant {
        value: Dynamic,
    },
    EvalFunc {
        f: String,
        args: Vec<Dynamic>,
        result: Dynamic,
    },
    Error {
        message: String,
    },
}

impl EventKind {
    /// Event name, as used in the serialized `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EnterGate { .. } => "EnterGate",
            Self::LeaveGate { .. } => "LeaveGate",
            Self::EnterFeature { .. } => "EnterFeature",
            Self::LeaveFeature { .. } => "LeaveFeature",
            Self::StickyAssignment { .. } => "StickyAssignment",
            Self::EnterRollout { .. } => "EnterRollout",
            Self::LeaveRollout { .. } => "LeaveRollout",
            Self::EvaluatePopulation { .. } => "EvaluatePopulation",
            Self::Randomize { .. } => "Randomize",
            Self::EnterArm { .. } => "EnterArm",
            Self::LeaveArm { .. } => "LeaveArm",
            Self::ChoseVariant { .. } => "ChoseVariant",
            Self::EnterVariant { .. } => "EnterVariant",
            Self::VariantRecurse { .. } => "VariantRecurse",
            Self::LeaveVariant { .. } => "LeaveVariant",
            Self::EvalFunc { .. } => "EvalFunc",
            Self::Error { .. } => "Error",
        }
    }
}

/// Receives evaluation events.
///
/// `emit` is called on the evaluating task and must not block. Sinks that
/// aggregate a decision and write it later return `true` from
/// [`is_deferrable`](EventSink::is_deferrable); the returned
/// [`Value`](crate::Value) then commits or discards the aggregate through
/// `write_log` and `drop_log`.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);

    fn is_deferrable(&self) -> bool {
        false
    }

    /// Write the aggregated decision for `call_id`.
    fn write_log(&self, _call_id: &str, _extra: Option<&serde_json::Value>) {}

    /// Forget the aggregated decision for `call_id` without writing it.
    fn drop_log(&self, _call_id: &str) {}

    /// Shut the sink down.
    fn stop(&self) {}
}

/// Emits events for one call. Events are only built when a sink is attached.
pub(crate) struct Scope<'a> {
    sink: Option<&'a dyn EventSink>,
    call_id: &'a str,
    context: &'a Context,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        sink: Option<&'a dyn EventSink>,
        call_id: &'a str,
        context: &'a Context,
    ) -> Self {
        Self {
            sink,
            call_id,
            context,
        }
    }

    pub(crate) fn call_id(&self) -> &str {
        self.call_id
    }

    pub(crate) fn emit(&self, kind: impl FnOnce() -> EventKind) {
        if let Some(sink) = self.sink {
            sink.emit(&Event {
                call_id: self.call_id.to_string(),
                ts: self.context.now(),
                kind: kind(),
            });
        }
    }

    /// Evaluate `expr`, reporting every operator application as `EvalFunc`.
    pub(crate) fn eval(&self, expr: &Expr, entity: &Dynamic) -> tollgate_expr::Result<Dynamic> {
        if self.sink.is_none() {
            return expr.evaluate(entity, self.context);
        }

        let tracer = |f: &str, args: &[Dynamic], result: &Dynamic| {
            self.emit(|| EventKind::EvalFunc {
                f: f.to_string(),
                args: args.to_vec(),
                result: result.clone(),
            })
        };
        expr.evaluate_traced(entity, self.context, Some(&tracer))
    }
}
