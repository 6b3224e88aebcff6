//! Event sinks
//!
//! - [`TracingSink`] writes events through `tracing`
//! - [`RecordSink`] aggregates each call into a [`DecisionRecord`] and hands
//!   written records to a channel
//! - [`FnSink`] and [`MemorySink`] adapt closures and collect events in tests

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tollgate_expr::Dynamic;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind, EventSink};
use crate::ids::seq_id;

/// Writes evaluation events to `tracing`.
///
/// Gate entry, the chosen variant and the result are logged at `info`;
/// with `trace` enabled every event is also logged at `debug`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    trace: bool,
}

impl TracingSink {
    pub fn new(trace: bool) -> Self {
        Self { trace }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        let call_id = event.call_id.as_str();
        match &event.kind {
            EventKind::EnterGate {
                feature, entity, ..
            } => {
                info!(call_id, feature = %feature, entity = %entity, "Evaluating feature");
            }
            EventKind::StickyAssignment {
                variant: Some(variant),
                assigned: true,
                source,
                ..
            } => {
                info!(call_id, variant = %variant, source = ?source, "Found sticky assignment");
            }
            EventKind::ChoseVariant {
                variant, sticky, ..
            } => {
                info!(call_id, variant = %variant, sticky, "Chose variant");
            }
            EventKind::LeaveGate { value } => {
                info!(call_id, value = %value, "Feature evaluated");
            }
            EventKind::Error { message } => {
                warn!(call_id, "{}", message);
            }
            _ => {}
        }

        if self.trace {
            match serde_json::to_string(&event.kind) {
                Ok(data) => debug!(call_id, event = event.kind.name(), data = %data, "Trace"),
                Err(e) => warn!(call_id, error = %e, "Failed to serialize event"),
            }
        }
    }
}

/// One gate decision, as written by [`RecordSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    /// When the gate was entered
    pub ts: DateTime<Utc>,

    /// Call id; repeats of the same decision get `id:1`, `id:2`, ...
    pub call_id: String,

    /// `{"type": ..., "value": ...}`
    pub entity: serde_json::Value,

    /// Description of the evaluated feature
    pub feature: serde_json::Value,

    /// Value returned by the gate
    pub assignment: Dynamic,

    /// Description of the chosen variant; just `{"name": ...}` for sticky
    /// assignments
    pub variant: serde_json::Value,

    pub sticky: bool,

    /// Whether this decision was already written once
    pub repeat: bool,

    /// Every event of the call, when tracing is enabled
    pub trace: Option<Vec<serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Default)]
struct RecordState {
    records: HashMap<String, DecisionRecord>,
    /// Calls that left the gate and can be written
    deferred: HashSet<String>,
    sender: Option<mpsc::UnboundedSender<DecisionRecord>>,
}

/// Deferrable sink that aggregates each call into a [`DecisionRecord`].
///
/// A record is only sent once [`write_log`](EventSink::write_log) is called
/// for it, usually through [`Value::log`](crate::Value::log). Sending never
/// blocks the evaluating task.
///
/// # Examples
///
/// ```
/// use tollgate_features::{EventSink, RecordSink};
///
/// let (sink, mut records) = RecordSink::new(false);
/// sink.stop();
/// assert!(records.try_recv().is_err());
/// ```
pub struct RecordSink {
    trace: bool,
    state: Mutex<RecordState>,
}

impl RecordSink {
    /// Create a sink and the receiving end of its records.
    pub fn new(trace: bool) -> (Self, mpsc::UnboundedReceiver<DecisionRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = Self {
            trace,
            state: Mutex::new(RecordState {
                sender: Some(sender),
                ..RecordState::default()
            }),
        };
        (sink, receiver)
    }

    /// Create a sink whose records are passed to `write` on a background
    /// task. The task finishes once the sink is stopped and every pending
    /// record has been written.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn<F>(trace: bool, mut write: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut(DecisionRecord) + Send + 'static,
    {
        let (sink, mut receiver) = Self::new(trace);
        let handle = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                write(record);
            }
            debug!("Record writer stopped");
        });
        (sink, handle)
    }

    /// Number of calls with an unwritten or undropped record
    pub fn pending(&self) -> usize {
        self.state.lock().records.len()
    }

    fn trace_entry(event: &Event) -> Option<serde_json::Value> {
        match serde_json::to_value(&event.kind) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(call_id = %event.call_id, error = %e, "Failed to serialize event");
                None
            }
        }
    }
}

impl fmt::Debug for RecordSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RecordSink")
            .field("trace", &self.trace)
            .field("pending", &state.records.len())
            .field("stopped", &state.sender.is_none())
            .finish()
    }
}

impl EventSink for RecordSink {
    fn emit(&self, event: &Event) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let call_id = event.call_id.as_str();

        if let EventKind::EnterGate {
            feature: _,
            entity,
            entity_type,
            definition,
        } = &event.kind
        {
            state.records.insert(
                call_id.to_string(),
                DecisionRecord {
                    ts: event.ts,
                    call_id: call_id.to_string(),
                    entity: json!({"type": entity_type, "value": entity.to_json()}),
                    feature: definition.clone(),
                    assignment: Dynamic::Null,
                    variant: json!(""),
                    sticky: false,
                    repeat: false,
                    trace: self.trace.then(Vec::new),
                    extra: None,
                },
            );
        }

        let Some(record) = state.records.get_mut(call_id) else {
            return;
        };

        if let Some(trace) = &mut record.trace
            && let Some(entry) = Self::trace_entry(event)
        {
            trace.push(entry);
        }

        match &event.kind {
            // Nested features choose again; the innermost choice wins
            EventKind::ChoseVariant {
                definition, sticky, ..
            } => {
                record.variant = definition.clone();
                record.sticky = *sticky;
            }
            EventKind::StickyAssignment {
                variant: Some(variant),
                assigned: true,
                ..
            } => {
                record.variant = json!({"name": variant});
                record.repeat = true;
                record.sticky = true;
            }
            EventKind::LeaveGate { value } => {
                record.assignment = value.clone();
                state.deferred.insert(call_id.to_string());
            }
            _ => {}
        }
    }

    fn is_deferrable(&self) -> bool {
        true
    }

    fn write_log(&self, call_id: &str, extra: Option<&serde_json::Value>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.deferred.contains(call_id) {
            return;
        }
        let Some(record) = state.records.get_mut(call_id) else {
            return;
        };

        if record.repeat {
            record.call_id = seq_id(&record.call_id);
        }
        let mut snapshot = record.clone();
        snapshot.extra = extra.cloned();
        record.repeat = true;

        match &state.sender {
            Some(sender) => {
                if sender.send(snapshot).is_err() {
                    warn!(call_id, "Record receiver closed, dropping decision record");
                }
            }
            None => debug!(call_id, "Record sink stopped, dropping decision record"),
        }
    }

    fn drop_log(&self, call_id: &str) {
        let mut state = self.state.lock();
        state.deferred.remove(call_id);
        state.records.remove(call_id);
    }

    fn stop(&self) {
        if self.state.lock().sender.take().is_some() {
            debug!("Stopping record sink");
        }
    }
}

/// Passes every event to a closure.
pub struct FnSink {
    f: Box<dyn Fn(&Event) + Send + Sync>,
}

impl FnSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl fmt::Debug for FnSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSink")
    }
}

impl EventSink for FnSink {
    fn emit(&self, event: &Event) {
        (self.f)(event)
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Names of the recorded events, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind.name()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}
