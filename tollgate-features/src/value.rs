//! Gate results
//!
//! A [`Value`] wraps the variant value a gate returned, together with the
//! metadata needed to log its exposure later. It dereferences to the wrapped
//! [`Dynamic`], so most code never unwraps it.
//!
//! A value owns its pending decision log. With a deferrable sink the log is
//! written by [`Value::log`]; dropping the value without logging discards it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tollgate_expr::Dynamic;

use crate::events::EventSink;

/// Whether a value comes from a fresh assignment or repeats an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Assignment,
    Exposure,
}

pub struct Value {
    value: Dynamic,
    variant: String,
    ts: DateTime<Utc>,
    call_id: String,
    call_type: CallType,
    sink: Option<Arc<dyn EventSink>>,
}

impl Value {
    pub(crate) fn new(
        value: Dynamic,
        variant: impl Into<String>,
        ts: DateTime<Utc>,
        call_id: impl Into<String>,
        call_type: CallType,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            value,
            variant: variant.into(),
            ts,
            call_id: call_id.into(),
            call_type,
            sink,
        }
    }

    pub fn value(&self) -> &Dynamic {
        &self.value
    }

    /// Name of the assigned variant
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// When the assignment was made
    pub fn ts(&self) -> DateTime<Utc> {
        self.ts
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Write the decision log, with optional extra data attached.
    ///
    /// Only needed when logging was deferred. Once logged, the value counts
    /// as an exposure; logging again writes a repeat record. The original
    /// assignment timestamp is kept.
    pub fn log(&mut self, extra: Option<serde_json::Value>) {
        if let Some(sink) = &self.sink
            && sink.is_deferrable()
        {
            sink.write_log(&self.call_id, extra.as_ref());
            self.call_type = CallType::Exposure;
        }
    }

    /// Discard any unwritten log.
    pub fn release(self) {}

    /// Unwrap the raw value, discarding any unwritten log.
    pub fn into_value(mut self) -> Dynamic {
        std::mem::take(&mut self.value)
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        if let Some(sink) = &self.sink
            && sink.is_deferrable()
        {
            sink.drop_log(&self.call_id);
        }
    }
}

impl Deref for Value {
    type Target = Dynamic;

    fn deref(&self) -> &Dynamic {
        &self.value
    }
}

impl PartialEq<Dynamic> for Value {
    fn eq(&self, other: &Dynamic) -> bool {
        self.value == *other
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.value == *other
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("value", &self.value)
            .field("variant", &self.variant)
            .field("ts", &self.ts)
            .field("call_id", &self.call_id)
            .field("call_type", &self.call_type)
            .finish()
    }
}
