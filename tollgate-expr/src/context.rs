//! Evaluation context and trace hooks.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::dynamic::Dynamic;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Ambient values available while evaluating an expression.
///
/// The context is handed to `Now`, `TimeSince` and to any functor fields on
/// the entity, so tests can pin the clock.
#[derive(Clone)]
pub struct Context {
    clock: Clock,
}

impl Context {
    /// Context backed by the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with a custom clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }

    /// Context whose clock always returns `ts`.
    pub fn fixed(ts: DateTime<Utc>) -> Self {
        Self::with_clock(Arc::new(move || ts))
    }

    /// Current time according to this context.
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// The underlying clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl Default for Context {
    fn default() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("now", &self.now()).finish()
    }
}

/// Receives one call per evaluated operator or field.
pub trait Tracer {
    /// Record that `function` was applied to `args` producing `result`.
    fn trace(&self, function: &str, args: &[Dynamic], result: &Dynamic);
}

impl<F> Tracer for F
where
    F: Fn(&str, &[Dynamic], &Dynamic),
{
    fn trace(&self, function: &str, args: &[Dynamic], result: &Dynamic) {
        self(function, args, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let context = Context::fixed(ts);
        assert_eq!(context.now(), ts);
        assert_eq!(context.clone().now(), ts);
    }

    #[test]
    fn test_closure_tracer() {
        let calls = std::cell::RefCell::new(Vec::new());
        let tracer = |name: &str, _: &[Dynamic], result: &Dynamic| {
            calls.borrow_mut().push(format!("{name}={result}"));
        };
        tracer.trace("Eq", &[], &Dynamic::Bool(true));
        assert_eq!(calls.borrow().as_slice(), ["Eq=True"]);
    }
}
