//! Call ids
//!
//! Every top-level evaluation gets one id, shared by all of its events and
//! by the value it returns.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use uuid::Uuid;

/// Source of call ids.
pub trait CallIdGenerator: Send + Sync + fmt::Debug {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCallIds;

impl CallIdGenerator for UuidCallIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// UUID-formatted ids drawn from a seeded generator, for reproducible logs.
#[derive(Debug)]
pub struct SeededCallIds {
    rng: Mutex<StdRng>,
}

impl SeededCallIds {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl CallIdGenerator for SeededCallIds {
    fn next_id(&self) -> String {
        let bits: u128 = self.rng.lock().random();
        Uuid::from_u128(bits).to_string()
    }
}

/// Derive the next id in a sequence from `current_id`.
///
/// Repeat log writes keep the provenance of the original call: `abc`
/// becomes `abc:1`, `abc:1` becomes `abc:2`.
///
/// # Examples
///
/// ```
/// use tollgate_features::seq_id;
///
/// assert_eq!(seq_id("abc"), "abc:1");
/// assert_eq!(seq_id("abc:1"), "abc:2");
/// ```
pub fn seq_id(current_id: &str) -> String {
    match current_id.split_once(':') {
        Some((base, seq)) => match seq.parse::<u64>() {
            Ok(n) => format!("{base}:{}", n + 1),
            Err(_) => format!("{current_id}:1"),
        },
        None => format!("{current_id}:1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_id() {
        assert_eq!(seq_id("x"), "x:1");
        assert_eq!(seq_id("x:1"), "x:2");
        assert_eq!(seq_id("x:9"), "x:10");
    }

    #[test]
    fn test_seeded_ids_are_reproducible() {
        let a = SeededCallIds::new(42);
        let b = SeededCallIds::new(42);
        let first = a.next_id();
        assert_eq!(first, b.next_id());
        assert_ne!(first, a.next_id());
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        let ids = UuidCallIds;
        assert_ne!(ids.next_id(), ids.next_id());
    }
}
