//! Bounded counter of result signatures, for monitoring and the end-of-run
//! report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::job::Outcome;
use crate::wire::CounterSnapshot;

/// Maximum number of distinct value signatures kept before new scalar
/// results collapse into their type-tag bucket.
pub const MAX_SIGNATURES: usize = 20;

/// Counts occurrences of each result signature with its last-seen time.
///
/// JSON scalars are keyed by their value; arrays, objects and failures are
/// always keyed by a `<tag>` bucket, as are scalars once [`MAX_SIGNATURES`]
/// distinct values have been seen. The tag set is finite, so memory use is
/// bounded regardless of the workload.
#[derive(Debug, Default)]
pub struct ResultCounter {
    counts: BTreeMap<String, u64>,
    last_seen: BTreeMap<String, DateTime<Utc>>,
    value_keys: usize,
}

impl ResultCounter {
    /// Empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outcome.
    pub fn record(&mut self, outcome: &Outcome) {
        let (key, is_value) = signature(outcome, self);
        if is_value && !self.counts.contains_key(&key) {
            self.value_keys += 1;
        }
        *self.counts.entry(key.clone()).or_insert(0) += 1;
        self.last_seen.insert(key, Utc::now());
    }

    /// Number of distinct signatures currently tracked.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nothing has been counted yet.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Copy of the counts and last-seen maps for the wire.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            counts: self.counts.clone(),
            last_seen: self.last_seen.clone(),
        }
    }
}

fn signature(outcome: &Outcome, counter: &ResultCounter) -> (String, bool) {
    let value = match outcome {
        Outcome::Err(_) => return ("<error>".to_string(), false),
        Outcome::Ok(value) => value,
    };
    let (repr, tag) = match value {
        Value::Null => return ("<null>".to_string(), false),
        Value::Bool(b) => (b.to_string(), "<bool>"),
        Value::Number(n) => (n.to_string(), "<number>"),
        Value::String(s) => (s.clone(), "<string>"),
        Value::Array(_) => return ("<array>".to_string(), false),
        Value::Object(_) => return ("<object>".to_string(), false),
    };
    if counter.counts.contains_key(&repr) || counter.value_keys < MAX_SIGNATURES {
        (repr, true)
    } else {
        (tag.to_string(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_count_by_value() {
        let mut counter = ResultCounter::new();
        counter.record(&Outcome::Ok(serde_json::json!(4)));
        counter.record(&Outcome::Ok(serde_json::json!(4)));
        counter.record(&Outcome::Ok(serde_json::json!("done")));
        let snap = counter.snapshot();
        assert_eq!(snap.counts.get("4"), Some(&2));
        assert_eq!(snap.counts.get("done"), Some(&1));
        assert!(snap.last_seen.contains_key("4"));
    }

    #[test]
    fn composites_and_failures_use_tag_buckets() {
        let mut counter = ResultCounter::new();
        counter.record(&Outcome::Ok(serde_json::json!([1, 2])));
        counter.record(&Outcome::Ok(serde_json::json!({"a": 1})));
        counter.record(&Outcome::Err("boom".to_string()));
        counter.record(&Outcome::Err("other".to_string()));
        let snap = counter.snapshot();
        assert_eq!(snap.counts.get("<array>"), Some(&1));
        assert_eq!(snap.counts.get("<object>"), Some(&1));
        assert_eq!(snap.counts.get("<error>"), Some(&2));
    }

    #[test]
    fn value_signatures_are_capped() {
        let mut counter = ResultCounter::new();
        for i in 0..(MAX_SIGNATURES as i64 + 10) {
            counter.record(&Outcome::Ok(serde_json::json!(i)));
        }
        let snap = counter.snapshot();
        // 20 distinct values plus one overflow bucket holding the rest.
        assert_eq!(snap.counts.len(), MAX_SIGNATURES + 1);
        assert_eq!(snap.counts.get("<number>"), Some(&10));
        // A value seen before the cap keeps counting by value.
        counter.record(&Outcome::Ok(serde_json::json!(0)));
        assert_eq!(counter.snapshot().counts.get("0"), Some(&2));
    }
}
