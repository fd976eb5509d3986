//! Request-scoped stage timings.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

/// Elapsed seconds per stage label. One value per call, in call order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Timings {
    entries: BTreeMap<String, Vec<f64>>,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: &str, seconds: f64) {
        self.entries.entry(label.to_string()).or_default().push(seconds);
    }

    /// Record the time elapsed since `start`.
    pub fn record_since(&mut self, label: &str, start: Instant) {
        self.record(label, start.elapsed().as_secs_f64());
    }

    /// Fold another context in, appending its values after ours.
    pub fn merge(&mut self, other: Timings) {
        for (label, values) in other.entries {
            self.entries.entry(label).or_default().extend(values);
        }
    }

    #[cfg(test)]
    pub fn get(&self, label: &str) -> Option<&[f64]> {
        self.entries.get(label).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_merge() {
        let mut a = Timings::new();
        a.record("fetch", 0.5);
        let mut b = Timings::new();
        b.record("fetch", 0.25);
        b.record("annotate", 1.0);

        a.merge(b);
        assert_eq!(a.get("fetch"), Some(&[0.5, 0.25][..]));
        assert_eq!(a.get("annotate"), Some(&[1.0][..]));
        assert_eq!(a.get("missing"), None);
    }

    #[test]
    fn test_serializes_as_map() {
        let mut t = Timings::new();
        t.record("list_images", 2.0);
        assert_eq!(serde_json::to_string(&t).unwrap(), r#"{"list_images":[2.0]}"#);
    }
}
