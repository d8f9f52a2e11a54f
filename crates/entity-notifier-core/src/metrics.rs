//! Labelled counters for deployment observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on shutdown). Counter names are a contract
//! for dashboards, so they live here as constants.

use std::collections::BTreeMap;
use std::sync::Mutex;

pub const SCHEDULE_ENTITY_DEPLOYMENT_ATTEMPT: &str = "schedule_entity_deployment_attempt";
pub const ENTITY_ALREADY_STORED: &str = "entity_already_stored";
pub const ENTITY_DEPLOYMENT_SUCCESS: &str = "entity_deployment_success";
pub const ENTITY_DEPLOYMENT_FAILURE: &str = "entity_deployment_failure";
pub const ENTITY_DOWNLOAD_SUCCESS: &str = "entity_download_success";
pub const ENTITY_DOWNLOAD_FAILURE: &str = "entity_download_failure";
pub const SNS_PUBLISH_SUCCESS: &str = "sns_publish_success";
pub const SNS_PUBLISH_FAILURE: &str = "sns_publish_failure";

type Labels = BTreeMap<String, String>;

/// Counter registry keyed by name and label set.
///
/// Label order at the call site does not matter.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<BTreeMap<(String, Labels), u64>>,
}

fn to_labels(labels: &[(&str, &str)]) -> Labels {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `name{labels}` by one.
    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let key = (name.to_string(), to_labels(labels));
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(key).or_insert(0) += 1;
        }
        tracing::trace!(metric = name, ?labels, "counter incremented");
    }

    /// Current value of `name{labels}` (exact label match).
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), to_labels(labels));
        self.counters
            .lock()
            .map(|counters| counters.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Sum of `name` across every label set.
    pub fn total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|counters| {
                counters
                    .iter()
                    .filter(|((n, _), _)| n == name)
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Emit all current counter values, one `info!` event per series.
    pub fn flush(&self) {
        let Ok(counters) = self.counters.lock() else {
            return;
        };
        for ((name, labels), value) in counters.iter() {
            tracing::info!(metric = %name, labels = ?labels, value, "counter");
        }
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_labels() {
        let m = Metrics::new();
        m.increment(ENTITY_DEPLOYMENT_FAILURE, &[("retryable", "true"), ("entityType", "scene")]);
        m.increment(ENTITY_DEPLOYMENT_FAILURE, &[("entityType", "scene"), ("retryable", "true")]);
        m.increment(ENTITY_DEPLOYMENT_FAILURE, &[("entityType", "scene"), ("retryable", "false")]);

        assert_eq!(
            m.get(ENTITY_DEPLOYMENT_FAILURE, &[("entityType", "scene"), ("retryable", "true")]),
            2
        );
        assert_eq!(m.total(ENTITY_DEPLOYMENT_FAILURE), 3);
        assert_eq!(m.get(ENTITY_DEPLOYMENT_FAILURE, &[("entityType", "scene")]), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.increment(SNS_PUBLISH_SUCCESS, &[("type", "event")]);
        m.flush();
        m.reset();
        assert_eq!(m.total(SNS_PUBLISH_SUCCESS), 0);
    }
}
