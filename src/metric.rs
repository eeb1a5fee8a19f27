// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

/// A named monotonic counter shared across threads. Sinks and the output
/// manager expose theirs through `add_metrics` so the agent can log totals
/// at shutdown.
#[derive(Clone)]
pub struct Metric {
    name: String,
    value: Arc<AtomicU64>,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn log(&self) {
        info!(metric = %self.name, value = self.value(), "stat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_across_clones() {
        let metric = Metric::new("records");
        let clone = metric.clone();
        metric.inc();
        clone.add(2);
        assert_eq!(metric.value(), 3);
    }
}
