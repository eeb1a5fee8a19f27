// SPDX-License-Identifier: Apache-2.0

//! Output-line dedup: drops a record when the same keyed message was emitted
//! by the same input within the dedup interval. Caches are kept per input so
//! two inputs shipping identical lines never suppress each other.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::input::marker::InputMarker;
use crate::record::{str_field, Record};

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Record field the cache is keyed on.
    pub key_field: String,
    /// Maximum keys remembered per input.
    pub max_size: usize,
    /// Only suppress a repeat of the most recently emitted key.
    pub last_dedup_only: bool,
    pub dedup_interval_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_field: "log_message".to_string(),
            max_size: 100,
            last_dedup_only: true,
            dedup_interval_ms: 1_000,
        }
    }
}

#[derive(Default)]
struct InputCache {
    entries: HashMap<String, u64>,
    order: VecDeque<String>,
    last_key: Option<String>,
}

pub struct OutputLineFilter {
    config: DedupConfig,
    caches: Mutex<HashMap<String, InputCache>>,
}

impl OutputLineFilter {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// True when the record is a duplicate and should be dropped.
    pub fn should_drop(&self, record: &Record, marker: &InputMarker) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = match str_field(record, &self.config.key_field) {
            Some(k) => k.to_string(),
            None => return false,
        };

        let cache_key = marker.input.short_description();
        let now = epoch_ms();

        let mut caches = self.caches.lock().unwrap();
        let cache = caches.entry(cache_key).or_default();

        let duplicate = match cache.entries.get(&key) {
            Some(&seen) => {
                let within = now.saturating_sub(seen) < self.config.dedup_interval_ms;
                let is_last = cache.last_key.as_deref() == Some(key.as_str());
                within && (!self.config.last_dedup_only || is_last)
            }
            None => false,
        };

        if cache.entries.insert(key.clone(), now).is_none() {
            cache.order.push_back(key.clone());
            while cache.order.len() > self.config.max_size {
                if let Some(evicted) = cache.order.pop_front() {
                    cache.entries.remove(&evicted);
                }
            }
        }
        cache.last_key = Some(key);

        duplicate
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
