// SPDX-License-Identifier: Apache-2.0

//! Shared output manager: enriches each record, assigns identifiers,
//! filters, and dispatches to the owning input's sinks.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::input::marker::InputMarker;
use crate::metric::Metric;
use crate::output::dedup::{DedupConfig, OutputLineFilter};
use crate::output::defaults::FieldDefaults;
use crate::output::id::{generate_uuid, md5_signed_decimal};
use crate::output::level::{LevelFilter, LevelListFilter, LOG_LEVEL_UNKNOWN};
use crate::output::Sink;
use crate::record::Record;

/// Longest `log_message` forwarded to sinks, in UTF-8 bytes.
pub const MAX_MESSAGE_BYTES: usize = 32765;

const TRUNCATED_TAG: &str = "error_message_truncated";
const CLOSE_POLL: Duration = Duration::from_secs(1);

pub struct OutputManager {
    sinks: Mutex<Vec<Arc<dyn Sink>>>,
    level_filter: Box<dyn LevelFilter>,
    line_filter: OutputLineFilter,
    defaults: FieldDefaults,
    default_log_levels: Vec<String>,
    doc_counter: AtomicU64,
    truncate_metric: Metric,
    truncate_warn: RateLimitedWarn,
    drain: AtomicBool,
    close_timeout_secs: u64,
}

impl OutputManager {
    pub fn new(default_log_levels: Vec<String>) -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            level_filter: Box::new(LevelListFilter),
            line_filter: OutputLineFilter::new(DedupConfig::default()),
            defaults: FieldDefaults::detect(),
            default_log_levels,
            doc_counter: AtomicU64::new(0),
            truncate_metric: Metric::new("output.messages_truncated"),
            truncate_warn: RateLimitedWarn::new(Duration::from_secs(30)),
            drain: AtomicBool::new(false),
            close_timeout_secs: 30,
        }
    }

    pub fn with_level_filter(mut self, filter: Box<dyn LevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    pub fn with_dedup(mut self, config: DedupConfig) -> Self {
        self.line_filter = OutputLineFilter::new(config);
        self
    }

    pub fn with_defaults(mut self, defaults: FieldDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_close_timeout(mut self, secs: u64) -> Self {
        self.close_timeout_secs = secs;
        self
    }

    /// Register a sink for lifecycle management (init, stats, close). The
    /// registry is append-only during startup and read-only afterwards.
    pub fn register(&self, sink: Arc<dyn Sink>) {
        let mut sinks = self.sinks.lock().unwrap();
        if !sinks.iter().any(|s| Arc::ptr_eq(s, &sink)) {
            sinks.push(sink);
        }
    }

    pub fn init(&self) -> Result<()> {
        for sink in self.registered() {
            sink.init()?;
        }
        Ok(())
    }

    /// True once shutdown has begun; tailers stop at their next boundary.
    pub fn is_drained(&self) -> bool {
        self.drain.load(Ordering::Relaxed)
    }

    pub fn truncated_count(&self) -> u64 {
        self.truncate_metric.value()
    }

    /// Enrich one record and fan it out to the input's sinks.
    pub fn write(&self, mut record: Record, marker: &InputMarker) {
        let config = &marker.input.config;

        // Context fields. "cluster" is also overridden when the parsed value
        // is the literal string "null".
        for (key, value) in &config.add_fields {
            let current = record.get(key);
            let absent = matches!(current, None | Some(Value::Null));
            let null_cluster =
                key == "cluster" && current.and_then(Value::as_str) == Some("null");
            if absent || null_cluster {
                record.insert(key.clone(), Value::from(value.as_str()));
            }
        }

        self.defaults.apply(&mut record, marker);
        if !record.contains_key("level") {
            record.insert("level".to_string(), Value::from(LOG_LEVEL_UNKNOWN));
        }

        if config.use_event_md5_as_id || config.gen_event_md5 {
            let prefix = match record.get("logtime") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let canonical = serde_json::to_vec(&record).unwrap_or_default();
            let digest = format!("{}{}", prefix, md5_signed_decimal(&canonical));
            if config.gen_event_md5 {
                record.insert("event_md5".to_string(), Value::from(digest.clone()));
            }
            if config.use_event_md5_as_id {
                record.insert("id".to_string(), Value::from(digest));
            }
        }

        let seq = self.doc_counter.fetch_add(1, Ordering::SeqCst);
        record.insert("seq_num".to_string(), Value::from(seq));

        if !record.contains_key("event_count") {
            record.insert("event_count".to_string(), Value::from(1));
        }
        if let Some(group) = config.group.as_deref().filter(|g| !g.trim().is_empty()) {
            record.insert("group".to_string(), Value::from(group));
        }
        if let Some(line) = marker.properties.get("line_number").and_then(Value::as_u64) {
            if line > 0 {
                record.insert("logfile_line_number".to_string(), Value::from(line));
            }
        }

        self.truncate_long_message(&mut record, marker);
        let message_digest = record
            .get("log_message")
            .and_then(Value::as_str)
            .map(|message| md5_signed_decimal(message.as_bytes()));
        if let Some(digest) = message_digest {
            record.insert("message_md5".to_string(), Value::from(digest));
        }

        let levels = self.resolve_levels(marker);
        if !self.level_filter.is_record_allowed(&record, marker, levels) {
            return;
        }
        if self.line_filter.should_drop(&record, marker) {
            return;
        }

        for sink in &marker.input.sinks {
            if !record.contains_key("id") {
                record.insert(
                    "id".to_string(),
                    Value::from(generate_uuid(&record, sink.id_fields())),
                );
            }
            if let Err(e) = sink.write(&record, marker) {
                error!(
                    sink = %sink.short_description(),
                    error = %e,
                    "error writing record to sink"
                );
            }
        }
    }

    /// Forward an unparsed text block.
    pub fn write_text(&self, text: &str, marker: &InputMarker) {
        let levels = self.resolve_levels(marker);
        if !self.level_filter.is_text_allowed(text, marker, levels) {
            return;
        }
        for sink in &marker.input.sinks {
            if let Err(e) = sink.write_text(text, marker) {
                error!(
                    sink = %sink.short_description(),
                    error = %e,
                    "error writing text to sink"
                );
            }
        }
    }

    /// Hand a whole file to each sink.
    pub fn copy_file(&self, file: &Path, marker: &InputMarker) {
        for sink in &marker.input.sinks {
            if let Err(e) = sink.copy_file(file, marker) {
                error!(
                    sink = %sink.short_description(),
                    error = %e,
                    "error copying file to sink"
                );
            }
        }
    }

    /// Orderly shutdown: drain, close every sink, then wait up to the close
    /// timeout for each to report closed. Stragglers are logged and abandoned.
    pub fn close(&self) {
        info!("closing outputs");
        self.drain.store(true, Ordering::Relaxed);

        let sinks = self.registered();
        for sink in &sinks {
            sink.set_drain(true);
            sink.close();
        }

        let deadline = Instant::now() + Duration::from_secs(self.close_timeout_secs);
        loop {
            let open: Vec<_> = sinks.iter().filter(|s| !s.is_closed()).collect();
            if open.is_empty() {
                info!("all outputs closed");
                return;
            }
            if Instant::now() >= deadline {
                for sink in open {
                    warn!(
                        sink = %sink.short_description(),
                        pending = sink.pending_count(),
                        "output did not close in time, abandoning"
                    );
                }
                return;
            }
            for sink in &open {
                warn!(sink = %sink.short_description(), "waiting for output to close");
            }
            std::thread::sleep(CLOSE_POLL);
        }
    }

    pub fn log_stats(&self) {
        self.truncate_metric.log();
        for sink in self.registered() {
            sink.log_stat();
        }
    }

    pub fn add_metrics(&self, metrics: &mut Vec<Metric>) {
        metrics.push(self.truncate_metric.clone());
        for sink in self.registered() {
            sink.add_metrics(metrics);
        }
    }

    fn registered(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks.lock().unwrap().clone()
    }

    fn resolve_levels<'a>(&'a self, marker: &'a InputMarker) -> &'a [String] {
        match &marker.input.config.default_log_levels {
            Some(levels) if !levels.is_empty() => levels,
            _ => &self.default_log_levels,
        }
    }

    fn truncate_long_message(&self, record: &mut Record, marker: &InputMarker) {
        let message = match record.get("log_message").and_then(Value::as_str) {
            Some(m) if m.len() > MAX_MESSAGE_BYTES => m,
            _ => return,
        };

        let original_len = message.len();
        let truncated = truncate_utf8(message, MAX_MESSAGE_BYTES).to_string();
        self.truncate_metric.inc();

        if self.truncate_warn.should_log() {
            let head: String = truncated.chars().take(100).collect();
            warn!(
                size = original_len,
                input = %marker.input.short_description(),
                head = %head,
                "message too big, truncating to {} bytes",
                MAX_MESSAGE_BYTES
            );
        }

        record.insert("log_message".to_string(), Value::from(truncated));
        match record.get_mut("tags") {
            Some(Value::Array(tags)) => tags.push(Value::from(TRUNCATED_TAG)),
            _ => {
                record.insert(
                    "tags".to_string(),
                    Value::Array(vec![Value::from(TRUNCATED_TAG)]),
                );
            }
        }
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Emits at most one log line per interval; repeated oversized messages
/// would otherwise flood the agent's own log.
struct RateLimitedWarn {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimitedWarn {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    fn should_log(&self) -> bool {
        let mut last = self.last.lock().unwrap();
        match *last {
            Some(at) if at.elapsed() < self.interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}
