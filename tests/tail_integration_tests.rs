// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios for the tailing core: basic tail with checkpoint
//! resume, rotation, multi-folder globs, first-match-only tailing, one-shot
//! processing, and container registry churn.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use logship::checkpoint::CheckpointStore;
use logship::config::InputConfig;
use logship::error::Result;
use logship::filter::{FilterChain, RawLineFilter};
use logship::input::docker::{ContainerLogAdapter, ContainerMetadata, ContainerRegistry};
use logship::input::marker::{InputContext, InputMarker};
use logship::input::supervisor::InputSupervisor;
use logship::input::tailer::FileTailer;
use logship::output::defaults::FieldDefaults;
use logship::output::{OutputManager, Sink};
use logship::record::Record;

/// Collects everything it is handed; the stand-in for a real sink.
struct MemorySink {
    records: Mutex<Vec<Record>>,
    copied: Mutex<Vec<PathBuf>>,
    closed: AtomicBool,
}

impl MemorySink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            copied: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.get("log_message").and_then(Value::as_str).map(String::from))
            .collect()
    }

    fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl Sink for MemorySink {
    fn write(&self, record: &Record, _marker: &InputMarker) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn write_text(&self, _text: &str, _marker: &InputMarker) -> Result<()> {
        Ok(())
    }

    fn copy_file(&self, file: &Path, _marker: &InputMarker) -> Result<()> {
        self.copied.lock().unwrap().push(file.to_path_buf());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn set_drain(&self, _drain: bool) {}

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn pending_count(&self) -> usize {
        0
    }

    fn short_description(&self) -> String {
        "sink:memory".to_string()
    }
}

fn output_manager() -> Arc<OutputManager> {
    let levels = vec!["UNKNOWN".to_string(), "INFO".to_string(), "ERROR".to_string()];
    Arc::new(
        OutputManager::new(levels)
            .with_defaults(FieldDefaults::fixed(Some("test-host".into()), None)),
    )
}

fn raw_chain() -> FilterChain {
    let mut chain = FilterChain::new();
    chain.push(Box::new(RawLineFilter));
    chain
}

/// Fast intervals so scenarios complete in seconds.
fn fast_config(log_type: &str, path: Option<String>) -> InputConfig {
    InputConfig {
        log_type: log_type.to_string(),
        path,
        checkpoint_interval_ms: 50,
        path_update_interval_sec: 1,
        detach_interval_sec: 1,
        detach_time_sec: 2,
        gen_event_md5: false,
        ..Default::default()
    }
}

fn append(path: &Path, line: &str) {
    let mut file = fs::OpenOptions::new().append(true).create(true).open(path).unwrap();
    writeln!(file, "{}", line).unwrap();
    file.flush().unwrap();
}

fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    check()
}

#[test]
fn basic_tail_with_checkpoint_resume_across_restart() {
    let logs = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    let log_path = logs.path().join("x.log");
    fs::write(&log_path, "").unwrap();

    let sink = MemorySink::new();
    let input = InputContext::new(
        fast_config("svc", Some(log_path.display().to_string())),
        vec![Arc::clone(&sink) as Arc<dyn Sink>],
    );
    let output = output_manager();
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let handle = FileTailer::spawn(
        Arc::clone(&input),
        raw_chain(),
        Arc::clone(&output),
        Arc::clone(&store),
        CancellationToken::new(),
        vec![log_path.clone()],
    )
    .unwrap();

    for line in ["a", "b", "c"] {
        append(&log_path, line);
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(wait_for(Duration::from_secs(5), || sink.record_count() == 3));

    // "Kill" the process: close the tailer, which flushes its checkpoint
    handle.request_close();
    handle.join();

    append(&log_path, "d");

    // Restart: fresh store over the same sidecar directory, fresh tailer
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());
    let handle = FileTailer::spawn(
        Arc::clone(&input),
        raw_chain(),
        Arc::clone(&output),
        Arc::clone(&store),
        CancellationToken::new(),
        vec![log_path.clone()],
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(5), || sink.record_count() == 4));
    handle.request_close();
    handle.join();

    assert_eq!(sink.messages(), vec!["a", "b", "c", "d"]);

    // Line numbers are 1-based and continue across the restart
    let last = sink.records().last().cloned().unwrap();
    assert_eq!(last.get("logfile_line_number").and_then(Value::as_u64), Some(4));

    // seq_num is strictly increasing at the sink
    let seqs: Vec<u64> = sink
        .records()
        .iter()
        .map(|r| r.get("seq_num").and_then(Value::as_u64).unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn rotation_respawns_with_fresh_identity_and_line_numbers() {
    let logs = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    let log_path = logs.path().join("app.log");
    fs::write(&log_path, "").unwrap();

    let sink = MemorySink::new();
    let input = InputContext::new(
        fast_config("app", Some(log_path.display().to_string())),
        vec![Arc::clone(&sink) as Arc<dyn Sink>],
    );
    let output = output_manager();
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let supervisor = InputSupervisor::new(
        Arc::clone(&input),
        raw_chain(),
        output,
        store,
        CancellationToken::new(),
    )
    .unwrap();
    assert!(supervisor.is_ready());
    supervisor.start().unwrap();

    for i in 1..=10 {
        append(&log_path, &format!("line-{}", i));
    }
    assert!(wait_for(Duration::from_secs(5), || sink.record_count() == 10));

    // Rotate: rename aside, recreate at the same path, keep writing
    fs::rename(&log_path, logs.path().join("app.log.1")).unwrap();
    fs::write(&log_path, "").unwrap();
    append(&log_path, "line-11");
    append(&log_path, "line-12");

    assert!(wait_for(Duration::from_secs(10), || sink.record_count() == 12));
    supervisor.shutdown();

    let records = sink.records();
    // Lines 1-10 keep their numbers on the old identity
    assert_eq!(
        records[9].get("logfile_line_number").and_then(Value::as_u64),
        Some(10)
    );
    // The new identity starts counting from 1 again
    assert_eq!(
        records[10].get("logfile_line_number").and_then(Value::as_u64),
        Some(1)
    );
    assert_eq!(
        records[11].get("logfile_line_number").and_then(Value::as_u64),
        Some(2)
    );
    assert_eq!(
        records[10].get("log_message").and_then(Value::as_str),
        Some("line-11")
    );
}

#[test]
fn multi_folder_glob_spawns_one_tailer_per_folder() {
    let root = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    for (sub, line) in [("a", "A"), ("b", "B")] {
        fs::create_dir(root.path().join(sub)).unwrap();
        append(&root.path().join(sub).join("app.log"), line);
    }

    let pattern = format!("{}/*/app.log", root.path().display());
    let sink = MemorySink::new();
    let input = InputContext::new(
        fast_config("multi", Some(pattern)),
        vec![Arc::clone(&sink) as Arc<dyn Sink>],
    );
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let supervisor = InputSupervisor::new(
        Arc::clone(&input),
        raw_chain(),
        output_manager(),
        store,
        CancellationToken::new(),
    )
    .unwrap();
    assert!(supervisor.is_ready());
    supervisor.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || sink.record_count() == 2));
    assert_eq!(supervisor.child_count(), 2);
    supervisor.shutdown();

    let mut messages = sink.messages();
    messages.sort();
    assert_eq!(messages, vec!["A", "B"]);
}

#[test]
fn wildcard_tail_follows_only_the_first_match() {
    let logs = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    append(&logs.path().join("a.log"), "A");
    append(&logs.path().join("b.log"), "B");

    let pattern = format!("{}/*.log", logs.path().display());
    let sink = MemorySink::new();
    let input = InputContext::new(
        fast_config("first", Some(pattern)),
        vec![Arc::clone(&sink) as Arc<dyn Sink>],
    );
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let supervisor = InputSupervisor::new(
        Arc::clone(&input),
        raw_chain(),
        output_manager(),
        store,
        CancellationToken::new(),
    )
    .unwrap();
    assert!(supervisor.is_ready());
    supervisor.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || sink.record_count() == 1));
    assert_eq!(supervisor.child_count(), 1);

    // Give the ignored file a chance to show up if the rule were broken
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(sink.messages(), vec!["A"]);
    supervisor.shutdown();
}

#[test]
fn one_shot_processes_all_matches_in_reverse_order() {
    let logs = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    append(&logs.path().join("a.log"), "A");
    append(&logs.path().join("b.log"), "B");

    let pattern = format!("{}/*.log", logs.path().display());
    let mut config = fast_config("oneshot", Some(pattern));
    config.tail = false;

    let sink = MemorySink::new();
    let input = InputContext::new(config, vec![Arc::clone(&sink) as Arc<dyn Sink>]);
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let supervisor = InputSupervisor::new(
        Arc::clone(&input),
        raw_chain(),
        output_manager(),
        store,
        CancellationToken::new(),
    )
    .unwrap();
    assert!(supervisor.is_ready());
    supervisor.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || sink.record_count() == 2));
    supervisor.shutdown();

    // Reverse lexicographic: b.log first, then a.log
    assert_eq!(sink.messages(), vec!["B", "A"]);
}

#[test]
fn copy_mode_hands_files_to_sinks() {
    let logs = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    let log_path = logs.path().join("blob.log");
    append(&log_path, "payload");

    let mut config = fast_config("copy", Some(log_path.display().to_string()));
    config.process_file = false;
    config.copy_file = true;

    let sink = MemorySink::new();
    let input = InputContext::new(config, vec![Arc::clone(&sink) as Arc<dyn Sink>]);
    let output = output_manager();
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let handle = FileTailer::spawn(
        input,
        raw_chain(),
        output,
        store,
        CancellationToken::new(),
        vec![log_path.clone()],
    )
    .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        sink.copied.lock().unwrap().len() == 1
    }));
    handle.join();
    assert_eq!(sink.copied.lock().unwrap()[0], log_path);
    assert_eq!(sink.record_count(), 0);
}

/// Mutable registry snapshot for churn scenarios.
struct FakeRegistry {
    snapshot: Mutex<HashMap<String, HashMap<String, ContainerMetadata>>>,
}

impl FakeRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(HashMap::new()),
        })
    }

    fn set(&self, log_type: &str, containers: Vec<ContainerMetadata>) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.clear();
        snapshot.insert(
            log_type.to_string(),
            containers
                .into_iter()
                .map(|meta| (meta.container_id.clone(), meta))
                .collect(),
        );
    }
}

impl ContainerRegistry for FakeRegistry {
    fn snapshot(&self) -> HashMap<String, HashMap<String, ContainerMetadata>> {
        self.snapshot.lock().unwrap().clone()
    }
}

fn container(id: &str, log_path: PathBuf) -> ContainerMetadata {
    ContainerMetadata {
        container_id: id.to_string(),
        log_path,
        labels: HashMap::new(),
    }
}

#[test]
fn container_churn_swaps_tailers() {
    let logs = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    let c1_path = logs.path().join("c1.json");
    let c2_path = logs.path().join("c2.json");
    append(&c1_path, "C1");
    append(&c2_path, "C2");

    let mut config = fast_config("docker-svc", None);
    config.docker_enabled = true;
    config.detach_time_sec = 1;

    let registry = FakeRegistry::new();
    registry.set("docker-svc", vec![container("c1", c1_path.clone())]);

    let sink = MemorySink::new();
    let input = InputContext::new(config, vec![Arc::clone(&sink) as Arc<dyn Sink>]);
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let adapter = ContainerLogAdapter::new(
        Arc::clone(&input),
        raw_chain(),
        Arc::clone(&registry) as Arc<dyn ContainerRegistry>,
        output_manager(),
        store,
        CancellationToken::new(),
    )
    .unwrap();
    assert!(adapter.is_ready());
    adapter.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || sink
        .messages()
        .contains(&"C1".to_string())));
    assert_eq!(adapter.child_count(), 1);

    // The registry now reports a different container
    registry.set("docker-svc", vec![container("c2", c2_path.clone())]);

    assert!(wait_for(Duration::from_secs(10), || sink
        .messages()
        .contains(&"C2".to_string())));
    // c1's tailer is retired once it has been absent past the detach time
    assert!(wait_for(Duration::from_secs(10), || adapter.child_count() == 1));

    adapter.shutdown();
}

#[test]
fn late_created_file_turns_supervisor_ready() {
    let logs = TempDir::new().unwrap();
    let checkpoints_dir = TempDir::new().unwrap();
    let pattern = format!("{}/*.log", logs.path().display());

    let sink = MemorySink::new();
    let input = InputContext::new(
        fast_config("late", Some(pattern)),
        vec![Arc::clone(&sink) as Arc<dyn Sink>],
    );
    let store = Arc::new(CheckpointStore::new(checkpoints_dir.path(), ".cp").unwrap());

    let supervisor = InputSupervisor::new(
        Arc::clone(&input),
        raw_chain(),
        output_manager(),
        store,
        CancellationToken::new(),
    )
    .unwrap();

    assert!(!supervisor.is_ready());

    append(&logs.path().join("born.log"), "hello");
    assert!(supervisor.is_ready());
    supervisor.start().unwrap();

    assert!(wait_for(Duration::from_secs(5), || sink.record_count() == 1));
    supervisor.shutdown();
}
