// SPDX-License-Identifier: Apache-2.0

//! Per-input supervisor: expands the configured pattern, owns the child
//! tailers, and runs the two periodic duties (path rescan and detach sweep)
//! until shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::input::finder;
use crate::input::marker::InputContext;
use crate::input::sleep_cancellable;
use crate::input::tailer::{FileTailer, TailerHandle};
use crate::output::OutputManager;

/// A live child and how long its backing file has been missing.
pub(crate) struct ChildState {
    pub handle: TailerHandle,
    pub absent_since: Option<Instant>,
}

pub struct InputSupervisor {
    input: Arc<InputContext>,
    chain: Mutex<FilterChain>,
    output: Arc<OutputManager>,
    checkpoints: Arc<CheckpointStore>,
    cancel: CancellationToken,
    pattern: String,
    multi_folder: bool,
    /// Keyed by folder in multi-folder mode, by the concrete file otherwise.
    children: Mutex<HashMap<PathBuf, ChildState>>,
    ready: AtomicBool,
    started: AtomicBool,
    duty_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl InputSupervisor {
    pub fn new(
        input: Arc<InputContext>,
        chain: FilterChain,
        output: Arc<OutputManager>,
        checkpoints: Arc<CheckpointStore>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let pattern = input
            .config
            .path
            .clone()
            .ok_or_else(|| Error::Config("file input without a path".into()))?;

        let multi_folder = finder::is_multi_folder(&pattern);
        if multi_folder {
            info!(
                pattern = %pattern,
                "wildcard in folder path, will monitor multiple folders"
            );
        }

        Ok(Arc::new(Self {
            input,
            chain: Mutex::new(chain),
            output,
            checkpoints,
            // Child token: the agent's shutdown propagates down, while this
            // supervisor can stop its own workers without touching siblings.
            cancel: cancel.child_token(),
            pattern,
            multi_folder,
            children: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
            started: AtomicBool::new(false),
            duty_threads: Mutex::new(Vec::new()),
        }))
    }

    pub fn input(&self) -> &Arc<InputContext> {
        &self.input
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    /// Ready once the pattern expands to at least one existing regular file.
    /// Stays false otherwise; the agent's readiness loop retries.
    pub fn is_ready(&self) -> bool {
        if self.ready.load(Ordering::Relaxed) {
            return true;
        }
        match finder::expand(&self.pattern) {
            Ok(files) if !files.is_empty() => {
                info!(
                    pattern = %self.pattern,
                    first = %files[0].display(),
                    "file filter expanded"
                );
                self.ready.store(true, Ordering::Relaxed);
                true
            }
            Ok(_) => {
                debug!(pattern = %self.pattern, "no matching file yet, ignoring for now");
                false
            }
            Err(e) => {
                warn!(pattern = %self.pattern, error = %e, "glob expansion failed");
                false
            }
        }
    }

    /// Spawn the initial children and start the periodic duties.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let files = finder::expand(&self.pattern)?;
        if self.multi_folder {
            for (folder, folder_files) in finder::group_by_folder(&files) {
                self.spawn_child(folder, folder_files);
            }
        } else if !files.is_empty() {
            self.spawn_single(files);
        }

        let log_type = self.input.config.log_type.clone();

        let rescan = {
            let sup = Arc::clone(self);
            std::thread::Builder::new()
                .name(format!("path-updater-{}", log_type))
                .spawn(move || sup.rescan_duty())
                .map_err(|e| Error::Config(format!("cannot start rescan thread: {}", e)))?
        };
        let detach = {
            let sup = Arc::clone(self);
            std::thread::Builder::new()
                .name(format!("file-detacher-{}", log_type))
                .spawn(move || sup.detach_duty())
                .map_err(|e| Error::Config(format!("cannot start detach thread: {}", e)))?
        };

        let mut threads = self.duty_threads.lock().unwrap();
        threads.push(rescan);
        threads.push(detach);
        Ok(())
    }

    /// Close every child and wait for the duty threads. Each tailer flushes
    /// its final checkpoint on the way out.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<TailerHandle> = {
            let mut children = self.children.lock().unwrap();
            children
                .drain()
                .map(|(_, child)| {
                    child.handle.request_close();
                    child.handle
                })
                .collect()
        };
        for handle in handles {
            handle.join();
        }

        let mut threads = self.duty_threads.lock().unwrap();
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
    }

    /// Single-folder spawn. With `tail=true` only the lexicographically first
    /// match is followed; the rest are warned about and ignored.
    fn spawn_single(&self, files: Vec<PathBuf>) {
        let tail = self.input.config.tail;
        if tail && files.len() > 1 {
            warn!(
                pattern = %self.pattern,
                count = files.len(),
                following = %files[0].display(),
                "multiple files match the file filter, following only the first one"
            );
        }
        let key = files[0].clone();
        let files = if tail { vec![files[0].clone()] } else { files };
        self.spawn_child(key, files);
    }

    fn spawn_child(&self, key: PathBuf, files: Vec<PathBuf>) {
        if files.is_empty() {
            return;
        }
        if let Some(max_age) = self.input.config.max_age() {
            if finder::is_too_old(&files[0], max_age) {
                info!(
                    file = %files[0].display(),
                    max_age_min = self.input.config.max_age_min,
                    "file is too old, not starting a tailer"
                );
                return;
            }
        }

        info!(key = %key.display(), "starting child tailer");
        let chain = self.chain.lock().unwrap().clone_chain(&self.input);
        match FileTailer::spawn(
            Arc::clone(&self.input),
            chain,
            Arc::clone(&self.output),
            Arc::clone(&self.checkpoints),
            self.cancel.clone(),
            files,
        ) {
            Ok(handle) => {
                self.children.lock().unwrap().insert(
                    key,
                    ChildState {
                        handle,
                        absent_since: None,
                    },
                );
            }
            Err(e) => error!(key = %key.display(), error = %e, "could not start tailer"),
        }
    }

    fn rescan_duty(&self) {
        let interval = self.input.config.path_update_interval();
        loop {
            sleep_cancellable(&self.cancel, interval);
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.rescan() {
                warn!(pattern = %self.pattern, error = %e, "path rescan failed");
            }
        }
    }

    /// Re-expand the pattern: spawn children for new folders/files, respawn
    /// finished ones (rotation, read errors), and mark vanished ones for the
    /// detach sweep.
    fn rescan(&self) -> Result<()> {
        let files = finder::expand(&self.pattern)?;

        if self.multi_folder {
            let folders = finder::group_by_folder(&files);
            let mut to_spawn = Vec::new();
            {
                let mut children = self.children.lock().unwrap();
                for (folder, folder_files) in &folders {
                    match children.get_mut(folder) {
                        Some(child) => {
                            child.absent_since = None;
                            if child.handle.is_finished() {
                                children.remove(folder);
                                to_spawn.push((folder.clone(), folder_files.clone()));
                            }
                        }
                        None => to_spawn.push((folder.clone(), folder_files.clone())),
                    }
                }
                for (key, child) in children.iter_mut() {
                    if !folders.contains_key(key) && child.absent_since.is_none() {
                        info!(folder = %key.display(), "monitored folder disappeared");
                        child.absent_since = Some(Instant::now());
                    }
                }
            }
            for (key, folder_files) in to_spawn {
                self.spawn_child(key, folder_files);
            }
            return Ok(());
        }

        // Single-folder: at most one child at a time
        let respawn = {
            let mut children = self.children.lock().unwrap();
            if let Some(key) = children.keys().next().cloned() {
                let child = children.get_mut(&key).unwrap();
                if child.handle.is_finished() && !files.is_empty() {
                    children.remove(&key);
                    true
                } else if files.iter().any(|f| f == &key) {
                    child.absent_since = None;
                    false
                } else {
                    if child.absent_since.is_none() {
                        info!(file = %key.display(), "monitored file disappeared");
                        child.absent_since = Some(Instant::now());
                    }
                    false
                }
            } else {
                !files.is_empty()
            }
        };
        if respawn {
            self.spawn_single(files);
        }
        Ok(())
    }

    fn detach_duty(&self) {
        let interval = self.input.config.detach_interval();
        loop {
            sleep_cancellable(&self.cancel, interval);
            if self.cancel.is_cancelled() {
                break;
            }
            self.detach_sweep();
        }
    }

    /// Retire children whose backing file has been absent long enough.
    fn detach_sweep(&self) {
        let detach_time = self.input.config.detach_time();
        let handles: Vec<TailerHandle> = {
            let mut children = self.children.lock().unwrap();
            let expired: Vec<PathBuf> = children
                .iter()
                .filter(|(_, child)| {
                    child
                        .absent_since
                        .map_or(false, |since| since.elapsed() >= detach_time)
                })
                .map(|(key, _)| key.clone())
                .collect();

            expired
                .into_iter()
                .filter_map(|key| {
                    children.remove(&key).map(|child| {
                        info!(key = %key.display(), "detaching tailer, file absent too long");
                        child.handle.request_close();
                        child.handle
                    })
                })
                .collect()
        };
        for handle in handles {
            handle.join();
        }
    }
}
