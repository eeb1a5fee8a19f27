// SPDX-License-Identifier: Apache-2.0

//! Container-log adapter: the supervisor variant driven by a registry
//! snapshot instead of glob expansion. Each discovered container log file
//! gets its own single-file tailer; vanished containers are retired after
//! the detach time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::input::marker::InputContext;
use crate::input::sleep_cancellable;
use crate::input::supervisor::ChildState;
use crate::input::tailer::{FileTailer, TailerHandle};
use crate::output::OutputManager;

/// What the registry knows about one container of a log type.
#[derive(Debug, Clone)]
pub struct ContainerMetadata {
    pub container_id: String,
    pub log_path: PathBuf,
    pub labels: HashMap<String, String>,
}

/// Snapshot provider for containers running on this host, keyed by log type.
pub trait ContainerRegistry: Send + Sync {
    fn snapshot(&self) -> HashMap<String, HashMap<String, ContainerMetadata>>;
}

pub struct ContainerLogAdapter {
    input: Arc<InputContext>,
    chain: Mutex<FilterChain>,
    registry: Arc<dyn ContainerRegistry>,
    output: Arc<OutputManager>,
    checkpoints: Arc<CheckpointStore>,
    cancel: CancellationToken,
    /// Keyed by container log path.
    children: Mutex<HashMap<PathBuf, ChildState>>,
    started: AtomicBool,
    duty_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ContainerLogAdapter {
    pub fn new(
        input: Arc<InputContext>,
        chain: FilterChain,
        registry: Arc<dyn ContainerRegistry>,
        output: Arc<OutputManager>,
        checkpoints: Arc<CheckpointStore>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        if !input.config.docker_enabled {
            return Err(Error::Config(format!(
                "input '{}' is not docker-enabled",
                input.config.log_type
            )));
        }
        Ok(Arc::new(Self {
            input,
            chain: Mutex::new(chain),
            registry,
            output,
            checkpoints,
            cancel: cancel.child_token(),
            children: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            duty_thread: Mutex::new(None),
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

    /// Ready once the registry reports at least one container of our type.
    pub fn is_ready(&self) -> bool {
        self.registry
            .snapshot()
            .get(&self.input.config.log_type)
            .map_or(false, |containers| !containers.is_empty())
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.poll_registry();

        let adapter = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name(format!(
                "docker-logfiles-updater-{}",
                self.input.config.log_type
            ))
            .spawn(move || adapter.poll_duty())
            .map_err(|e| Error::Config(format!("cannot start registry poll thread: {}", e)))?;
        *self.duty_thread.lock().unwrap() = Some(thread);
        Ok(())
    }

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
        if let Some(thread) = self.duty_thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }

    fn poll_duty(&self) {
        let interval = self.input.config.path_update_interval();
        loop {
            sleep_cancellable(&self.cancel, interval);
            if self.cancel.is_cancelled() {
                break;
            }
            self.poll_registry();
            self.detach_sweep();
        }
    }

    /// Diff the registry snapshot against the child set: spawn tailers for
    /// newly observed container log paths, mark vanished ones for detach.
    fn poll_registry(&self) {
        let snapshot = self.registry.snapshot();
        let desired: HashMap<PathBuf, ContainerMetadata> = snapshot
            .get(&self.input.config.log_type)
            .map(|containers| {
                containers
                    .values()
                    .map(|meta| (meta.log_path.clone(), meta.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut to_spawn = Vec::new();
        {
            let mut children = self.children.lock().unwrap();
            for (log_path, meta) in &desired {
                match children.get_mut(log_path) {
                    Some(child) => {
                        child.absent_since = None;
                        if child.handle.is_finished() && log_path.is_file() {
                            children.remove(log_path);
                            to_spawn.push(meta.clone());
                        }
                    }
                    None => to_spawn.push(meta.clone()),
                }
            }
            for (log_path, child) in children.iter_mut() {
                if !desired.contains_key(log_path) && child.absent_since.is_none() {
                    info!(
                        file = %log_path.display(),
                        "container disappeared from the registry"
                    );
                    child.absent_since = Some(Instant::now());
                }
            }
        }

        for meta in to_spawn {
            self.spawn_child(meta);
        }
    }

    /// Clone the descriptor's chain and start a plain single-file tailer; the
    /// child never spawns further children.
    fn spawn_child(&self, meta: ContainerMetadata) {
        if !meta.log_path.is_file() {
            warn!(
                container = %meta.container_id,
                file = %meta.log_path.display(),
                "registry reports a log path that does not exist yet"
            );
            return;
        }

        info!(
            container = %meta.container_id,
            file = %meta.log_path.display(),
            "starting container log tailer"
        );
        let chain = self.chain.lock().unwrap().clone_chain(&self.input);
        match FileTailer::spawn(
            Arc::clone(&self.input),
            chain,
            Arc::clone(&self.output),
            Arc::clone(&self.checkpoints),
            self.cancel.clone(),
            vec![meta.log_path.clone()],
        ) {
            Ok(handle) => {
                self.children.lock().unwrap().insert(
                    meta.log_path,
                    ChildState {
                        handle,
                        absent_since: None,
                    },
                );
            }
            Err(e) => error!(
                container = %meta.container_id,
                error = %e,
                "could not start container log tailer"
            ),
        }
    }

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
                        info!(
                            file = %key.display(),
                            "stopping tailer for vanished container"
                        );
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
