// SPDX-License-Identifier: Apache-2.0

//! Wires the pieces together: a shared output manager and checkpoint store,
//! one supervisor per declared input, a readiness loop that starts inputs as
//! their files appear, and orderly shutdown.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info};

use crate::checkpoint::CheckpointStore;
use crate::config::{AgentConfig, InputConfig};
use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::input::docker::{ContainerLogAdapter, ContainerRegistry};
use crate::input::marker::InputContext;
use crate::input::sleep_cancellable;
use crate::input::supervisor::InputSupervisor;
use crate::output::{OutputManager, Sink};

pub struct Agent {
    config: AgentConfig,
    output: Arc<OutputManager>,
    checkpoints: Arc<CheckpointStore>,
    cancel: CancellationToken,
    file_inputs: Vec<Arc<InputSupervisor>>,
    container_inputs: Vec<Arc<ContainerLogAdapter>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let checkpoints = Arc::new(CheckpointStore::new(
            &config.checkpoint_dir,
            &config.checkpoint_extension,
        )?);
        let output = Arc::new(
            OutputManager::new(config.default_log_levels.clone())
                .with_close_timeout(config.sink_close_timeout_secs),
        );
        Ok(Self {
            config,
            output,
            checkpoints,
            cancel: CancellationToken::new(),
            file_inputs: Vec::new(),
            container_inputs: Vec::new(),
        })
    }

    /// Replace the output manager before any inputs are added, e.g. to
    /// install a level filter or dedup configuration.
    pub fn with_output_manager(mut self, output: OutputManager) -> Self {
        self.output = Arc::new(output);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn output(&self) -> &Arc<OutputManager> {
        &self.output
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    /// Declare a glob-driven file input.
    pub fn add_file_input(
        &mut self,
        config: InputConfig,
        chain: FilterChain,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Result<()> {
        config.validate()?;
        if config.docker_enabled {
            return Err(Error::Config(format!(
                "input '{}': docker inputs are added with add_container_input",
                config.log_type
            )));
        }
        for sink in &sinks {
            self.output.register(Arc::clone(sink));
        }
        let input = InputContext::new(config, sinks);
        let supervisor = InputSupervisor::new(
            input,
            chain,
            Arc::clone(&self.output),
            Arc::clone(&self.checkpoints),
            self.cancel.clone(),
        )?;
        self.file_inputs.push(supervisor);
        Ok(())
    }

    /// Declare a registry-driven container input.
    pub fn add_container_input(
        &mut self,
        config: InputConfig,
        chain: FilterChain,
        sinks: Vec<Arc<dyn Sink>>,
        registry: Arc<dyn ContainerRegistry>,
    ) -> Result<()> {
        config.validate()?;
        for sink in &sinks {
            self.output.register(Arc::clone(sink));
        }
        let input = InputContext::new(config, sinks);
        let adapter = ContainerLogAdapter::new(
            input,
            chain,
            registry,
            Arc::clone(&self.output),
            Arc::clone(&self.checkpoints),
            self.cancel.clone(),
        )?;
        self.container_inputs.push(adapter);
        Ok(())
    }

    /// Run until the cancellation token fires, then shut down in order:
    /// supervisors, checkpoints, sinks.
    pub async fn run(self) -> std::result::Result<(), BoxError> {
        info!(
            file_inputs = self.file_inputs.len(),
            container_inputs = self.container_inputs.len(),
            checkpoint_dir = %self.config.checkpoint_dir.display(),
            "starting agent"
        );
        self.output.init()?;

        let readiness = self.spawn_readiness_monitor()?;

        self.cancel.cancelled().await;
        info!("shutting down");

        tokio::task::spawn_blocking(move || self.shutdown_blocking(readiness))
            .await
            .map_err(|e| -> BoxError { format!("shutdown task failed: {}", e).into() })?;
        Ok(())
    }

    /// Inputs whose files do not exist yet stay not-ready; this loop retries
    /// them until they can be started.
    fn spawn_readiness_monitor(&self) -> Result<JoinHandle<()>> {
        let file_inputs = self.file_inputs.clone();
        let container_inputs = self.container_inputs.clone();
        let interval = self.config.ready_check_interval;
        let cancel = self.cancel.clone();

        std::thread::Builder::new()
            .name("input-ready-monitor".to_string())
            .spawn(move || loop {
                for supervisor in &file_inputs {
                    if !supervisor.is_started() && supervisor.is_ready() {
                        if let Err(e) = supervisor.start() {
                            error!(
                                input = %supervisor.input().short_description(),
                                error = %e,
                                "could not start input"
                            );
                        }
                    }
                }
                for adapter in &container_inputs {
                    if !adapter.is_started() && adapter.is_ready() {
                        if let Err(e) = adapter.start() {
                            error!(
                                input = %adapter.input().short_description(),
                                error = %e,
                                "could not start container input"
                            );
                        }
                    }
                }
                sleep_cancellable(&cancel, interval);
                if cancel.is_cancelled() {
                    break;
                }
            })
            .map_err(|e| Error::Config(format!("cannot start readiness monitor: {}", e)))
    }

    fn shutdown_blocking(self, readiness: JoinHandle<()>) {
        let _ = readiness.join();
        for supervisor in &self.file_inputs {
            supervisor.shutdown();
        }
        for adapter in &self.container_inputs {
            adapter.shutdown();
        }
        self.checkpoints.flush_all();
        self.output.log_stats();
        self.output.close();
        info!("agent stopped");
    }
}
