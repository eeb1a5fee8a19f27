// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower::BoxError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use logship::agent::Agent;
use logship::config::{AgentConfig, InputConfig};
use logship::filter::{FilterChain, RawLineFilter};
use logship::output::{JsonLinesSink, Sink};

#[derive(Debug, Parser)]
#[command(name = "logship", about = "Tail log files, enrich each line, ship to a sink")]
struct Args {
    /// Glob-capable path of the files to follow
    #[arg(long, env = "LOGSHIP_PATH")]
    path: String,

    /// Logical type stamped on every record
    #[arg(long, env = "LOGSHIP_LOG_TYPE", default_value = "service")]
    log_type: String,

    /// Directory holding checkpoint documents
    #[arg(
        long,
        env = "LOGSHIP_CHECKPOINT_DIR",
        default_value = "/var/lib/logship/checkpoints"
    )]
    checkpoint_dir: PathBuf,

    /// File receiving one JSON record per line
    #[arg(
        long,
        env = "LOGSHIP_OUTPUT_FILE",
        default_value = "/var/log/logship/out.jsonl"
    )]
    output_file: PathBuf,

    /// Process matched files once instead of following them
    #[arg(long, env = "LOGSHIP_NO_TAIL", default_value = "false")]
    no_tail: bool,

    /// Context field merged into each record, as key=value; repeatable
    #[arg(long = "add-field", value_parser = parse_key_val)]
    add_fields: Vec<(String, String)>,

    /// Group stamped on every record
    #[arg(long, env = "LOGSHIP_GROUP")]
    group: Option<String>,

    /// Skip files older than this many minutes (0 disables the gate)
    #[arg(long, env = "LOGSHIP_MAX_AGE_MIN", default_value = "0")]
    max_age_min: u64,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let agent_config = AgentConfig {
        checkpoint_dir: args.checkpoint_dir,
        ..Default::default()
    };
    let mut agent = Agent::new(agent_config)?;

    let sink = JsonLinesSink::create(&args.output_file, 1_000, vec![])?;
    let mut chain = FilterChain::new();
    chain.push(Box::new(RawLineFilter));

    let input = InputConfig {
        log_type: args.log_type,
        path: Some(args.path),
        tail: !args.no_tail,
        add_fields: args.add_fields.into_iter().collect(),
        group: args.group,
        max_age_min: args.max_age_min,
        ..Default::default()
    };
    agent.add_file_input(input, chain, vec![sink as Arc<dyn Sink>])?;

    let cancel = agent.cancellation_token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });

    agent.run().await
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
