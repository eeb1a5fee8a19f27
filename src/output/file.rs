// SPDX-License-Identifier: Apache-2.0

//! Reference sink: one JSON object per line, appended to a local file.
//!
//! Writes go through a bounded channel drained by a dedicated writer thread,
//! so `pending_count` and the drain/close handshake behave like a real
//! remote sink: `close` stops accepting, the writer finishes the queue, and
//! only then does `is_closed` report true.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::bounded_channel::{bounded, BoundedSender};
use crate::error::{Error, Result};
use crate::input::marker::InputMarker;
use crate::metric::Metric;
use crate::output::Sink;
use crate::record::Record;

const RECV_POLL: Duration = Duration::from_millis(200);

pub struct JsonLinesSink {
    path: PathBuf,
    tx: BoundedSender<String>,
    drain: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    accepting: AtomicBool,
    lines_written: Metric,
    id_fields: Vec<String>,
}

impl JsonLinesSink {
    /// Open (or create) the target file and start the writer thread.
    pub fn create(
        path: impl Into<PathBuf>,
        queue_size: usize,
        id_fields: Vec<String>,
    ) -> Result<Arc<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = bounded::<String>(queue_size);
        let drain = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let lines_written = Metric::new("output.file.lines_written");

        let writer_drain = Arc::clone(&drain);
        let writer_closed = Arc::clone(&closed);
        let writer_metric = lines_written.clone();
        let writer_path = path.clone();
        std::thread::Builder::new()
            .name(format!("sink-{}", path.display()))
            .spawn(move || {
                let mut writer = BufWriter::new(file);
                loop {
                    match rx.recv_timeout(RECV_POLL) {
                        Some(line) => {
                            if let Err(e) = writeln!(writer, "{}", line) {
                                error!(
                                    file = %writer_path.display(),
                                    error = %e,
                                    "sink write failed, dropping line"
                                );
                            } else {
                                writer_metric.inc();
                            }
                        }
                        None => {
                            // Idle: make buffered lines visible to readers
                            if let Err(e) = writer.flush() {
                                error!(file = %writer_path.display(), error = %e, "sink flush failed");
                            }
                            if writer_drain.load(Ordering::Relaxed) && rx.is_empty() {
                                break;
                            }
                        }
                    }
                }
                if let Err(e) = writer.flush() {
                    error!(file = %writer_path.display(), error = %e, "sink flush failed");
                }
                debug!(file = %writer_path.display(), "sink writer finished");
                writer_closed.store(true, Ordering::Relaxed);
            })
            .map_err(|e| Error::Sink(format!("cannot start writer thread: {}", e)))?;

        Ok(Arc::new(Self {
            path,
            tx,
            drain,
            closed,
            accepting: AtomicBool::new(true),
            lines_written,
            id_fields,
        }))
    }

    fn enqueue(&self, line: String) -> Result<()> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(Error::Sink(format!(
                "sink {} is closing, rejecting write",
                self.path.display()
            )));
        }
        self.tx
            .send_blocking(line)
            .map_err(|_| Error::Sink(format!("sink {} writer is gone", self.path.display())))
    }
}

impl Sink for JsonLinesSink {
    fn init(&self) -> Result<()> {
        info!(file = %self.path.display(), "file sink ready");
        Ok(())
    }

    fn write(&self, record: &Record, _marker: &InputMarker) -> Result<()> {
        self.enqueue(serde_json::to_string(record)?)
    }

    fn write_text(&self, text: &str, _marker: &InputMarker) -> Result<()> {
        self.enqueue(text.to_string())
    }

    fn copy_file(&self, file: &Path, _marker: &InputMarker) -> Result<()> {
        let name = file
            .file_name()
            .ok_or_else(|| Error::Sink(format!("cannot copy {}: no file name", file.display())))?;
        let target_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let target = target_dir.join(name);
        std::fs::copy(file, &target)?;
        info!(from = %file.display(), to = %target.display(), "copied file");
        Ok(())
    }

    fn close(&self) {
        self.accepting.store(false, Ordering::Relaxed);
        self.drain.store(true, Ordering::Relaxed);
    }

    fn set_drain(&self, drain: bool) {
        self.drain.store(drain, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn pending_count(&self) -> usize {
        self.tx.len()
    }

    fn id_fields(&self) -> &[String] {
        &self.id_fields
    }

    fn short_description(&self) -> String {
        format!("output:file={}", self.path.display())
    }

    fn add_metrics(&self, metrics: &mut Vec<Metric>) {
        metrics.push(self.lines_written.clone());
    }

    fn log_stat(&self) {
        self.lines_written.log();
    }
}
