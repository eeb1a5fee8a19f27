// SPDX-License-Identifier: Apache-2.0

//! Per-file tailer worker.
//!
//! One tailer owns the read position of one file identity. It resumes from
//! the checkpoint, hands each complete line through its own filter chain to
//! the output manager, and checkpoints the post-dispatch offset at most once
//! per checkpoint interval. On rotation, truncation or read errors it
//! flushes a final checkpoint and terminates; the supervisor respawns it on
//! the next rescan.

use std::cmp;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::input::file_id::FileId;
use crate::input::marker::{InputContext, InputMarker};
use crate::input::reader::LogReader;
use crate::output::OutputManager;

const EOF_SLEEP: Duration = Duration::from_millis(250);
/// Upper bound on the re-stat cadence so rotation is noticed promptly even
/// with a long detach time.
const STAT_INTERVAL_CAP: Duration = Duration::from_secs(2);

/// Control handle owned by the supervisor.
pub struct TailerHandle {
    path: PathBuf,
    closed: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl TailerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask the tail loop to stop at its next line or sleep boundary.
    pub fn request_close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            error!(file = %self.path.display(), "tailer thread panicked");
        }
    }
}

pub struct FileTailer {
    input: Arc<InputContext>,
    chain: FilterChain,
    output: Arc<OutputManager>,
    checkpoints: Arc<CheckpointStore>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl FileTailer {
    /// Start a tailer thread over `files`. With `tail=true` the set holds the
    /// single file to follow; with `tail=false` it is the whole matched set,
    /// processed once in reverse lexicographic order.
    pub fn spawn(
        input: Arc<InputContext>,
        chain: FilterChain,
        output: Arc<OutputManager>,
        checkpoints: Arc<CheckpointStore>,
        cancel: CancellationToken,
        files: Vec<PathBuf>,
    ) -> Result<TailerHandle> {
        if files.is_empty() {
            return Err(Error::Config("tailer started without files".into()));
        }

        let closed = Arc::new(AtomicBool::new(false));
        let path = files[0].clone();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "?".to_string());

        let tailer = FileTailer {
            input,
            chain,
            output,
            checkpoints,
            closed: Arc::clone(&closed),
            cancel,
        };

        let thread = std::thread::Builder::new()
            .name(format!("tail-{}", name))
            .spawn(move || tailer.run(files))
            .map_err(|e| Error::Config(format!("cannot start tailer thread: {}", e)))?;

        Ok(TailerHandle {
            path,
            closed,
            thread,
        })
    }

    fn run(mut self, files: Vec<PathBuf>) {
        let config = &self.input.config;
        if !config.process_file {
            if config.copy_file {
                self.copy_files(&files);
            }
            self.closed.store(true, Ordering::Relaxed);
            return;
        }

        let tail = config.tail;
        for (i, file) in files.iter().enumerate().rev() {
            if i != 0 && tail {
                continue;
            }
            let follow = i == 0 && tail;
            if let Err(e) = self.process_file(file, follow) {
                error!(file = %file.display(), error = %e, "error processing file");
            }
            if self.should_stop() {
                info!("closed or draining, stopping mid-sequence");
                break;
            }
        }

        self.closed.store(true, Ordering::Relaxed);
    }

    /// Read one file from its resume point; follow it when asked to.
    fn process_file(&mut self, path: &Path, follow: bool) -> Result<()> {
        let file_len = fs::metadata(path)?.len();
        let id = FileId::from_path(path)?;
        info!(
            file = %path.display(),
            file_key = %id,
            base64 = %id.base64_key(),
            "opened log file"
        );

        let (mut offset, mut line_number) = self.checkpoints.resume(id, path);
        let gzip = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        if !gzip && offset > file_len {
            info!(
                file = %path.display(),
                offset,
                file_len,
                "stored offset is past the end of the file, assuming rotation"
            );
            self.checkpoints.reset(id);
            offset = 0;
            line_number = 0;
        }

        let mut reader = match LogReader::open(path, offset) {
            Ok(r) => r,
            Err(e) if gzip && e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Compressed stream shorter than the stored offset: rotated
                self.checkpoints.reset(id);
                offset = 0;
                line_number = 0;
                LogReader::open(path, 0)?
            }
            Err(e) => return Err(e.into()),
        };

        let interval = self.input.config.checkpoint_interval();
        let stat_interval = cmp::max(
            cmp::min(self.input.config.detach_time() / 2, STAT_INTERVAL_CAP),
            EOF_SLEEP,
        );
        let mut last_stat = Instant::now();

        loop {
            if self.should_stop() {
                break;
            }

            match reader.next_line() {
                Ok(Some((line, bytes))) => {
                    line_number += 1;
                    offset += bytes;
                    self.dispatch(id, &line, line_number);
                    self.checkpoints.check_in(id, path, offset, line_number, interval);
                }
                Ok(None) if !follow => {
                    if let Some((line, bytes)) = reader.take_pending() {
                        line_number += 1;
                        offset += bytes;
                        self.dispatch(id, &line, line_number);
                        self.checkpoints.check_in(id, path, offset, line_number, interval);
                    }
                    break;
                }
                Ok(None) => {
                    self.sleep_while_live(EOF_SLEEP);
                    if last_stat.elapsed() < stat_interval {
                        continue;
                    }
                    last_stat = Instant::now();

                    match fs::metadata(path) {
                        Err(_) => {
                            debug!(file = %path.display(), "file vanished while tailing");
                            break;
                        }
                        Ok(meta) => {
                            if !gzip && meta.len() < offset {
                                info!(
                                    file = %path.display(),
                                    "file shrank below the read offset, reopening"
                                );
                                break;
                            }
                            match FileId::from_path(path) {
                                Ok(current) if current != id => {
                                    info!(
                                        file = %path.display(),
                                        old = %id,
                                        new = %current,
                                        "file was rotated, stopping tailer for the old identity"
                                    );
                                    break;
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    debug!(file = %path.display(), error = %e, "re-stat failed");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "read failed, stopping tailer");
                    break;
                }
            }
        }

        // Reader is released on return; flush the position first so a crash
        // window stays at one replayed line at most.
        self.checkpoints.last_check_in(id);
        Ok(())
    }

    fn dispatch(&mut self, id: FileId, line: &str, line_number: u64) {
        let marker = InputMarker::new(Arc::clone(&self.input), Some(id), line_number);
        if self.chain.is_empty() {
            // No filters configured: ship the line as an unparsed text block
            self.output.write_text(line, &marker);
            return;
        }
        match self.chain.process(line, &marker) {
            Ok(Some(record)) => self.output.write(record, &marker),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    line_number,
                    error = %e,
                    "filter chain failed for line, dropping it"
                );
            }
        }
    }

    fn copy_files(&self, files: &[PathBuf]) {
        for file in files {
            let marker = InputMarker::new(Arc::clone(&self.input), None, 0);
            self.output.copy_file(file, &marker);
            if self.should_stop() {
                info!("closed or draining, stopping copy loop");
                break;
            }
        }
    }

    fn should_stop(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
            || self.cancel.is_cancelled()
            || self.output.is_drained()
    }

    fn sleep_while_live(&self, total: Duration) {
        let deadline = Instant::now() + total;
        loop {
            if self.should_stop() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(cmp::min(deadline - now, Duration::from_millis(50)));
        }
    }
}
