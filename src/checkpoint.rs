// SPDX-License-Identifier: Apache-2.0

//! Durable resume points, one small JSON document per file identity.
//!
//! Each tailer owns the checkpoint of the identity it reads, so writes never
//! race; the store only serializes its in-memory book-keeping. Documents are
//! written atomically (write-temp + rename) and corrupt documents are treated
//! as missing.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::input::file_id::FileId;

/// On-disk shape of one resume point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub file_path: String,
    pub file_key_base64: String,
    pub byte_offset: u64,
    pub line_number: u64,
    pub last_ingest_ms: u64,
}

#[derive(Default)]
struct EntryState {
    last_write: Option<Instant>,
    /// Latest marker not yet persisted; flushed by `last_check_in`.
    pending: Option<(PathBuf, u64, u64)>,
    /// Highest line number ever persisted for this identity.
    committed_line: u64,
}

pub struct CheckpointStore {
    dir: PathBuf,
    extension: String,
    entries: Mutex<HashMap<FileId, EntryState>>,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Checkpoint(format!("cannot create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            extension: extension.into(),
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn document_path(&self, id: FileId) -> PathBuf {
        self.dir.join(format!("{}{}", id.base64_key(), self.extension))
    }

    /// Resume point for an identity: `(byte_offset, line_number)`, or `(0, 0)`
    /// when no checkpoint exists. Corrupt documents are logged and ignored.
    pub fn resume(&self, id: FileId, file_path: &Path) -> (u64, u64) {
        let doc_path = self.document_path(id);
        let doc = match File::open(&doc_path) {
            Ok(file) => match serde_json::from_reader::<_, CheckpointDocument>(BufReader::new(file)) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!(
                        checkpoint = %doc_path.display(),
                        error = %e,
                        "corrupt checkpoint document, starting from the beginning"
                    );
                    None
                }
            },
            Err(_) => None,
        };

        match doc {
            Some(doc) => {
                debug!(
                    file = %file_path.display(),
                    offset = doc.byte_offset,
                    line = doc.line_number,
                    "resuming from checkpoint"
                );
                let mut entries = self.entries.lock().unwrap();
                entries.entry(id).or_default().committed_line = doc.line_number;
                (doc.byte_offset, doc.line_number)
            }
            None => (0, 0),
        }
    }

    /// Record the latest position for an identity and persist it when the
    /// checkpoint interval has elapsed since the previous write.
    pub fn check_in(
        &self,
        id: FileId,
        file_path: &Path,
        byte_offset: u64,
        line_number: u64,
        interval: Duration,
    ) {
        let due = {
            let mut entries = self.entries.lock().unwrap();
            let state = entries.entry(id).or_default();
            state.pending = Some((file_path.to_path_buf(), byte_offset, line_number));
            match state.last_write {
                Some(at) => at.elapsed() >= interval,
                None => true,
            }
        };

        if due {
            self.flush(id);
        }
    }

    /// Persist the pending position even if the interval has not elapsed.
    pub fn last_check_in(&self, id: FileId) {
        self.flush(id);
    }

    /// Forget an identity's resume point. Used when a tailer finds the file
    /// rewritten in place (stored offset past the end of the file), so the
    /// restart at line one is not rejected by the monotonic guard.
    pub fn reset(&self, id: FileId) {
        {
            let mut entries = self.entries.lock().unwrap();
            entries.remove(&id);
        }
        let doc_path = self.document_path(id);
        if doc_path.exists() {
            if let Err(e) = fs::remove_file(&doc_path) {
                warn!(checkpoint = %doc_path.display(), error = %e, "could not remove checkpoint");
            }
        }
    }

    /// Flush every pending position. Called once at shutdown.
    pub fn flush_all(&self) {
        let ids: Vec<FileId> = self.entries.lock().unwrap().keys().copied().collect();
        for id in ids {
            self.flush(id);
        }
    }

    fn flush(&self, id: FileId) {
        let (doc, doc_path) = {
            let mut entries = self.entries.lock().unwrap();
            let state = match entries.get_mut(&id) {
                Some(s) => s,
                None => return,
            };
            let (path, offset, line) = match state.pending.take() {
                Some(p) => p,
                None => return,
            };
            if line < state.committed_line {
                warn!(
                    file = %path.display(),
                    line,
                    committed = state.committed_line,
                    "refusing to move checkpoint backwards"
                );
                return;
            }
            state.committed_line = line;
            state.last_write = Some(Instant::now());

            let doc = CheckpointDocument {
                file_path: path.display().to_string(),
                file_key_base64: id.base64_key(),
                byte_offset: offset,
                line_number: line,
                last_ingest_ms: epoch_ms(),
            };
            (doc, self.document_path(id))
        };

        // Checkpoint I/O failures are logged, never propagated; the tailer
        // keeps going at the cost of replay after a crash.
        if let Err(e) = write_document(&doc_path, &doc) {
            warn!(checkpoint = %doc_path.display(), error = %e, "checkpoint write failed");
        }
    }
}

/// Write the document to a unique temp file, then rename into place. Rename
/// is atomic on the filesystems the sidecar directory lives on, so readers
/// never observe a partial document.
fn write_document(path: &Path, doc: &CheckpointDocument) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique));

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, doc)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
