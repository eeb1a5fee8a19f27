// SPDX-License-Identifier: Apache-2.0

//! Buffered line reader over a log file, with transparent gzip decompression
//! selected by the `.gz` extension.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;

/// Reads newline-delimited lines from a (possibly compressed) log file.
///
/// A line is only handed out once its terminating newline has been seen, so
/// a writer flushing half a line does not produce a torn record; the partial
/// tail is buffered until the rest arrives. Byte counts include the line
/// terminator, which keeps the running offset equal to the file position
/// after the line.
pub struct LogReader {
    inner: Box<dyn BufRead + Send>,
    pending: Vec<u8>,
}

impl LogReader {
    /// Open `path` positioned at `offset` bytes into the line stream.
    ///
    /// Plain files seek directly. Gzip members cannot seek, so the offset is
    /// skipped by reading through the decompressed stream.
    pub fn open(path: &Path, offset: u64) -> io::Result<Self> {
        let mut file = File::open(path)?;

        let gzip = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let inner: Box<dyn BufRead + Send> = if gzip {
            let mut reader = BufReader::new(GzDecoder::new(file));
            skip_bytes(&mut reader, offset)?;
            Box::new(reader)
        } else {
            file.seek(SeekFrom::Start(offset))?;
            Box::new(BufReader::new(file))
        };

        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Read the next complete line. Returns the line without its terminator
    /// and the number of bytes consumed including the terminator, or None at
    /// EOF. After EOF the reader can be polled again; appended data resumes
    /// where the last complete line ended.
    pub fn next_line(&mut self) -> io::Result<Option<(String, u64)>> {
        loop {
            let mut chunk = Vec::new();
            let n = self.inner.read_until(b'\n', &mut chunk)?;
            if n == 0 {
                // EOF; keep any partial tail buffered for the next poll
                return Ok(None);
            }

            self.pending.extend_from_slice(&chunk);
            if self.pending.last() == Some(&b'\n') {
                return Ok(Some(Self::finish_line(std::mem::take(&mut self.pending))));
            }
        }
    }

    /// Hand out a trailing unterminated line, if any. Used on the one-shot
    /// path so a file that does not end in a newline still yields its last
    /// line.
    pub fn take_pending(&mut self) -> Option<(String, u64)> {
        if self.pending.is_empty() {
            None
        } else {
            Some(Self::finish_line(std::mem::take(&mut self.pending)))
        }
    }

    fn finish_line(mut raw: Vec<u8>) -> (String, u64) {
        let bytes = raw.len() as u64;
        while matches!(raw.last(), Some(b'\n') | Some(b'\r')) {
            raw.pop();
        }
        (String::from_utf8_lossy(&raw).into_owned(), bytes)
    }
}

fn skip_bytes<R: BufRead>(reader: &mut R, n: u64) -> io::Result<()> {
    let skipped = io::copy(&mut reader.by_ref().take(n), &mut io::sink())?;
    if skipped < n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("resume offset {} beyond end of compressed stream", n),
        ));
    }
    Ok(())
}
