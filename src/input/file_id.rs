// SPDX-License-Identifier: Apache-2.0

//! Platform-independent file identity based on inode (Unix) or file index (Windows).
//!
//! Resume and rotation logic is keyed by this identity, never by path: the
//! inode/file index stays stable across renames, so a rotated file keeps its
//! identity while the freshly created file at the old path gets a new one.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;

/// A platform-independent unique identifier for a file.
///
/// On Unix systems, this is the device ID + inode number.
/// On Windows, this is the volume serial number + file index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    /// Device ID (Unix) or volume serial number (Windows)
    dev: u64,
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
}

impl FileId {
    /// Create a FileId from raw device and inode values.
    /// Used for loading persisted state.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Create a FileId from an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Create a FileId from an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
        })
    }

    /// Create a FileId from a path by opening the file.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Textual key used as the checkpoint file stem. URL-safe so the encoded
    /// form is always a valid file name.
    pub fn base64_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.dev, self.ino))
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn same_file_same_id() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"content").unwrap();
        file.flush().unwrap();

        let id1 = FileId::from_path(file.path()).unwrap();
        let id2 = FileId::from_path(file.path()).unwrap();

        assert_eq!(id1, id2);
        assert_eq!(id1.base64_key(), id2.base64_key());
    }

    #[test]
    fn different_files_different_id() {
        let mut file1 = NamedTempFile::new().unwrap();
        let mut file2 = NamedTempFile::new().unwrap();

        file1.write_all(b"one").unwrap();
        file2.write_all(b"two").unwrap();
        file1.flush().unwrap();
        file2.flush().unwrap();

        let id1 = FileId::from_path(file1.path()).unwrap();
        let id2 = FileId::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn rename_preserves_identity() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(&a, "line\n").unwrap();

        let before = FileId::from_path(&a).unwrap();
        std::fs::rename(&a, &b).unwrap();
        let after = FileId::from_path(&b).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn base64_key_is_filename_safe() {
        let id = FileId::new(u64::MAX, u64::MAX);
        let key = id.base64_key();
        assert!(!key.contains('/'));
        assert!(!key.contains('+'));
        assert!(!key.contains('='));
    }

    #[test]
    fn serde_roundtrip() {
        let id = FileId::new(123, 456);
        let json = serde_json::to_string(&id).unwrap();
        let back: FileId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
