use glob::glob;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};

/// Expand a glob-capable pattern to the matching regular files, sorted
/// lexicographically. Directories are skipped; a pattern with no matches
/// yields an empty list, not an error.
pub fn expand(pattern: &str) -> Result<Vec<PathBuf>> {
    let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

    let mut paths = Vec::new();
    for entry in matches {
        let path = entry.map_err(|e| Error::Io(e.into_error()))?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths)
}

/// A pattern operates in multi-folder mode when any wildcard appears in the
/// folder portion, i.e. before the last separator.
pub fn is_multi_folder(pattern: &str) -> bool {
    match pattern.rfind('/') {
        Some(idx) => pattern[..idx].contains('*'),
        None => false,
    }
}

/// Group matched files by their parent folder. Keys and the file lists are
/// both sorted, so the first entry is the lexicographically first folder.
pub fn group_by_folder(files: &[PathBuf]) -> BTreeMap<PathBuf, Vec<PathBuf>> {
    let mut folders: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        let folder = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        folders.entry(folder).or_default().push(file.clone());
    }
    for list in folders.values_mut() {
        list.sort();
    }
    folders
}

/// Age gate: true when the file's modification time is older than `max_age`.
/// Unreadable metadata fails open so the spawn is not silently skipped.
pub fn is_too_old(path: &Path, max_age: Duration) -> bool {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return false,
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age > max_age,
        Err(_) => false, // mtime in the future
    }
}
