// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("filter error: {0}")]
    Filter(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
