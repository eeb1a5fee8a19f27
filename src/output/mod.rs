// SPDX-License-Identifier: Apache-2.0

//! Output side of the agent: the sink seam and the shared output manager
//! that enriches, deduplicates, truncates and fans records out.

pub mod dedup;
pub mod defaults;
pub mod file;
pub mod id;
pub mod level;
pub mod manager;

use std::path::Path;

use crate::error::Result;
use crate::input::marker::InputMarker;
use crate::metric::Metric;
use crate::record::Record;

pub use dedup::{DedupConfig, OutputLineFilter};
pub use defaults::FieldDefaults;
pub use file::JsonLinesSink;
pub use level::{LevelFilter, LevelListFilter};
pub use manager::OutputManager;

/// A destination for enriched records.
///
/// Sinks own their queues and synchronization; the core only observes
/// `pending_count` and `is_closed` to decide when to abandon a drain at
/// shutdown. Write errors must be returned, not panicked, so the dispatch
/// loop can log and move on to the next sink.
pub trait Sink: Send + Sync {
    /// One-time setup before steady state.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Accept one enriched record.
    fn write(&self, record: &Record, marker: &InputMarker) -> Result<()>;

    /// Accept one unparsed text block.
    fn write_text(&self, text: &str, marker: &InputMarker) -> Result<()>;

    /// Accept a whole file, verbatim.
    fn copy_file(&self, file: &Path, marker: &InputMarker) -> Result<()>;

    /// Begin an orderly close; `is_closed` reports completion.
    fn close(&self);

    fn set_drain(&self, drain: bool);

    fn is_closed(&self) -> bool;

    /// Records accepted but not yet delivered.
    fn pending_count(&self) -> usize;

    /// Fields used to derive a stable record id for this sink.
    fn id_fields(&self) -> &[String] {
        &[]
    }

    fn short_description(&self) -> String;

    fn add_metrics(&self, _metrics: &mut Vec<Metric>) {}

    fn log_stat(&self) {}
}
