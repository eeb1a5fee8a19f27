// SPDX-License-Identifier: Apache-2.0

//! Input side of the agent: file discovery, per-file tailers, and the
//! supervisors that keep them alive.

pub mod docker;
pub mod file_id;
pub mod finder;
pub mod marker;
pub mod reader;
pub mod supervisor;
pub mod tailer;

pub use docker::{ContainerLogAdapter, ContainerMetadata, ContainerRegistry};
pub use file_id::FileId;
pub use marker::{InputContext, InputMarker};
pub use supervisor::InputSupervisor;
pub use tailer::{FileTailer, TailerHandle};

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Sleep for `total`, waking early when the token is cancelled. Duty threads
/// use this so shutdown is observed within a bounded interval.
pub(crate) fn sleep_cancellable(cancel: &CancellationToken, total: Duration) {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(std::cmp::min(deadline - now, Duration::from_millis(100)));
    }
}
