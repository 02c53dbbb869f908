//! Synchronization and timing

use std::fmt;

use crate::api::EventId;
use crate::error::{Error, Result};
use crate::resource::{Owned, Released};

/// Device timestamps are nanoseconds
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Completion event of a dispatched kernel.
///
/// Used as the wait dependency of the download that reads the kernel's output
/// and as the source of its execution time.
#[derive(Debug)]
pub struct CompletionEvent {
    owned: Owned<EventId>,
}

impl CompletionEvent {
    pub(crate) fn new(owned: Owned<EventId>) -> Self {
        Self { owned }
    }

    pub fn raw(&self) -> EventId {
        self.owned.raw()
    }

    /// Block until the command has completed. No timeout is applied.
    pub fn wait(&self) -> Result<()> {
        self.owned
            .api()
            .wait_for_events(&[self.raw()])
            .map_err(|source| Error::SyncFailed {
                operation: "event wait",
                source,
            })
    }

    /// Execution interval of the completed command.
    ///
    /// Requires a queue created with profiling enabled.
    pub fn elapsed(&self) -> Result<ElapsedTime> {
        let info = self
            .owned
            .api()
            .event_profiling(self.raw())
            .map_err(|source| Error::SyncFailed {
                operation: "profiling query",
                source,
            })?;

        Ok(ElapsedTime {
            nanos: info.end.saturating_sub(info.start),
            queued_to_start: info.start.saturating_sub(info.queued),
        })
    }

    /// Release the event; later calls are no-ops
    pub fn release(&mut self) -> Result<Released> {
        self.owned.release()
    }
}

/// Kernel execution time as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ElapsedTime {
    /// End minus start, in nanoseconds
    pub nanos: u64,
    /// Start minus queued, in nanoseconds
    pub queued_to_start: u64,
}

impl ElapsedTime {
    pub fn as_millis_f64(&self) -> f64 {
        self.nanos as f64 / NANOS_PER_MILLI as f64
    }
}

impl fmt::Display for ElapsedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} ms", self.as_millis_f64())
    }
}
