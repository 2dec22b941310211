//! Published configuration snapshots and engine-wide tuning knobs.

use std::time::Duration;

use crate::levels::SeverityMask;

/// The value published per logger and read without locking (spec.md §4.2).
///
/// Cloned cheaply (two small fields) so it can be held inside an
/// [`arc_swap::ArcSwap`] and swapped atomically whenever the logger's
/// effective gate changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerConfig {
    pub mask: SeverityMask,
    pub supports_shared_refs: bool,
}

impl LoggerConfig {
    pub fn disabled() -> LoggerConfig {
        LoggerConfig {
            mask: SeverityMask::NONE,
            supports_shared_refs: true,
        }
    }

    pub fn admits(&self, level: crate::levels::Severity) -> bool {
        self.mask.admits(level)
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig::disabled()
    }
}

/// Engine-wide tuning knobs. Mirrors the teacher's `LoggerState` defaults
/// pattern (`config/state.rs`'s `buffer_size`/`flush_interval`/
/// `max_buffered_lines`), generalized from "async file writer" knobs to the
/// distribution engine's own pool/queue/wait knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Soft ceiling on the message pool's idle free list (spec.md §4.1).
    pub pool_capacity: usize,
    /// Bounded FIFO capacity for the queued relay (spec.md §4.6).
    pub queue_capacity: usize,
    /// Maximum records the worker pulls from the FIFO per drain pass.
    pub batch_size: usize,
    /// How long the worker blocks on the wakeup notifier when idle.
    pub worker_poll_interval: Duration,
    /// Polling granularity for `wait_for_delivery`/`wait_for_queued_delivery`.
    pub wait_poll_interval: Duration,
    /// Extra drain passes the worker performs after `Disabling` is set,
    /// to absorb stragglers before it exits (spec.md §4.6).
    pub shutdown_drain_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pool_capacity: 256,
            queue_capacity: 4096,
            batch_size: 100,
            worker_poll_interval: Duration::from_millis(100),
            wait_poll_interval: Duration::from_millis(20),
            shutdown_drain_passes: 3,
        }
    }
}
