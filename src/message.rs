//! The pooled, reference-counted log record (spec.md §3, §4.1).
//!
//! A [`Message`] is a handle to an [`Arc`]-shared [`MessageCell`]. Cloning a
//! handle (`clone_ref`) bumps the `Arc`'s refcount; dropping the last handle
//! either returns the cell to its owning [`crate::pool::MessagePool`] (if
//! `pool_origin`) or frees it (heap-origin messages, e.g. ones produced by
//! "reallocate for non-shared handler", or acquired after the pool shut
//! down). A reclaimed cell is handed back to the pool as the very same
//! `Arc` allocation rather than unwrapped and reboxed, so a pool round trip
//! never pays for a fresh allocation. No engine lock is ever taken for
//! acquire/clone/release — spec.md §5: "Reference counts on messages use
//! atomic primitives and require no engine lock."

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;

use crate::levels::Severity;
use crate::pool::PoolHandle;

/// File/line captured at the call site, when the producer opts in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// The mutable payload of a message. Written once by the producer while it
/// holds the sole reference (refcount == 1, right after `acquire`), then
/// treated as logically immutable once handed to `distribute`/`enqueue`.
#[derive(Clone)]
pub struct MessageRecord {
    pub severity: Severity,
    pub logger_id: crate::registry::logger::LoggerId,
    pub text: String,
    pub fields: SmallVec<[(String, String); 4]>,
    pub binary: Option<Vec<u8>>,
    pub wall_time: DateTime<Utc>,
    pub mono_time: Instant,
    pub thread: Option<String>,
    pub location: Option<SourceLocation>,
    pub sequence: u64,
    pub emitted: bool,
}

impl MessageRecord {
    fn reset(&mut self, logger_id: crate::registry::logger::LoggerId) {
        self.severity = Severity::Info;
        self.logger_id = logger_id;
        self.text.clear();
        self.fields.clear();
        self.binary = None;
        self.wall_time = Utc::now();
        self.mono_time = Instant::now();
        self.thread = None;
        self.location = None;
        self.sequence = 0;
        self.emitted = false;
    }

    fn new(logger_id: crate::registry::logger::LoggerId) -> MessageRecord {
        MessageRecord {
            severity: Severity::Info,
            logger_id,
            text: String::new(),
            fields: SmallVec::new(),
            binary: None,
            wall_time: Utc::now(),
            mono_time: Instant::now(),
            thread: None,
            location: None,
            sequence: 0,
            emitted: false,
        }
    }
}

/// Where a cell returns to when its refcount reaches zero.
#[derive(Clone)]
pub(crate) enum Origin {
    Pool(PoolHandle),
    Heap,
}

/// Allocation backing a `Message`: the record plus the pool-origin tag.
/// Shared refcounting is provided by the surrounding `Arc`, not by this
/// type itself.
pub(crate) struct MessageCell {
    record: MessageRecord,
    pub(crate) pool_origin: bool,
}

/// A handle to a pooled or heap-allocated [`MessageRecord`].
///
/// Dropping the last outstanding `Message` for a given cell reclaims it:
/// back to the pool's free list if `pool_origin`, or freed if not
/// (spec.md §3 invariants).
pub struct Message {
    cell: Option<Arc<MessageCell>>,
    origin: Origin,
}

impl Message {
    pub(crate) fn new(record: MessageRecord, pool_origin: bool, origin: Origin) -> Message {
        Message {
            cell: Some(Arc::new(MessageCell { record, pool_origin })),
            origin,
        }
    }

    /// Reuse an already-allocated, reset cell coming back out of the pool's
    /// free list, without a fresh heap allocation. `cell` is guaranteed to
    /// be the pool's sole reference (it only ever reclaims a cell once its
    /// last `Message` handle has dropped), so `Arc::get_mut` always
    /// succeeds here.
    pub(crate) fn from_reset_cell(
        mut cell: Arc<MessageCell>,
        logger_id: crate::registry::logger::LoggerId,
        origin: Origin,
    ) -> Message {
        Arc::get_mut(&mut cell)
            .expect("pool handed back a still-shared cell")
            .record
            .reset(logger_id);
        Message {
            cell: Some(cell),
            origin,
        }
    }

    pub(crate) fn fresh_record(logger_id: crate::registry::logger::LoggerId) -> MessageRecord {
        MessageRecord::new(logger_id)
    }

    fn cell(&self) -> &MessageCell {
        self.cell.as_ref().expect("message cell missing")
    }

    fn cell_mut(&mut self) -> &mut MessageCell {
        Arc::get_mut(self.cell.as_mut().expect("message cell missing"))
            .expect("record_mut called on a shared message")
    }

    /// Exclusive access to the record. Valid only while this `Message` is
    /// the sole outstanding handle (immediately after `acquire`, before the
    /// record is submitted to `distribute`/`enqueue` or cloned).
    pub fn record_mut(&mut self) -> &mut MessageRecord {
        &mut self.cell_mut().record
    }

    /// Shared, read-only access to the record. Valid for any holder once
    /// the message has been submitted.
    pub fn record(&self) -> &MessageRecord {
        &self.cell().record
    }

    pub fn pool_origin(&self) -> bool {
        self.cell().pool_origin
    }

    pub fn refcount(&self) -> usize {
        Arc::strong_count(self.cell.as_ref().expect("message cell missing"))
    }

    /// Bump the refcount and return a new handle to the same cell. Used by
    /// handlers that advertise `supports_shared_refs` and want to retain
    /// the message beyond the synchronous call, and by the engine while
    /// fanning a single distribution out to multiple handlers/groups.
    pub fn clone_ref(&self) -> Message {
        Message {
            cell: self.cell.clone(),
            origin: self.origin.clone(),
        }
    }

    pub(crate) fn stamp_sequence(&mut self, seq: u64) {
        self.cell_mut().record.sequence = seq;
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        let Some(cell) = self.cell.take() else {
            return;
        };
        if Arc::strong_count(&cell) == 1 {
            match &self.origin {
                Origin::Pool(handle) if cell.pool_origin => handle.reclaim(cell),
                _ => {}
            }
        }
    }
}

/// Per-message monotonic counter, allocated under the engine lock
/// (spec.md §3: "Sequence numbers are strictly monotonic ... assigned
/// only under the engine lock").
pub(crate) struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn new() -> SequenceCounter {
        SequenceCounter(AtomicU64::new(0))
    }

    /// Must be called only while holding the engine lock.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
