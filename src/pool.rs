//! The bounded, reusable message pool (spec.md §4.1).
//!
//! The free list uses its own `parking_lot::Mutex`, deliberately separate
//! from the engine's registry/group/queue lock (spec.md §5: "The pool's
//! free list uses its own internal synchronization"). `acquire`/`release`
//! are therefore always safe to call from a producer thread that holds no
//! other engine lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::message::{Message, MessageCell, Origin};
use crate::registry::logger::LoggerId;

struct PoolInner {
    free: Mutex<Vec<Arc<MessageCell>>>,
    capacity: usize,
    shut_down: AtomicBool,
}

/// Cheap, cloneable reference to the pool's free list, embedded in every
/// pool-origin `Message` so it can return itself on last release without
/// going through the engine.
#[derive(Clone)]
pub(crate) struct PoolHandle(Arc<PoolInner>);

impl PoolHandle {
    /// Hands a cell back to the free list as the same `Arc` allocation it
    /// was handed out as — no unwrap-and-rebox, so a pool round trip never
    /// pays for a fresh allocation.
    pub fn reclaim(&self, cell: Arc<MessageCell>) {
        let mut free = self.0.free.lock();
        if free.len() < self.0.capacity {
            free.push(cell);
        }
        // else: capacity reached, `cell` is dropped here and freed.
    }
}

/// Hands out [`Message`] records to producers and reclaims them when their
/// last reference drops.
pub struct MessagePool {
    handle: PoolHandle,
}

impl MessagePool {
    pub fn new(capacity: usize) -> MessagePool {
        MessagePool {
            handle: PoolHandle(Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(capacity.min(64))),
                capacity,
                shut_down: AtomicBool::new(false),
            })),
        }
    }

    /// Returns a record with refcount 1, ready for the producer to fill.
    pub fn acquire(&self, logger_id: LoggerId) -> Message {
        if self.handle.0.shut_down.load(Ordering::Acquire) {
            return Message::new(Message::fresh_record(logger_id), false, Origin::Heap);
        }
        let popped = self.handle.0.free.lock().pop();
        match popped {
            Some(cell) => Message::from_reset_cell(cell, logger_id, Origin::Pool(self.handle.clone())),
            None => Message::new(
                Message::fresh_record(logger_id),
                true,
                Origin::Pool(self.handle.clone()),
            ),
        }
    }

    /// Disables recycling: further `acquire` calls return heap-allocated,
    /// non-pool-origin records, and the idle free list is dropped.
    pub fn shutdown(&self) {
        self.handle.0.shut_down.store(true, Ordering::Release);
        self.handle.0.free.lock().clear();
    }

    /// Re-enables recycling after a prior `shutdown` (spec.md §4.7
    /// `startup_if_needed` "restarts the pool").
    pub fn restart(&self) {
        self.handle.0.shut_down.store(false, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.handle.0.shut_down.load(Ordering::Acquire)
    }

    /// Current size of the idle free list. Exposed for tests.
    pub fn idle_len(&self) -> usize {
        self.handle.0.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.handle.0.capacity
    }
}
