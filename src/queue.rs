//! The queued relay's FIFO and state machine (spec.md §4.6).
//!
//! This module only owns the data structure: the bounded channel, the
//! `Uninitialized → Enabled → Disabling → Drained` state machine, and
//! enqueue-ticket bookkeeping used by `wait_for_queued_delivery`. The
//! worker thread that drains it and the engine lock it dispatches under
//! live in `engine.rs`, which is the only place both the queue and the
//! registries are reachable together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::handler::Notifier;
use crate::message::Message;
use crate::registry::group::GroupId;
use crate::registry::logger::LoggerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueState {
    Uninitialized,
    Enabled,
    Disabling,
    Drained,
}

/// One record sitting in the FIFO, with the destination group it was
/// resolved to at enqueue time (spec.md §4.6: runs are split "by the same
/// destination group id").
pub(crate) struct QueuedItem {
    pub msg: Message,
    pub logger_id: LoggerId,
    pub group_id: GroupId,
    /// Local enqueue-order counter, distinct from the dispatch sequence
    /// number stamped later in the drain loop (spec.md §9: sequence
    /// numbers are assigned only at dispatch). Lets `wait_for_queued_delivery`
    /// wait for "this particular enqueue" to clear the FIFO without
    /// needing to know the dispatch sequence in advance.
    pub ticket: u64,
}

pub(crate) enum EnqueueOutcome {
    Queued(u64),
    DroppedFull,
    NotEnabled,
}

pub(crate) struct MessageQueue {
    capacity: usize,
    channel: Mutex<Option<(Sender<QueuedItem>, Receiver<QueuedItem>)>>,
    state: Mutex<QueueState>,
    dropped_since_last_success: AtomicU64,
    ticket_counter: AtomicU64,
    ticket_notifier: Notifier,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> MessageQueue {
        MessageQueue {
            capacity,
            channel: Mutex::new(None),
            state: Mutex::new(QueueState::Uninitialized),
            dropped_since_last_success: AtomicU64::new(0),
            ticket_counter: AtomicU64::new(0),
            ticket_notifier: Notifier::new(),
        }
    }

    pub fn state(&self) -> QueueState {
        *self.state.lock()
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == QueueState::Enabled
    }

    /// Transitions to `Enabled`, (re)creating the channel. Safe to call
    /// from `Uninitialized` or `Drained`; a no-op if already `Enabled`.
    pub fn open(&self) {
        let mut state = self.state.lock();
        if *state == QueueState::Enabled {
            return;
        }
        *self.channel.lock() = Some(bounded(self.capacity));
        *state = QueueState::Enabled;
    }

    /// Requests the `Disabling` transition. Returns `false` if the queue
    /// was not `Enabled` (nothing to disable).
    pub fn begin_disabling(&self) -> bool {
        let mut state = self.state.lock();
        if *state == QueueState::Enabled {
            *state = QueueState::Disabling;
            true
        } else {
            false
        }
    }

    /// Final transition once the worker has exited. Drops the channel so
    /// further `enqueue` calls observe `NotEnabled`.
    pub fn mark_drained(&self) {
        *self.state.lock() = QueueState::Drained;
        *self.channel.lock() = None;
    }

    pub fn enqueue(&self, msg: Message, logger_id: LoggerId, group_id: GroupId) -> EnqueueOutcome {
        let guard = self.channel.lock();
        match guard.as_ref() {
            Some((sender, _)) => {
                let ticket = self.ticket_counter.fetch_add(1, Ordering::Relaxed) + 1;
                let item = QueuedItem {
                    msg,
                    logger_id,
                    group_id,
                    ticket,
                };
                match sender.try_send(item) {
                    Ok(()) => EnqueueOutcome::Queued(ticket),
                    // Drop-newest: the record that cannot be queued is the one
                    // dropped, the FIFO's existing contents are left alone
                    // (spec.md §9 resolves the open "oldest vs. incoming" question
                    // this way).
                    Err(_) => {
                        self.dropped_since_last_success.fetch_add(1, Ordering::Relaxed);
                        EnqueueOutcome::DroppedFull
                    }
                }
            }
            None => EnqueueOutcome::NotEnabled,
        }
    }

    /// Blocks up to `timeout` for at least one item, then greedily drains
    /// up to `max` more without blocking. Returns an empty vec if the
    /// queue isn't open or nothing arrived within `timeout`.
    pub fn pull_batch(&self, max: usize, timeout: Duration) -> Vec<QueuedItem> {
        let receiver = {
            let guard = self.channel.lock();
            guard.as_ref().map(|(_, rx)| rx.clone())
        };
        let Some(receiver) = receiver else {
            return Vec::new();
        };
        let mut batch = Vec::new();
        match receiver.recv_timeout(timeout) {
            Ok(item) => batch.push(item),
            Err(RecvTimeoutError::Timeout) => return batch,
            Err(RecvTimeoutError::Disconnected) => return batch,
        }
        while batch.len() < max {
            match receiver.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        batch
    }

    /// Number of records still sitting in the FIFO. Used for shutdown
    /// straggler accounting.
    pub fn pending_len(&self) -> usize {
        self.channel.lock().as_ref().map_or(0, |(_, rx)| rx.len())
    }

    /// Drains and returns the drop counter accumulated since the last
    /// call (spec.md §7: "emits a summary 'dropped N since last success'
    /// message the next time distribution succeeds").
    pub fn take_dropped_count(&self) -> u64 {
        self.dropped_since_last_success.swap(0, Ordering::AcqRel)
    }

    pub fn notify_drained_ticket(&self, ticket: u64) {
        self.ticket_notifier.notify_completed(ticket);
    }

    pub fn wait_for_ticket(&self, ticket: u64, deadline: Option<Instant>) -> bool {
        self.ticket_notifier.wait_until(ticket, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MessagePool;
    use crate::registry::group::DEFAULT_GROUP_ID;

    fn sample_msg(pool: &MessagePool) -> Message {
        pool.acquire(LoggerId::new(0))
    }

    #[test]
    fn test_enqueue_before_open_is_not_enabled() {
        let queue = MessageQueue::new(4);
        let pool = MessagePool::new(4);
        let outcome = queue.enqueue(sample_msg(&pool), LoggerId::new(0), DEFAULT_GROUP_ID);
        assert!(matches!(outcome, EnqueueOutcome::NotEnabled));
    }

    #[test]
    fn test_open_then_enqueue_succeeds_and_tickets_increase() {
        let queue = MessageQueue::new(4);
        queue.open();
        let pool = MessagePool::new(4);
        let t1 = match queue.enqueue(sample_msg(&pool), LoggerId::new(0), DEFAULT_GROUP_ID) {
            EnqueueOutcome::Queued(t) => t,
            _ => panic!("expected Queued"),
        };
        let t2 = match queue.enqueue(sample_msg(&pool), LoggerId::new(0), DEFAULT_GROUP_ID) {
            EnqueueOutcome::Queued(t) => t,
            _ => panic!("expected Queued"),
        };
        assert!(t2 > t1);
    }

    #[test]
    fn test_enqueue_drops_newest_when_full() {
        let queue = MessageQueue::new(1);
        queue.open();
        let pool = MessagePool::new(4);
        assert!(matches!(
            queue.enqueue(sample_msg(&pool), LoggerId::new(0), DEFAULT_GROUP_ID),
            EnqueueOutcome::Queued(_)
        ));
        assert!(matches!(
            queue.enqueue(sample_msg(&pool), LoggerId::new(0), DEFAULT_GROUP_ID),
            EnqueueOutcome::DroppedFull
        ));
        assert_eq!(queue.take_dropped_count(), 1);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_pull_batch_respects_max_and_preserves_order() {
        let queue = MessageQueue::new(8);
        queue.open();
        let pool = MessagePool::new(8);
        for _ in 0..5 {
            queue.enqueue(sample_msg(&pool), LoggerId::new(0), DEFAULT_GROUP_ID);
        }
        let batch = queue.pull_batch(3, Duration::from_millis(50));
        assert_eq!(batch.len(), 3);
        assert!(batch[0].ticket < batch[1].ticket);
        assert!(batch[1].ticket < batch[2].ticket);
    }

    #[test]
    fn test_pull_batch_times_out_when_empty() {
        let queue = MessageQueue::new(4);
        queue.open();
        let batch = queue.pull_batch(10, Duration::from_millis(20));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_begin_disabling_only_from_enabled() {
        let queue = MessageQueue::new(4);
        assert!(!queue.begin_disabling());
        queue.open();
        assert!(queue.begin_disabling());
        assert_eq!(queue.state(), QueueState::Disabling);
    }

    #[test]
    fn test_mark_drained_closes_channel() {
        let queue = MessageQueue::new(4);
        queue.open();
        queue.mark_drained();
        assert_eq!(queue.state(), QueueState::Drained);
        let pool = MessagePool::new(4);
        assert!(matches!(
            queue.enqueue(sample_msg(&pool), LoggerId::new(0), DEFAULT_GROUP_ID),
            EnqueueOutcome::NotEnabled
        ));
    }

    #[test]
    fn test_wait_for_ticket_unblocks_after_notify() {
        let queue = MessageQueue::new(4);
        queue.notify_drained_ticket(3);
        assert!(queue.wait_for_ticket(3, Some(Instant::now())));
        assert!(!queue.wait_for_ticket(4, Some(Instant::now())));
    }

    #[test]
    fn test_reopen_after_drained_resets_state() {
        let queue = MessageQueue::new(4);
        queue.open();
        queue.mark_drained();
        queue.open();
        assert!(queue.is_enabled());
    }
}
