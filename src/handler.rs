//! The `Handler` contract (spec.md §6) and the two reference handlers this
//! crate ships: a console writer and an in-memory accumulator for tests.
//! Production sinks (rotating file writers, trace sinks, ...) are external
//! collaborators per spec.md §1 — they only need to implement this trait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::levels::{Severity, SeverityMask};
use crate::message::Message;

/// Per-handler completion signal. Fired after every delivered call or
/// batch so the lifecycle controller's `wait_for_delivery` can learn when
/// a given sequence number has cleared every handler in a group's link
/// list (spec.md §4.7, §6).
pub struct Notifier {
    last_completed: Mutex<u64>,
    cond: Condvar,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier {
            last_completed: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub fn notify_completed(&self, seq: u64) {
        let mut last = self.last_completed.lock();
        if seq > *last {
            *last = seq;
        }
        self.cond.notify_all();
    }

    pub fn last_completed(&self) -> u64 {
        *self.last_completed.lock()
    }

    /// Blocks until `seq` has completed or `deadline` elapses. `deadline
    /// == None` waits forever, matching spec.md §5's "a zero limit means
    /// wait forever" contract (the caller translates a zero `Duration`
    /// into `None` before calling this).
    pub fn wait_until(&self, seq: u64, deadline: Option<Instant>) -> bool {
        let mut last = self.last_completed.lock();
        loop {
            if *last >= seq {
                return true;
            }
            match deadline {
                None => self.cond.wait(&mut last),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return *last >= seq;
                    }
                    let result = self.cond.wait_for(&mut last, deadline - now);
                    if result.timed_out() && *last < seq {
                        return false;
                    }
                }
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::new()
    }
}

/// A downstream consumer of distributed messages: console, file, trace
/// sink, test buffer, etc.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// This handler's own advertised severity gate.
    fn gate(&self) -> SeverityMask;

    /// Whether this handler can hold a shared reference to a message
    /// beyond the synchronous call (spec.md §3, §4.5 step 3). Handlers
    /// that answer `false` are always handed a private, non-pool-origin
    /// clone.
    fn supports_shared_refs(&self) -> bool {
        true
    }

    fn completion_notifier(&self) -> &Notifier;

    fn handle_one(&self, msg: &Message);

    /// Default batch implementation delegates to `handle_one` per message,
    /// then fires the notifier once for the whole run. Handlers with a
    /// genuine bulk write path (e.g. a buffered file writer) should
    /// override this.
    fn handle_batch(&self, msgs: &[Message]) {
        let mut max_seq = 0u64;
        for msg in msgs {
            self.handle_one(msg);
            max_seq = max_seq.max(msg.record().sequence);
        }
        self.completion_notifier().notify_completed(max_seq);
    }

    fn is_delivery_in_progress(&self, seq: u64) -> bool {
        self.completion_notifier().last_completed() < seq
    }

    fn flush(&self) {}
    fn shutdown(&self) {}
    fn start_if_needed(&self) {}
}

/// Mirrors the teacher's `backend::fast_format_suffix`: appends
/// `key=value` pairs after the message text.
fn fast_format_suffix(pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(pairs.len() * 16);
    out.push_str(" | ");
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Writes formatted lines to stderr. Supports shared references (no
/// cloning needed for this handler).
pub struct ConsoleHandler {
    name: String,
    gate: SeverityMask,
    notifier: Notifier,
    written: AtomicU64,
}

impl ConsoleHandler {
    pub fn new(name: impl Into<String>, gate: SeverityMask) -> ConsoleHandler {
        ConsoleHandler {
            name: name.into(),
            gate,
            notifier: Notifier::new(),
            written: AtomicU64::new(0),
        }
    }

    /// Total lines written so far. Exposed for tests and metrics.
    pub fn lines_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl Handler for ConsoleHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn gate(&self) -> SeverityMask {
        self.gate
    }

    fn completion_notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn handle_one(&self, msg: &Message) {
        let record = msg.record();
        let suffix = fast_format_suffix(&record.fields);
        eprintln!("[{}] {}{}", record.severity, record.text, suffix);
        self.written.fetch_add(1, Ordering::Relaxed);
        self.notifier.notify_completed(record.sequence);
    }
}

/// A recorded copy of a delivered message, decoupled from the pooled
/// `Message`'s lifetime so tests can inspect it after the message itself
/// has been released.
#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub severity: Severity,
    pub text: String,
    pub sequence: u64,
    pub fields: Vec<(String, String)>,
}

/// In-memory accumulating handler. Generalizes the teacher's
/// `src/tests/sink_tests.rs` accumulator-sink idiom from a file sink to
/// the generic `Handler` trait, so it is usable both by this crate's own
/// tests and by downstream consumers who want a deterministic sink.
pub struct TestHandler {
    name: String,
    gate: SeverityMask,
    supports_shared_refs: bool,
    notifier: Notifier,
    received: Mutex<Vec<RecordedMessage>>,
}

impl TestHandler {
    pub fn new(name: impl Into<String>, gate: SeverityMask) -> TestHandler {
        TestHandler {
            name: name.into(),
            gate,
            supports_shared_refs: true,
            notifier: Notifier::new(),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Builder hook for constructing a handler that forces the engine to
    /// clone records before delivery (spec.md end-to-end scenario 4).
    pub fn without_shared_refs(mut self) -> TestHandler {
        self.supports_shared_refs = false;
        self
    }

    pub fn received(&self) -> Vec<RecordedMessage> {
        self.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Handler for TestHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn gate(&self) -> SeverityMask {
        self.gate
    }

    fn supports_shared_refs(&self) -> bool {
        self.supports_shared_refs
    }

    fn completion_notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn handle_one(&self, msg: &Message) {
        let record = msg.record();
        self.received.lock().push(RecordedMessage {
            severity: record.severity,
            text: record.text.clone(),
            sequence: record.sequence,
            fields: record.fields.iter().cloned().collect(),
        });
        self.notifier.notify_completed(record.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_wait_returns_true_once_completed() {
        let notifier = Notifier::new();
        notifier.notify_completed(5);
        assert!(notifier.wait_until(5, Some(Instant::now())));
        assert!(notifier.wait_until(3, Some(Instant::now())));
    }

    #[test]
    fn test_notifier_wait_times_out() {
        let notifier = Notifier::new();
        let deadline = Instant::now() + std::time::Duration::from_millis(30);
        assert!(!notifier.wait_until(1, Some(deadline)));
    }

    #[test]
    fn test_notifier_is_monotonic() {
        let notifier = Notifier::new();
        notifier.notify_completed(5);
        notifier.notify_completed(2);
        assert_eq!(notifier.last_completed(), 5);
    }

    #[test]
    fn test_fast_format_suffix_empty() {
        assert_eq!(fast_format_suffix(&[]), "");
    }

    #[test]
    fn test_fast_format_suffix_multiple_pairs() {
        let pairs = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        assert_eq!(fast_format_suffix(&pairs), " | a=1, b=2");
    }

    #[test]
    fn test_test_handler_default_supports_shared_refs() {
        let handler = TestHandler::new("t", SeverityMask::ALL);
        assert!(handler.supports_shared_refs());
    }

    #[test]
    fn test_test_handler_without_shared_refs() {
        let handler = TestHandler::new("t", SeverityMask::ALL).without_shared_refs();
        assert!(!handler.supports_shared_refs());
    }
}
