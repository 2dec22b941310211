//! The Direct Distribution Path (spec.md §4.5).
//!
//! Preconditions (checked by the caller before the engine lock is taken):
//! the record has a valid source, is marked emitted, and its severity
//! passed the logger's lock-free cached gate. Everything below runs under
//! the engine lock.

use crate::error::{report_fault, EngineError};
use crate::message::{Message, Origin};
use crate::registry::logger::LoggerId;
use crate::registry::Registries;

/// Routes one message from its logger's group out to every handler in
/// that group's link list whose own gate admits the severity.
///
/// Consumes the producer's reference: on return (any return path) `msg`
/// has been dropped, either because it was routed to zero or more
/// handlers or because the group's active config re-check gated it out.
/// Returns `true` if the record passed the group re-check and was handed
/// to fan-out (spec.md §7: "emits a summary ... the next time
/// distribution succeeds" — callers use this to gate that report).
pub(crate) fn distribute(
    registries: &mut Registries,
    seq_counter: &crate::message::SequenceCounter,
    logger_id: LoggerId,
    mut msg: Message,
) -> bool {
    let group_id = registries.loggers.entry(logger_id).group_id;

    // Step 1: stamp the dispatch-time sequence number and record it as
    // this logger's last distribution (spec.md §9: sequence numbers are
    // assigned at dispatch, not at acquire/enqueue time).
    let sequence = seq_counter.next();
    msg.stamp_sequence(sequence);
    registries.loggers.entry_mut(logger_id).last_distributed_sequence = sequence;

    let severity = msg.record().severity;

    // Step 2: re-check against the group's active config, since it can
    // have narrowed since the logger's cached gate was last published.
    let group_active = registries.groups.get_mut(group_id).active_config();
    if !group_active.mask.admits(severity) {
        return false;
    }

    // Step 3: a group that can't guarantee every handler tolerates a
    // shared reference forces a private, non-pool copy before fan-out.
    if !group_active.supports_shared_refs && msg.pool_origin() {
        msg = clone_to_heap(&msg);
    }

    // Step 4: fan out across the source group's transitive link list. A
    // panicking handler is confined to itself — the remaining handlers
    // still receive the record (spec.md §4.5 step 4, §7: "producers must
    // not learn about downstream problems through the emit call").
    let links = registries.groups.get(group_id).links.clone();
    for linked_id in links {
        let group = registries.groups.get(linked_id);
        for handler in &group.handlers {
            if handler.gate().admits(severity) {
                if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler.handle_one(&msg)
                })) {
                    let _ = payload;
                    report_fault(&EngineError::HandlerFailure {
                        handler: handler.name().to_string(),
                        message: "panicked while handling a single message".to_string(),
                    });
                }
            }
        }
    }

    // Step 5: `msg` drops here, releasing the producer's reference.
    true
}

fn clone_to_heap(msg: &Message) -> Message {
    let cloned = msg.record().clone();
    Message::new(cloned, false, Origin::Heap)
}

/// The façade's `reallocate_for_non_shared`: forces `msg` into a private,
/// non-pool-origin copy regardless of the group's active config, for a
/// caller (typically a handler) that needs to retain it beyond the
/// synchronous call it was handed through (spec.md §6). A no-op if `msg`
/// is already non-pool-origin.
pub(crate) fn reallocate_for_non_shared(msg: Message) -> Message {
    if msg.pool_origin() {
        clone_to_heap(&msg)
    } else {
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, Notifier, TestHandler};
    use crate::levels::{Severity, SeverityMask};
    use crate::message::SequenceCounter;
    use crate::pool::MessagePool;
    use crate::registry::group::{MatchKind, DEFAULT_GROUP_ID};
    use std::sync::Arc;

    fn make_logger(registries: &mut Registries, name: &str) -> LoggerId {
        let (id, _) = registries.loggers.get_or_create(name, DEFAULT_GROUP_ID, false);
        registries.recompute_logger(id);
        id
    }

    /// A handler whose `handle_one` always panics, used to prove the
    /// direct path confines a handler's panic to itself.
    struct PanickingHandler {
        notifier: Notifier,
    }

    impl Handler for PanickingHandler {
        fn name(&self) -> &str {
            "panicking"
        }

        fn gate(&self) -> SeverityMask {
            SeverityMask::ALL
        }

        fn completion_notifier(&self) -> &Notifier {
            &self.notifier
        }

        fn handle_one(&self, _msg: &Message) {
            panic!("simulated handler failure");
        }
    }

    #[test]
    fn test_distribute_delivers_to_matching_handler() {
        let mut registries = Registries::new();
        let group = registries.groups.get_or_create("SVC");
        registries.groups.set_mask(group, SeverityMask::ALL);
        registries.groups.set_match_rule(group, MatchKind::Prefix, "svc.").unwrap();
        let handler = Arc::new(TestHandler::new("h", SeverityMask::ALL));
        registries.groups.add_handler(group, handler.clone());

        let logger_id = make_logger(&mut registries, "svc.worker");
        let pool = MessagePool::new(4);
        let mut msg = pool.acquire(logger_id);
        msg.record_mut().severity = Severity::Error;
        msg.record_mut().text = "boom".to_string();

        let seq = SequenceCounter::new();
        distribute(&mut registries, &seq, logger_id, msg);

        assert_eq!(handler.len(), 1);
        assert_eq!(handler.received()[0].text, "boom");
    }

    #[test]
    fn test_distribute_regates_on_group_active_config() {
        let mut registries = Registries::new();
        let group = registries.groups.get_or_create("SVC");
        // Group mask excludes Error even though the handler would admit it.
        registries.groups.set_mask(group, SeverityMask::single(Severity::Info));
        registries.groups.set_match_rule(group, MatchKind::Prefix, "svc.").unwrap();
        let handler = Arc::new(TestHandler::new("h", SeverityMask::ALL));
        registries.groups.add_handler(group, handler.clone());

        let logger_id = make_logger(&mut registries, "svc.worker");
        let pool = MessagePool::new(4);
        let mut msg = pool.acquire(logger_id);
        msg.record_mut().severity = Severity::Error;

        let seq = SequenceCounter::new();
        distribute(&mut registries, &seq, logger_id, msg);

        assert!(handler.is_empty());
    }

    #[test]
    fn test_distribute_fans_out_across_links() {
        let mut registries = Registries::new();
        let a = registries.groups.get_or_create("A");
        let b = registries.groups.get_or_create("B");
        registries.groups.set_mask(a, SeverityMask::ALL);
        registries.groups.set_mask(b, SeverityMask::ALL);
        registries.groups.set_match_rule(a, MatchKind::Prefix, "svc.").unwrap();
        let handler_a = Arc::new(TestHandler::new("ha", SeverityMask::ALL));
        let handler_b = Arc::new(TestHandler::new("hb", SeverityMask::ALL));
        registries.groups.add_handler(a, handler_a.clone());
        registries.groups.add_handler(b, handler_b.clone());
        registries.groups.link(a, b);

        let logger_id = make_logger(&mut registries, "svc.worker");
        let pool = MessagePool::new(4);
        let mut msg = pool.acquire(logger_id);
        msg.record_mut().severity = Severity::Info;

        let seq = SequenceCounter::new();
        distribute(&mut registries, &seq, logger_id, msg);

        assert_eq!(handler_a.len(), 1);
        assert_eq!(handler_b.len(), 1);
    }

    #[test]
    fn test_distribute_clones_to_heap_when_group_lacks_shared_refs() {
        let mut registries = Registries::new();
        let group = registries.groups.get_or_create("SVC");
        registries.groups.set_mask(group, SeverityMask::ALL);
        registries.groups.set_match_rule(group, MatchKind::Prefix, "svc.").unwrap();
        let handler = Arc::new(TestHandler::new("h", SeverityMask::ALL).without_shared_refs());
        registries.groups.add_handler(group, handler.clone());

        let logger_id = make_logger(&mut registries, "svc.worker");
        let pool = MessagePool::new(4);
        let msg = pool.acquire(logger_id);
        assert!(msg.pool_origin());

        let seq = SequenceCounter::new();
        distribute(&mut registries, &seq, logger_id, msg);

        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn test_distribute_stamps_monotonic_sequence() {
        let mut registries = Registries::new();
        let group = registries.groups.get_or_create("SVC");
        registries.groups.set_mask(group, SeverityMask::ALL);
        registries.groups.set_match_rule(group, MatchKind::Prefix, "svc.").unwrap();
        let handler = Arc::new(TestHandler::new("h", SeverityMask::ALL));
        registries.groups.add_handler(group, handler.clone());

        let logger_id = make_logger(&mut registries, "svc.worker");
        let pool = MessagePool::new(4);
        let seq = SequenceCounter::new();

        let first = pool.acquire(logger_id);
        distribute(&mut registries, &seq, logger_id, first);
        let second = pool.acquire(logger_id);
        distribute(&mut registries, &seq, logger_id, second);

        let received = handler.received();
        assert!(received[1].sequence > received[0].sequence);
    }

    #[test]
    fn test_distribute_isolates_a_panicking_handler_from_the_rest() {
        let mut registries = Registries::new();
        let group = registries.groups.get_or_create("SVC");
        registries.groups.set_mask(group, SeverityMask::ALL);
        registries.groups.set_match_rule(group, MatchKind::Prefix, "svc.").unwrap();
        let panicking = Arc::new(PanickingHandler { notifier: Notifier::new() });
        let handler = Arc::new(TestHandler::new("h", SeverityMask::ALL));
        registries.groups.add_handler(group, panicking);
        registries.groups.add_handler(group, handler.clone());

        let logger_id = make_logger(&mut registries, "svc.worker");
        let pool = MessagePool::new(4);
        let mut msg = pool.acquire(logger_id);
        msg.record_mut().severity = Severity::Error;

        let seq = SequenceCounter::new();
        distribute(&mut registries, &seq, logger_id, msg);

        assert_eq!(handler.len(), 1, "handler after the panicking one still receives the record");
    }
}
