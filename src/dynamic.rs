//! The external dynamic-configuration collaborator (spec.md §6, §4.8).
//!
//! The core never polls this on its own; it is the caller's job to
//! forward a change notification into `Engine::refresh_dynamic_overrides`
//! (mirroring the teacher's own "push, don't poll" stance toward its
//! backend async writer).

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::config::LoggerConfig;
use crate::levels::SeverityMask;
use crate::registry::logger::DynamicOverrideKeys;

/// A source of keyed string values, with change detection left to the
/// caller (the trait only needs to answer "what is the value right now").
pub trait DynamicConfigSource: Send + Sync {
    /// Returns the current string value for `key`, or `None` if unset.
    fn read(&self, key: &str) -> Option<String>;
}

/// In-memory reference implementation, primarily for tests: an
/// `AHashMap` guarded by an `RwLock` so `set`/`read` can be called from
/// any thread without coordinating with the engine lock.
#[derive(Default)]
pub struct StaticConfigSource {
    values: RwLock<AHashMap<String, String>>,
}

impl StaticConfigSource {
    pub fn new() -> StaticConfigSource {
        StaticConfigSource {
            values: RwLock::new(AHashMap::new()),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn clear(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl DynamicConfigSource for StaticConfigSource {
    fn read(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// Applies a logger's bound `LogGate.Reduce`/`LogGate.Increase` keys on
/// top of its group-derived base config: `Reduce` narrows the admitted
/// mask, `Increase` widens it back (spec.md §6). An unparsable value is
/// treated the same as an absent one — the base config passes through
/// unchanged for that key.
pub(crate) fn apply_overrides(
    base: LoggerConfig,
    keys: &DynamicOverrideKeys,
    source: &dyn DynamicConfigSource,
) -> LoggerConfig {
    let mut mask = base.mask;
    if let Some(reduce) = source.read(&keys.reduce_key).and_then(|v| SeverityMask::parse(&v)) {
        mask = mask.without(reduce);
    }
    if let Some(increase) = source.read(&keys.increase_key).and_then(|v| SeverityMask::parse(&v)) {
        mask = mask.union(increase);
    }
    LoggerConfig {
        mask,
        supports_shared_refs: base.supports_shared_refs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_read_missing_key() {
        let source = StaticConfigSource::new();
        assert_eq!(source.read("nope"), None);
    }

    #[test]
    fn test_static_source_set_then_read() {
        let source = StaticConfigSource::new();
        source.set("Logging.Loggers.svc.LogGate.Reduce", "Trace,Debug");
        assert_eq!(
            source.read("Logging.Loggers.svc.LogGate.Reduce").as_deref(),
            Some("Trace,Debug")
        );
    }

    #[test]
    fn test_static_source_clear_removes_key() {
        let source = StaticConfigSource::new();
        source.set("k", "v");
        source.clear("k");
        assert_eq!(source.read("k"), None);
    }

    #[test]
    fn test_apply_overrides_reduce_narrows_mask() {
        let source = StaticConfigSource::new();
        let keys = DynamicOverrideKeys {
            reduce_key: "r".to_string(),
            increase_key: "i".to_string(),
        };
        source.set("r", "Trace,Debug");
        let base = LoggerConfig {
            mask: SeverityMask::ALL,
            supports_shared_refs: true,
        };
        let result = apply_overrides(base, &keys, &source);
        assert!(!result.mask.admits(crate::levels::Severity::Trace));
        assert!(result.mask.admits(crate::levels::Severity::Fatal));
    }

    #[test]
    fn test_apply_overrides_increase_widens_mask() {
        let source = StaticConfigSource::new();
        let keys = DynamicOverrideKeys {
            reduce_key: "r".to_string(),
            increase_key: "i".to_string(),
        };
        source.set("i", "Trace");
        let base = LoggerConfig {
            mask: SeverityMask::single(crate::levels::Severity::Fatal),
            supports_shared_refs: true,
        };
        let result = apply_overrides(base, &keys, &source);
        assert!(result.mask.admits(crate::levels::Severity::Trace));
        assert!(result.mask.admits(crate::levels::Severity::Fatal));
    }

    #[test]
    fn test_apply_overrides_unset_keys_leave_base_unchanged() {
        let source = StaticConfigSource::new();
        let keys = DynamicOverrideKeys {
            reduce_key: "r".to_string(),
            increase_key: "i".to_string(),
        };
        let base = LoggerConfig {
            mask: SeverityMask::single(crate::levels::Severity::Warning),
            supports_shared_refs: true,
        };
        let result = apply_overrides(base, &keys, &source);
        assert_eq!(result.mask, base.mask);
    }
}
