//! Logger identity and per-logger registration state (spec.md §3, §4.2).

use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;

use crate::config::LoggerConfig;
use crate::registry::group::GroupId;

/// The sentinel group name meaning "let name-match rules decide" (spec.md
/// §4.3). Any other explicit name pins the logger to that group.
pub const LOOKUP_GROUP_NAME: &str = "LDG.Lookup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoggerId(usize);

impl LoggerId {
    pub fn new(id: usize) -> LoggerId {
        LoggerId(id)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// Dynamic-config keys this logger would poll if a [`crate::dynamic::DynamicConfigSource`]
/// is installed (spec.md §4.8).
pub(crate) struct DynamicOverrideKeys {
    pub reduce_key: String,
    pub increase_key: String,
}

/// The stable, shared handle a producer holds. Survives `set_group`/mask
/// changes: only the snapshot inside it is swapped.
pub struct LoggerSource {
    pub id: LoggerId,
    pub name: String,
    pub(crate) snapshot: ArcSwap<LoggerConfig>,
}

impl LoggerSource {
    /// Lock-free read used on the hot emit path (spec.md §4.2 step 1: "a
    /// gate check the producer can perform without taking any lock").
    pub fn gate(&self) -> LoggerConfig {
        **self.snapshot.load()
    }
}

pub(crate) struct LoggerEntry {
    pub source: Arc<LoggerSource>,
    pub group_id: GroupId,
    /// `None` means eligible for name-match remapping (the logger's
    /// explicit selection is the `LOOKUP_GROUP_NAME` sentinel). `Some(name)`
    /// pins the logger to that group name regardless of match rules.
    pub pinned_group_name: Option<String>,
    pub last_distributed_sequence: u64,
    /// The highest queue ticket this logger has enqueued, used by
    /// `wait_for_queued_delivery` to wait for its own FIFO backlog to
    /// clear before falling through to the direct-delivery wait.
    pub last_enqueued_ticket: u64,
    pub(crate) overrides: Option<DynamicOverrideKeys>,
    pub disabled: bool,
}

/// All known loggers, keyed by name (spec.md §4.2: "get_source is
/// idempotent by name").
pub struct LoggerRegistry {
    by_name: AHashMap<String, LoggerId>,
    entries: Vec<LoggerEntry>,
}

impl LoggerRegistry {
    pub fn new() -> LoggerRegistry {
        LoggerRegistry {
            by_name: AHashMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<LoggerId> {
        self.by_name.get(name).copied()
    }

    /// Creates a new, disabled-by-default entry pinned to `default_group`
    /// until the caller performs the initial name-match remap. Idempotent:
    /// returns the existing entry if `name` was already registered.
    pub fn get_or_create(
        &mut self,
        name: &str,
        default_group: GroupId,
        dynamic_enabled: bool,
    ) -> (LoggerId, Arc<LoggerSource>) {
        if let Some(&id) = self.by_name.get(name) {
            let entry = &self.entries[id.raw()];
            return (id, entry.source.clone());
        }
        let id = LoggerId::new(self.entries.len());
        let source = Arc::new(LoggerSource {
            id,
            name: name.to_string(),
            snapshot: ArcSwap::from_pointee(LoggerConfig::disabled()),
        });
        let overrides = if dynamic_enabled {
            Some(DynamicOverrideKeys {
                reduce_key: format!("Logging.Loggers.{name}.LogGate.Reduce"),
                increase_key: format!("Logging.Loggers.{name}.LogGate.Increase"),
            })
        } else {
            None
        };
        self.entries.push(LoggerEntry {
            source: source.clone(),
            group_id: default_group,
            pinned_group_name: None,
            last_distributed_sequence: 0,
            last_enqueued_ticket: 0,
            overrides,
            disabled: false,
        });
        self.by_name.insert(name.to_string(), id);
        (id, source)
    }

    pub fn entry(&self, id: LoggerId) -> &LoggerEntry {
        &self.entries[id.raw()]
    }

    pub fn entry_mut(&mut self, id: LoggerId) -> &mut LoggerEntry {
        &mut self.entries[id.raw()]
    }

    /// Assigns the logger's explicit group selection. `LOOKUP_GROUP_NAME`
    /// re-enables name-match remapping; any other value pins the group.
    pub fn set_pinned_name(&mut self, id: LoggerId, name: &str) {
        let entry = self.entry_mut(id);
        entry.pinned_group_name = if name == LOOKUP_GROUP_NAME {
            None
        } else {
            Some(name.to_string())
        };
    }

    pub fn publish(&self, id: LoggerId, config: LoggerConfig) {
        self.entries[id.raw()].source.snapshot.store(Arc::new(config));
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoggerEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LoggerEntry> {
        self.entries.iter_mut()
    }
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        LoggerRegistry::new()
    }
}
