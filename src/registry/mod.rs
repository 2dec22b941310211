//! Logger and group registries, plus the name-match remap orchestration
//! that sits between them (spec.md §4.3).

pub mod group;
pub mod logger;

use group::GroupRegistry;
use logger::{LoggerEntry, LoggerRegistry};

/// Resolves which group a logger belongs to right now. A pinned explicit
/// name always wins (created if it doesn't exist yet); otherwise the
/// first group whose match rule matches the logger's name claims it, and
/// a logger that matches nothing falls back to the default group
/// (spec.md §4.3, §4.4).
pub(crate) fn resolve_group_for_logger(
    groups: &mut GroupRegistry,
    logger_name: &str,
    entry: &LoggerEntry,
) -> group::GroupId {
    if let Some(pinned) = &entry.pinned_group_name {
        return groups.get_or_create(pinned);
    }
    groups
        .match_group_for(logger_name)
        .unwrap_or(group::DEFAULT_GROUP_ID)
}

/// Owns both registries together so the engine can resolve a logger's
/// group and recompute its published config in one place.
pub struct Registries {
    pub loggers: LoggerRegistry,
    pub groups: GroupRegistry,
}

impl Registries {
    pub fn new() -> Registries {
        Registries {
            loggers: LoggerRegistry::new(),
            groups: GroupRegistry::new(),
        }
    }

    /// Re-derives `logger_id`'s group (honoring pin vs. match-rule
    /// eligibility) and returns the resulting base `LoggerConfig` — the
    /// group's active config, or `LoggerConfig::disabled()` if the logger
    /// itself is disabled. Does not publish; callers that also apply
    /// dynamic-config overrides (spec.md §4.8) publish the final value
    /// themselves via `Registries::loggers.publish`.
    pub fn resolve_base_config(&mut self, id: logger::LoggerId) -> crate::config::LoggerConfig {
        let name = self.loggers.entry(id).source.name.clone();
        let group_id = {
            let entry = self.loggers.entry(id);
            resolve_group_for_logger(&mut self.groups, &name, entry)
        };
        self.loggers.entry_mut(id).group_id = group_id;
        let disabled = self.loggers.entry(id).disabled;
        if disabled {
            crate::config::LoggerConfig::disabled()
        } else {
            self.groups.get_mut(group_id).active_config()
        }
    }

    /// Re-derives `logger_id`'s group and republishes its `LoggerConfig`
    /// snapshot directly from the base config, with no dynamic-config
    /// overrides applied. Used when the engine has no dynamic source
    /// installed.
    pub fn recompute_logger(&mut self, id: logger::LoggerId) {
        let config = self.resolve_base_config(id);
        self.loggers.publish(id, config);
    }

    /// Recomputes every registered logger. Used after a structural change
    /// whose blast radius isn't confined to one logger (e.g. linking two
    /// groups, or a dynamic-config refresh sweep).
    pub fn recompute_all(&mut self) {
        let ids: Vec<logger::LoggerId> = self.loggers.iter().map(|e| e.source.id).collect();
        for id in ids {
            self.recompute_logger(id);
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Registries::new()
    }
}
