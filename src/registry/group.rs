//! Group identity, name-match rules, linking, and effective-config
//! recomputation (spec.md §3, §4.4).

use std::sync::Arc;

use ahash::AHashMap;
use regex::Regex;

use crate::config::LoggerConfig;
use crate::error::EngineError;
use crate::handler::Handler;
use crate::levels::SeverityMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

impl GroupId {
    pub fn new(id: usize) -> GroupId {
        GroupId(id)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

pub const DEFAULT_GROUP_ID: GroupId = GroupId(0);
pub const DEFAULT_GROUP_NAME: &str = "LDG.Default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    None,
    Prefix,
    Suffix,
    Contains,
    Regex,
}

pub struct MatchRule {
    pub kind: MatchKind,
    pub pattern: String,
    regex: Option<Regex>,
}

impl MatchRule {
    pub fn none() -> MatchRule {
        MatchRule {
            kind: MatchKind::None,
            pattern: String::new(),
            regex: None,
        }
    }

    pub fn matches(&self, logger_name: &str) -> bool {
        match self.kind {
            MatchKind::None => false,
            MatchKind::Prefix => logger_name.starts_with(&self.pattern),
            MatchKind::Suffix => logger_name.ends_with(&self.pattern),
            MatchKind::Contains => logger_name.contains(&self.pattern),
            MatchKind::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(logger_name)),
        }
    }
}

/// A named routing destination: its own severity mask, the handlers it
/// delivers to directly, and the set of groups (including itself) whose
/// handlers it fans out to.
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub mask: SeverityMask,
    pub handlers: Vec<Arc<dyn Handler>>,
    pub match_rule: MatchRule,
    /// Transitive closure computed at link time (spec.md §4.4, §9): always
    /// contains at least `id` itself.
    pub links: Vec<GroupId>,
    pub disabled: bool,
    version: u64,
    cached_version: u64,
    cached_active: LoggerConfig,
}

impl Group {
    fn new(id: GroupId, name: String) -> Group {
        Group {
            id,
            name,
            mask: SeverityMask::NONE,
            handlers: Vec::new(),
            match_rule: MatchRule::none(),
            links: vec![id],
            disabled: false,
            version: 0,
            cached_version: u64::MAX,
            cached_active: LoggerConfig::disabled(),
        }
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Recomputes (if stale) and returns the group's effective config: the
    /// OR of every direct handler's gate, AND-reduced with the group's own
    /// mask; `supports_shared_refs` is true only if every direct handler
    /// supports it (spec.md §4.4: "a single non-supporting handler forces
    /// the whole group to clone before delivery").
    pub fn active_config(&mut self) -> LoggerConfig {
        if self.disabled {
            return LoggerConfig::disabled();
        }
        if self.cached_version != self.version {
            let mut mask_or = SeverityMask::NONE;
            let mut all_support_shared = true;
            for handler in &self.handlers {
                mask_or = mask_or.union(handler.gate());
                if !handler.supports_shared_refs() {
                    all_support_shared = false;
                }
            }
            self.cached_active = LoggerConfig {
                mask: mask_or.intersect(self.mask),
                supports_shared_refs: all_support_shared,
            };
            self.cached_version = self.version;
        }
        self.cached_active
    }
}

/// All known groups, keyed by name. Group 0 is always the pre-created
/// default group (spec.md §4.4: "the default group always exists, has id
/// 0, and cannot be deleted").
pub struct GroupRegistry {
    by_name: AHashMap<String, GroupId>,
    groups: Vec<Group>,
}

impl GroupRegistry {
    pub fn new() -> GroupRegistry {
        let mut by_name = AHashMap::new();
        by_name.insert(DEFAULT_GROUP_NAME.to_string(), DEFAULT_GROUP_ID);
        GroupRegistry {
            by_name,
            groups: vec![Group::new(DEFAULT_GROUP_ID, DEFAULT_GROUP_NAME.to_string())],
        }
    }

    pub fn by_name(&self, name: &str) -> Option<GroupId> {
        self.by_name.get(name).copied()
    }

    /// Idempotent creation: returns the existing id if `name` is already
    /// registered.
    pub fn get_or_create(&mut self, name: &str) -> GroupId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = GroupId::new(self.groups.len());
        self.groups.push(Group::new(id, name.to_string()));
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, id: GroupId) -> &Group {
        &self.groups[id.raw()]
    }

    pub fn get_mut(&mut self, id: GroupId) -> &mut Group {
        &mut self.groups[id.raw()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn set_mask(&mut self, id: GroupId, mask: SeverityMask) {
        let group = self.get_mut(id);
        group.mask = mask;
        group.bump_version();
    }

    pub fn set_disabled(&mut self, id: GroupId, disabled: bool) {
        let group = self.get_mut(id);
        group.disabled = disabled;
        group.bump_version();
    }

    /// Compiles and installs a match rule. On a bad regex, the group's rule
    /// is forced to `None` (never matches) and the compile error is
    /// returned for the caller to route to the fault channel (spec.md §4.4,
    /// §8: "group is still created/kept, with match kind forced to None").
    pub fn set_match_rule(
        &mut self,
        id: GroupId,
        kind: MatchKind,
        pattern: &str,
    ) -> Result<(), EngineError> {
        if kind == MatchKind::Regex {
            match Regex::new(pattern) {
                Ok(re) => {
                    self.get_mut(id).match_rule = MatchRule {
                        kind,
                        pattern: pattern.to_string(),
                        regex: Some(re),
                    };
                    Ok(())
                }
                Err(e) => {
                    self.get_mut(id).match_rule = MatchRule::none();
                    Err(EngineError::InvalidRegex {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        } else {
            self.get_mut(id).match_rule = MatchRule {
                kind,
                pattern: pattern.to_string(),
                regex: None,
            };
            Ok(())
        }
    }

    pub fn add_handler(&mut self, id: GroupId, handler: Arc<dyn Handler>) {
        let group = self.get_mut(id);
        group.handlers.push(handler);
        group.bump_version();
    }

    /// Links `from` to every group currently reachable from `to` (`to`
    /// included), taking `to`'s link list as it stands *now* — later
    /// changes to `to`'s links are not retroactively reflected (spec.md
    /// §4.4, §9: "transitive closure computed at link time"). Idempotent;
    /// cycles are safe because a link already present is never re-added.
    pub fn link(&mut self, from: GroupId, to: GroupId) {
        let to_links = self.get(to).links.clone();
        let from_group = self.get_mut(from);
        for candidate in to_links {
            if !from_group.links.contains(&candidate) {
                from_group.links.push(candidate);
            }
        }
    }

    /// Convenience for the common "route this group's output into the
    /// default group as well" wiring (spec.md §6 `link_to_default`).
    pub fn link_to_default(&mut self, from: GroupId) {
        self.link(from, DEFAULT_GROUP_ID);
    }

    /// Scans groups in creation order and returns the first whose match
    /// rule matches `logger_name`. The default group's rule is always
    /// `MatchKind::None`, so it is only ever chosen as the caller's
    /// fallback, never via this scan (spec.md §4.3: "first matching group
    /// in creation order claims the logger").
    pub fn match_group_for(&self, logger_name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|g| g.match_rule.matches(logger_name))
            .map(|g| g.id)
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        GroupRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TestHandler;

    #[test]
    fn test_default_group_preexists_with_id_zero() {
        let registry = GroupRegistry::new();
        assert_eq!(registry.by_name(DEFAULT_GROUP_NAME), Some(DEFAULT_GROUP_ID));
        assert_eq!(DEFAULT_GROUP_ID.raw(), 0);
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut registry = GroupRegistry::new();
        let a = registry.get_or_create("SVC");
        let b = registry.get_or_create("SVC");
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_regex_forces_none_and_reports_error() {
        let mut registry = GroupRegistry::new();
        let id = registry.get_or_create("SVC");
        let result = registry.set_match_rule(id, MatchKind::Regex, "(unclosed");
        assert!(result.is_err());
        assert_eq!(registry.get(id).match_rule.kind, MatchKind::None);
    }

    #[test]
    fn test_active_config_ors_handler_gates_and_ands_group_mask() {
        let mut registry = GroupRegistry::new();
        let id = registry.get_or_create("SVC");
        registry.set_mask(id, SeverityMask::at_or_above(crate::levels::Severity::Warning));
        registry.add_handler(id, Arc::new(TestHandler::new("h1", SeverityMask::single(crate::levels::Severity::Trace))));
        registry.add_handler(id, Arc::new(TestHandler::new("h2", SeverityMask::single(crate::levels::Severity::Error))));
        let active = registry.get_mut(id).active_config();
        // OR of {Trace} and {Error} = {Trace, Error}; AND with >=Warning -> {Error} only.
        assert!(active.mask.admits(crate::levels::Severity::Error));
        assert!(!active.mask.admits(crate::levels::Severity::Trace));
    }

    #[test]
    fn test_active_config_false_if_any_handler_lacks_shared_refs() {
        let mut registry = GroupRegistry::new();
        let id = registry.get_or_create("SVC");
        registry.set_mask(id, SeverityMask::ALL);
        registry.add_handler(id, Arc::new(TestHandler::new("h1", SeverityMask::ALL)));
        registry.add_handler(id, Arc::new(TestHandler::new("h2", SeverityMask::ALL).without_shared_refs()));
        assert!(!registry.get_mut(id).active_config().supports_shared_refs);
    }

    #[test]
    fn test_link_builds_transitive_closure_at_link_time() {
        let mut registry = GroupRegistry::new();
        let a = registry.get_or_create("A");
        let b = registry.get_or_create("B");
        let c = registry.get_or_create("C");
        registry.link(b, c);
        registry.link(a, b);
        assert!(registry.get(a).links.contains(&a));
        assert!(registry.get(a).links.contains(&b));
        assert!(registry.get(a).links.contains(&c));
    }

    #[test]
    fn test_link_is_idempotent_and_cycle_safe() {
        let mut registry = GroupRegistry::new();
        let a = registry.get_or_create("A");
        let b = registry.get_or_create("B");
        registry.link(a, b);
        registry.link(a, b);
        registry.link(b, a);
        assert_eq!(registry.get(a).links.len(), 2);
        assert!(registry.get(b).links.contains(&a));
    }

    #[test]
    fn test_match_group_for_scans_in_creation_order() {
        let mut registry = GroupRegistry::new();
        let first = registry.get_or_create("First");
        let second = registry.get_or_create("Second");
        registry.set_match_rule(first, MatchKind::Contains, "svc").unwrap();
        registry.set_match_rule(second, MatchKind::Contains, "svc").unwrap();
        assert_eq!(registry.match_group_for("svc.worker"), Some(first));
    }

    #[test]
    fn test_match_group_for_returns_none_when_nothing_matches() {
        let registry = GroupRegistry::new();
        assert_eq!(registry.match_group_for("anything"), None);
    }
}
