//! Severity levels and masks.
//!
//! A [`Severity`] is the level stamped on a single [`crate::message::Message`].
//! A [`SeverityMask`] is a set of admitted severities, used everywhere a gate
//! is checked: per-logger config, per-group active config, per-handler gate.

use std::fmt;

/// A single log record's severity, highest to lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Significant,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    const ALL: [Severity; 7] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Significant,
        Severity::Warning,
        Severity::Error,
        Severity::Fatal,
    ];

    fn bit(self) -> u8 {
        match self {
            Severity::Trace => 1 << 0,
            Severity::Debug => 1 << 1,
            Severity::Info => 1 << 2,
            Severity::Significant => 1 << 3,
            Severity::Warning => 1 << 4,
            Severity::Error => 1 << 5,
            Severity::Fatal => 1 << 6,
        }
    }

    /// Parse a single level name, case-insensitive, accepting loguru-style
    /// aliases the way the teacher's `utils::levels::to_level` does.
    pub fn parse(name: &str) -> Option<Severity> {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Severity::Trace),
            "debug" => Some(Severity::Debug),
            "info" => Some(Severity::Info),
            "significant" | "notice" => Some(Severity::Significant),
            "warning" | "warn" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "fatal" | "critical" => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Significant => "SIGNIFICANT",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// A set of admitted severities. Composable with `|` and `&`.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SeverityMask(u8);

impl SeverityMask {
    pub const NONE: SeverityMask = SeverityMask(0);
    pub const ALL: SeverityMask = SeverityMask(0x7F);

    pub fn single(level: Severity) -> SeverityMask {
        SeverityMask(level.bit())
    }

    /// "at-or-above" mask: e.g. `at_or_above(Warning)` admits Warning, Error, Fatal.
    pub fn at_or_above(level: Severity) -> SeverityMask {
        let mut mask = SeverityMask::NONE;
        for s in Severity::ALL {
            if s >= level {
                mask = mask.union(SeverityMask::single(s));
            }
        }
        mask
    }

    pub fn admits(self, level: Severity) -> bool {
        self.0 & level.bit() != 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: SeverityMask) -> SeverityMask {
        SeverityMask(self.0 | other.0)
    }

    pub fn intersect(self, other: SeverityMask) -> SeverityMask {
        SeverityMask(self.0 & other.0)
    }

    /// Removes every level in `other` from `self`. Used by the dynamic-
    /// config `LogGate.Reduce` override (spec.md §6).
    pub fn without(self, other: SeverityMask) -> SeverityMask {
        SeverityMask(self.0 & !other.0 & SeverityMask::ALL.0)
    }

    /// Parse a comma-separated list of level names, or the sentinels
    /// "All"/"None" (case-insensitive). Used for group mask strings and
    /// dynamic-override values (spec.md §6 `LogGate.Reduce`/`Increase`).
    pub fn parse(spec: &str) -> Option<SeverityMask> {
        let trimmed = spec.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Some(SeverityMask::ALL);
        }
        if trimmed.eq_ignore_ascii_case("none") || trimmed.is_empty() {
            return Some(SeverityMask::NONE);
        }
        let mut mask = SeverityMask::NONE;
        for part in trimmed.split(',') {
            let level = Severity::parse(part)?;
            mask = mask.union(SeverityMask::single(level));
        }
        Some(mask)
    }
}

impl std::ops::BitOr for SeverityMask {
    type Output = SeverityMask;
    fn bitor(self, rhs: SeverityMask) -> SeverityMask {
        self.union(rhs)
    }
}

impl std::ops::BitAnd for SeverityMask {
    type Output = SeverityMask;
    fn bitand(self, rhs: SeverityMask) -> SeverityMask {
        self.intersect(rhs)
    }
}

impl fmt::Debug for SeverityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "SeverityMask(None)");
        }
        if *self == SeverityMask::ALL {
            return write!(f, "SeverityMask(All)");
        }
        let names: Vec<&str> = Severity::ALL
            .iter()
            .filter(|s| self.admits(**s))
            .map(|s| match s {
                Severity::Trace => "Trace",
                Severity::Debug => "Debug",
                Severity::Info => "Info",
                Severity::Significant => "Significant",
                Severity::Warning => "Warning",
                Severity::Error => "Error",
                Severity::Fatal => "Fatal",
            })
            .collect();
        write!(f, "SeverityMask({})", names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_admits_single_level() {
        let mask = SeverityMask::single(Severity::Warning);
        assert!(mask.admits(Severity::Warning));
        assert!(!mask.admits(Severity::Info));
        assert!(!mask.admits(Severity::Error));
    }

    #[test]
    fn test_at_or_above() {
        let mask = SeverityMask::at_or_above(Severity::Warning);
        assert!(mask.admits(Severity::Warning));
        assert!(mask.admits(Severity::Error));
        assert!(mask.admits(Severity::Fatal));
        assert!(!mask.admits(Severity::Info));
        assert!(!mask.admits(Severity::Trace));
    }

    #[test]
    fn test_without_removes_given_levels() {
        let mask = SeverityMask::ALL.without(SeverityMask::single(Severity::Trace));
        assert!(!mask.admits(Severity::Trace));
        assert!(mask.admits(Severity::Debug));
    }

    #[test]
    fn test_union_and_intersect() {
        let a = SeverityMask::single(Severity::Info);
        let b = SeverityMask::single(Severity::Error);
        let both = a | b;
        assert!(both.admits(Severity::Info));
        assert!(both.admits(Severity::Error));
        assert!(!both.admits(Severity::Warning));

        let overlap = both & SeverityMask::single(Severity::Error);
        assert_eq!(overlap, SeverityMask::single(Severity::Error));
    }

    #[test]
    fn test_parse_sentinels() {
        assert_eq!(SeverityMask::parse("All"), Some(SeverityMask::ALL));
        assert_eq!(SeverityMask::parse("none"), Some(SeverityMask::NONE));
        assert_eq!(SeverityMask::parse(""), Some(SeverityMask::NONE));
    }

    #[test]
    fn test_parse_level_list() {
        let mask = SeverityMask::parse("Error,Fatal").unwrap();
        assert!(mask.admits(Severity::Error));
        assert!(mask.admits(Severity::Fatal));
        assert!(!mask.admits(Severity::Info));
    }

    #[test]
    fn test_parse_invalid_returns_none() {
        assert_eq!(SeverityMask::parse("Error,bogus"), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Error < Severity::Fatal);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_parse_aliases() {
        assert_eq!(Severity::parse("warn"), Some(Severity::Warning));
        assert_eq!(Severity::parse("CRITICAL"), Some(Severity::Fatal));
        assert_eq!(Severity::parse("bogus"), None);
    }
}
