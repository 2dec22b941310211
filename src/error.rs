//! Error types for configuration faults.
//!
//! Per spec, configuration faults (unknown group, invalid regex, setup after
//! shutdown) are reported through the internal fault channel and the calling
//! operation becomes a no-op — callers on the hot emit path never see a
//! `Result`. `EngineError` exists for the operations that *do* report
//! synchronously (the registration/configuration surface), following the
//! teacher's `utils::error::LoglyError` in spirit (manual `Display`, no
//! external error-derive crate) minus the PyO3 exception conversions, which
//! have no counterpart in a pure Rust core.

use std::fmt;

/// Errors surfaced by the engine's registration and configuration surface.
#[derive(Debug)]
pub enum EngineError {
    /// `set_group`/`add_handler`/etc. referenced a group name that does not
    /// exist and the operation does not implicitly create one.
    UnknownGroup(String),
    /// A match-rule regex failed to compile. The group is still created,
    /// with match kind forced to `None` (spec.md §4.4, §8).
    InvalidRegex { pattern: String, message: String },
    /// A setup call (`add_handler`, `map_loggers_to_group`, ...) was made
    /// after `shutdown()` completed.
    SetupAfterShutdown(&'static str),
    /// A handler's call panicked or returned an error internally. Always
    /// confined to the fault channel — never propagated to the producer
    /// that triggered the distribution (spec.md §7).
    HandlerFailure { handler: String, message: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownGroup(name) => {
                write!(f, "unknown group: '{}'", name)
            }
            EngineError::InvalidRegex { pattern, message } => {
                write!(f, "invalid match regex '{}': {}", pattern, message)
            }
            EngineError::SetupAfterShutdown(op) => {
                write!(f, "setup operation '{}' attempted after shutdown", op)
            }
            EngineError::HandlerFailure { handler, message } => {
                write!(f, "handler '{}' failed: {}", handler, message)
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// The "last-resort" emitter named in spec.md §7: faults are never routed
/// back through the distribution path itself (that would risk recursion
/// into the very pipeline that's failing). Instead they go straight to
/// `tracing` under a target distinct from user messages.
pub fn report_fault(err: &EngineError) {
    tracing::warn!(target: "logrelay::fault", "{}", err);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unknown_group() {
        let err = EngineError::UnknownGroup("SVC".to_string());
        assert_eq!(err.to_string(), "unknown group: 'SVC'");
    }

    #[test]
    fn test_display_invalid_regex() {
        let err = EngineError::InvalidRegex {
            pattern: "(".to_string(),
            message: "unclosed group".to_string(),
        };
        assert!(err.to_string().contains("invalid match regex"));
        assert!(err.to_string().contains("unclosed group"));
    }

    #[test]
    fn test_display_handler_failure() {
        let err = EngineError::HandlerFailure {
            handler: "console".to_string(),
            message: "disk full".to_string(),
        };
        assert!(err.to_string().contains("console"));
        assert!(err.to_string().contains("disk full"));
    }
}
