//! # logrelay — structured-logging distribution core
//!
//! `logrelay` is the routing core of a structured-logging pipeline: it maps
//! many concurrent producer threads ("loggers") onto a configurable set of
//! consumers ("handlers"), applying per-logger and per-group severity
//! gating, group linking, pooled reference-counted message allocation, and
//! an optional single-worker queued relay that insulates producers from
//! handler latency.
//!
//! ## Architecture
//!
//! The crate is organized into focused modules:
//! - `levels`: severity levels and masks (the gate vocabulary)
//! - `message`: the pooled, reference-counted log record
//! - `pool`: the bounded reusable message store
//! - `config`: published per-logger config snapshots and engine tuning knobs
//! - `registry`: logger and group intern tables, name-match group assignment
//! - `handler`: the `Handler` contract plus two reference implementations
//! - `distribute`: the synchronous direct-distribution path
//! - `queue`: the queued relay's bounded FIFO and state machine
//! - `dynamic`: the external dynamic-configuration collaborator contract
//! - `engine`: ties everything together behind one mutex; the lifecycle
//!   controller and process-wide singleton façade live here
//! - `error`: configuration-fault error type and the internal fault channel
//!
//! ## What this crate does not do
//!
//! Concrete production handlers (rotating file writers, trace sinks), line
//! formatting, and a real external dynamic-config source are external
//! collaborators. This crate defines their contracts and ships the minimal
//! reference implementations needed to exercise and test the engine on its
//! own: a console handler and an in-memory accumulating test handler.

mod config;
mod distribute;
mod dynamic;
mod engine;
mod error;
mod handler;
mod levels;
mod message;
mod pool;
mod queue;
mod registry;

pub use config::{EngineConfig, LoggerConfig};
pub use dynamic::{DynamicConfigSource, StaticConfigSource};
pub use engine::{engine, Engine};
pub use error::EngineError;
pub use handler::{ConsoleHandler, Handler, Notifier, RecordedMessage, TestHandler};
pub use levels::{Severity, SeverityMask};
pub use message::{Message, MessageRecord, SourceLocation};
pub use registry::group::{MatchKind, DEFAULT_GROUP_NAME};
pub use registry::logger::{LoggerId, LoggerSource, LOOKUP_GROUP_NAME};
