//! Run events
//!
//! Key types:
//! - `Event`: envelope with id + timestamp + kind
//! - `EventKind`: started / progress / item failed / log / finished
//! - `EventLog`: thread-safe, append-only log
//! - `EventEmitter`: trait for dependency injection
//! - `ChannelEmitter`, `FanOutEmitter`: channel-backed delivery

mod emitter;
mod log;

pub use emitter::{ChannelEmitter, EventEmitter, FanOutEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog, RunStatus};
