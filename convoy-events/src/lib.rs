//! CONVOY Events - Append-Only Log
//!
//! The event log is the single source of truth. Each project has its own
//! gap-free offset sequence starting at 1; offsets are assigned by the log
//! and nowhere else.

mod log;
mod lmdb;
mod memory;

pub use log::{EventLog, EventLogExt};
pub use lmdb::{LmdbEventLog, LmdbLogError};
pub use memory::InMemoryEventLog;
