//! Durable event stream.
//!
//! Clients resume from a cursor, receive every later event exactly once in
//! offset order, and are isolated from each other by bounded drop-oldest
//! buffers.

pub mod buffer;
pub mod hub;
pub mod sink;
pub mod sse;

pub use buffer::{BackpressureSignal, BufferStats, ClientBuffer, EnqueueOutcome};
pub use hub::{ClientId, ClientStats, HubStats, StreamClient, StreamHub};
pub use sink::{EventSink, Frame, SseSink};
