//! Progress event types and sinks.

pub mod sink;
pub mod types;

pub use sink::{BufferSink, ChannelSink, NullSink, ProgressSink};
pub use types::ProgressEvent;
