//! Client side of the pipeline: consumes a stream over HTTP and releases its
//! chunks to the display at a steady pace.

mod consumer;
mod decoder;
mod events;
mod log;
mod session;

pub use consumer::{ClientError, ConsumerConfig, NetworkCondition, StreamConsumer, StreamHandle, StreamTarget};
pub use decoder::{Decoded, SseDecoder};
pub use events::{CancelReason, LifecycleEvent, Observers, Phase, StreamFailure, StreamId};
pub use log::{EventLog, LogCategory, LogEntry, LogKind, DEFAULT_LOG_CAPACITY};
pub use session::{BufferedChunk, StreamController, StreamOutcome};
