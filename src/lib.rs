//! # faultstream - Fault-Injecting SSE Streaming
//!
//! A mock streaming server that delivers text as Server-Sent Events under
//! controlled fault scenarios, and a client that consumes those streams and
//! presents them at a steady pace.
//!
//! ## Features
//!
//! - Five fault modes: `normal`, `delay`, `missing`, `duplicate`, `error`
//! - Probabilistic whole-request failure with an optional fixed seed
//! - Client playback buffer with duplicate suppression
//! - Ordered, idempotent cancellation of in-flight streams
//! - Typed lifecycle events and a bounded client event log
//!
//! ## Usage
//!
//! ### As a CLI
//!
//! ```bash
//! # Start the server
//! faultstream serve --port 8080
//!
//! # Watch a stream in the terminal
//! faultstream watch --mode duplicate --message "Hello there"
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use faultstream::{
//!     client::{ConsumerConfig, StreamConsumer, StreamTarget},
//!     StreamMode,
//! };
//!
//! # async fn run() -> Result<(), faultstream::client::ClientError> {
//! let consumer = StreamConsumer::new(ConsumerConfig::new("http://127.0.0.1:8080"))?;
//! let handle = consumer.start(StreamTarget::chat("Hello!", StreamMode::Missing));
//! let outcome = handle.wait().await;
//! println!("{}: {}", outcome.phase, outcome.text);
//! # Ok(())
//! # }
//! ```

// Server-side pipeline
pub mod answers;
pub mod dispatcher;
pub mod frame;
pub mod mode;
pub mod pacing;
pub mod segment;
pub mod stats;
pub mod transport;

// Stream consumer
pub mod client;

// CLI module (for `faultstream serve` command)
pub mod cli;

// Re-export commonly used types
pub use answers::{AnswerBook, AnswerEntry, Suggestion, DEFAULT_ANSWER};
pub use dispatcher::{plan_frames, FailureInjector, InjectedFailure, SessionOutcome, StreamSession};
pub use frame::{Frame, FrameError};
pub use mode::{parse_mode, StreamMode, UnknownMode};
pub use pacing::{PacerConfig, WritePacing};
pub use segment::{segment, DEFAULT_CHUNK_SIZE};
pub use stats::{new_shared_stats, EndpointType, SharedStats, Stats, StatsSnapshot};
pub use transport::{sse_channel, sse_response, SseWriter, TransportClosed};
