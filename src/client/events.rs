//! Typed lifecycle events emitted by the stream consumer.
//!
//! Collaborators (bridge simulators, UI state, the CLI printer) call
//! [`Observers::subscribe`] and receive every event on their own channel.

use crate::mode::StreamMode;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Consumer-local stream identifier
pub type StreamId = u64;

/// State of one stream on the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    /// Terminal phases are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "IDLE",
            Phase::Connecting => "CONNECTING",
            Phase::Streaming => "STREAMING",
            Phase::Completed => "COMPLETED",
            Phase::Failed => "FAILED",
            Phase::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Why a stream failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFailure {
    /// The server refused the request (bad mode and the like)
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The server's failure roll hit before the stream opened
    #[error("server error ({status}): {message}")]
    Injected { status: u16, message: String },
    /// An error frame arrived mid-stream
    #[error("stream fault: {0}")]
    Stream(String),
    /// The connection failed or ended without a terminal frame
    #[error("transport fault: {0}")]
    Transport(String),
}

impl StreamFailure {
    /// Whether offering the user a retry makes sense
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamFailure::Injected { .. } | StreamFailure::Transport(_)
        )
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            StreamFailure::Rejected { status, message }
        } else {
            StreamFailure::Injected { status, message }
        }
    }
}

/// Why a stream was cancelled; never reported as a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `stop()` was called
    Caller,
    /// A new stream was started on the same consumer
    Superseded,
    /// The configured runtime cap expired
    Timeout,
}

/// Lifecycle signal delivered to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started {
        stream_id: StreamId,
        mode: StreamMode,
    },
    /// A chunk was released by the pacer and appended to the display text
    Chunk {
        stream_id: StreamId,
        index: usize,
        text: String,
    },
    Completed {
        stream_id: StreamId,
        text: String,
    },
    Failed {
        stream_id: StreamId,
        failure: StreamFailure,
    },
    Cancelled {
        stream_id: StreamId,
        reason: CancelReason,
    },
}

impl LifecycleEvent {
    pub fn stream_id(&self) -> StreamId {
        match self {
            LifecycleEvent::Started { stream_id, .. }
            | LifecycleEvent::Chunk { stream_id, .. }
            | LifecycleEvent::Completed { stream_id, .. }
            | LifecycleEvent::Failed { stream_id, .. }
            | LifecycleEvent::Cancelled { stream_id, .. } => *stream_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Completed { .. }
                | LifecycleEvent::Failed { .. }
                | LifecycleEvent::Cancelled { .. }
        )
    }
}

/// Subscriber registry shared by a consumer and its streams
#[derive(Debug, Clone, Default)]
pub struct Observers {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Deliver an event to every live subscriber, dropping closed ones
    pub fn emit(&self, event: LifecycleEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
