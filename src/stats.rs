//! Statistics module for tracking server-wide stream counters.
//!
//! Sessions never share mutable state with each other; these atomic
//! counters are the only thing every session touches.

use crate::mode::StreamMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Relaxed ordering for stats - we don't need strict ordering guarantees
const ORDERING: Ordering = Ordering::Relaxed;

/// Which endpoint opened a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    /// `GET /api/stream/chat`
    Chat,
    /// `POST /api/suggestions`
    Suggestions,
}

/// How a stream session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Terminal done frame written
    Completed,
    /// Terminal error frame written
    Faulted,
    /// Client went away before a terminal frame
    Disconnected,
}

/// Server-wide counters
#[derive(Debug)]
pub struct Stats {
    start_time: Instant,

    /// Streams opened
    pub total_streams: AtomicU64,
    /// Streams currently emitting
    pub active_streams: AtomicU64,
    /// Streams opened through the chat endpoint
    pub chat_streams: AtomicU64,
    /// Streams opened through the suggestions endpoint
    pub suggestion_streams: AtomicU64,

    /// Requests that failed the up-front failure roll
    pub injected_failures: AtomicU64,
    /// Requests rejected before streaming (bad mode)
    pub rejected_requests: AtomicU64,

    /// Sessions that ended with a done frame
    pub completed_sessions: AtomicU64,
    /// Sessions that ended with an error frame
    pub faulted_sessions: AtomicU64,
    /// Sessions cut short by a client disconnect
    pub disconnected_sessions: AtomicU64,

    /// Data frames written across all sessions
    pub frames_written: AtomicU64,

    mode_streams: [AtomicU64; 5],

    total_duration_us: AtomicU64,
    ended_sessions: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

fn mode_slot(mode: StreamMode) -> usize {
    match mode {
        StreamMode::Normal => 0,
        StreamMode::Delay => 1,
        StreamMode::Missing => 2,
        StreamMode::Duplicate => 3,
        StreamMode::Error => 4,
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_streams: AtomicU64::new(0),
            active_streams: AtomicU64::new(0),
            chat_streams: AtomicU64::new(0),
            suggestion_streams: AtomicU64::new(0),
            injected_failures: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            completed_sessions: AtomicU64::new(0),
            faulted_sessions: AtomicU64::new(0),
            disconnected_sessions: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            mode_streams: Default::default(),
            total_duration_us: AtomicU64::new(0),
            ended_sessions: AtomicU64::new(0),
        }
    }

    /// Record a stream being opened
    pub fn record_stream_start(&self, mode: StreamMode, endpoint: EndpointType) {
        self.total_streams.fetch_add(1, ORDERING);
        self.active_streams.fetch_add(1, ORDERING);
        self.mode_streams[mode_slot(mode)].fetch_add(1, ORDERING);

        match endpoint {
            EndpointType::Chat => {
                self.chat_streams.fetch_add(1, ORDERING);
            }
            EndpointType::Suggestions => {
                self.suggestion_streams.fetch_add(1, ORDERING);
            }
        }
    }

    /// Record a data frame reaching the transport
    pub fn record_frame(&self) {
        self.frames_written.fetch_add(1, ORDERING);
    }

    /// Record the end of a stream session
    pub fn record_stream_end(&self, end: SessionEnd, duration: Duration) {
        self.active_streams.fetch_sub(1, ORDERING);
        self.ended_sessions.fetch_add(1, ORDERING);
        self.total_duration_us
            .fetch_add(duration.as_micros() as u64, ORDERING);

        let counter = match end {
            SessionEnd::Completed => &self.completed_sessions,
            SessionEnd::Faulted => &self.faulted_sessions,
            SessionEnd::Disconnected => &self.disconnected_sessions,
        };
        counter.fetch_add(1, ORDERING);
    }

    pub fn record_injected_failure(&self) {
        self.injected_failures.fetch_add(1, ORDERING);
    }

    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, ORDERING);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average session duration in milliseconds
    pub fn avg_session_ms(&self) -> f64 {
        let ended = self.ended_sessions.load(ORDERING);
        if ended == 0 {
            return 0.0;
        }
        let total_us = self.total_duration_us.load(ORDERING);
        (total_us as f64 / ended as f64) / 1000.0
    }

    /// Streams opened per mode
    pub fn mode_streams(&self) -> HashMap<StreamMode, u64> {
        StreamMode::ALL
            .iter()
            .map(|mode| (*mode, self.mode_streams[mode_slot(*mode)].load(ORDERING)))
            .collect()
    }

    /// Get a snapshot of all stats for serialization
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            total_streams: self.total_streams.load(ORDERING),
            active_streams: self.active_streams.load(ORDERING),
            chat_streams: self.chat_streams.load(ORDERING),
            suggestion_streams: self.suggestion_streams.load(ORDERING),
            injected_failures: self.injected_failures.load(ORDERING),
            rejected_requests: self.rejected_requests.load(ORDERING),
            completed_sessions: self.completed_sessions.load(ORDERING),
            faulted_sessions: self.faulted_sessions.load(ORDERING),
            disconnected_sessions: self.disconnected_sessions.load(ORDERING),
            frames_written: self.frames_written.load(ORDERING),
            avg_session_ms: self.avg_session_ms(),
            mode_streams: self.mode_streams(),
        }
    }
}

/// A serializable snapshot of statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub total_streams: u64,
    pub active_streams: u64,
    pub chat_streams: u64,
    pub suggestion_streams: u64,
    pub injected_failures: u64,
    pub rejected_requests: u64,
    pub completed_sessions: u64,
    pub faulted_sessions: u64,
    pub disconnected_sessions: u64,
    pub frames_written: u64,
    pub avg_session_ms: f64,
    pub mode_streams: HashMap<StreamMode, u64>,
}

/// Shared stats handle for use across sessions
pub type SharedStats = Arc<Stats>;

pub fn new_shared_stats() -> SharedStats {
    Arc::new(Stats::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_lifecycle_counters() {
        let stats = Stats::new();

        stats.record_stream_start(StreamMode::Normal, EndpointType::Chat);
        assert_eq!(stats.total_streams.load(ORDERING), 1);
        assert_eq!(stats.active_streams.load(ORDERING), 1);
        assert_eq!(stats.chat_streams.load(ORDERING), 1);

        stats.record_frame();
        stats.record_frame();
        stats.record_stream_end(SessionEnd::Completed, Duration::from_millis(10));

        assert_eq!(stats.active_streams.load(ORDERING), 0);
        assert_eq!(stats.completed_sessions.load(ORDERING), 1);
        assert_eq!(stats.frames_written.load(ORDERING), 2);
    }

    #[test]
    fn test_session_end_kinds() {
        let stats = Stats::new();
        for end in [
            SessionEnd::Completed,
            SessionEnd::Faulted,
            SessionEnd::Disconnected,
        ] {
            stats.record_stream_start(StreamMode::Error, EndpointType::Suggestions);
            stats.record_stream_end(end, Duration::ZERO);
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed_sessions, 1);
        assert_eq!(snapshot.faulted_sessions, 1);
        assert_eq!(snapshot.disconnected_sessions, 1);
        assert_eq!(snapshot.suggestion_streams, 3);
        assert_eq!(snapshot.mode_streams[&StreamMode::Error], 3);
    }

    #[test]
    fn test_avg_session_duration() {
        let stats = Stats::new();

        stats.record_stream_start(StreamMode::Normal, EndpointType::Chat);
        stats.record_stream_end(SessionEnd::Completed, Duration::from_millis(100));
        stats.record_stream_start(StreamMode::Normal, EndpointType::Chat);
        stats.record_stream_end(SessionEnd::Completed, Duration::from_millis(200));

        assert_eq!(stats.avg_session_ms(), 150.0);
    }

    #[test]
    fn test_failures_do_not_touch_active() {
        let stats = Stats::new();
        stats.record_injected_failure();
        stats.record_rejected();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.injected_failures, 1);
        assert_eq!(snapshot.rejected_requests, 1);
        assert_eq!(snapshot.active_streams, 0);
        assert_eq!(snapshot.total_streams, 0);
    }

    #[test]
    fn test_snapshot_serializes_modes_lowercase() {
        let stats = Stats::new();
        stats.record_stream_start(StreamMode::Duplicate, EndpointType::Chat);

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"duplicate\":1"));
        assert!(json.contains("\"total_streams\":1"));
    }
}
