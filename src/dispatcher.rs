// Fault-Injection Dispatcher Module
// Turns fragments and a mode into the frame sequence written to a client,
// and decides up front whether a request fails outright.

use crate::frame::{Frame, CONNECTION_LOST};
use crate::mode::StreamMode;
use crate::pacing::WritePacing;
use crate::stats::{SessionEnd, SharedStats};
use crate::transport::SseWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Instant;

/// Fragment indices `missing` mode never sends
pub const MISSING_INDICES: [usize; 2] = [2, 4];

/// Fragment index `duplicate` mode sends twice
pub const DUPLICATED_INDEX: usize = 1;

/// Body fields of an injected failure response
pub const INJECTED_ERROR: &str = "Internal Server Error";
pub const INJECTED_MESSAGE: &str = "네트워크 오류가 발생했습니다";

/// The whole-request failure chosen before any stream bytes are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFailure {
    pub error: String,
    pub message: String,
}

impl Default for InjectedFailure {
    fn default() -> Self {
        Self {
            error: INJECTED_ERROR.to_string(),
            message: INJECTED_MESSAGE.to_string(),
        }
    }
}

/// Rolls the whole-request failure.
///
/// Unseeded injectors use the thread RNG; seeded ones share one `StdRng`
/// so a run with a fixed seed replays the same sequence of outcomes.
#[derive(Debug)]
pub struct FailureInjector {
    rate: f64,
    rng: Option<Mutex<StdRng>>,
}

impl FailureInjector {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            rng: None,
        }
    }

    pub fn with_seed(rate: f64, seed: u64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Never fails
    pub fn disabled() -> Self {
        Self::new(0.0)
    }

    /// Always fails
    pub fn always() -> Self {
        Self::new(1.0)
    }

    /// Returns the failure to send instead of a stream, if the roll hits
    pub fn maybe_inject(&self) -> Option<InjectedFailure> {
        if self.rate <= 0.0 {
            return None;
        }

        let roll: f64 = match &self.rng {
            Some(rng) => match rng.lock() {
                Ok(mut rng) => rng.random(),
                Err(poisoned) => poisoned.into_inner().random(),
            },
            None => rand::rng().random(),
        };

        (roll < self.rate).then(InjectedFailure::default)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_enabled(&self) -> bool {
        self.rate > 0.0
    }
}

impl Default for FailureInjector {
    fn default() -> Self {
        Self::disabled()
    }
}

/// The frames a mode emits for `fragments`, in wire order.
///
/// Every plan ends in exactly one terminal frame: `Done` or, in `error`
/// mode, `Error`.
pub fn plan_frames(fragments: &[String], mode: StreamMode) -> Vec<Frame> {
    let n = fragments.len();
    let mut frames = Vec::with_capacity(n + 2);

    match mode {
        StreamMode::Normal | StreamMode::Delay => {
            frames.extend(
                fragments
                    .iter()
                    .enumerate()
                    .map(|(i, text)| Frame::chunk(text.clone(), i)),
            );
        }
        StreamMode::Missing => {
            frames.extend(
                fragments
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !MISSING_INDICES.contains(i))
                    .map(|(i, text)| Frame::chunk(text.clone(), i)),
            );
        }
        StreamMode::Duplicate => {
            for (i, text) in fragments.iter().enumerate() {
                frames.push(Frame::chunk(text.clone(), i));
                if i == DUPLICATED_INDEX {
                    frames.push(Frame::duplicate(text.clone(), i));
                }
            }
        }
        StreamMode::Error => {
            let cut = n / 2;
            frames.extend(
                fragments[..cut]
                    .iter()
                    .enumerate()
                    .map(|(i, text)| Frame::chunk(text.clone(), i)),
            );
            frames.push(Frame::error(CONNECTION_LOST));
            return frames;
        }
    }

    frames.push(Frame::Done);
    frames
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `done` written
    Completed,
    /// `error` written
    Faulted,
    /// Client went away; `cursor` frames had been written
    Disconnected { cursor: usize },
}

impl From<SessionOutcome> for SessionEnd {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Completed => SessionEnd::Completed,
            SessionOutcome::Faulted => SessionEnd::Faulted,
            SessionOutcome::Disconnected { .. } => SessionEnd::Disconnected,
        }
    }
}

/// Server-side emission state for one request
pub struct StreamSession {
    /// Session ID used in logs
    id: String,
    /// The segmented answer
    fragments: Vec<String>,
    /// Fault scenario
    mode: StreamMode,
    /// Index of the next frame of the plan to write
    cursor: usize,
    /// Nominal write delays
    pacing: WritePacing,
    /// Write the keep-alive comments before the first frame
    preamble: bool,
    /// Server-wide counters
    stats: Option<SharedStats>,
}

impl StreamSession {
    pub fn new(fragments: Vec<String>, mode: StreamMode) -> Self {
        Self {
            id: format!("sse-{}", uuid::Uuid::new_v4()),
            fragments,
            mode,
            cursor: 0,
            pacing: WritePacing::default(),
            preamble: true,
            stats: None,
        }
    }

    pub fn with_pacing(mut self, pacing: WritePacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_preamble(mut self, preamble: bool) -> Self {
        self.preamble = preamble;
        self
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// The frames this session will write
    pub fn plan(&self) -> Vec<Frame> {
        plan_frames(&self.fragments, self.mode)
    }

    /// Write the plan to `writer`, stopping quietly if the client leaves
    pub async fn run(mut self, writer: SseWriter) -> SessionOutcome {
        let started = Instant::now();
        let plan = self.plan();

        tracing::debug!(
            session_id = %self.id,
            mode = %self.mode,
            fragments = self.fragments.len(),
            frames = plan.len(),
            "Stream session started"
        );

        let outcome = self.emit(&writer, &plan).await;

        match outcome {
            SessionOutcome::Disconnected { cursor } => {
                tracing::info!(
                    session_id = %self.id,
                    cursor,
                    total = plan.len(),
                    "Client disconnected, stopping stream"
                );
            }
            _ => {
                tracing::info!(
                    session_id = %self.id,
                    mode = %self.mode,
                    outcome = ?outcome,
                    frames = self.cursor,
                    "Stream session ended"
                );
            }
        }

        if let Some(stats) = &self.stats {
            stats.record_stream_end(outcome.into(), started.elapsed());
        }

        outcome
    }

    async fn emit(&mut self, writer: &SseWriter, plan: &[Frame]) -> SessionOutcome {
        if self.preamble && writer.send_preamble().await.is_err() {
            return SessionOutcome::Disconnected { cursor: 0 };
        }

        while let Some(frame) = plan.get(self.cursor) {
            if !writer.is_writable() {
                return SessionOutcome::Disconnected {
                    cursor: self.cursor,
                };
            }

            if matches!(frame, Frame::Chunk { duplicate: true, .. }) {
                let gap = self.pacing.duplicate_gap();
                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
            }

            if writer.send_frame(frame).await.is_err() {
                return SessionOutcome::Disconnected {
                    cursor: self.cursor,
                };
            }
            self.cursor += 1;
            if let Some(stats) = &self.stats {
                stats.record_frame();
            }

            match frame {
                Frame::Done => return SessionOutcome::Completed,
                Frame::Error(_) => return SessionOutcome::Faulted,
                Frame::Chunk { .. } => {
                    let interval = self.pacing.sample_interval();
                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        }

        // Every plan ends in a terminal frame, so this is only reached for
        // a plan that was empty to begin with.
        SessionOutcome::Completed
    }
}
