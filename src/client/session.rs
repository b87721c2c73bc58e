//! Per-stream client state: playback buffer, pacer and cancellation.
//!
//! A [`StreamController`] is created for every stream a consumer starts. The
//! network read loop and the pacer run as two separate tasks; both go through
//! the controller, and every mutation happens under one lock together with
//! the cancellation check. Once the stream reaches a terminal phase the
//! cancellation token is set and nothing can append to the display text,
//! touch the buffer or re-arm the pacer again, even if a task that was
//! already running wakes up afterwards.

use super::events::{
    CancelReason, LifecycleEvent, Observers, Phase, StreamFailure, StreamId,
};
use super::log::{EventLog, LogCategory, LogKind};
use crate::mode::StreamMode;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A chunk that arrived but has not been displayed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedChunk {
    pub chunk: String,
    pub index: usize,
    pub duplicate: bool,
}

/// Mutable state of one stream
#[derive(Debug)]
struct ClientStreamState {
    phase: Phase,
    displayed: String,
    /// Chunk values already displayed
    shown: HashSet<String>,
    queue: VecDeque<BufferedChunk>,
    pacer_running: bool,
    /// `done` was received; complete once the queue drains
    network_done: bool,
    failure: Option<StreamFailure>,
}

impl ClientStreamState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            displayed: String::new(),
            shown: HashSet::new(),
            queue: VecDeque::new(),
            pacer_running: false,
            network_done: false,
            failure: None,
        }
    }
}

/// Final state of a stream as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub phase: Phase,
    pub text: String,
    pub failure: Option<StreamFailure>,
}

/// Lifecycle controller for a single stream
pub struct StreamController {
    id: StreamId,
    mode: StreamMode,
    interval: Duration,
    token: CancellationToken,
    state: Mutex<ClientStreamState>,
    observers: Observers,
    log: Arc<Mutex<EventLog>>,
    phase_tx: watch::Sender<Phase>,
    reader: Mutex<Option<AbortHandle>>,
    pacer: Mutex<Option<AbortHandle>>,
}

impl StreamController {
    pub fn new(
        id: StreamId,
        mode: StreamMode,
        interval: Duration,
        observers: Observers,
        log: Arc<Mutex<EventLog>>,
    ) -> Arc<Self> {
        let (phase_tx, _) = watch::channel(Phase::Idle);
        Arc::new(Self {
            id,
            mode,
            interval,
            token: CancellationToken::new(),
            state: Mutex::new(ClientStreamState::new()),
            observers,
            log,
            phase_tx,
            reader: Mutex::new(None),
            pacer: Mutex::new(None),
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// The token every suspend point of this stream selects on
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn displayed_text(&self) -> String {
        lock(&self.state).displayed.clone()
    }

    /// Chunks received but not yet released by the pacer
    pub fn buffered(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_pacing(&self) -> bool {
        lock(&self.state).pacer_running
    }

    /// Remember the read task so cancellation can abort it
    pub fn attach_reader(&self, handle: AbortHandle) {
        if self.token.is_cancelled() {
            handle.abort();
            return;
        }
        *lock(&self.reader) = Some(handle);
    }

    /// `IDLE → CONNECTING`
    pub fn begin(&self) {
        let mut state = lock(&self.state);
        if state.phase != Phase::Idle {
            return;
        }
        self.set_phase(&mut state, Phase::Connecting);
        self.observers.emit(LifecycleEvent::Started {
            stream_id: self.id,
            mode: self.mode,
        });
    }

    /// `CONNECTING → STREAMING` on the first bytes
    pub fn mark_streaming(&self) {
        let mut state = lock(&self.state);
        if state.phase == Phase::Connecting && !self.token.is_cancelled() {
            self.set_phase(&mut state, Phase::Streaming);
        }
    }

    /// Buffer an arrived chunk; returns whether it was accepted
    pub fn enqueue(self: &Arc<Self>, chunk: String, index: usize, duplicate: bool) -> bool {
        let mut state = lock(&self.state);
        if self.token.is_cancelled() || state.phase.is_terminal() {
            return false;
        }

        if duplicate && state.shown.contains(&chunk) {
            tracing::debug!(stream_id = self.id, index, "Discarding duplicate chunk");
            self.note(
                LogKind::Event,
                LogCategory::Sse,
                "duplicate chunk discarded",
                json!({ "index": index, "chunk": chunk }),
            );
            return false;
        }

        state.queue.push_back(BufferedChunk {
            chunk,
            index,
            duplicate,
        });

        if !state.pacer_running {
            state.pacer_running = true;
            let handle = self.spawn_pacer();
            *lock(&self.pacer) = Some(handle);
        }
        true
    }

    /// `done` received: the network leg is over, presentation may not be
    pub fn finish_network(&self) {
        let mut state = lock(&self.state);
        if state.phase.is_terminal() {
            return;
        }
        state.network_done = true;
        self.note(
            LogKind::Event,
            LogCategory::Sse,
            "stream done received",
            json!({ "buffered": state.queue.len() }),
        );
        if state.queue.is_empty() && !state.pacer_running {
            self.complete(&mut state);
        }
    }

    /// Report a malformed frame; the stream carries on
    pub fn record_malformed(&self, payload: &str, error: &str) {
        tracing::warn!(stream_id = self.id, error, "Skipping malformed frame");
        self.note(
            LogKind::Event,
            LogCategory::Sse,
            "malformed frame skipped",
            json!({ "payload": payload, "error": error }),
        );
    }

    /// Move to FAILED, dropping undisplayed chunks. Only the first call for
    /// a stream has any effect.
    pub fn fail(&self, failure: StreamFailure) -> bool {
        let mut state = lock(&self.state);
        if state.phase.is_terminal() {
            return false;
        }

        self.token.cancel();
        self.stop_pacer();
        let dropped = state.queue.len();
        state.queue.clear();
        state.failure = Some(failure.clone());

        tracing::warn!(stream_id = self.id, %failure, dropped, "Stream failed");
        self.note(
            LogKind::Event,
            LogCategory::Sse,
            "stream failed",
            json!({ "error": failure.to_string(), "dropped": dropped }),
        );
        self.set_phase(&mut state, Phase::Failed);
        self.observers.emit(LifecycleEvent::Failed {
            stream_id: self.id,
            failure,
        });
        true
    }

    /// Stop the stream: flag first, then the read, the pacer, the buffer,
    /// and finally freeze the text. Returns `false` if it was already over.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut state = lock(&self.state);
        if state.phase.is_terminal() {
            return false;
        }

        self.token.cancel();
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        self.stop_pacer();
        let dropped = state.queue.len();
        state.queue.clear();

        tracing::info!(stream_id = self.id, ?reason, dropped, "Stream cancelled");
        self.note(
            LogKind::Event,
            LogCategory::Sse,
            "stream cancelled",
            json!({ "reason": format!("{reason:?}"), "dropped": dropped }),
        );
        self.set_phase(&mut state, Phase::Cancelled);
        self.observers.emit(LifecycleEvent::Cancelled {
            stream_id: self.id,
            reason,
        });
        true
    }

    /// Wait for a terminal phase
    pub async fn wait(&self) -> StreamOutcome {
        let mut rx = self.phase_tx.subscribe();
        // The sender lives as long as `self`, so this cannot see a closed
        // channel while we hold a reference.
        let _ = rx.wait_for(|phase| phase.is_terminal()).await;
        self.outcome()
    }

    pub fn outcome(&self) -> StreamOutcome {
        let state = lock(&self.state);
        StreamOutcome {
            phase: state.phase,
            text: state.displayed.clone(),
            failure: state.failure.clone(),
        }
    }

    /// One pacer tick: release the next displayable chunk. Returns whether
    /// the pacer should keep ticking.
    fn release_next(&self) -> bool {
        let mut state = lock(&self.state);
        if self.token.is_cancelled() || state.phase.is_terminal() {
            state.pacer_running = false;
            return false;
        }

        while let Some(entry) = state.queue.pop_front() {
            if entry.duplicate && state.shown.contains(&entry.chunk) {
                continue;
            }
            state.displayed.push_str(&entry.chunk);
            state.shown.insert(entry.chunk.clone());
            self.observers.emit(LifecycleEvent::Chunk {
                stream_id: self.id,
                index: entry.index,
                text: entry.chunk,
            });
            break;
        }

        if !state.queue.is_empty() {
            return true;
        }

        state.pacer_running = false;
        if state.network_done {
            self.complete(&mut state);
        }
        false
    }

    fn spawn_pacer(self: &Arc<Self>) -> AbortHandle {
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let period = controller.interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = controller.token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !controller.release_next() {
                            break;
                        }
                    }
                }
            }
        });
        handle.abort_handle()
    }

    fn stop_pacer(&self) {
        if let Some(pacer) = lock(&self.pacer).take() {
            pacer.abort();
        }
    }

    fn complete(&self, state: &mut ClientStreamState) {
        self.token.cancel();
        state.pacer_running = false;
        tracing::debug!(stream_id = self.id, chars = state.displayed.chars().count(), "Stream completed");
        self.set_phase(state, Phase::Completed);
        self.observers.emit(LifecycleEvent::Completed {
            stream_id: self.id,
            text: state.displayed.clone(),
        });
    }

    fn set_phase(&self, state: &mut ClientStreamState, phase: Phase) {
        let from = state.phase;
        state.phase = phase;
        self.note(
            LogKind::StateChange,
            LogCategory::Sse,
            format!("{from} -> {phase}"),
            json!({ "stream_id": self.id, "mode": self.mode }),
        );
        self.phase_tx.send_replace(phase);
    }

    fn note(
        &self,
        kind: LogKind,
        category: LogCategory,
        message: impl Into<String>,
        details: serde_json::Value,
    ) {
        lock(&self.log).record(kind, category, message, details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn controller(
        mode: StreamMode,
        interval_ms: u64,
    ) -> (Arc<StreamController>, UnboundedReceiver<LifecycleEvent>) {
        let observers = Observers::new();
        let rx = observers.subscribe();
        let log = Arc::new(Mutex::new(EventLog::default()));
        let controller =
            StreamController::new(1, mode, Duration::from_millis(interval_ms), observers, log);
        controller.begin();
        (controller, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn chunk_indices(events: &[LifecycleEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::Chunk { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_burst_released_in_order_then_completed() {
        let (ctl, mut rx) = controller(StreamMode::Normal, 2);
        ctl.mark_streaming();

        for (i, text) in ["Hel", "lo ", "wor", "ld!"].iter().enumerate() {
            assert!(ctl.enqueue(text.to_string(), i, false));
        }
        ctl.finish_network();
        assert_eq!(ctl.phase(), Phase::Streaming);

        let outcome = ctl.wait().await;
        assert_eq!(outcome.phase, Phase::Completed);
        assert_eq!(outcome.text, "Hello world!");

        let events = drain(&mut rx);
        assert!(matches!(events[0], LifecycleEvent::Started { .. }));
        assert_eq!(chunk_indices(&events), vec![0, 1, 2, 3]);
        assert!(matches!(
            events.last(),
            Some(LifecycleEvent::Completed { text, .. }) if text == "Hello world!"
        ));
    }

    #[tokio::test]
    async fn test_done_with_empty_buffer_completes_immediately() {
        let (ctl, _rx) = controller(StreamMode::Normal, 5);
        ctl.finish_network();
        assert_eq!(ctl.phase(), Phase::Completed);
        assert!(ctl.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_duplicate_in_buffer_shown_once() {
        let (ctl, mut rx) = controller(StreamMode::Duplicate, 2);
        ctl.enqueue("aaa".into(), 0, false);
        ctl.enqueue("bbb".into(), 1, false);
        ctl.enqueue("bbb".into(), 1, true);
        ctl.enqueue("ccc".into(), 2, false);
        ctl.finish_network();

        let outcome = ctl.wait().await;
        assert_eq!(outcome.text, "aaabbbccc");
        assert_eq!(chunk_indices(&drain(&mut rx)), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_after_display_rejected_on_arrival() {
        let (ctl, _rx) = controller(StreamMode::Duplicate, 1);
        ctl.enqueue("xyz".into(), 1, false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ctl.displayed_text(), "xyz");

        assert!(!ctl.enqueue("xyz".into(), 1, true));
        assert_eq!(ctl.buffered(), 0);
    }

    #[tokio::test]
    async fn test_repeated_text_without_duplicate_flag_is_kept() {
        let (ctl, _rx) = controller(StreamMode::Normal, 1);
        ctl.enqueue("다. ".into(), 0, false);
        ctl.enqueue("다. ".into(), 1, false);
        ctl.finish_network();
        assert_eq!(ctl.wait().await.text, "다. 다. ");
    }

    #[tokio::test]
    async fn test_pacer_stops_when_idle_and_restarts() {
        let (ctl, _rx) = controller(StreamMode::Normal, 1);
        ctl.enqueue("one".into(), 0, false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!ctl.is_pacing());
        assert_eq!(ctl.displayed_text(), "one");

        ctl.enqueue("two".into(), 1, false);
        assert!(ctl.is_pacing());
        ctl.finish_network();
        assert_eq!(ctl.wait().await.text, "onetwo");
    }

    #[tokio::test]
    async fn test_cancel_drops_buffered_chunks() {
        let (ctl, mut rx) = controller(StreamMode::Delay, 50);
        for i in 0..5 {
            ctl.enqueue(format!("c{i}"), i, false);
        }
        assert_eq!(ctl.buffered(), 5);

        assert!(ctl.cancel(CancelReason::Caller));
        assert_eq!(ctl.phase(), Phase::Cancelled);
        assert_eq!(ctl.buffered(), 0);
        assert!(ctl.token().is_cancelled());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(ctl.displayed_text(), "");
        assert!(!ctl.enqueue("late".into(), 9, false));

        let events = drain(&mut rx);
        assert!(chunk_indices(&events).is_empty());
        assert_eq!(
            events.iter().filter(|e| e.is_terminal()).count(),
            1,
            "exactly one terminal event"
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (ctl, mut rx) = controller(StreamMode::Normal, 5);
        assert!(ctl.cancel(CancelReason::Caller));
        let after_first = drain(&mut rx).len();
        assert!(after_first > 0);

        assert!(!ctl.cancel(CancelReason::Caller));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_fail_notifies_once_and_drops_buffer() {
        let (ctl, mut rx) = controller(StreamMode::Error, 50);
        ctl.enqueue("abc".into(), 0, false);

        assert!(ctl.fail(StreamFailure::Stream("Connection lost".into())));
        assert!(!ctl.fail(StreamFailure::Transport("again".into())));
        assert!(!ctl.cancel(CancelReason::Caller));

        let outcome = ctl.outcome();
        assert_eq!(outcome.phase, Phase::Failed);
        assert_eq!(outcome.text, "");
        assert_eq!(
            outcome.failure,
            Some(StreamFailure::Stream("Connection lost".into()))
        );

        let failures = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, LifecycleEvent::Failed { .. }))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_completed_is_absorbing() {
        let (ctl, _rx) = controller(StreamMode::Normal, 5);
        ctl.finish_network();
        assert!(!ctl.cancel(CancelReason::Caller));
        assert!(!ctl.fail(StreamFailure::Transport("late".into())));
        assert_eq!(ctl.phase(), Phase::Completed);
    }

    #[tokio::test]
    async fn test_log_records_transitions() {
        let observers = Observers::new();
        let log = Arc::new(Mutex::new(EventLog::default()));
        let ctl = StreamController::new(
            3,
            StreamMode::Normal,
            Duration::from_millis(1),
            observers,
            log.clone(),
        );
        ctl.begin();
        ctl.mark_streaming();
        ctl.finish_network();

        let messages: Vec<String> = lock(&log)
            .entries()
            .into_iter()
            .filter(|e| e.kind == LogKind::StateChange)
            .map(|e| e.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "IDLE -> CONNECTING",
                "CONNECTING -> STREAMING",
                "STREAMING -> COMPLETED"
            ]
        );
    }
}
