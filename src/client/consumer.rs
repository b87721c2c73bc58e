// Stream Consumer Module
// Opens streams over HTTP, decodes frames and hands chunks to the pacer.

use super::decoder::{Decoded, SseDecoder};
use super::events::{CancelReason, LifecycleEvent, Observers, Phase, StreamFailure, StreamId};
use super::log::{EventLog, LogCategory, LogEntry, LogKind, DEFAULT_LOG_CAPACITY};
use super::session::{StreamController, StreamOutcome};
use crate::answers::{Suggestion, SuggestionsResponse};
use crate::frame::Frame;
use crate::mode::StreamMode;
use crate::pacing::PacerConfig;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated state of the client's network link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkCondition {
    #[default]
    Online,
    /// Requests fail before reaching the server
    Offline,
    /// Requests are held back before they are sent
    Slow,
}

impl std::str::FromStr for NetworkCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(NetworkCondition::Online),
            "offline" => Ok(NetworkCondition::Offline),
            "slow" => Ok(NetworkCondition::Slow),
            other => Err(format!("unknown network condition: {other}")),
        }
    }
}

/// Consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Server root, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    pub pacer: PacerConfig,
    /// Cancel a stream that has not finished after this long
    pub max_duration: Option<Duration>,
    pub network: NetworkCondition,
    pub slow_network_delay: Duration,
    pub log_capacity: usize,
}

impl ConsumerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_pacer(mut self, pacer: PacerConfig) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn with_network(mut self, network: NetworkCondition) -> Self {
        self.network = network;
        self
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            pacer: PacerConfig::default(),
            max_duration: None,
            network: NetworkCondition::Online,
            slow_network_delay: Duration::from_millis(2000),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// What to stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// `GET /api/stream/chat`: the server streams `message` back
    Chat { message: String, mode: StreamMode },
    /// `POST /api/suggestions`: the server streams the answer to `question`
    Suggestion { question: String, mode: StreamMode },
}

impl StreamTarget {
    pub fn chat(message: impl Into<String>, mode: StreamMode) -> Self {
        StreamTarget::Chat {
            message: message.into(),
            mode,
        }
    }

    pub fn suggestion(question: impl Into<String>, mode: StreamMode) -> Self {
        StreamTarget::Suggestion {
            question: question.into(),
            mode,
        }
    }

    pub fn mode(&self) -> StreamMode {
        match self {
            StreamTarget::Chat { mode, .. } | StreamTarget::Suggestion { mode, .. } => *mode,
        }
    }
}

/// Errors outside of a running stream
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid server URL: {0}")]
    Url(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network is offline")]
    Offline,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct SuggestionRequest<'a> {
    question: &'a str,
    mode: StreamMode,
}

/// Handle to one started stream
#[derive(Clone)]
pub struct StreamHandle {
    controller: Arc<StreamController>,
}

impl StreamHandle {
    pub fn id(&self) -> StreamId {
        self.controller.id()
    }

    pub fn phase(&self) -> Phase {
        self.controller.phase()
    }

    pub fn displayed_text(&self) -> String {
        self.controller.displayed_text()
    }

    /// Cancel this stream; `false` if it had already ended
    pub fn cancel(&self) -> bool {
        self.controller.cancel(CancelReason::Caller)
    }

    /// Resolve once the stream is completed, failed or cancelled
    pub async fn wait(&self) -> StreamOutcome {
        self.controller.wait().await
    }
}

/// Consumes fault-injected streams, one at a time.
///
/// Starting a new stream cancels the previous one. Lifecycle events of every
/// stream go to all subscribers.
pub struct StreamConsumer {
    config: ConsumerConfig,
    http: reqwest::Client,
    observers: Observers,
    log: Arc<Mutex<EventLog>>,
    current: Mutex<Option<Arc<StreamController>>>,
    network: Mutex<NetworkCondition>,
    next_id: AtomicU64,
}

impl StreamConsumer {
    pub fn new(config: ConsumerConfig) -> Result<Self, ClientError> {
        reqwest::Url::parse(&config.base_url).map_err(|e| ClientError::Url(e.to_string()))?;
        let http = reqwest::Client::builder().build()?;
        let log = Arc::new(Mutex::new(EventLog::new(config.log_capacity)));
        let network = config.network;

        Ok(Self {
            config,
            http,
            observers: Observers::new(),
            log,
            current: Mutex::new(None),
            network: Mutex::new(network),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Receive lifecycle events for every stream this consumer runs
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        self.observers.subscribe()
    }

    /// Start a stream, cancelling the one in flight
    pub fn start(&self, target: StreamTarget) -> StreamHandle {
        let mut current = lock(&self.current);
        if let Some(previous) = current.take() {
            previous.cancel(CancelReason::Superseded);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mode = target.mode();
        let controller = StreamController::new(
            id,
            mode,
            self.config.pacer.interval_for(mode),
            self.observers.clone(),
            self.log.clone(),
        );

        tracing::info!(stream_id = id, %mode, "Starting stream");
        controller.begin();

        let request = self.build_request(&target);
        let network = self.network();
        let reader = tokio::spawn(read_stream(
            controller.clone(),
            request,
            network,
            self.config.slow_network_delay,
        ));
        controller.attach_reader(reader.abort_handle());

        if let Some(max_duration) = self.config.max_duration {
            spawn_watchdog(controller.clone(), max_duration);
        }

        *current = Some(controller.clone());
        StreamHandle { controller }
    }

    /// Cancel the current stream; `false` if there was nothing to cancel
    pub fn stop(&self) -> bool {
        let current = lock(&self.current).clone();
        match current {
            Some(controller) => controller.cancel(CancelReason::Caller),
            None => false,
        }
    }

    pub fn phase(&self) -> Phase {
        lock(&self.current)
            .as_ref()
            .map(|c| c.phase())
            .unwrap_or(Phase::Idle)
    }

    pub fn displayed_text(&self) -> String {
        lock(&self.current)
            .as_ref()
            .map(|c| c.displayed_text())
            .unwrap_or_default()
    }

    pub fn event_log(&self) -> Vec<LogEntry> {
        lock(&self.log).entries()
    }

    /// Drop every entry; the clear itself is recorded as the first new one
    pub fn clear_event_log(&self) {
        let mut log = lock(&self.log);
        let dropped = log.len();
        log.clear();
        log.record(
            LogKind::Event,
            LogCategory::System,
            "event log cleared",
            json!({ "dropped": dropped }),
        );
    }

    pub fn network(&self) -> NetworkCondition {
        *lock(&self.network)
    }

    /// Change the simulated network for streams started from now on
    pub fn set_network(&self, condition: NetworkCondition) {
        let previous = std::mem::replace(&mut *lock(&self.network), condition);
        if previous != condition {
            tracing::info!(?previous, ?condition, "Network condition changed");
            lock(&self.log).record(
                LogKind::StateChange,
                LogCategory::Network,
                "network condition changed",
                json!({ "from": previous, "to": condition }),
            );
        }
    }

    /// `GET /api/suggestions`
    pub async fn fetch_suggestions(&self) -> Result<Vec<Suggestion>, ClientError> {
        if self.network() == NetworkCondition::Offline {
            return Err(ClientError::Offline);
        }

        let url = self.url("/api/suggestions")?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: SuggestionsResponse = response.json().await?;
        Ok(body.suggestions)
    }

    fn url(&self, path: &str) -> Result<reqwest::Url, ClientError> {
        let base = self.config.base_url.trim_end_matches('/');
        reqwest::Url::parse(&format!("{base}{path}")).map_err(|e| ClientError::Url(e.to_string()))
    }

    fn build_request(&self, target: &StreamTarget) -> Result<reqwest::RequestBuilder, ClientError> {
        let request = match target {
            StreamTarget::Chat { message, mode } => {
                let url = self.url("/api/stream/chat")?;
                let url = reqwest::Url::parse_with_params(
                    url.as_str(),
                    &[("mode", mode.as_str()), ("message", message.as_str())],
                )
                .map_err(|e| ClientError::Url(e.to_string()))?;
                self.http.get(url)
            }
            StreamTarget::Suggestion { question, mode } => {
                let url = self.url("/api/suggestions")?;
                self.http.post(url).json(&SuggestionRequest {
                    question,
                    mode: *mode,
                })
            }
        };
        Ok(request.header(reqwest::header::ACCEPT, "text/event-stream"))
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        if let Some(controller) = lock(&self.current).take() {
            controller.cancel(CancelReason::Caller);
        }
    }
}

fn spawn_watchdog(controller: Arc<StreamController>, max_duration: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = controller.token().cancelled() => {}
            _ = tokio::time::sleep(max_duration) => {
                tracing::warn!(stream_id = controller.id(), ?max_duration, "Stream exceeded its runtime cap");
                controller.cancel(CancelReason::Timeout);
            }
        }
    });
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        Ok(ErrorBody {
            error: Some(error),
            ..
        }) => error,
        _ => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

/// Network leg of one stream. Returns as soon as the token is cancelled.
async fn read_stream(
    controller: Arc<StreamController>,
    request: Result<reqwest::RequestBuilder, ClientError>,
    network: NetworkCondition,
    slow_delay: Duration,
) {
    let token = controller.token().clone();

    let request = match request {
        Ok(request) => request,
        Err(e) => {
            controller.fail(StreamFailure::Transport(e.to_string()));
            return;
        }
    };

    match network {
        NetworkCondition::Online => {}
        NetworkCondition::Offline => {
            controller.fail(StreamFailure::Transport(ClientError::Offline.to_string()));
            return;
        }
        NetworkCondition::Slow => {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(slow_delay) => {}
            }
        }
    }

    let response = tokio::select! {
        _ = token.cancelled() => return,
        response = request.send() => response,
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            controller.fail(StreamFailure::Transport(e.to_string()));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let message = tokio::select! {
            _ = token.cancelled() => return,
            message = error_message(response) => message,
        };
        tracing::warn!(stream_id = controller.id(), status = status.as_u16(), %message, "Stream request refused");
        controller.fail(StreamFailure::from_status(status.as_u16(), message));
        return;
    }

    let mut bytes = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            next = bytes.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                controller.fail(StreamFailure::Transport(e.to_string()));
                return;
            }
            None => {
                controller.fail(StreamFailure::Transport(
                    "stream ended without a terminal frame".to_string(),
                ));
                return;
            }
        };

        controller.mark_streaming();

        for item in decoder.push(&chunk) {
            match item {
                Decoded::Comment(text) => {
                    tracing::trace!(stream_id = controller.id(), %text, "SSE comment");
                }
                Decoded::Malformed { payload, error } => {
                    controller.record_malformed(&payload, &error.to_string());
                }
                Decoded::Frame(Frame::Chunk {
                    chunk,
                    index,
                    duplicate,
                }) => {
                    controller.enqueue(chunk, index, duplicate);
                }
                Decoded::Frame(Frame::Done) => {
                    controller.finish_network();
                    return;
                }
                Decoded::Frame(Frame::Error(message)) => {
                    controller.fail(StreamFailure::Stream(message));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_mode() {
        assert_eq!(
            StreamTarget::chat("hi", StreamMode::Missing).mode(),
            StreamMode::Missing
        );
        assert_eq!(
            StreamTarget::suggestion("q", StreamMode::Error).mode(),
            StreamMode::Error
        );
    }

    #[test]
    fn test_network_condition_serde() {
        let parsed: NetworkCondition = serde_json::from_str("\"slow\"").unwrap();
        assert_eq!(parsed, NetworkCondition::Slow);
        assert_eq!(serde_json::to_string(&NetworkCondition::Offline).unwrap(), "\"offline\"");
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let result = StreamConsumer::new(ConsumerConfig::new("not a url"));
        assert!(matches!(result, Err(ClientError::Url(_))));
    }

    #[tokio::test]
    async fn test_chat_request_url() {
        let consumer = StreamConsumer::new(ConsumerConfig::new("http://localhost:9/")).unwrap();
        let request = consumer
            .build_request(&StreamTarget::chat("a b&c", StreamMode::Duplicate))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/api/stream/chat");
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("mode".to_string(), "duplicate".to_string()),
                ("message".to_string(), "a b&c".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_suggestion_request_body() {
        let consumer = StreamConsumer::new(ConsumerConfig::default()).unwrap();
        let request = consumer
            .build_request(&StreamTarget::suggestion("질문", StreamMode::Normal))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/api/suggestions");
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(value, json!({"question": "질문", "mode": "normal"}));
    }

    #[tokio::test]
    async fn test_offline_fails_without_request() {
        let consumer = StreamConsumer::new(
            ConsumerConfig::new("http://127.0.0.1:9").with_network(NetworkCondition::Offline),
        )
        .unwrap();
        let mut events = consumer.subscribe();

        let handle = consumer.start(StreamTarget::chat("hi", StreamMode::Normal));
        let outcome = handle.wait().await;

        assert_eq!(outcome.phase, Phase::Failed);
        assert!(matches!(outcome.failure, Some(StreamFailure::Transport(_))));
        assert!(matches!(events.recv().await, Some(LifecycleEvent::Started { .. })));
        assert!(matches!(events.recv().await, Some(LifecycleEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_slow_network_wait_is_cancellable() {
        let config = ConsumerConfig {
            network: NetworkCondition::Slow,
            slow_network_delay: Duration::from_secs(60),
            ..ConsumerConfig::new("http://127.0.0.1:9")
        };
        let consumer = StreamConsumer::new(config).unwrap();

        let handle = consumer.start(StreamTarget::chat("hi", StreamMode::Normal));
        assert_eq!(handle.phase(), Phase::Connecting);
        assert!(consumer.stop());
        assert!(!consumer.stop());
        assert_eq!(handle.wait().await.phase, Phase::Cancelled);
    }

    #[tokio::test]
    async fn test_watchdog_cancels_on_timeout() {
        let config = ConsumerConfig {
            network: NetworkCondition::Slow,
            slow_network_delay: Duration::from_secs(60),
            ..ConsumerConfig::new("http://127.0.0.1:9").with_max_duration(Duration::from_millis(20))
        };
        let consumer = StreamConsumer::new(config).unwrap();
        let mut events = consumer.subscribe();

        let outcome = consumer
            .start(StreamTarget::chat("hi", StreamMode::Normal))
            .wait()
            .await;
        assert_eq!(outcome.phase, Phase::Cancelled);

        let _started = events.recv().await;
        assert_eq!(
            events.recv().await,
            Some(LifecycleEvent::Cancelled {
                stream_id: 1,
                reason: CancelReason::Timeout
            })
        );
    }

    #[tokio::test]
    async fn test_start_supersedes_previous_stream() {
        let config = ConsumerConfig {
            network: NetworkCondition::Slow,
            slow_network_delay: Duration::from_secs(60),
            ..ConsumerConfig::new("http://127.0.0.1:9")
        };
        let consumer = StreamConsumer::new(config).unwrap();

        let first = consumer.start(StreamTarget::chat("one", StreamMode::Normal));
        let second = consumer.start(StreamTarget::chat("two", StreamMode::Normal));

        assert_eq!(first.phase(), Phase::Cancelled);
        assert_eq!(second.phase(), Phase::Connecting);
        assert_ne!(first.id(), second.id());
        assert!(second.cancel());
    }

    #[test]
    fn test_clear_event_log_leaves_system_entry() {
        let consumer = StreamConsumer::new(ConsumerConfig::default()).unwrap();
        consumer.set_network(NetworkCondition::Offline);
        consumer.set_network(NetworkCondition::Online);
        consumer.clear_event_log();

        let log = consumer.event_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].category, LogCategory::System);
        assert_eq!(log[0].details["dropped"], 2);
    }

    #[test]
    fn test_network_change_is_logged() {
        let consumer = StreamConsumer::new(ConsumerConfig::default()).unwrap();
        consumer.set_network(NetworkCondition::Slow);
        consumer.set_network(NetworkCondition::Slow);

        let log = consumer.event_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].category, LogCategory::Network);
        assert_eq!(log[0].details["to"], "slow");
    }
}
