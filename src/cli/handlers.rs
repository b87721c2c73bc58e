// HTTP Handlers Module
// Implements the streaming, suggestions and stats endpoints.

use super::state::AppState;
use crate::{
    answers::SuggestionsResponse,
    dispatcher::{InjectedFailure, StreamSession},
    mode::{parse_mode, StreamMode, UnknownMode},
    segment::segment,
    stats::EndpointType,
    transport::{sse_channel, sse_response},
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message streamed by the chat endpoint when none is given
pub const DEFAULT_CHAT_MESSAGE: &str = "Hello! This is a streaming response from the mock server.";

/// Query string of `GET /api/stream/chat`
#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub mode: Option<String>,
    pub message: Option<String>,
}

/// Body of `POST /api/suggestions`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SuggestionStreamRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// JSON body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "faultstream"
    }))
}

/// OPTIONS on any route
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// GET /api/suggestions
pub async fn list_suggestions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SuggestionsResponse {
        suggestions: state.answers.suggestions(),
    })
}

/// GET /api/stream/chat - streams the given message back
pub async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
) -> Result<Response, AppError> {
    let mode = parse_mode(query.mode.as_deref()).inspect_err(|_| state.stats.record_rejected())?;
    let message = query
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_CHAT_MESSAGE.to_string());

    tracing::info!(%mode, chars = message.chars().count(), "Chat stream request");

    Ok(open_stream(&state, &message, mode, EndpointType::Chat))
}

/// POST /api/suggestions - streams the answer to a question
pub async fn create_suggestion_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SuggestionStreamRequest>,
) -> Result<Response, AppError> {
    let mode =
        parse_mode(request.mode.as_deref()).inspect_err(|_| state.stats.record_rejected())?;

    tracing::info!(
        %mode,
        question = request.question.as_deref().unwrap_or(""),
        "Suggestion stream request"
    );

    if let Some(failure) = state.injector.maybe_inject() {
        tracing::warn!(%mode, rate = state.injector.rate(), "Injecting failure: {}", failure.message);
        state.stats.record_injected_failure();
        return Err(AppError::Injected(failure));
    }

    let answer = state.answers.answer_for(request.question.as_deref());
    Ok(open_stream(&state, answer, mode, EndpointType::Suggestions))
}

/// GET /api/stats - Get server statistics
pub async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

/// Segment `text`, spawn its session and hand back the streaming response
fn open_stream(state: &AppState, text: &str, mode: StreamMode, endpoint: EndpointType) -> Response {
    let dispatch = &state.config.dispatch;
    let fragments = segment(text, dispatch.chunk_size);

    let (writer, body) = sse_channel(dispatch.channel_capacity);
    let session = StreamSession::new(fragments, mode)
        .with_pacing(state.config.write_pacing())
        .with_preamble(dispatch.keepalive_comments)
        .with_stats(state.stats.clone());

    state.stats.record_stream_start(mode, endpoint);
    tracing::debug!(session_id = %session.id(), ?endpoint, "Spawning stream session");
    tokio::spawn(session.run(writer));

    sse_response(body)
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    InvalidMode(UnknownMode),
    Injected(InjectedFailure),
}

impl From<UnknownMode> for AppError {
    fn from(err: UnknownMode) -> Self {
        AppError::InvalidMode(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InvalidMode(err) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "Invalid mode".to_string(),
                    message: format!(
                        "{err}; expected one of {}",
                        StreamMode::ALL.map(|m| m.as_str()).join(", ")
                    ),
                },
            ),
            AppError::Injected(failure) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: failure.error,
                    message: failure.message,
                },
            ),
        };

        let mut response = Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
