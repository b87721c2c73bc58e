// Wire Transport Module
// Streams SSE lines into a chunked HTTP response body.

use crate::frame::{format_comment, format_sse, Frame};
use axum::{
    body::Body,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::sync::mpsc;

/// Lines buffered between a session and the response body
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Comments written before the first frame
pub const PREAMBLE_COMMENTS: [&str; 2] = ["connection established", "stream started"];

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// The client went away; nothing more can be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream transport closed")]
pub struct TransportClosed;

/// Write half of an SSE response.
///
/// The channel is bounded, so a slow reader makes `send_*` wait instead of
/// queueing without limit. Once the response body is dropped (the client
/// disconnected) the writer is no longer writable.
#[derive(Debug, Clone)]
pub struct SseWriter {
    tx: mpsc::Sender<String>,
}

impl SseWriter {
    /// Whether the response body is still attached to a connection
    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<(), TransportClosed> {
        self.send_line(format_sse(frame)).await
    }

    pub async fn send_comment(&self, text: &str) -> Result<(), TransportClosed> {
        self.send_line(format_comment(text)).await
    }

    /// Write the connection-establishment comments
    pub async fn send_preamble(&self) -> Result<(), TransportClosed> {
        for comment in PREAMBLE_COMMENTS {
            self.send_comment(comment).await?;
        }
        Ok(())
    }

    async fn send_line(&self, line: String) -> Result<(), TransportClosed> {
        if !self.is_writable() {
            return Err(TransportClosed);
        }
        self.tx.send(line).await.map_err(|_| TransportClosed)
    }
}

/// Create a writer and the streaming body it feeds
pub fn sse_channel(capacity: usize) -> (SseWriter, Body) {
    let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

    let lines = async_stream::stream! {
        while let Some(line) = rx.recv().await {
            yield Ok::<_, std::io::Error>(line);
        }
    };

    (SseWriter { tx }, Body::from_stream(lines))
}

/// Wrap a body in an event-stream response with intermediary buffering off
pub fn sse_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writer_feeds_body() {
        let (writer, body) = sse_channel(8);
        writer.send_comment("hello").await.unwrap();
        writer.send_frame(&Frame::chunk("abc", 0)).await.unwrap();
        writer.send_frame(&Frame::Done).await.unwrap();
        drop(writer);

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(
            text,
            ": hello\n\ndata: {\"chunk\":\"abc\",\"index\":0}\n\ndata: {\"done\":true}\n\n"
        );
    }

    #[tokio::test]
    async fn test_writer_closed_after_body_dropped() {
        let (writer, body) = sse_channel(8);
        assert!(writer.is_writable());

        drop(body);

        assert!(!writer.is_writable());
        let result = writer.send_frame(&Frame::Done).await;
        assert_eq!(result, Err(TransportClosed));
    }

    #[tokio::test]
    async fn test_preamble_comments() {
        let (writer, body) = sse_channel(8);
        writer.send_preamble().await.unwrap();
        drop(writer);

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text, ": connection established\n\n: stream started\n\n");
    }

    #[test]
    fn test_sse_response_headers() {
        let (_writer, body) = sse_channel(1);
        let response = sse_response(body);

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "text/event-stream; charset=utf-8"
        );
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }
}
