// Wire Frame Module
// The JSON payload carried by each SSE `data:` line, and its line formatting.

use serde::{Deserialize, Serialize};

/// Message of the error frame emitted by `error` mode
pub const CONNECTION_LOST: &str = "Connection lost";

/// Sent in place of a frame that could not be serialized; still a valid
/// terminal frame
const SERIALIZATION_FAILED: &str = r#"{"error":"frame serialization failed"}"#;

/// One discrete stream message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireFrame", into = "WireFrame")]
pub enum Frame {
    /// A text fragment; `index` is its position in the original segmentation
    Chunk {
        chunk: String,
        index: usize,
        duplicate: bool,
    },
    /// Normal end of stream
    Done,
    /// Mid-stream fault; the stream ends after this
    Error(String),
}

impl Frame {
    pub fn chunk(chunk: impl Into<String>, index: usize) -> Self {
        Frame::Chunk {
            chunk: chunk.into(),
            index,
            duplicate: false,
        }
    }

    pub fn duplicate(chunk: impl Into<String>, index: usize) -> Self {
        Frame::Chunk {
            chunk: chunk.into(),
            index,
            duplicate: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(message.into())
    }

    /// Whether no frame may follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Done | Frame::Error(_))
    }

    /// Serialize to the JSON payload of a `data:` line
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize frame");
                SERIALIZATION_FAILED.to_string()
            }
        }
    }

    /// Decode a `data:` payload
    pub fn from_json(payload: &str) -> Result<Self, FrameError> {
        serde_json::from_str(payload).map_err(|e| FrameError::Malformed(e.to_string()))
    }
}

/// Flat wire shape: every field optional, exactly one of chunk/done/error set
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duplicate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TryFrom<WireFrame> for Frame {
    type Error = FrameError;

    fn try_from(wire: WireFrame) -> Result<Self, FrameError> {
        match (wire.chunk, wire.done, wire.error) {
            (Some(chunk), None, None) => {
                let index = wire.index.ok_or(FrameError::MissingIndex)?;
                Ok(Frame::Chunk {
                    chunk,
                    index,
                    duplicate: wire.duplicate.unwrap_or(false),
                })
            }
            (None, Some(true), None) => Ok(Frame::Done),
            (None, Some(false), None) => Err(FrameError::DoneFalse),
            (None, None, Some(message)) => Ok(Frame::Error(message)),
            (None, None, None) => Err(FrameError::Empty),
            _ => Err(FrameError::Ambiguous),
        }
    }
}

impl From<Frame> for WireFrame {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Chunk {
                chunk,
                index,
                duplicate,
            } => WireFrame {
                chunk: Some(chunk),
                index: Some(index),
                duplicate: duplicate.then_some(true),
                ..Default::default()
            },
            Frame::Done => WireFrame {
                done: Some(true),
                ..Default::default()
            },
            Frame::Error(message) => WireFrame {
                error: Some(message),
                ..Default::default()
            },
        }
    }
}

/// Frame decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame payload: {0}")]
    Malformed(String),
    #[error("chunk frame without index")]
    MissingIndex,
    #[error("frame sets none of chunk, done, error")]
    Empty,
    #[error("frame sets more than one of chunk, done, error")]
    Ambiguous,
    #[error("done frame with done=false")]
    DoneFalse,
}

/// Format a frame as a Server-Sent Event
pub fn format_sse(frame: &Frame) -> String {
    format!("data: {}\n\n", frame.to_json())
}

/// Format a comment line; consumers discard these
pub fn format_comment(text: &str) -> String {
    format!(": {}\n\n", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_wire_shape() {
        let json = Frame::chunk("Hel", 0).to_json();
        assert_eq!(json, r#"{"chunk":"Hel","index":0}"#);
    }

    #[test]
    fn test_duplicate_wire_shape() {
        let json = Frame::duplicate("lo!", 1).to_json();
        assert_eq!(json, r#"{"chunk":"lo!","index":1,"duplicate":true}"#);
    }

    #[test]
    fn test_terminal_wire_shapes() {
        assert_eq!(Frame::Done.to_json(), r#"{"done":true}"#);
        assert_eq!(
            Frame::error(CONNECTION_LOST).to_json(),
            r#"{"error":"Connection lost"}"#
        );
    }

    #[test]
    fn test_serialization_fallback_is_a_terminal_frame() {
        let frame = Frame::from_json(SERIALIZATION_FAILED).unwrap();
        assert!(frame.is_terminal());
        assert_eq!(frame, Frame::error("frame serialization failed"));
    }

    #[test]
    fn test_decode_chunk_defaults_duplicate() {
        let frame = Frame::from_json(r#"{"chunk":"abc","index":4}"#).unwrap();
        assert_eq!(frame, Frame::chunk("abc", 4));
    }

    #[test]
    fn test_decode_duplicate_false_explicit() {
        let frame = Frame::from_json(r#"{"chunk":"abc","index":4,"duplicate":false}"#).unwrap();
        assert_eq!(frame, Frame::chunk("abc", 4));
    }

    #[test]
    fn test_decode_rejects_invalid_shapes() {
        assert!(Frame::from_json(r#"{"index":1}"#).is_err());
        assert!(Frame::from_json(r#"{"chunk":"a"}"#).is_err());
        assert!(Frame::from_json(r#"{"done":false}"#).is_err());
        assert!(Frame::from_json(r#"{"chunk":"a","index":0,"done":true}"#).is_err());
        assert!(Frame::from_json("not json").is_err());
    }

    #[test]
    fn test_decode_keeps_unicode() {
        let frame = Frame::from_json(r#"{"chunk":"안녕하","index":0}"#).unwrap();
        assert_eq!(frame, Frame::chunk("안녕하", 0));
    }

    #[test]
    fn test_is_terminal() {
        assert!(Frame::Done.is_terminal());
        assert!(Frame::error("x").is_terminal());
        assert!(!Frame::chunk("x", 0).is_terminal());
    }

    #[test]
    fn test_sse_format() {
        let sse = format_sse(&Frame::chunk("Hello", 2));
        assert!(sse.starts_with("data: "));
        assert!(sse.ends_with("\n\n"));
        assert!(sse.contains("\"chunk\":\"Hello\""));
    }

    #[test]
    fn test_comment_format() {
        assert_eq!(
            format_comment("connection established"),
            ": connection established\n\n"
        );
    }
}
