// SSE Decoder Module
// Reassembles frame boundaries that network reads split arbitrarily.

use crate::frame::{Frame, FrameError};

const DELIMITER: &[u8] = b"\n\n";

/// One item recovered from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A `data:` line that parsed into a frame
    Frame(Frame),
    /// A `:` comment line
    Comment(String),
    /// A `data:` line that did not parse; the stream goes on
    Malformed { payload: String, error: FrameError },
}

/// Incremental decoder over raw response bytes.
///
/// Bytes are buffered until a complete `\n\n`-terminated block is present,
/// and only then decoded as UTF-8, so a character split between two reads is
/// put back together before anything looks at it.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns everything decoded from the blocks they completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        // A delimiter can straddle the previous read and this one
        let scan_from = self.buffer.len().saturating_sub(DELIMITER.len() - 1);
        self.buffer.extend_from_slice(bytes);

        let mut decoded = Vec::new();
        let mut start = scan_from;
        while let Some(pos) = find(&self.buffer[start..]) {
            let end = start + pos;
            let block: Vec<u8> = self.buffer.drain(..end + DELIMITER.len()).collect();
            decode_block(&block[..end], &mut decoded);
            start = 0;
        }
        decoded
    }

    /// Bytes of a partial block still waiting for their delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

fn decode_block(block: &[u8], out: &mut Vec<Decoded>) {
    let text = match std::str::from_utf8(block) {
        Ok(text) => text,
        Err(e) => {
            out.push(Decoded::Malformed {
                payload: String::from_utf8_lossy(block).into_owned(),
                error: FrameError::Malformed(format!("invalid UTF-8: {e}")),
            });
            return;
        }
    };

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(comment) = line.strip_prefix(':') {
            out.push(Decoded::Comment(comment.trim_start().to_string()));
        } else if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            match Frame::from_json(payload) {
                Ok(frame) => out.push(Decoded::Frame(frame)),
                Err(error) => out.push(Decoded::Malformed {
                    payload: payload.to_string(),
                    error,
                }),
            }
        }
        // Anything else (event:, id:, blank) is not part of this protocol
    }
}
