//! # Event Codec
//!
//! JSON (de)serialization of [`ChangeEvent`] and the length-prefixed framing
//! used by stream transports. A frame is a big-endian `u32` byte length
//! followed by that many bytes of UTF-8 JSON.

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::ChangeEvent;

/// Size of the frame length prefix in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Serialize an event to its JSON text
pub fn encode_event(event: &ChangeEvent) -> ProtocolResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Parse an event from JSON text
///
/// An empty `entityID` is rejected here so that every caller sees the same
/// notion of "malformed".
pub fn decode_event(json: &str) -> ProtocolResult<ChangeEvent> {
    let event: ChangeEvent = serde_json::from_str(json)?;
    if event.entity_id.trim().is_empty() {
        return Err(ProtocolError::EmptyField("entityID"));
    }
    Ok(event)
}

/// Wrap a message body in a length-prefixed frame
pub fn encode_frame(body: &str, max_frame_bytes: usize) -> ProtocolResult<Vec<u8>> {
    let bytes = body.as_bytes();
    if bytes.len() > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: max_frame_bytes });
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    frame.extend_from_slice(bytes);
    Ok(frame)
}

/// Encode an event straight into a frame
pub fn encode_event_frame(event: &ChangeEvent, max_frame_bytes: usize) -> ProtocolResult<Vec<u8>> {
    encode_frame(&encode_event(event)?, max_frame_bytes)
}

/// Incremental frame splitter for a byte stream
///
/// Bytes are pushed as they arrive; complete bodies are popped out. An
/// oversized frame is skipped in full and reported once as an error, the
/// stream stays usable afterwards.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    skip_remaining: usize,
}

impl FrameReader {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
            skip_remaining: 0,
        }
    }

    /// Append newly received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;
        if self.skip_remaining > 0 {
            let skipped = self.skip_remaining.min(bytes.len());
            self.skip_remaining -= skipped;
            bytes = &bytes[skipped..];
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame body, if one is buffered
    pub fn next_frame(&mut self) -> Option<ProtocolResult<String>> {
        if self.skip_remaining > 0 || self.buffer.len() < FRAME_HEADER_LEN {
            return None;
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_frame_bytes {
            let available = self.buffer.len() - FRAME_HEADER_LEN;
            let dropped = available.min(len);
            self.buffer.drain(..FRAME_HEADER_LEN + dropped);
            self.skip_remaining = len - dropped;
            return Some(Err(ProtocolError::FrameTooLarge { size: len, max: self.max_frame_bytes }));
        }

        if self.buffer.len() < FRAME_HEADER_LEN + len {
            return None;
        }
        let body: Vec<u8> = self.buffer.drain(..FRAME_HEADER_LEN + len).skip(FRAME_HEADER_LEN).collect();
        Some(String::from_utf8(body).map_err(ProtocolError::from))
    }
}
