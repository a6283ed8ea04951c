//! Control channel frame decoding
//!
//! Frames are ASCII commands terminated by `;` with no length prefix. A
//! single read may carry any number of complete frames plus a partial tail,
//! so bytes are accumulated until a terminator shows up. Each byte is
//! scanned once, and an unterminated run is capped at [`MAX_PENDING_BYTES`].

use bytes::BytesMut;
use thiserror::Error;

/// Frame terminator
pub const TERMINATOR: u8 = b';';

/// Longest run of bytes accepted without a terminator
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The unterminated run was discarded; complete frames before it are kept
    #[error("{pending} bytes without terminator, maximum is {max}")]
    TooLong { pending: usize, max: usize },
}

/// Text of one frame before normalization.
///
/// Some fields are raw 8-bit values whose upper range depends on the
/// device locale, so a frame is not guaranteed to be valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedText {
    Utf8(String),
    RawBytes(Vec<u8>),
}

impl DecodedText {
    pub fn decode(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => DecodedText::Utf8(text.to_string()),
            Err(_) => DecodedText::RawBytes(bytes.to_vec()),
        }
    }

    /// Normalize to a `String`, mapping raw bytes one-to-one onto
    /// U+0000..U+00FF (Latin-1)
    pub fn into_string(self) -> String {
        match self {
            DecodedText::Utf8(text) => text,
            DecodedText::RawBytes(bytes) => bytes.into_iter().map(char::from).collect(),
        }
    }
}

/// Accumulating `;` frame decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Leading bytes of `buffer` known to hold no terminator
    scanned: usize,
    /// Trailing bytes of `buffer` after the last terminator
    tail: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            scanned: 0,
            tail: 0,
        }
    }

    /// Append received bytes.
    ///
    /// Fails when the unterminated run would exceed [`MAX_PENDING_BYTES`].
    /// That run is dropped but frames completed by `data` remain available.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), FrameError> {
        let (complete, tail) = match data.iter().rposition(|&b| b == TERMINATOR) {
            Some(pos) => (pos + 1, data.len() - pos - 1),
            None => (0, self.tail + data.len()),
        };

        if tail > MAX_PENDING_BYTES {
            if complete > 0 {
                self.buffer.extend_from_slice(&data[..complete]);
            } else {
                let keep = self.buffer.len() - self.tail;
                self.buffer.truncate(keep);
            }
            self.tail = 0;
            self.scanned = self.scanned.min(self.buffer.len());
            return Err(FrameError::TooLong {
                pending: tail,
                max: MAX_PENDING_BYTES,
            });
        }

        self.buffer.extend_from_slice(data);
        self.tail = tail;
        Ok(())
    }

    /// Extract the next complete frame, if any.
    ///
    /// The returned frame is trimmed and always ends with exactly one `;`.
    /// Frames that are empty after trimming are skipped.
    pub fn next_frame(&mut self) -> Option<String> {
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == TERMINATOR) {
            let pos = self.scanned + offset;
            let raw = self.buffer.split_to(pos + 1);
            self.scanned = 0;
            let text = DecodedText::decode(&raw[..pos]).into_string();
            let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c.is_control());
            if trimmed.is_empty() {
                continue;
            }
            let mut frame = String::with_capacity(trimmed.len() + 1);
            frame.push_str(trimmed);
            frame.push(TERMINATOR as char);
            return Some(frame);
        }
        self.scanned = self.buffer.len();
        None
    }

    /// Append `data` and drain every complete frame
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<String>, FrameError> {
        self.extend(data)?;
        Ok(std::iter::from_fn(|| self.next_frame()).collect())
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.tail = 0;
    }
}
