//! Media channel datagrams
//!
//! RTP-style framing with a fixed 12-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      timestamp (always 0)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     stream identifier (SSRC)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            CSRC list (CC × 4 bytes), extension, payload       |
//! ```
//!
//! All multi-byte header fields are big-endian. The payload is PCM16LE.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Size of the fixed header
pub const HEADER_LEN: usize = 12;

/// The only supported protocol version
pub const VERSION: u8 = 2;

/// Why a datagram was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramError {
    #[error("datagram shorter than header: {0} bytes")]
    TooShort(usize),

    #[error("unsupported version {0}")]
    BadVersion(u8),

    #[error("CSRC list truncated")]
    TruncatedCsrc,

    #[error("header extension truncated")]
    TruncatedExtension,

    #[error("padding length {0} exceeds payload")]
    BadPadding(u8),
}

/// A parsed datagram borrowing its payload from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDatagram<'a> {
    pub version: u8,
    pub has_padding: bool,
    pub has_extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Payload with CSRC list, extension and padding removed
    pub payload: &'a [u8],
}

impl<'a> AudioDatagram<'a> {
    /// Parse a datagram, validating every variable-length header section
    pub fn parse(data: &'a [u8]) -> Result<Self, DatagramError> {
        if data.len() < HEADER_LEN {
            return Err(DatagramError::TooShort(data.len()));
        }

        let version = data[0] >> 6;
        if version != VERSION {
            return Err(DatagramError::BadVersion(version));
        }
        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = data[0] & 0x0F;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = HEADER_LEN + csrc_count as usize * 4;
        if offset > data.len() {
            return Err(DatagramError::TruncatedCsrc);
        }

        if has_extension {
            if offset + 4 > data.len() {
                return Err(DatagramError::TruncatedExtension);
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if offset > data.len() {
                return Err(DatagramError::TruncatedExtension);
            }
        }

        let mut end = data.len();
        if has_padding {
            let pad = match data[offset..].last() {
                Some(&pad) => pad,
                None => return Err(DatagramError::BadPadding(0)),
            };
            if pad as usize > end - offset {
                return Err(DatagramError::BadPadding(pad));
            }
            end -= pad as usize;
        }

        Ok(Self {
            version,
            has_padding,
            has_extension,
            csrc_count,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload: &data[offset..end],
        })
    }
}

/// Header fields for an outbound datagram; no CSRCs, extension or padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub ssrc: u32,
}

impl OutboundHeader {
    /// Append header and payload to `out`. The timestamp is always zero.
    pub fn write(&self, payload: &[u8], out: &mut BytesMut) {
        out.reserve(HEADER_LEN + payload.len());
        out.put_u8(VERSION << 6);
        out.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        out.put_u16(self.sequence_number);
        out.put_u32(0);
        out.put_u32(self.ssrc);
        out.put_slice(payload);
    }
}
