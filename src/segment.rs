//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for malformed, truncated, or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Layout
//!
//! The header is 18 bytes, big-endian, in this exact order:
//!
//! ```text
//!  0        4        8       10       12       16       18
//!  ├ seq_num ┼ ack_num ┼ flags  ┼ window ┼ checksum ┼ len ┼ payload …
//! ```
//!
//! `checksum` is the first four bytes of the MD5 digest over
//! `seq_num ‖ ack_num ‖ flags ‖ window ‖ payload` (all big-endian), read as
//! a big-endian u32.  `payload_len` and the checksum itself are excluded
//! from the digest.

use thiserror::Error;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 18;

/// Largest payload a single data segment may carry.
pub const MAX_PAYLOAD: usize = 1024;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u16 = 0x0001;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 0x0002;
    /// Finish — sender has no more data to send.
    pub const FIN: u16 = 0x0004;
    /// Reset the connection (recognised on receive, never generated).
    pub const RST: u16 = 0x0008;
}

/// A complete protocol datagram: header fields + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Packet-indexed sequence number (one per data segment, SYN = 0).
    pub seq_num: u32,
    /// Cumulative acknowledgement: `N` acknowledges every seq < `N`.
    pub ack_num: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// Advertised receive-window size in bytes.
    pub window: u16,
    /// Payload bytes (empty for SYN, FIN, and pure ACKs).
    pub payload: Vec<u8>,
}

impl Segment {
    /// Build a data segment carrying `payload`.
    pub fn data(seq_num: u32, ack_num: u32, window: u16, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self {
            seq_num,
            ack_num,
            flags: flags::ACK,
            window,
            payload,
        }
    }

    /// Build a zero-payload control segment (SYN, ACK, FIN, combinations).
    pub fn control(flags: u16, seq_num: u32, ack_num: u32, window: u16) -> Self {
        Self {
            seq_num,
            ack_num,
            flags,
            window,
            payload: Vec::new(),
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn is_rst(&self) -> bool {
        self.flags & flags::RST != 0
    }

    /// `true` when this segment carries application data.
    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The checksum is computed here; callers never fill it in.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.seq_num.to_be_bytes());
        buf.extend_from_slice(&self.ack_num.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.window.to_be_bytes());
        buf.extend_from_slice(&self.integrity_tag().to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns `Err` if the buffer is shorter than the header, `payload_len`
    /// overruns the buffer or exceeds [`MAX_PAYLOAD`], or the recomputed
    /// integrity tag does not match the stored one.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::Truncated);
        }

        let seq_num = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let ack_num = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let flags = u16::from_be_bytes([buf[8], buf[9]]);
        let window = u16::from_be_bytes([buf[10], buf[11]]);
        let stored_tag = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let payload_len = u16::from_be_bytes([buf[16], buf[17]]) as usize;

        if payload_len > MAX_PAYLOAD {
            return Err(SegmentError::Oversized(payload_len));
        }
        if buf.len() - HEADER_LEN < payload_len {
            return Err(SegmentError::LengthMismatch);
        }

        let segment = Self {
            seq_num,
            ack_num,
            flags,
            window,
            payload: buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
        };

        if segment.integrity_tag() != stored_tag {
            return Err(SegmentError::ChecksumMismatch);
        }

        Ok(segment)
    }

    /// First four bytes of the MD5 digest over the checksummed field list.
    fn integrity_tag(&self) -> u32 {
        let mut input = Vec::with_capacity(12 + self.payload.len());
        input.extend_from_slice(&self.seq_num.to_be_bytes());
        input.extend_from_slice(&self.ack_num.to_be_bytes());
        input.extend_from_slice(&self.flags.to_be_bytes());
        input.extend_from_slice(&self.window.to_be_bytes());
        input.extend_from_slice(&self.payload);
        let digest = md5::compute(&input);
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram shorter than the {HEADER_LEN}-byte header")]
    Truncated,
    /// `payload_len` field overruns the actual remaining bytes.
    #[error("payload length field exceeds datagram size")]
    LengthMismatch,
    /// `payload_len` field exceeds the protocol maximum.
    #[error("payload length {0} exceeds maximum of {MAX_PAYLOAD}")]
    Oversized(usize),
    /// Recomputed integrity tag did not match the stored value.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}
