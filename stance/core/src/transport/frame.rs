//! Frame Protocol
//!
//! Wire format for host/peer messages: a fixed header followed by a JSON
//! payload, with a CRC32 checksum for integrity verification.
//!
//! # Frame Format
//!
//! ```text
//! +-------+---------+----------+----------------+----------------+---------------------+
//! | Magic | Version | Reserved | Length (4)     | Checksum (4)   | JSON Payload        |
//! | "ST"  | u8      | u8 = 0   | big-endian u32 | CRC32          | HostFrame/PeerFrame |
//! +-------+---------+----------+----------------+----------------+---------------------+
//! ```
//!
//! The Length field contains the size of the JSON payload only.
//!
//! The magic bytes let a dialing process tell a stance host apart from an
//! unrelated service that happens to own the port. The version byte changes
//! whenever the header layout does; message-level changes bump
//! [`PROTOCOL_VERSION`](super::protocol::PROTOCOL_VERSION) instead.

use serde::{de::DeserializeOwned, Serialize};

use super::TransportError;

/// Maximum payload size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Leading bytes of every frame
pub const FRAME_MAGIC: [u8; 2] = *b"ST";

/// Header layout version
pub const WIRE_VERSION: u8 = 1;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Magic (2) + version (1) + reserved (1) + length (4) + checksum (4)
const HEADER_SIZE: usize = 12;

#[inline]
fn compute_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode a message into a complete frame
///
/// # Errors
///
/// Returns `TransportError::SerializationError` if:
/// - JSON serialization fails
/// - Resulting payload exceeds `MAX_FRAME_SIZE`
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, TransportError> {
    let json =
        serde_json::to_vec(msg).map_err(|e| TransportError::SerializationError(e.to_string()))?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(TransportError::SerializationError(format!(
            "Frame too large: {} bytes (max: {})",
            json.len(),
            MAX_FRAME_SIZE
        )));
    }

    let len = json.len() as u32;
    let checksum = compute_checksum(&json);

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.push(WIRE_VERSION);
    buf.push(0);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete messages.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes available in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Ok(Some(msg))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(TransportError::ForeignPeer)` if the magic bytes are wrong
    /// - `Err(TransportError::ProtocolMismatch)` if the header version is unknown
    /// - `Err(TransportError::ChecksumMismatch)` if checksum verification fails
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let available = self.available();
        let head = &self.buffer[self.read_pos..];

        // Reject foreign bytes as early as they can be recognised
        let magic_seen = available.min(FRAME_MAGIC.len());
        if head[..magic_seen] != FRAME_MAGIC[..magic_seen] {
            return Err(TransportError::ForeignPeer);
        }
        if available > 2 && head[2] != WIRE_VERSION {
            return Err(TransportError::ProtocolMismatch {
                ours: u16::from(WIRE_VERSION),
                theirs: u16::from(head[2]),
            });
        }

        if available < HEADER_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([head[4], head[5], head[6], head[7]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::SerializationError(format!(
                "Frame size {len} exceeds maximum {MAX_FRAME_SIZE}"
            )));
        }

        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let expected_checksum = u32::from_be_bytes([head[8], head[9], head[10], head[11]]);
        let payload = &head[HEADER_SIZE..HEADER_SIZE + len];

        let actual_checksum = compute_checksum(payload);
        if actual_checksum != expected_checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            });
        }

        let msg = serde_json::from_slice(payload)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;

        self.read_pos += HEADER_SIZE + len;

        Ok(Some(msg))
    }
}
