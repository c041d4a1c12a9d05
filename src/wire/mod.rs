//! VelocyStream wire format.
//!
//! A message is transmitted as one or more chunks. Chunk layout, all
//! integers little-endian:
//!
//! ```text
//! offset 0  : u32 length         // header + content bytes
//! offset 4  : u32 chunk_x        // (index << 1) | first-chunk bit;
//!                                // on the first chunk of a multi-chunk
//!                                // message: (chunk count << 1) | 1
//! offset 8  : u64 message_id
//! offset 16 : u64 message_length // payload bytes of the whole message
//! offset 24 : content
//! ```
//!
//! Chunks of distinct messages may interleave arbitrarily on the stream;
//! chunks of one message arrive in ascending index order.

mod assembler;

pub use assembler::ChunkAssembler;

use crate::error::{DriverError, DriverResult};

/// Chunk header size: 4 (length) + 4 (chunk_x) + 8 (message id) + 8
/// (message length) = 24 bytes.
pub const CHUNK_HEADER_SIZE: usize = 24;

/// Bytes the client sends once, immediately after the TCP connect, to select
/// the protocol. The server sends no reply and begins accepting chunks.
pub const PROTOCOL_HANDSHAKE: &[u8] = b"VST/1.1\r\n\r\n";

/// Parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Header plus content size of this chunk.
    pub length: u32,
    /// Chunk index/count word; see [module docs](self).
    pub chunk_x: u32,
    /// Message this chunk belongs to.
    pub message_id: u64,
    /// Payload size of the whole message.
    pub message_length: u64,
}

impl ChunkHeader {
    /// Whether this is the first chunk of its message.
    pub fn is_first(&self) -> bool {
        self.chunk_x & 1 == 1
    }

    /// On a first chunk: the total number of chunks in the message.
    /// On a subsequent chunk: the 0-based chunk index.
    pub fn index_or_count(&self) -> u32 {
        self.chunk_x >> 1
    }

    /// Content bytes carried by this chunk.
    pub fn content_length(&self) -> DriverResult<usize> {
        (self.length as usize)
            .checked_sub(CHUNK_HEADER_SIZE)
            .ok_or_else(|| {
                DriverError::protocol(format!(
                    "chunk length {} is smaller than the {CHUNK_HEADER_SIZE}-byte header",
                    self.length
                ))
            })
    }

    /// Serialize the header into `buf`, which must hold at least
    /// [`CHUNK_HEADER_SIZE`] bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= CHUNK_HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.chunk_x.to_le_bytes());
        buf[8..16].copy_from_slice(&self.message_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.message_length.to_le_bytes());
    }

    /// Parse a header from `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Protocol`] if fewer than [`CHUNK_HEADER_SIZE`]
    /// bytes are available.
    pub fn read_from(buf: &[u8]) -> DriverResult<Self> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return Err(DriverError::protocol(format!(
                "chunk header needs {CHUNK_HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let mut u32_buf = [0u8; 4];
        let mut u64_buf = [0u8; 8];
        u32_buf.copy_from_slice(&buf[0..4]);
        let length = u32::from_le_bytes(u32_buf);
        u32_buf.copy_from_slice(&buf[4..8]);
        let chunk_x = u32::from_le_bytes(u32_buf);
        u64_buf.copy_from_slice(&buf[8..16]);
        let message_id = u64::from_le_bytes(u64_buf);
        u64_buf.copy_from_slice(&buf[16..24]);
        let message_length = u64::from_le_bytes(u64_buf);
        Ok(Self {
            length,
            chunk_x,
            message_id,
            message_length,
        })
    }
}

/// Encode a whole message into its on-wire chunk sequence.
///
/// The payload is split into `ceil(len / chunk_size)` chunks of at most
/// `chunk_size` content bytes, written back to back into a single buffer so
/// the message goes out in one write. An empty payload still produces one
/// (content-free) chunk.
///
/// `chunk_size` must be positive; callers validate it against
/// [`CHUNK_HEADER_SIZE`] at configuration time.
pub fn chunk_message(message_id: u64, payload: &[u8], chunk_size: usize) -> Vec<u8> {
    debug_assert!(chunk_size > 0);
    let chunk_count = payload.len().div_ceil(chunk_size).max(1);
    let mut out = Vec::with_capacity(payload.len() + chunk_count * CHUNK_HEADER_SIZE);

    let mut header_buf = [0u8; CHUNK_HEADER_SIZE];
    for index in 0..chunk_count {
        let offset = index * chunk_size;
        let content = &payload[offset..(offset + chunk_size).min(payload.len())];
        let chunk_x = if index == 0 {
            (chunk_count as u32) << 1 | 1
        } else {
            (index as u32) << 1
        };
        let header = ChunkHeader {
            length: (CHUNK_HEADER_SIZE + content.len()) as u32,
            chunk_x,
            message_id,
            message_length: payload.len() as u64,
        };
        header.write_to(&mut header_buf);
        out.extend_from_slice(&header_buf);
        out.extend_from_slice(content);
    }
    out
}
