//! Streaming chunk decoder and message reassembly.

use std::collections::HashMap;

use crate::error::{DriverError, DriverResult};

use super::{ChunkHeader, CHUNK_HEADER_SIZE};

/// Reassembly state of one in-flight message.
struct MessageAssembly {
    expected_chunks: u32,
    received_chunks: u32,
    message_length: usize,
    /// Next write position; chunks of one message arrive in ascending index
    /// order, so a running offset places each chunk's content.
    write_offset: usize,
    buffer: Vec<u8>,
}

/// Incremental decoder for a VelocyStream byte stream.
///
/// Bytes are fed in as they arrive from the socket, in arbitrary slices; the
/// assembler buffers partial chunks, places each complete chunk's content
/// into its message, and returns messages whose chunks have all arrived.
/// Chunks of distinct messages may interleave freely.
pub struct ChunkAssembler {
    accumulator: Vec<u8>,
    messages: HashMap<u64, MessageAssembly>,
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self {
            accumulator: Vec::new(),
            messages: HashMap::new(),
        }
    }

    /// Feed received bytes, returning every message completed by them in
    /// stream order.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Protocol`] on a malformed chunk header, a
    /// non-first chunk for an unknown message id, a duplicate first chunk,
    /// or content overflowing the declared message length. After an error
    /// the assembler must be [cleared](Self::clear); the connection is no
    /// longer in a consistent state.
    pub fn feed(&mut self, bytes: &[u8]) -> DriverResult<Vec<(u64, Vec<u8>)>> {
        self.accumulator.extend_from_slice(bytes);
        let mut completed = Vec::new();

        loop {
            if self.accumulator.len() < 4 {
                break;
            }
            let mut length_buf = [0u8; 4];
            length_buf.copy_from_slice(&self.accumulator[0..4]);
            let chunk_length = u32::from_le_bytes(length_buf) as usize;
            if chunk_length < CHUNK_HEADER_SIZE {
                return Err(DriverError::protocol(format!(
                    "chunk length {chunk_length} is smaller than the chunk header"
                )));
            }
            if self.accumulator.len() < chunk_length {
                break;
            }

            let header = ChunkHeader::read_from(&self.accumulator)?;
            let content = &self.accumulator[CHUNK_HEADER_SIZE..chunk_length];
            if let Some(message) = Self::process_chunk(&mut self.messages, &header, content)? {
                completed.push(message);
            }
            self.accumulator.drain(..chunk_length);
        }

        Ok(completed)
    }

    /// Drop all partial state (connection reset).
    pub fn clear(&mut self) {
        self.accumulator.clear();
        self.messages.clear();
    }

    fn process_chunk(
        messages: &mut HashMap<u64, MessageAssembly>,
        header: &ChunkHeader,
        content: &[u8],
    ) -> DriverResult<Option<(u64, Vec<u8>)>> {
        let id = header.message_id;
        let message_length = header.message_length as usize;

        if header.is_first() {
            if messages.contains_key(&id) {
                return Err(DriverError::protocol(format!(
                    "duplicate first chunk for message {id}"
                )));
            }
            let expected_chunks = header.index_or_count();
            if content.len() > message_length {
                return Err(DriverError::protocol(format!(
                    "chunk content overflows message {id}: {} > {message_length}",
                    content.len()
                )));
            }
            if expected_chunks <= 1 {
                // Whole message in one chunk.
                if content.len() != message_length {
                    return Err(DriverError::protocol(format!(
                        "single-chunk message {id} carries {} bytes, declared {message_length}",
                        content.len()
                    )));
                }
                return Ok(Some((id, content.to_vec())));
            }
            let mut buffer = vec![0u8; message_length];
            buffer[..content.len()].copy_from_slice(content);
            messages.insert(
                id,
                MessageAssembly {
                    expected_chunks,
                    received_chunks: 1,
                    message_length,
                    write_offset: content.len(),
                    buffer,
                },
            );
            return Ok(None);
        }

        let assembly = messages.get_mut(&id).ok_or_else(|| {
            DriverError::protocol(format!("chunk for unknown message {id} without first bit"))
        })?;
        if assembly.write_offset + content.len() > assembly.message_length {
            return Err(DriverError::protocol(format!(
                "chunk content overflows message {id}: {} + {} > {}",
                assembly.write_offset,
                content.len(),
                assembly.message_length
            )));
        }
        assembly.buffer[assembly.write_offset..assembly.write_offset + content.len()]
            .copy_from_slice(content);
        assembly.write_offset += content.len();
        assembly.received_chunks += 1;

        if assembly.received_chunks == assembly.expected_chunks {
            if assembly.write_offset != assembly.message_length {
                return Err(DriverError::protocol(format!(
                    "message {id} complete with {} bytes, declared {}",
                    assembly.write_offset, assembly.message_length
                )));
            }
            let assembly = messages.remove(&id).ok_or_else(|| {
                // Unreachable: looked up above.
                DriverError::protocol(format!("assembly slot for message {id} vanished"))
            })?;
            return Ok(Some((id, assembly.buffer)));
        }
        Ok(None)
    }

    /// Number of messages currently being reassembled.
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::chunk_message;

    #[test]
    fn test_single_message_roundtrip() {
        let payload = b"a small message".to_vec();
        let wire = chunk_message(1, &payload, 100);
        let mut assembler = ChunkAssembler::new();
        let messages = assembler.feed(&wire).expect("feed");
        assert_eq!(messages, vec![(1, payload)]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_multi_chunk_roundtrip() {
        let payload: Vec<u8> = (0..100u8).collect();
        let wire = chunk_message(5, &payload, 30);
        let mut assembler = ChunkAssembler::new();
        let messages = assembler.feed(&wire).expect("feed");
        assert_eq!(messages, vec![(5, payload)]);
    }

    #[test]
    fn test_empty_message_roundtrip() {
        let wire = chunk_message(9, &[], 100);
        let mut assembler = ChunkAssembler::new();
        let messages = assembler.feed(&wire).expect("feed");
        assert_eq!(messages, vec![(9, Vec::new())]);
    }

    #[test]
    fn test_roundtrip_across_sizes() {
        // Ids near both ends of the range, payloads around chunk
        // boundaries, chunk sizes down to one content byte.
        for &id in &[1u64, 255, u64::MAX / 2] {
            for &len in &[0usize, 1, 24, 25, 29, 30, 31, 59, 60, 61, 300] {
                for &chunk_size in &[1usize, 25, 30, 65536] {
                    let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
                    let wire = chunk_message(id, &payload, chunk_size);
                    let mut assembler = ChunkAssembler::new();
                    let messages = assembler.feed(&wire).expect("feed");
                    assert_eq!(
                        messages,
                        vec![(id, payload)],
                        "id {id} len {len} chunk {chunk_size}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_byte_at_a_time_feeding() {
        let payload: Vec<u8> = (0..100u8).collect();
        let wire = chunk_message(3, &payload, 30);
        let mut assembler = ChunkAssembler::new();
        let mut messages = Vec::new();
        for byte in &wire {
            messages.extend(assembler.feed(std::slice::from_ref(byte)).expect("feed"));
        }
        assert_eq!(messages, vec![(3, payload)]);
    }

    #[test]
    fn test_interleaved_messages() {
        // Chunks of two messages interleaved; each message's own chunks stay
        // in order. Completion order follows the last chunk of each.
        let payload_a: Vec<u8> = (0..90u8).collect();
        let payload_b: Vec<u8> = (100..190u8).collect();
        let wire_a = chunk_message(1, &payload_a, 30);
        let wire_b = chunk_message(2, &payload_b, 30);

        let chunks_a: Vec<&[u8]> = wire_a.chunks(CHUNK_HEADER_SIZE + 30).collect();
        let chunks_b: Vec<&[u8]> = wire_b.chunks(CHUNK_HEADER_SIZE + 30).collect();

        let mut assembler = ChunkAssembler::new();
        let mut messages = Vec::new();
        for (a, b) in chunks_a.iter().zip(chunks_b.iter()) {
            messages.extend(assembler.feed(a).expect("feed a"));
            messages.extend(assembler.feed(b).expect("feed b"));
        }
        assert_eq!(messages, vec![(1, payload_a), (2, payload_b)]);
    }

    #[test]
    fn test_completion_order_is_arrival_order() {
        let payload_a: Vec<u8> = vec![1; 60];
        let payload_b: Vec<u8> = vec![2; 30];
        let wire_a = chunk_message(1, &payload_a, 30);
        let wire_b = chunk_message(2, &payload_b, 30);

        // First chunk of A, then all of B, then the rest of A: B completes
        // first.
        let split = CHUNK_HEADER_SIZE + 30;
        let mut assembler = ChunkAssembler::new();
        let mut messages = Vec::new();
        messages.extend(assembler.feed(&wire_a[..split]).expect("feed"));
        messages.extend(assembler.feed(&wire_b).expect("feed"));
        messages.extend(assembler.feed(&wire_a[split..]).expect("feed"));
        assert_eq!(messages, vec![(2, payload_b), (1, payload_a)]);
    }

    #[test]
    fn test_unknown_message_id_rejected() {
        let header = ChunkHeader {
            length: (CHUNK_HEADER_SIZE + 4) as u32,
            chunk_x: 1 << 1, // index 1, first bit unset
            message_id: 77,
            message_length: 8,
        };
        let mut wire = vec![0u8; CHUNK_HEADER_SIZE + 4];
        header.write_to(&mut wire);
        let mut assembler = ChunkAssembler::new();
        assert!(matches!(
            assembler.feed(&wire),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn test_overflowing_content_rejected() {
        let payload: Vec<u8> = (0..60u8).collect();
        let mut wire = chunk_message(4, &payload, 30);
        // Claim a smaller total message length in both headers.
        wire[16..24].copy_from_slice(&40u64.to_le_bytes());
        let second = CHUNK_HEADER_SIZE + 30;
        wire[second + 16..second + 24].copy_from_slice(&40u64.to_le_bytes());
        let mut assembler = ChunkAssembler::new();
        assert!(matches!(
            assembler.feed(&wire),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn test_undersized_chunk_length_rejected() {
        let mut wire = vec![0u8; CHUNK_HEADER_SIZE];
        wire[0..4].copy_from_slice(&10u32.to_le_bytes());
        let mut assembler = ChunkAssembler::new();
        assert!(matches!(
            assembler.feed(&wire),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn test_duplicate_first_chunk_rejected() {
        let payload: Vec<u8> = (0..60u8).collect();
        let wire = chunk_message(6, &payload, 30);
        let first = &wire[..CHUNK_HEADER_SIZE + 30];
        let mut assembler = ChunkAssembler::new();
        assembler.feed(first).expect("first chunk");
        assert!(matches!(
            assembler.feed(first),
            Err(DriverError::Protocol { .. })
        ));
    }

    #[test]
    fn test_clear_drops_partial_state() {
        let payload: Vec<u8> = (0..60u8).collect();
        let wire = chunk_message(8, &payload, 30);
        let mut assembler = ChunkAssembler::new();
        assembler.feed(&wire[..CHUNK_HEADER_SIZE + 30]).expect("feed");
        assert_eq!(assembler.pending(), 1);
        assembler.clear();
        assert_eq!(assembler.pending(), 0);
        // The same message can start over after a reset.
        let messages = assembler.feed(&wire).expect("feed");
        assert_eq!(messages, vec![(8, payload)]);
    }
}
