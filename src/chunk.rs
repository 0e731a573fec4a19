use crate::error::MalformedInputError;
use log::trace;
use std::sync::Arc;

pub const BYTES_PER_SAMPLE: usize = 2;

/// Fixed-length span of mono 16-bit samples, the unit of classification.
/// Cloning shares the same immutable samples.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    sequence: u64,
    samples: Arc<[i16]>,
}

impl AudioChunk {
    pub fn new(sequence: u64, samples: Vec<i16>) -> Self {
        AudioChunk {
            sequence,
            samples: samples.into(),
        }
    }

    /// Decodes little-endian 16-bit samples. `bytes` must have an even length.
    pub fn from_le_bytes(sequence: u64, bytes: &[u8]) -> Result<Self, MalformedInputError> {
        if bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(MalformedInputError { len: bytes.len() });
        }
        let samples = bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect::<Vec<i16>>();
        Ok(Self::new(sequence, samples))
    }

    /// Position of the chunk in capture order, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Accumulates raw capture bytes into fixed-size chunks, carrying the remainder forward.
#[derive(Debug)]
pub struct ChunkAssembler {
    chunk_bytes: usize,
    pending: Vec<u8>,
    next_sequence: u64,
}

impl ChunkAssembler {
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_bytes = chunk_samples.max(1) * BYTES_PER_SAMPLE;
        ChunkAssembler {
            chunk_bytes,
            pending: Vec::with_capacity(chunk_bytes),
            next_sequence: 0,
        }
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Appends one capture read. Returns every chunk completed by it, possibly none.
    /// A read with an odd byte count is rejected and leaves the pending buffer untouched.
    pub fn append(&mut self, raw: &[u8]) -> Result<Vec<AudioChunk>, MalformedInputError> {
        if raw.len() % BYTES_PER_SAMPLE != 0 {
            return Err(MalformedInputError { len: raw.len() });
        }
        self.pending.extend_from_slice(raw);

        let mut chunks = vec![];
        while self.pending.len() >= self.chunk_bytes {
            let bytes: Vec<u8> = self.pending.drain(..self.chunk_bytes).collect();
            // pending always holds whole samples, so the chunk decodes cleanly
            let chunk = AudioChunk::from_le_bytes(self.next_sequence, &bytes)?;
            trace!("Chunk {} assembled, {} bytes pending", chunk.sequence(), self.pending.len());
            self.next_sequence += 1;
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_little_endian() {
        let chunk = AudioChunk::from_le_bytes(0, &[0x01, 0x00, 0xff, 0xff, 0x00, 0x80]).unwrap();
        assert_eq!(chunk.samples(), &[1, -1, i16::MIN]);
    }

    #[test]
    fn short_append_keeps_pending() {
        let mut assembler = ChunkAssembler::new(4);
        let chunks = assembler.append(&bytes_of(&[1, 2, 3])).unwrap();
        assert!(chunks.is_empty());
        assert_eq!(assembler.pending_len(), 6);
    }

    #[test]
    fn one_append_can_yield_many_chunks() {
        let mut assembler = ChunkAssembler::new(2);
        let chunks = assembler.append(&bytes_of(&[1, 2, 3, 4, 5])).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].samples(), &[1, 2]);
        assert_eq!(chunks[1].samples(), &[3, 4]);
        assert_eq!(chunks[1].sequence(), 1);
        assert_eq!(assembler.pending_len(), 2);

        let chunks = assembler.append(&bytes_of(&[6])).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples(), &[5, 6]);
        assert_eq!(chunks[0].sequence(), 2);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn odd_append_is_rejected() {
        let mut assembler = ChunkAssembler::new(4);
        assembler.append(&bytes_of(&[7, 8])).unwrap();

        let err = assembler.append(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, MalformedInputError { len: 3 });
        assert_eq!(assembler.pending_len(), 4);

        // next read continues where the good data left off
        let chunks = assembler.append(&bytes_of(&[9, 10])).unwrap();
        assert_eq!(chunks[0].samples(), &[7, 8, 9, 10]);
    }

    #[test]
    fn pending_stays_below_chunk_size() {
        let mut assembler = ChunkAssembler::new(66150);
        let read = vec![0u8; 4410 * 2];
        let mut total = 0;
        for _ in 0..100 {
            total += assembler.append(&read).unwrap().len();
            assert!(assembler.pending_len() < assembler.chunk_bytes());
        }
        assert_eq!(total, 100 * 4410 / 66150);
        assert_eq!(assembler.chunk_bytes(), 132_300);
    }
}
