//! Ordered chunk accumulation on the receiving side.

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::progress::percent;

/// What [`ChunkAssembler::push`] did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PushOutcome {
    /// Chunk appended; more bytes expected.
    Appended,
    /// Chunk appended and the expected byte count is now met. Returned at
    /// most once per assembler.
    Completed,
    /// Chunk already held; the caller should re-acknowledge it.
    Duplicate,
    /// Chunk arrived after completion and was dropped.
    Stray,
}

/// Accumulates chunks in order and decides completion.
///
/// Completion is edge-triggered: the push that first reaches the expected
/// byte count returns [`PushOutcome::Completed`], every later chunk is a
/// stray, and [`percent`](ChunkAssembler::percent) stays pinned at 100 even
/// if the sender's view of the file was larger than the offer said.
pub struct ChunkAssembler {
    expected_bytes: u64,
    chunk_size: u64,
    chunks: Vec<Vec<u8>>,
    received_bytes: u64,
    next_seq: u64,
    completed: bool,
    hasher: Sha256,
}

impl ChunkAssembler {
    /// Creates an assembler expecting `expected_bytes` in chunks of
    /// `chunk_size`, both taken from the transfer offer.
    ///
    /// An empty transfer is complete from the start.
    pub fn new(expected_bytes: u64, chunk_size: u32) -> Self {
        ChunkAssembler {
            expected_bytes,
            chunk_size: u64::from(chunk_size.max(1)),
            chunks: Vec::new(),
            received_bytes: 0,
            next_seq: 0,
            completed: expected_bytes == 0,
            hasher: Sha256::new(),
        }
    }

    /// Applies one chunk.
    ///
    /// `seq` below the next expected sequence number is a duplicate from a
    /// resend; above it is a gap the ordered channel should have made
    /// impossible, and the transfer cannot continue.
    pub fn push(&mut self, seq: u64, data: &[u8]) -> Result<PushOutcome, TransferError> {
        if self.completed {
            return Ok(PushOutcome::Stray);
        }
        if seq < self.next_seq {
            return Ok(PushOutcome::Duplicate);
        }
        if seq > self.next_seq {
            return Err(TransferError::SequenceGap {
                expected: self.next_seq,
                got: seq,
            });
        }

        let projected = self.received_bytes + data.len() as u64;
        if projected > self.expected_bytes + self.chunk_size {
            return Err(TransferError::ProtocolViolation(format!(
                "received {projected} bytes against an offer of {}",
                self.expected_bytes
            )));
        }

        self.hasher.update(data);
        self.chunks.push(data.to_vec());
        self.received_bytes = projected;
        self.next_seq += 1;

        if self.received_bytes >= self.expected_bytes {
            self.completed = true;
            return Ok(PushOutcome::Completed);
        }
        Ok(PushOutcome::Appended)
    }

    /// Returns contiguous bytes held so far; doubles as the resume offset
    /// reported in accepts and acks.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Returns the byte count the offer promised.
    pub fn expected_bytes(&self) -> u64 {
        self.expected_bytes
    }

    /// Returns the next sequence number the assembler will take.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Returns `true` once the expected byte count has been met.
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Progress percentage, capped at 100.
    pub fn percent(&self) -> f64 {
        percent(self.received_bytes, self.expected_bytes)
    }

    /// Returns the hex SHA-256 over everything pushed so far.
    pub fn checksum(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Copies the held chunks into one contiguous buffer.
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.received_bytes as usize);
        for chunk in &self.chunks {
            payload.extend_from_slice(chunk);
        }
        payload
    }

    /// Consumes the assembler, returning the assembled payload.
    pub fn into_payload(self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.received_bytes as usize);
        for chunk in self.chunks {
            payload.extend_from_slice(&chunk);
        }
        payload
    }
}
