//! Chunked file reading and checksum helpers.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use linkdrop_protocol::CHUNK_SIZE;

use crate::TransferError;

/// Computes the SHA-256 checksum of a byte slice, hex-encoded.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes the SHA-256 checksum of a whole file without loading it into
/// memory at once.
pub async fn file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A chunk read from the source file.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based chunk index: `offset / chunk_size`.
    pub seq: u64,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data` (empty means no verification).
    pub checksum: String,
}

/// Reads a file in fixed-size chunks.
///
/// Every chunk carries `chunk_size` bytes except the last, which carries
/// the remainder. A file of `n` bytes always yields `ceil(n / chunk_size)`
/// chunks, so a 32769-byte file at the default size comes out as two full
/// chunks and one single-byte tail.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
    with_checksums: bool,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// A `chunk_size` of 0 selects [`CHUNK_SIZE`].
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let chunk_size = if chunk_size == 0 { CHUNK_SIZE } else { chunk_size };
        Ok(ChunkReader {
            file,
            chunk_size,
            offset: 0,
            file_size,
            with_checksums: true,
        })
    }

    /// Disables per-chunk checksums.
    pub fn without_checksums(mut self) -> Self {
        self.with_checksums = false;
        self
    }

    /// Seeks to a byte offset, for resuming an interrupted transfer.
    ///
    /// The offset must land on a chunk boundary (or at end of file) so
    /// sequence numbers stay aligned between the two ends.
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        let aligned = offset % self.chunk_size as u64 == 0 || offset == self.file_size;
        if offset > self.file_size || !aligned {
            return Err(TransferError::ProtocolViolation(format!(
                "resume offset {offset} is not on a chunk boundary"
            )));
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk, or `None` once the file is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut data = vec![0u8; read_size];
        self.file.read_exact(&mut data).await?;

        let checksum = if self.with_checksums {
            checksum_bytes(&data)
        } else {
            String::new()
        };
        let chunk = Chunk {
            seq: self.offset / self.chunk_size as u64,
            offset: self.offset,
            data,
            checksum,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Returns the current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the total file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }

    /// Returns the chunk size in use.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the number of chunks this file yields.
    pub fn chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size as u64)
    }
}
