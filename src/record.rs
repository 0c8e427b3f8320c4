//! The persisted BSP metadata artifact: [`FileRecord`] and its entries.
//!
//! The single serializable type that names every piece needed to
//! reconstruct a file — here each chunk entry points at an external
//! oracle coordinate rather than an in-archive byte offset.

use serde::{Deserialize, Serialize};

use crate::error::BabelError;
use crate::oracle::Coordinate;

/// Current write version of the protocol. Only this version is ever
/// written; readers also accept the full `KNOWN_PROTOCOL_VERSIONS` set.
pub const PROTOCOL_VERSION: u32 = 5;

/// The complete set of protocol versions a reader will accept.
pub const KNOWN_PROTOCOL_VERSIONS: &[u32] = &[1, 2, 3, 4, 5];

/// One chunk's metadata within a [`FileRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkEntry {
    pub index: usize,
    pub coordinate: Coordinate,
    pub raw_len: usize,
    /// Lowercase hex SHA-256 of the chunk's decoded (decompressed-stream)
    /// bytes.
    pub sha256: String,
}

/// The persisted metadata blob produced by `upload` and consumed by
/// `download`/`verify_metadata`/`info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub protocol_version: u32,
    pub original_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression: CompressionInfo,
    /// Lowercase hex SHA-256 over the compressed byte stream.
    pub file_sha256: String,
    pub chunk_count: usize,
    pub chunks: Vec<ChunkEntry>,
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompressionInfo {
    pub algorithm: String,
    pub level: i32,
}

impl FileRecord {
    /// Offline structural checks: invariants 1, 2, 8 from the data model.
    /// Does not touch the network or any cryptography.
    pub fn check_structure(&self) -> Result<(), BabelError> {
        if !KNOWN_PROTOCOL_VERSIONS.contains(&self.protocol_version) {
            return Err(BabelError::UnsupportedProtocolVersion(
                self.protocol_version,
                KNOWN_PROTOCOL_VERSIONS,
            ));
        }

        if self.chunk_count != self.chunks.len() {
            return Err(BabelError::SchemaError(format!(
                "chunk_count {} does not match chunks.len() {}",
                self.chunk_count,
                self.chunks.len()
            )));
        }

        for (i, entry) in self.chunks.iter().enumerate() {
            if entry.index != i {
                return Err(BabelError::SchemaError(format!(
                    "chunks[{i}].index == {} (gap or reorder)",
                    entry.index
                )));
            }
        }

        let sum_raw_len: u64 = self.chunks.iter().map(|c| c.raw_len as u64).sum();
        if sum_raw_len != self.compressed_size {
            return Err(BabelError::SchemaError(format!(
                "sum(chunks[i].raw_len) == {sum_raw_len} but compressed_size == {}",
                self.compressed_size
            )));
        }

        let expected_chunks = self.compressed_size.div_ceil(
            crate::chunker::CHUNK_PAYLOAD_MAX as u64,
        ).max(1) as usize;
        if self.chunk_count != expected_chunks {
            return Err(BabelError::SchemaError(format!(
                "chunk_count {} != ceil(compressed_size / CHUNK_PAYLOAD_MAX) == {expected_chunks}",
                self.chunk_count
            )));
        }

        Ok(())
    }
}
