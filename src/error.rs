//! Unified error type for the BSP pipeline.
//!
//! Every fallible operation in this crate returns `Result<_, BabelError>`.
//! Variants carry the chunk index where one is meaningful, so a caller
//! can report exactly which chunk a failure belongs to.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BabelError {
    #[error("Input rejected: {0}")]
    BadInput(String),

    #[error("Unrecognized BSP version marker {0:?}")]
    BadVersion(char),

    #[error("Non-alphabet symbol at offset {offset} in page")]
    BadAlphabet { offset: usize },

    #[error("Declared chunk length {declared} exceeds page capacity {max}")]
    BadLength { declared: usize, max: usize },

    #[error("Chunk {index} hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch { index: usize, expected: String, actual: String },

    #[error("File hash mismatch: expected {expected}, got {actual}")]
    FileHashMismatch { expected: String, actual: String },

    #[error("Chunk {index} length mismatch: expected {expected}, got {actual}")]
    ChunkLengthMismatch { index: usize, expected: usize, actual: usize },

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Record requires a signature but none is present")]
    MissingSignature,

    #[error("Key material error: {0}")]
    BadKey(String),

    #[error("Oracle unavailable after {attempts} attempt(s) for chunk {index:?}: {source}")]
    OracleUnavailable { index: Option<usize>, attempts: u32, source: String },

    #[error("Oracle returned a malformed response for chunk {index:?}: {message}")]
    OracleProtocolError { index: Option<usize>, message: String },

    #[error("Metadata schema error: {0}")]
    SchemaError(String),

    #[error("Unsupported protocol version {0} (known: {1:?})")]
    UnsupportedProtocolVersion(u32, &'static [u32]),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BabelError {
    /// Whether this error should be treated as fatal even outside strict mode.
    /// Codec, signature, schema and oracle errors are never downgradable;
    /// only per-chunk integrity anomalies (`ChunkHashMismatch`,
    /// `ChunkLengthMismatch`) may be demoted to warnings in non-strict mode.
    pub fn is_always_fatal(&self) -> bool {
        !matches!(
            self,
            BabelError::ChunkHashMismatch { .. } | BabelError::ChunkLengthMismatch { .. }
        )
    }
}
