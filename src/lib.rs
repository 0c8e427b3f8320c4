//! # babelstorage — Babel Storage Protocol (BSP) reference implementation
//!
//! Format guarantees (frozen in BSP v5):
//! - Every page is exactly 3200 symbols over a fixed 29-symbol alphabet;
//!   never negotiated
//! - Every page carries a version marker and a fixed-width length field;
//!   unrecognized markers abort the decode, no partial result
//! - Chunk order is always increasing in `index`; reassembly never reorders
//! - `file_sha256` covers the compressed stream, not the original bytes
//! - Only protocol version 5 is ever written; versions 1-5 are read-compatible
//! - Signatures, when present, cover a canonical (sorted-key, whitespace-free)
//!   JSON rendering of the record with the `signature` field itself removed
//! - Strict mode fatalizes every anomaly; non-strict mode degrades per-chunk
//!   integrity failures to warnings and returns a result marked unverified
//! - No operation ever emits a partial [`FileRecord`]: upload either returns
//!   a complete, internally consistent record or an error

pub mod alphabet;
pub mod chunker;
pub mod envelope_io;
pub mod error;
pub mod oracle;
pub mod orchestrator;
pub mod progress;
pub mod record;
pub mod signature;

pub use error::BabelError;
pub use oracle::{Coordinate, FakeOracleClient, HttpOracleClient, OracleClient, OracleConfig};
pub use orchestrator::{download, info, load, save, upload, verify_metadata, CancellationToken, VerifyReport};
pub use progress::{ProgressEvent, ProgressReporter, ProgressState, ProgressSubscriber};
pub use record::{ChunkEntry, CompressionInfo, FileRecord, KNOWN_PROTOCOL_VERSIONS, PROTOCOL_VERSION};
pub use signature::{generate_keypair, public_key_fingerprint};
