//! Orchestrator (C5): wires the codec, chunker, signature, oracle, and
//! envelope layers into the four user-facing operations.
//!
//! `verify_metadata`'s [`VerifyReport`] is a single struct enumerating
//! every check performed and its individual verdict, with a summary line
//! for display, rather than a bare pass/fail bool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::chunker::{self, DownloadOutcome};
use crate::envelope_io;
use crate::error::BabelError;
use crate::oracle::OracleClient;
use crate::progress::{ProgressReporter, ProgressSubscriber};
use crate::record::FileRecord;
use crate::signature;

/// Cooperative cancellation token. The orchestrator checks this before
/// scheduling each new oracle call; it does not preempt in-flight calls.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One named check within a [`VerifyReport`].
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Offline verification report produced by `verify_metadata`. Never
/// touches the network or any key material beyond the public key, if
/// supplied.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
    pub signature_checked: bool,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        format!(
            "{}/{} checks passed{}",
            passed,
            self.checks.len(),
            if self.signature_checked { ", signature verified" } else { "" }
        )
    }
}

/// Upload `input` under `original_name`, optionally signing the resulting
/// record with `private_key_pem`. Returns either a fully-formed
/// [`FileRecord`] or an error — never a partial one, per §4.5's
/// all-or-nothing guarantee.
pub async fn upload(
    input: &[u8],
    original_name: &str,
    private_key_pem: Option<&str>,
    oracle: &dyn OracleClient,
    cancel: &CancellationToken,
) -> Result<(FileRecord, ProgressSubscriber), BabelError> {
    let (reporter, subscriber) = ProgressReporter::new(input.len().max(1) as u64);
    reporter.start("compressing");

    if cancel.is_cancelled() {
        reporter.error("cancelled before start");
        return Err(BabelError::Cancelled);
    }

    let mut record = match chunker::upload_bytes(input, original_name, oracle).await {
        Ok(r) => r,
        Err(e) => {
            reporter.error(e.to_string());
            return Err(e);
        }
    };

    if cancel.is_cancelled() {
        reporter.error("cancelled after chunking");
        return Err(BabelError::Cancelled);
    }

    if let Some(key) = private_key_pem {
        if let Err(e) = signature::sign(&mut record, key) {
            reporter.error(e.to_string());
            return Err(e);
        }
    }

    info!(chunks = record.chunk_count, "upload complete");
    reporter.complete("upload complete");
    Ok((record, subscriber))
}

/// Reconstruct the original bytes described by `record`.
///
/// In strict mode any integrity, schema, or signature anomaly is fatal.
/// In non-strict mode per-chunk anomalies degrade to warnings and the
/// caller gets back whatever could be assembled, flagged `verified =
/// false` via [`DownloadOutcome`].
pub async fn download(
    record: &FileRecord,
    public_key_pem: Option<&str>,
    strict: bool,
    oracle: &dyn OracleClient,
    cancel: &CancellationToken,
) -> Result<(DownloadOutcome, ProgressSubscriber), BabelError> {
    let (reporter, subscriber) = ProgressReporter::new(record.chunk_count.max(1) as u64);
    reporter.start("verifying metadata");

    record.check_structure().map_err(|e| {
        reporter.error(e.to_string());
        e
    })?;

    if let Some(key) = public_key_pem {
        match signature::verify(record, key) {
            Ok(()) => {}
            Err(e) if strict => {
                reporter.error(e.to_string());
                return Err(e);
            }
            Err(e) => warn!(error = %e, "signature verification failed, continuing (non-strict)"),
        }
    } else if strict && record.signature.is_some() {
        // A signed record in strict mode without a supplied key cannot be
        // trusted either way; treat as missing verification material.
        let err = BabelError::MissingSignature;
        reporter.error(err.to_string());
        return Err(err);
    }

    if cancel.is_cancelled() {
        reporter.error("cancelled before fetch");
        return Err(BabelError::Cancelled);
    }

    reporter.start("fetching chunks");
    let outcome = match chunker::download_bytes(record, oracle, strict).await {
        Ok(o) => o,
        Err(e) => {
            reporter.error(e.to_string());
            return Err(e);
        }
    };

    if outcome.verified {
        reporter.complete("download complete, verified");
    } else {
        reporter.complete(format!("download complete, {} warning(s)", outcome.warnings.len()));
    }
    Ok((outcome, subscriber))
}

/// Offline checks only: schema, invariants 1/2/8 (via
/// [`FileRecord::check_structure`]), and the signature if one is present
/// or a public key was supplied. No network calls.
pub fn verify_metadata(record: &FileRecord, public_key_pem: Option<&str>, strict: bool) -> VerifyReport {
    let mut checks = Vec::new();

    let structure = record.check_structure();
    checks.push(CheckResult {
        name: "structure",
        passed: structure.is_ok(),
        detail: structure.err().map(|e| e.to_string()),
    });

    let mut signature_checked = false;
    if let Some(key) = public_key_pem {
        signature_checked = true;
        let result = signature::verify(record, key);
        checks.push(CheckResult {
            name: "signature",
            passed: result.is_ok(),
            detail: result.err().map(|e| e.to_string()),
        });
    } else if strict && record.signature.is_some() {
        checks.push(CheckResult {
            name: "signature",
            passed: false,
            detail: Some("record carries a signature but no public key was supplied".to_string()),
        });
    }

    VerifyReport { checks, signature_checked }
}

/// Human-readable summary of `record`. No network, no crypto, pure
/// function — matches `RecoveryReport::summary`'s role for a scan.
pub fn info(record: &FileRecord) -> String {
    format!(
        "{} — {} bytes ({} compressed, {}), {} chunk(s), protocol v{}{}",
        record.original_name,
        record.original_size,
        record.compressed_size,
        record.compression.algorithm,
        record.chunk_count,
        record.protocol_version,
        if record.signature.is_some() { ", signed" } else { "" },
    )
}

/// Serialize `record` to its gzipped-JSON on-disk form.
pub fn save(record: &FileRecord) -> Result<Vec<u8>, BabelError> {
    envelope_io::write_envelope(record)
}

/// Parse a gzipped-JSON metadata blob, applying strict top-level schema
/// checking when `strict` is set.
pub fn load(bytes: &[u8], strict: bool) -> Result<FileRecord, BabelError> {
    if strict {
        envelope_io::read_envelope_strict(bytes)
    } else {
        envelope_io::read_envelope(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::FakeOracleClient;
    use crate::signature::generate_keypair;

    #[tokio::test]
    async fn upload_download_round_trip() {
        let oracle = FakeOracleClient::default();
        let cancel = CancellationToken::new();
        let data = b"round trip payload".to_vec();
        let (record, _) = upload(&data, "notes.txt", None, &oracle, &cancel).await.unwrap();
        let (outcome, _) = download(&record, None, true, &oracle, &cancel).await.unwrap();
        assert_eq!(outcome.bytes, data);
        assert!(outcome.verified);
    }

    #[tokio::test]
    async fn upload_with_signature_verifies_on_download() {
        let oracle = FakeOracleClient::default();
        let cancel = CancellationToken::new();
        let (private_pem, public_pem) = generate_keypair(2048).unwrap();
        let data = b"signed payload".to_vec();
        let (record, _) = upload(&data, "s.bin", Some(&private_pem), &oracle, &cancel).await.unwrap();
        assert!(record.signature.is_some());
        let (outcome, _) = download(&record, Some(&public_pem), true, &oracle, &cancel).await.unwrap();
        assert_eq!(outcome.bytes, data);
    }

    #[tokio::test]
    async fn download_rejects_bad_signature_in_strict_mode() {
        let oracle = FakeOracleClient::default();
        let cancel = CancellationToken::new();
        let (private_pem, _) = generate_keypair(2048).unwrap();
        let (_, wrong_public_pem) = generate_keypair(2048).unwrap();
        let data = b"tamper target".to_vec();
        let (record, _) = upload(&data, "x.bin", Some(&private_pem), &oracle, &cancel).await.unwrap();
        let err = download(&record, Some(&wrong_public_pem), true, &oracle, &cancel).await.unwrap_err();
        assert!(matches!(err, BabelError::BadSignature));
    }

    #[tokio::test]
    async fn cancelled_before_start_never_calls_oracle() {
        let oracle = FakeOracleClient::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = upload(b"data", "c.bin", None, &oracle, &cancel).await.unwrap_err();
        assert!(matches!(err, BabelError::Cancelled));
    }

    #[test]
    fn verify_metadata_flags_structural_corruption() {
        let oracle = FakeOracleClient::default();
        let cancel = CancellationToken::new();
        let record = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async { upload(b"abc", "f.bin", None, &oracle, &cancel).await.unwrap().0 });

        let mut broken = record.clone();
        broken.chunk_count += 1;
        let report = verify_metadata(&broken, None, false);
        assert!(!report.is_healthy());
    }

    #[test]
    fn info_is_pure_and_human_readable() {
        let record = FileRecord {
            protocol_version: crate::record::PROTOCOL_VERSION,
            original_name: "demo.txt".to_string(),
            original_size: 5,
            compressed_size: 5,
            compression: crate::record::CompressionInfo { algorithm: "zstd".to_string(), level: 19 },
            file_sha256: "a".repeat(64),
            chunk_count: 1,
            chunks: vec![],
            encoding: "base29-v5".to_string(),
            signature: None,
            public_key_fingerprint: None,
        };
        let a = info(&record);
        let b = info(&record);
        assert_eq!(a, b);
        assert!(a.contains("demo.txt"));
    }
}
