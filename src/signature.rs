//! Optional RSA-PSS signing over a canonical JSON form of a [`FileRecord`]
//! (C3).
//!
//! One module owns all key handling and the single sign/verify entry
//! point; errors never leak key material. The property being protected
//! is metadata integrity, not confidentiality — pages are world-readable
//! by design, so there is no encryption here, only signing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::pss::{SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::BabelError;
use crate::record::FileRecord;

/// Recommended RSA modulus size for newly generated keys.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Generate a fresh RSA keypair, returned as (PKCS#8 private PEM,
/// SubjectPublicKeyInfo public PEM).
pub fn generate_keypair(bits: usize) -> Result<(String, String), BabelError> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| BabelError::BadKey(format!("key generation failed: {e}")))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(Default::default())
        .map_err(|e| BabelError::BadKey(format!("PKCS#8 encode failed: {e}")))?
        .to_string();
    let public_pem = public
        .to_public_key_pem(Default::default())
        .map_err(|e| BabelError::BadKey(format!("SPKI encode failed: {e}")))?;

    Ok((private_pem, public_pem))
}

/// Render `record` as the canonical byte form that is signed/verified:
/// its JSON object with `signature` and `public_key_fingerprint` removed,
/// keys sorted, no insignificant whitespace.
///
/// Stability of this function is part of the wire format — any change to
/// key ordering or whitespace invalidates every existing signature.
fn canonical_bytes(record: &FileRecord) -> Result<Vec<u8>, BabelError> {
    let mut value = serde_json::to_value(record)
        .map_err(|e| BabelError::SchemaError(format!("canonicalization failed: {e}")))?;
    if let Value::Object(map) = &mut value {
        map.remove("signature");
        map.remove("public_key_fingerprint");
    }
    let sorted = sort_object_keys(value);
    serde_json::to_vec(&sorted)
        .map_err(|e| BabelError::SchemaError(format!("canonicalization failed: {e}")))
}

/// Recursively rebuild `value` with every object's keys in sorted order.
/// `serde_json::Map` preserves insertion order by default; this makes the
/// order canonical (and thus signature-stable) instead.
fn sort_object_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, sort_object_keys(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k, v);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_object_keys).collect()),
        other => other,
    }
}

/// Lowercase-hex SHA-256 fingerprint of a public key, in SPKI DER form.
/// Used as `FileRecord::public_key_fingerprint` so a verifier can confirm
/// which key a signature claims without trusting the PEM's comments.
pub fn public_key_fingerprint(public_key_pem: &str) -> Result<String, BabelError> {
    let key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| BabelError::BadKey(format!("invalid public key: {e}")))?;
    let der = key
        .to_public_key_der()
        .map_err(|e| BabelError::BadKey(format!("DER encode failed: {e}")))?;
    Ok(hex::encode(Sha256::digest(der.as_bytes())))
}

/// Sign `record`'s canonical form with `private_key_pem`, filling in
/// `record.signature` and `record.public_key_fingerprint` in place.
pub fn sign(record: &mut FileRecord, private_key_pem: &str) -> Result<(), BabelError> {
    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| BabelError::BadKey(format!("invalid private key: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);
    let fingerprint_der = public_key
        .to_public_key_der()
        .map_err(|e| BabelError::BadKey(format!("DER encode failed: {e}")))?;
    let fingerprint = hex::encode(Sha256::digest(fingerprint_der.as_bytes()));

    let message = canonical_bytes(record)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, &message);

    record.signature = Some(BASE64.encode(signature.to_bytes()));
    record.public_key_fingerprint = Some(fingerprint);
    Ok(())
}

/// Verify `record`'s signature against `public_key_pem`.
///
/// # Errors
/// `MissingSignature` if `record.signature` is `None`; `BadSignature` if
/// present but does not verify; `BadKey` on a malformed key or base64
/// payload.
pub fn verify(record: &FileRecord, public_key_pem: &str) -> Result<(), BabelError> {
    let signature_b64 = record.signature.as_ref().ok_or(BabelError::MissingSignature)?;
    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| BabelError::BadKey(format!("invalid signature encoding: {e}")))?;
    let signature = rsa::pss::Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| BabelError::BadSignature)?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| BabelError::BadKey(format!("invalid public key: {e}")))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);

    let message = canonical_bytes(record)?;
    verifying_key
        .verify(&message, &signature)
        .map_err(|_| BabelError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ChunkEntry, CompressionInfo, PROTOCOL_VERSION};
    use crate::oracle::Coordinate;

    fn sample_record() -> FileRecord {
        FileRecord {
            protocol_version: PROTOCOL_VERSION,
            original_name: "notes.txt".to_string(),
            original_size: 42,
            compressed_size: 30,
            compression: CompressionInfo { algorithm: "zstd".to_string(), level: 19 },
            file_sha256: "a".repeat(64),
            chunk_count: 1,
            chunks: vec![ChunkEntry {
                index: 0,
                coordinate: Coordinate {
                    hexagon: "deadbeef".to_string(),
                    wall: 1,
                    shelf: 1,
                    volume: 1,
                    page: 1,
                },
                raw_len: 30,
                sha256: "b".repeat(64),
            }],
            encoding: "base29-v5".to_string(),
            signature: None,
            public_key_fingerprint: None,
        }
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let (private_pem, public_pem) = generate_keypair(2048).unwrap();
        let mut record = sample_record();
        sign(&mut record, &private_pem).unwrap();
        assert!(record.signature.is_some());
        assert!(record.public_key_fingerprint.is_some());
        verify(&record, &public_pem).unwrap();
    }

    #[test]
    fn verify_without_signature_fails() {
        let (_, public_pem) = generate_keypair(2048).unwrap();
        let record = sample_record();
        assert!(matches!(verify(&record, &public_pem), Err(BabelError::MissingSignature)));
    }

    #[test]
    fn tampering_after_signing_invalidates() {
        let (private_pem, public_pem) = generate_keypair(2048).unwrap();
        let mut record = sample_record();
        sign(&mut record, &private_pem).unwrap();
        record.original_name = "tampered.txt".to_string();
        assert!(matches!(verify(&record, &public_pem), Err(BabelError::BadSignature)));
    }

    #[test]
    fn verifying_with_wrong_key_fails() {
        let (private_pem, _) = generate_keypair(2048).unwrap();
        let (_, other_public_pem) = generate_keypair(2048).unwrap();
        let mut record = sample_record();
        sign(&mut record, &private_pem).unwrap();
        assert!(matches!(verify(&record, &other_public_pem), Err(BabelError::BadSignature)));
    }

    #[test]
    fn fingerprint_is_stable_for_same_key() {
        let (_, public_pem) = generate_keypair(2048).unwrap();
        let a = public_key_fingerprint(&public_pem).unwrap();
        let b = public_key_fingerprint(&public_pem).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
