//! Artifact verifier
//!
//! A downloaded artifact is trusted only when its SHA-256 equals the digest
//! the manifest declared. Transport security is not relied upon.

use crate::error::VerifyError;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Check `artifact` against `expected_hash` (hex, any case).
///
/// Returns the verified digest in lowercase hex. An empty expected hash never
/// verifies.
pub fn verify(artifact: &[u8], expected_hash: &str) -> Result<String, VerifyError> {
    let actual = sha256_hex(artifact);
    let expected = expected_hash.trim();

    if expected.is_empty() || !actual.eq_ignore_ascii_case(expected) {
        return Err(VerifyError::HashMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(actual)
}
