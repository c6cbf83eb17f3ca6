//! SHA-256 content checksums for firmware images.
//!
//! The registry recomputes the checksum of an image on every request and
//! sends it alongside the payload; the device recomputes it over the bytes it
//! received and refuses to install on mismatch.

use crate::error::{LatchError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file, read in chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check `data` against an expected hex digest (case-insensitive).
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let calculated = sha256_hex(data);
    if calculated.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(LatchError::Integrity(format!(
            "checksum mismatch: expected {}, got {}",
            expected.trim(),
            calculated
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_accepts_uppercase() {
        let digest = sha256_hex(b"firmware").to_uppercase();
        assert!(verify_sha256(b"firmware", &digest).is_ok());
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        let err = verify_sha256(b"firmware", &sha256_hex(b"other")).unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn test_file_digest_matches_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        let data = vec![0xA5u8; 20_000];
        std::fs::write(&path, &data).unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_hex(&data));
    }
}
