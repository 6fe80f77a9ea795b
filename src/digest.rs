//! SHA256 digest utilities for content-addressed storage
//!
//! Computes, validates and verifies the `sha256:<hex>` digests that identify
//! every blob and manifest moved by this tool.

use crate::error::{PackageError, Result};
use crate::oci::Descriptor;
use sha2::{Digest, Sha256};
use std::io::{self, Write};

pub const SHA256_PREFIX: &str = "sha256:";

/// Utilities for working with SHA256 digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 digest from byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full OCI digest (with sha256: prefix) from byte data
    pub fn compute_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, lowercase hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    /// Validate an `algorithm:encoded` digest; sha256 is checked strictly
    pub fn is_valid_digest(digest: &str) -> bool {
        match digest.split_once(':') {
            Some(("sha256", hex)) => Self::is_valid_sha256_hex(hex),
            Some((algorithm, encoded)) => {
                !algorithm.is_empty()
                    && algorithm
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
                    && !encoded.is_empty()
                    && encoded
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "=_-".contains(c))
            }
            None => false,
        }
    }

    /// Check content against the size and digest a descriptor promises
    pub fn verify_descriptor(desc: &Descriptor, data: &[u8]) -> Result<()> {
        if data.len() as u64 != desc.size {
            return Err(PackageError::Transfer(format!(
                "size mismatch for {}: expected {} bytes, got {}",
                desc.digest,
                desc.size,
                data.len()
            )));
        }

        let Some(expected_hex) = desc.digest.strip_prefix(SHA256_PREFIX) else {
            return Err(PackageError::Transfer(format!(
                "unsupported digest algorithm: {}",
                desc.digest
            )));
        };

        let computed = Self::compute_sha256(data);
        if computed != expected_hex {
            return Err(PackageError::Transfer(format!(
                "content integrity check failed: expected {}, computed {}{}",
                desc.digest, SHA256_PREFIX, computed
            )));
        }

        Ok(())
    }

    /// Format digest for display (truncated for readability)
    pub fn format_digest_short(digest: &str) -> String {
        match digest.char_indices().nth(19) {
            Some((end, _)) => format!("{}...", &digest[..end]),
            None => digest.to_string(),
        }
    }
}

/// Writer adapter that hashes and counts everything passing through it
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Returns the wrapped writer, the digest and the byte count
    pub fn finish(self) -> (W, String, u64) {
        let digest = format!("{}{}", SHA256_PREFIX, hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.size)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
