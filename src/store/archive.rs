//! Directory archive utilities
//!
//! This module provides [`ArchiveUtils`] for packing a directory into a
//! gzip-compressed tarball while hashing both the compressed and the
//! uncompressed stream, and for extracting such a tarball back into a
//! directory after checking the uncompressed digest.

use crate::digest::{DigestUtils, HashingWriter};
use crate::error::{PackageError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Archive, Builder, HeaderMode};

/// Digests of a packed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArchive {
    /// Digest of the gzip stream, i.e. of the blob
    pub digest: String,
    pub size: u64,
    /// Digest of the uncompressed tar stream
    pub tar_digest: String,
}

pub struct ArchiveUtils;

impl ArchiveUtils {
    /// Pack `source` into a `.tar.gz` at `target`
    ///
    /// Entries are relative to `source`; headers are deterministic so the same
    /// tree packs to the same digest.
    pub fn pack_directory(source: &Path, target: &Path) -> Result<PackedArchive> {
        let wrap = |e: io::Error| {
            PackageError::local_store(format!("failed to pack directory: {}", e), Some(source))
        };

        let file = File::create(target).map_err(|e| {
            PackageError::local_store(format!("failed to create archive: {}", e), Some(target))
        })?;
        let gzip = GzEncoder::new(HashingWriter::new(file), Compression::default());
        let mut builder = Builder::new(HashingWriter::new(gzip));
        builder.mode(HeaderMode::Deterministic);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", source).map_err(wrap)?;

        let tar_stream = builder.into_inner().map_err(wrap)?;
        let (gzip, tar_digest, _) = tar_stream.finish();
        let blob_stream = gzip.finish().map_err(wrap)?;
        let (mut file, digest, size) = blob_stream.finish();
        file.flush().map_err(wrap)?;

        Ok(PackedArchive {
            digest,
            size,
            tar_digest,
        })
    }

    /// Digest and size of a regular file, streamed
    pub fn hash_file(path: &Path) -> Result<(String, u64)> {
        let mut file = File::open(path).map_err(|e| {
            PackageError::local_store(format!("failed to open file: {}", e), Some(path))
        })?;
        let mut writer = HashingWriter::new(io::sink());
        io::copy(&mut file, &mut writer).map_err(|e| {
            PackageError::local_store(format!("failed to hash file: {}", e), Some(path))
        })?;
        let (_, digest, size) = writer.finish();
        Ok((digest, size))
    }

    /// Extract a `.tar.gz` blob into `target`
    ///
    /// When `expected_tar_digest` is given the uncompressed stream must match it
    /// before anything is written. Entries escaping `target` are rejected.
    pub fn unpack_archive(content: &[u8], target: &Path, expected_tar_digest: Option<&str>) -> Result<()> {
        let mut tar_bytes = Vec::new();
        GzDecoder::new(content)
            .read_to_end(&mut tar_bytes)
            .map_err(|e| {
                PackageError::local_store(format!("failed to decompress archive: {}", e), Some(target))
            })?;

        if let Some(expected) = expected_tar_digest {
            let actual = DigestUtils::compute_digest(&tar_bytes);
            if actual != expected {
                return Err(PackageError::local_store(
                    format!("archive digest mismatch: expected {}, got {}", expected, actual),
                    Some(target),
                ));
            }
        }

        fs::create_dir_all(target).map_err(|e| {
            PackageError::local_store(format!("failed to create directory: {}", e), Some(target))
        })?;

        let wrap = |e: io::Error| {
            PackageError::local_store(format!("failed to extract archive: {}", e), Some(target))
        };
        let mut archive = Archive::new(tar_bytes.as_slice());
        for entry in archive.entries().map_err(wrap)? {
            let mut entry = entry.map_err(wrap)?;
            let entry_path = entry.path().map_err(wrap)?.into_owned();
            if !entry.unpack_in(target).map_err(wrap)? {
                return Err(PackageError::local_store(
                    format!("archive entry escapes target: {}", entry_path.display()),
                    Some(target),
                ));
            }
        }

        Ok(())
    }
}
