//! Tarball extraction for fetched manifest artifacts

use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use tar::Archive;

use crate::error::{CoreError, Result};

/// Extract a gzipped tarball stream into `dest`
///
/// Fails when the archive is corrupt or leaves `dest` empty. On failure the
/// directory is left in place for inspection.
pub fn extract_tarball<R: Read>(reader: R, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    let decoder = GzDecoder::new(reader);
    let mut archive = Archive::new(decoder);
    archive.unpack(dest).map_err(|e| CoreError::Archive {
        message: format!("failed to unpack into {}: {}", dest.display(), e),
    })?;

    if is_dir_empty(dest)? {
        return Err(CoreError::EmptyArchive {
            path: dest.display().to_string(),
        });
    }

    Ok(())
}

/// Extract an in-memory gzipped tarball into `dest`
pub fn extract_tarball_bytes(bytes: &[u8], dest: &Path) -> Result<()> {
    extract_tarball(bytes, dest)
}

fn is_dir_empty(dir: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}
