//! Crash-safe file replacement: write a `NamedTempFile` beside the
//! destination, fsync it, persist it over the destination, then fsync the
//! parent directory. Readers observe either the previous file or the
//! complete new one.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;

    // Same directory, so the final rename never crosses filesystems.
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    temp.write_all(contents)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    temp.flush()
        .with_context(|| format!("failed to flush temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;

    // An unpersisted temp file is removed when it drops.
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to persist {}", path.display()))?;

    sync_directory(parent)
}

pub fn sync_directory(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .with_context(|| format!("failed to sync directory {}", dir.display()))
}
