//
// storage.rs
// Dicom-Courier-rs
//
// Output directory for created files: collision-free naming from a sanitized stem
// plus a content hash, atomic writes and a path traversal guard for lookups.
//
// Dicom-Courier-rs contributors - October 2026

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create output directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Store `bytes` as `<stem>-<hash>.dcm` and return the full path.
    pub fn save(&self, stem: Option<&str>, bytes: &[u8]) -> Result<PathBuf> {
        let stem = stem
            .map(sanitize_filename)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "capture".to_string());

        // hash suffix keeps two captures of the same second apart
        let hash = hex::encode(Sha256::digest(bytes));
        let path = self.root.join(format!("{}-{}.dcm", stem, &hash[..12]));
        write_atomically(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Resolve a name relative to the output directory, refusing anything outside it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let candidate = self.root.join(name);
        // canonicalize both sides so symlinks and `..` cannot escape
        let canonical_root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let canonical = candidate
            .canonicalize()
            .with_context(|| format!("File not found: {}", name))?;
        if !canonical.starts_with(&canonical_root) {
            bail!("Attempt to access file outside output directory");
        }
        Ok(canonical)
    }
}

/// Write to a sibling temporary file, flush it to disk, then rename over `path`.
///
/// Nothing is left at `path` unless the full write succeeded, and after a
/// crash `path` holds either the old or the new content.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }
    let tmp = temporary_path(path);
    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    sync_directory(parent.unwrap_or_else(|| Path::new(".")));
    Ok(())
}

/// Persist the rename itself. Platforms that cannot open a directory skip this.
fn sync_directory(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
