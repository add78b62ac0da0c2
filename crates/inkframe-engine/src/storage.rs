use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Scratch directory for per-image files that only live for one composition.
///
/// Files are named from the wall clock plus a per-store sequence number.
/// Nothing is locked; two stores sharing a directory can collide only if
/// they hit the same millisecond and sequence.
#[derive(Debug)]
pub struct TempStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl TempStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decodes `base64` and writes it as a PNG file; the returned path is the
    /// handle for [`TempStore::delete_image`].
    pub fn save_image(&self, base64: &str) -> Result<PathBuf> {
        let bytes = BASE64
            .decode(base64.trim().as_bytes())
            .context("image base64 decode failed")?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().timestamp_millis();
        let path = self.dir.join(format!("image-{stamp}-{seq:03}.png"));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Best-effort removal; failures are logged and swallowed.
    pub fn delete_image(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to delete temp file");
        }
    }
}
