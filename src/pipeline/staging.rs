// Scoped staging of uploaded files for the extraction engine.
// Each attempt gets a private directory; it disappears when the guard is
// released or dropped, whichever comes first.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use uuid::Uuid;

use super::PipelineError;

/// Prefix shared by every attempt directory under the staging root.
pub const STAGING_PREFIX: &str = "intake-";

/// Name of the staged upload inside its attempt directory (before extension).
const UPLOAD_STEM: &str = "upload";

/// An uploaded file staged on local disk for exactly one attempt.
#[derive(Debug)]
pub struct StagedUpload {
    attempt_id: Uuid,
    dir: TempDir,
    file_path: PathBuf,
}

impl StagedUpload {
    /// Write `bytes` into a fresh, uniquely named directory under `staging_root`.
    pub fn acquire(
        staging_root: &Path,
        attempt_id: Uuid,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<Self, PipelineError> {
        fs::create_dir_all(staging_root)
            .map_err(|e| PipelineError::storage(staging_root, e))?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{STAGING_PREFIX}{attempt_id}-"))
            .tempdir_in(staging_root)
            .map_err(|e| PipelineError::storage(staging_root, e))?;

        let file_path = dir
            .path()
            .join(format!("{UPLOAD_STEM}.{}", extension_for(content_type)));

        // Guard is already live: a failed write still removes the directory.
        let staged = Self {
            attempt_id,
            dir,
            file_path,
        };
        staged.write(bytes)?;

        tracing::debug!(
            attempt_id = %attempt_id,
            size = bytes.len(),
            path = %staged.file_path.display(),
            "Upload staged"
        );
        Ok(staged)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), PipelineError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.file_path)
            .map_err(|e| PipelineError::storage(&self.file_path, e))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| PipelineError::storage(&self.file_path, e))
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Path handed to the extraction engine.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Private directory owned by this attempt.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the staged directory and everything the engine wrote into it.
    ///
    /// Fails with a storage error if anything is left on disk.
    pub fn release(self) -> Result<(), PipelineError> {
        let path = self.dir.path().to_path_buf();
        if let Err(first) = self.dir.close() {
            tracing::debug!(path = %path.display(), "Closing staged dir failed, retrying: {first}");
            match fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PipelineError::storage(&path, e)),
            }
        }
        tracing::debug!(attempt_id = %self.attempt_id, "Staged upload released");
        Ok(())
    }
}

/// File extension the engine can use to pick a decoder.
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/tiff" => "tiff",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "text/plain" => "txt",
        _ => "bin",
    }
}

/// Remove attempt directories left behind by a crashed process.
///
/// Only entries carrying [`STAGING_PREFIX`] whose last modification is at
/// least `older_than` ago are touched; anything younger may belong to a
/// live attempt in another process. Returns the number of directories removed.
pub fn cleanup_orphaned_staging(staging_root: &Path, older_than: Duration) -> usize {
    let entries = match fs::read_dir(staging_root) {
        Ok(e) => e,
        Err(_) => return 0, // Staging root may not exist yet
    };

    let now = SystemTime::now();
    let mut count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_ours = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(STAGING_PREFIX));
        if !is_ours || !path.is_dir() {
            continue;
        }
        // Unknown or future mtime counts as young.
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if !age.is_some_and(|age| age >= older_than) {
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => count += 1,
            Err(e) => tracing::warn!(path = %path.display(), "Failed to remove orphaned staging dir: {e}"),
        }
    }

    if count > 0 {
        tracing::info!(dirs_cleaned = count, ?older_than, "Cleaned orphaned staging directories");
    }
    count
}
