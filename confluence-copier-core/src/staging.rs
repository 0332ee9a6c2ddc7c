//! Local holding area for attachments between download and upload.
//!
//! The staging area owns one private directory, created fresh under the
//! configured parent, and never touches anything outside it. Each source
//! document gets its own batch directory inside it, named after the document
//! id, so batches for different documents never collide.
//!
//! Files are stored under generated keys, not their titles. The batch keeps a
//! manifest from key to the attachment's original title, so titles that map to
//! the same file name, or that are not valid file names at all, still come back
//! unchanged at upload time. A [`BatchHandle`] is consumed by
//! [`StagingArea::release`], which makes a released batch unusable by
//! construction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::StagingError;

const STAGING_DIR_PREFIX: &str = "confluence-copier-";

/// Directory owned by this process holding one sub-directory per staged document.
#[derive(Debug)]
pub struct StagingArea {
    root: TempDir,
    parent: PathBuf,
    created_parent: bool,
}

/// One file in a batch: where it lives and the name it is uploaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub key: String,
    pub name: String,
}

/// A staged batch for one source document. Valid until released.
#[derive(Debug)]
pub struct BatchHandle {
    source_id: String,
    path: PathBuf,
    next_key: AtomicUsize,
    manifest: Mutex<Vec<StagedFile>>,
}

impl BatchHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, file: StagedFile) {
        self.manifest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(file);
    }

    fn snapshot(&self) -> Vec<StagedFile> {
        self.manifest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StagingArea {
    /// Creates a fresh private staging directory inside `parent`, creating
    /// `parent` itself if it does not exist yet.
    pub async fn create_in(parent: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let parent = parent.into();
        let created_parent = !tokio::fs::try_exists(&parent).await.unwrap_or(false);
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StagingError::new("create", &parent, e))?;
        let root = tempfile::Builder::new()
            .prefix(STAGING_DIR_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| StagingError::new("create", &parent, e))?;
        info!(path = %root.path().display(), "[STAGING] Created staging directory");
        Ok(Self {
            root,
            parent,
            created_parent,
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Opens a fresh, empty batch for `source_id`, discarding an earlier batch for the same id.
    pub async fn stage(&self, source_id: &str) -> Result<BatchHandle, StagingError> {
        let path = self.root().join(sanitize_file_name(source_id));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| StagingError::new("clear", &path, e))?;
            debug!(path = %path.display(), "[STAGING] Removed stale batch");
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| StagingError::new("create", &path, e))?;
        info!(source_id, path = %path.display(), "[STAGING] Opened batch");
        Ok(BatchHandle {
            source_id: source_id.to_string(),
            path,
            next_key: AtomicUsize::new(0),
            manifest: Mutex::new(Vec::new()),
        })
    }

    /// Writes one file into the batch under a fresh key and records `file_name`
    /// as its upload name. `attachment_id` only makes the key readable on disk.
    pub async fn put(
        &self,
        handle: &BatchHandle,
        attachment_id: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<StagedFile, StagingError> {
        let seq = handle.next_key.fetch_add(1, Ordering::Relaxed);
        let key = format!("{seq:05}-{}", sanitize_file_name(attachment_id));
        let path = handle.path.join(&key);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| StagingError::new("write", &path, e))?;
        debug!(path = %path.display(), name = file_name, bytes = content.len(), "[STAGING] Stored file");
        let staged = StagedFile {
            key,
            name: file_name.to_string(),
        };
        handle.record(staged.clone());
        Ok(staged)
    }

    /// Files written to the batch so far, sorted by upload name.
    pub fn list_files(&self, handle: &BatchHandle) -> Vec<StagedFile> {
        let mut files = handle.snapshot();
        files.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));
        files
    }

    /// Reads back one staged file.
    pub async fn read(&self, handle: &BatchHandle, file: &StagedFile) -> Result<Vec<u8>, StagingError> {
        let path = handle.path.join(&file.key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| StagingError::new("read", &path, e))
    }

    /// Deletes the batch's backing directory.
    pub async fn release(&self, handle: BatchHandle) -> Result<(), StagingError> {
        match tokio::fs::remove_dir_all(&handle.path).await {
            Ok(()) => {
                debug!(source_id = %handle.source_id, "[STAGING] Released batch");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagingError::new("release", &handle.path, e)),
        }
    }

    /// Removes the private staging directory. Run once when a top-level
    /// command ends, whatever its outcome. The configured parent is removed
    /// too, but only when this run created it and it is empty afterwards.
    pub async fn cleanup(self) -> Result<(), StagingError> {
        let path = self.root.path().to_path_buf();
        self.root
            .close()
            .map_err(|e| StagingError::new("cleanup", &path, e))?;
        info!(path = %path.display(), "[STAGING] Deleted staging directory");
        if self.created_parent && tokio::fs::remove_dir(&self.parent).await.is_ok() {
            debug!(path = %self.parent.display(), "[STAGING] Removed empty staging parent");
        }
        Ok(())
    }
}

/// Replaces path separators and other characters that are unsafe in file names.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}
