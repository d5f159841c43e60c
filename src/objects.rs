//! Object storage for proof images.
//!
//! Paths are content-addressed by `{user_id}/{timestamp}.{ext}`, so they
//! are time-unique and no overwrite semantics are needed.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::UploadError;

/// A proof image captured by the user, held only until upload.
/// Records store the uploaded reference, never raw bytes.
#[derive(Debug, Clone)]
pub struct ProofImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ProofImage {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// File extension for a supported image content type.
pub fn extension_for(content_type: &str) -> Result<&'static str, UploadError> {
    match content_type {
        "image/jpeg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/heic" => Ok("heic"),
        "image/webp" => Ok("webp"),
        other => Err(UploadError::UnsupportedContentType(other.to_string())),
    }
}

/// Build the storage path for a user's proof image.
pub fn proof_path(user_id: &str, content_type: &str) -> Result<String, UploadError> {
    let ext = extension_for(content_type)?;
    Ok(format!("{user_id}/{}.{ext}", Utc::now().timestamp_millis()))
}

/// Object store the workflow uploads proof images into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`, returning the public reference.
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, UploadError>;
}

/// Filesystem-backed object store.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::EmptyImage);
        }
        extension_for(content_type)?;

        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::WriteFailed {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
        }

        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| UploadError::WriteFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        debug!(path = %full.display(), size = bytes.len(), "Proof image stored");
        Ok(full.display().to_string())
    }
}
