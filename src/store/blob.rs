//! Out-of-band storage for uploaded image bytes, plus the preview cache.
//!
//! Blob ids share the id space of [`UploadedImage::id`]: the metadata record
//! points at its bytes by carrying the same id. Detaching an image from a
//! row does not touch the blob; only [`delete_blob`] releases the bytes.
//!
//! [`UploadedImage::id`]: crate::model::UploadedImage
//! [`delete_blob`]: StoreGateway::delete_blob

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use image::imageops::FilterType;
use image::GenericImageView;
use rusqlite::OptionalExtension;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::gateway::StoreGateway;

/// Square bound on preview edges.
const PREVIEW_SIZE: u32 = 256;

impl StoreGateway {
    /// Store image bytes under `id`. Overwrites are allowed here: the blob
    /// surface is addressed by upload id, and re-putting an id replaces its
    /// content.
    pub async fn put_blob(&self, id: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO blobs (id, bytes, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, bytes, Utc::now().timestamp()],
            )
            .map_err(|e| blob_failed("put_blob", e))?;
            Ok(())
        })
        .await
    }

    pub async fn get_blob(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT bytes FROM blobs WHERE id = ?1", [&id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| blob_failed("get_blob", e))
        })
        .await
    }

    /// Idempotent, like the object store delete path.
    pub async fn delete_blob(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM blobs WHERE id = ?1", [&id])
                .map_err(|e| blob_failed("delete_blob", e))?;
            Ok(())
        })
        .await
    }
}

fn blob_failed(op: &'static str, err: rusqlite::Error) -> StoreError {
    StoreError::OperationFailed {
        op,
        message: format!("store 'blobs': {err}"),
    }
}

/// Decode enough of `bytes` to report pixel dimensions.
///
/// Also serves as upload validation: bytes that do not decode as an image
/// are rejected before anything durable happens.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    Ok(img.dimensions())
}

/// Disk cache of small preview JPEGs for uploaded images.
///
/// Previews are scoped resources: [`PreviewHandle`] removes its file on
/// drop, so teardown, replacement and abandonment all release the bytes
/// they pinned.
pub struct PreviewCache {
    dir: PathBuf,
}

impl PreviewCache {
    /// Cache under the platform cache directory.
    pub fn open_default() -> StoreResult<Self> {
        let mut dir = dirs_next::cache_dir()
            .or_else(|| dirs_next::home_dir())
            .ok_or(StoreError::UnsupportedEnvironment)?;
        dir.push("decor-studio");
        dir.push("previews");
        Self::at_dir(dir)
    }

    /// Cache rooted at an explicit directory.
    pub fn at_dir(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::OperationFailed {
            op: "preview cache",
            message: format!("cannot create {}: {e}", dir.display()),
        })?;
        Ok(PreviewCache { dir })
    }

    /// Decode `bytes`, render a bounded preview JPEG and hand back its
    /// scoped handle.
    pub fn render(&self, image_id: &str, bytes: &[u8]) -> StoreResult<PreviewHandle> {
        let img = image::load_from_memory(bytes).map_err(|e| StoreError::OperationFailed {
            op: "preview decode",
            message: e.to_string(),
        })?;
        let preview = img.resize(PREVIEW_SIZE, PREVIEW_SIZE, FilterType::Lanczos3);
        let path = self.dir.join(format!("{image_id}.jpg"));
        // JPEG has no alpha channel, flatten before encoding.
        preview
            .to_rgb8()
            .save(&path)
            .map_err(|e| StoreError::OperationFailed {
                op: "preview encode",
                message: e.to_string(),
            })?;
        debug!(path = %path.display(), "preview rendered");
        Ok(PreviewHandle { path })
    }
}

/// Scoped reference to one cached preview file.
#[derive(Debug)]
pub struct PreviewHandle {
    path: PathBuf,
}

impl PreviewHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        // Removal is best-effort; a missing file is already released.
        let _ = fs::remove_file(&self.path);
    }
}
