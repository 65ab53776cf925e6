//! The staging table: fixed rows where a user pairs inspiration images with
//! photos of their own space before submitting them for generation.
//!
//! Rows persist across sessions. Every mutation goes through the store
//! first and only then lands in the in-memory copy, mirroring the registry's
//! write-through discipline.

use std::collections::HashSet;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult, StudioError};
use crate::handle::StoreHandle;
use crate::model::image::{new_image_id, ImageColumn, ImagePatch, StoredImage, UploadedImage};
use crate::model::{OutputStatus, RowPatch, StudioUser, Submission, SubmissionDraft, TableRow};
use crate::registry::SubmissionRegistry;
use crate::store::blob::image_dimensions;

/// One file handed to [`DesignTable::add_images`].
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Header statistics over the whole table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub inspiration_images: usize,
    pub area_images: usize,
    pub generated_outputs: usize,
}

pub struct DesignTable {
    handle: StoreHandle,
    user: StudioUser,
    seed_rows: u32,
    rows: RwLock<Vec<TableRow>>,
}

impl DesignTable {
    pub fn new(handle: StoreHandle, user: StudioUser, seed_rows: u32) -> Self {
        DesignTable {
            handle,
            user,
            seed_rows,
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn user(&self) -> &StudioUser {
        &self.user
    }

    /// Load this user's rows, seeding any missing ones up to the table size.
    ///
    /// Seeding is durable row by row, so a remount after a partial seed
    /// completes the table instead of starting over.
    pub async fn load_or_seed(&self) -> StoreResult<()> {
        let mut rows = self.handle.rows_by_user(&self.user.id).await?;
        let present: HashSet<u32> = rows.iter().map(|r| r.id).collect();
        let mut seeded = 0;
        for id in 1..=self.seed_rows {
            if !present.contains(&id) {
                let row = TableRow::seeded(id, &self.user.id);
                self.handle.add_row(&row).await?;
                rows.push(row);
                seeded += 1;
            }
        }
        rows.sort_by_key(|r| r.id);
        if seeded > 0 {
            debug!(seeded, total = rows.len(), "staging table seeded");
        }
        *self.rows.write().expect("table lock poisoned") = rows;
        Ok(())
    }

    /// Attach uploaded files to one cell of a row.
    ///
    /// Each upload is validated by decoding its dimensions, then its bytes
    /// land in the blob store, and finally one durable row update covers the
    /// whole batch. The in-memory row changes last.
    pub async fn add_images(
        &self,
        row_id: u32,
        column: ImageColumn,
        uploads: Vec<ImageUpload>,
    ) -> Result<Vec<UploadedImage>, StudioError> {
        let row = self.row(row_id).ok_or(StudioError::RowNotFound(row_id))?;

        let mut added = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let (width, height) =
                image_dimensions(&upload.bytes).map_err(|message| StudioError::UnreadableImage {
                    name: upload.filename.clone(),
                    message,
                })?;
            let image = UploadedImage {
                id: new_image_id(row_id, column),
                name: upload.filename,
                size: upload.bytes.len() as u64,
                width: Some(width),
                height: Some(height),
                uploaded_at: Utc::now(),
            };
            self.handle.put_blob(&image.id, upload.bytes).await?;
            added.push(image);
        }

        let mut images = row.images(column).to_vec();
        images.extend(added.iter().cloned());
        let merged = self
            .handle
            .update_row(row_id, RowPatch::images(column, images))
            .await?;
        self.replace_row(merged);
        debug!(
            row = row_id,
            column = column.as_str(),
            count = added.len(),
            "images attached"
        );
        Ok(added)
    }

    /// Detach one image from a cell. Returns the removed metadata, or `None`
    /// when the id was not attached there.
    ///
    /// The blob is left alone: detaching is not deletion, and the bytes stay
    /// reachable by id until [`StoreHandle::delete_blob`] runs.
    pub async fn remove_image(
        &self,
        row_id: u32,
        column: ImageColumn,
        image_id: &str,
    ) -> Result<Option<UploadedImage>, StudioError> {
        let row = self.row(row_id).ok_or(StudioError::RowNotFound(row_id))?;

        let mut images = row.images(column).to_vec();
        let Some(pos) = images.iter().position(|img| img.id == image_id) else {
            return Ok(None);
        };
        let removed = images.remove(pos);

        let merged = self
            .handle
            .update_row(row_id, RowPatch::images(column, images))
            .await?;
        self.replace_row(merged);
        Ok(Some(removed))
    }

    /// Submit unlocks only once both cells hold at least one image.
    pub fn is_eligible(&self, row_id: u32) -> bool {
        self.row(row_id).map(|r| r.is_eligible()).unwrap_or(false)
    }

    /// Submit one staged row: create the pending submission, mirror its
    /// images into the image store, and flip the row to generating.
    ///
    /// Ineligible rows are rejected before anything durable happens. If the
    /// image mirror fails after the submission landed, the submission is
    /// rolled back so no half-submitted state survives.
    pub async fn submit(
        &self,
        row_id: u32,
        registry: &SubmissionRegistry,
    ) -> Result<Submission, StudioError> {
        let row = self.row(row_id).ok_or(StudioError::RowNotFound(row_id))?;
        if !row.is_eligible() {
            return Err(StudioError::NotEligible {
                row_id,
                inspiration: row.inspiration_images.len(),
                area: row.area_images.len(),
            });
        }

        let submission = registry
            .add_submission(SubmissionDraft {
                user_id: self.user.id.clone(),
                user_name: self.user.name.clone(),
                row_id,
                inspiration_images: row.inspiration_images.clone(),
                area_images: row.area_images.clone(),
                priority: None,
            })
            .await?;

        for image in submission
            .inspiration_images
            .iter()
            .chain(&submission.area_images)
        {
            let record = StoredImage::new(image.clone(), submission.id.clone());
            let mirrored = match self.handle.add_image(&record).await {
                // The image was already mirrored by an earlier submission of
                // this row; the newest submission takes ownership.
                Err(StoreError::DuplicateKey { .. }) => self
                    .handle
                    .update_image(
                        &image.id,
                        ImagePatch {
                            submission_id: Some(submission.id.clone()),
                        },
                    )
                    .await
                    .map(|_| ()),
                other => other,
            };
            if let Err(err) = mirrored {
                warn!(%err, id = %submission.id, "image mirror failed, rolling back submission");
                let _ = registry.delete_submission(&submission.id).await;
                return Err(err.into());
            }
        }

        let merged = self
            .handle
            .update_row(
                row_id,
                RowPatch {
                    output_status: Some(OutputStatus::Generating),
                    ..Default::default()
                },
            )
            .await?;
        self.replace_row(merged);
        debug!(row = row_id, id = %submission.id, "row submitted");
        Ok(submission)
    }

    /// Record a finished generation on the row. The row fields are a reduced
    /// mirror of the submission outcome, never the authority.
    pub async fn mark_completed(
        &self,
        row_id: u32,
        output_image: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<(), StudioError> {
        let merged = self
            .handle
            .update_row(
                row_id,
                RowPatch {
                    output_status: Some(OutputStatus::Completed),
                    output_image: Some(output_image.to_string()),
                    generated_at: Some(generated_at),
                    ..Default::default()
                },
            )
            .await?;
        self.replace_row(merged);
        Ok(())
    }

    pub async fn mark_failed(&self, row_id: u32) -> Result<(), StudioError> {
        let merged = self
            .handle
            .update_row(
                row_id,
                RowPatch {
                    output_status: Some(OutputStatus::Error),
                    ..Default::default()
                },
            )
            .await?;
        self.replace_row(merged);
        Ok(())
    }

    /// Current rows, ordered by id.
    pub fn rows(&self) -> Vec<TableRow> {
        self.rows.read().expect("table lock poisoned").clone()
    }

    pub fn row(&self, row_id: u32) -> Option<TableRow> {
        self.rows
            .read()
            .expect("table lock poisoned")
            .iter()
            .find(|r| r.id == row_id)
            .cloned()
    }

    pub fn stats(&self) -> TableStats {
        let rows = self.rows.read().expect("table lock poisoned");
        rows.iter().fold(TableStats::default(), |mut stats, row| {
            stats.inspiration_images += row.inspiration_images.len();
            stats.area_images += row.area_images.len();
            if row.output_image.is_some() {
                stats.generated_outputs += 1;
            }
            stats
        })
    }

    fn replace_row(&self, row: TableRow) {
        let mut rows = self.rows.write().expect("table lock poisoned");
        if let Some(slot) = rows.iter_mut().find(|r| r.id == row.id) {
            *slot = row;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubmissionStatus;
    use crate::store::gateway::StoreGateway;
    use std::io::Cursor;

    fn png_upload(name: &str) -> ImageUpload {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        ImageUpload {
            filename: name.to_string(),
            bytes: buf.into_inner(),
        }
    }

    async fn studio() -> (DesignTable, SubmissionRegistry) {
        let handle = StoreHandle::new(StoreGateway::in_memory());
        handle.init().await.unwrap();
        let registry = SubmissionRegistry::new(handle.clone());
        registry.load().await.unwrap();
        let table = DesignTable::new(handle, StudioUser::new("user-1", "Sam"), 15);
        table.load_or_seed().await.unwrap();
        (table, registry)
    }

    #[tokio::test]
    async fn test_seed_creates_full_table() {
        let (table, _) = studio().await;
        let rows = table.rows();
        assert_eq!(rows.len(), 15);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[14].id, 15);
        assert!(rows.iter().all(|r| r.output_status == OutputStatus::Idle));

        // Durable as well.
        let stored = table.handle.all_rows().await.unwrap();
        assert_eq!(stored.len(), 15);
    }

    #[tokio::test]
    async fn test_reload_keeps_rows_and_backfills() {
        let handle = StoreHandle::new(StoreGateway::in_memory());
        handle.init().await.unwrap();

        let table = DesignTable::new(handle.clone(), StudioUser::new("user-1", "Sam"), 3);
        table.load_or_seed().await.unwrap();
        table
            .add_images(2, ImageColumn::Area, vec![png_upload("rug.png")])
            .await
            .unwrap();

        // A remount with a larger table keeps row 2 and fills the gap.
        let table = DesignTable::new(handle, StudioUser::new("user-1", "Sam"), 5);
        table.load_or_seed().await.unwrap();
        let rows = table.rows();
        assert_eq!(rows.len(), 5);
        assert_eq!(table.row(2).unwrap().area_images.len(), 1);
    }

    #[tokio::test]
    async fn test_add_images_stores_bytes_and_metadata() {
        let (table, _) = studio().await;
        let added = table
            .add_images(
                1,
                ImageColumn::Inspiration,
                vec![png_upload("a.png"), png_upload("b.png")],
            )
            .await
            .unwrap();

        assert_eq!(added.len(), 2);
        assert!(added[0].id.starts_with("1-inspiration-"));
        assert_eq!(added[0].width, Some(4));

        let row = table.row(1).unwrap();
        assert_eq!(row.inspiration_images.len(), 2);

        // Bytes are reachable through the blob store under the image id.
        let bytes = table.handle.get_blob(&added[0].id).await.unwrap();
        assert!(bytes.is_some());
    }

    #[tokio::test]
    async fn test_unreadable_upload_is_rejected() {
        let (table, _) = studio().await;
        let err = table
            .add_images(
                1,
                ImageColumn::Area,
                vec![ImageUpload {
                    filename: "notes.txt".into(),
                    bytes: b"plain text".to_vec(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::UnreadableImage { .. }));
        assert!(table.row(1).unwrap().area_images.is_empty());
    }

    #[tokio::test]
    async fn test_remove_image_detaches_but_keeps_blob() {
        let (table, _) = studio().await;
        let added = table
            .add_images(1, ImageColumn::Area, vec![png_upload("rug.png")])
            .await
            .unwrap();
        let image_id = added[0].id.clone();

        let removed = table
            .remove_image(1, ImageColumn::Area, &image_id)
            .await
            .unwrap();
        assert_eq!(removed.unwrap().id, image_id);
        assert!(table.row(1).unwrap().area_images.is_empty());

        // Detaching does not release the bytes.
        assert!(table.handle.get_blob(&image_id).await.unwrap().is_some());

        // Removing again is a quiet no-op.
        let removed = table
            .remove_image(1, ImageColumn::Area, &image_id)
            .await
            .unwrap();
        assert!(removed.is_none());
    }

    #[tokio::test]
    async fn test_eligibility_gates_submit() {
        let (table, registry) = studio().await;
        table
            .add_images(
                3,
                ImageColumn::Inspiration,
                vec![png_upload("a.png"), png_upload("b.png")],
            )
            .await
            .unwrap();
        assert!(!table.is_eligible(3));

        let err = table.submit(3, &registry).await.unwrap_err();
        assert!(matches!(
            err,
            StudioError::NotEligible { row_id: 3, inspiration: 2, area: 0 }
        ));
        assert!(registry.snapshot().is_empty());

        table
            .add_images(3, ImageColumn::Area, vec![png_upload("room.png")])
            .await
            .unwrap();
        assert!(table.is_eligible(3));

        let submission = table.submit(3, &registry).await.unwrap();
        assert_eq!(submission.status, SubmissionStatus::Pending);
        assert_eq!(submission.row_id, 3);
        assert_eq!(submission.inspiration_images.len(), 2);
        assert_eq!(submission.area_images.len(), 1);
        assert_eq!(table.row(3).unwrap().output_status, OutputStatus::Generating);
        assert_eq!(registry.row_status(3), OutputStatus::Generating);
    }

    #[tokio::test]
    async fn test_submit_mirrors_images_by_submission() {
        let (table, registry) = studio().await;
        table
            .add_images(2, ImageColumn::Inspiration, vec![png_upload("a.png")])
            .await
            .unwrap();
        table
            .add_images(2, ImageColumn::Area, vec![png_upload("b.png")])
            .await
            .unwrap();

        let submission = table.submit(2, &registry).await.unwrap();
        let mirrored = table
            .handle
            .images_by_submission(&submission.id)
            .await
            .unwrap();
        assert_eq!(mirrored.len(), 2);
        assert!(mirrored.iter().all(|m| m.submission_id == submission.id));
    }

    #[tokio::test]
    async fn test_resubmit_reparents_mirrored_images() {
        let (table, registry) = studio().await;
        table
            .add_images(1, ImageColumn::Inspiration, vec![png_upload("a.png")])
            .await
            .unwrap();
        table
            .add_images(1, ImageColumn::Area, vec![png_upload("b.png")])
            .await
            .unwrap();

        let first = table.submit(1, &registry).await.unwrap();
        let second = table.submit(1, &registry).await.unwrap();
        assert_ne!(first.id, second.id);

        // The same staged images now belong to the newest submission.
        let of_first = table.handle.images_by_submission(&first.id).await.unwrap();
        assert!(of_first.is_empty());
        let of_second = table.handle.images_by_submission(&second.id).await.unwrap();
        assert_eq!(of_second.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_row_is_reported() {
        let (table, registry) = studio().await;
        let err = table.submit(99, &registry).await.unwrap_err();
        assert!(matches!(err, StudioError::RowNotFound(99)));
    }

    #[tokio::test]
    async fn test_stats_count_images_and_outputs() {
        let (table, _) = studio().await;
        table
            .add_images(1, ImageColumn::Inspiration, vec![png_upload("a.png")])
            .await
            .unwrap();
        table
            .add_images(
                2,
                ImageColumn::Area,
                vec![png_upload("b.png"), png_upload("c.png")],
            )
            .await
            .unwrap();
        table
            .mark_completed(5, "https://example.test/out.jpg", Utc::now())
            .await
            .unwrap();

        assert_eq!(
            table.stats(),
            TableStats {
                inspiration_images: 1,
                area_images: 2,
                generated_outputs: 1,
            }
        );
    }
}
