//! Staging table rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{self, RecordPatch, StoreDef, StoreKey, StoreRecord};

use super::image::{ImageColumn, UploadedImage};

/// UI-facing status of a row's output cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Idle,
    Generating,
    Completed,
    Error,
}

impl OutputStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStatus::Idle => "idle",
            OutputStatus::Generating => "generating",
            OutputStatus::Completed => "completed",
            OutputStatus::Error => "error",
        }
    }
}

/// One staging slot where a user accumulates images before submitting.
///
/// Output fields are a reduced mirror of the latest submission outcome; the
/// authoritative status always comes from projecting the submission
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// Small positional id, unique per table.
    pub id: u32,
    pub user_id: String,
    pub inspiration_images: Vec<UploadedImage>,
    pub area_images: Vec<UploadedImage>,
    pub output_status: OutputStatus,
    pub output_image: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

impl TableRow {
    /// A fresh empty row owned by `user_id`.
    pub fn seeded(id: u32, user_id: impl Into<String>) -> Self {
        TableRow {
            id,
            user_id: user_id.into(),
            inspiration_images: Vec::new(),
            area_images: Vec::new(),
            output_status: OutputStatus::Idle,
            output_image: None,
            generated_at: None,
        }
    }

    /// A row may be submitted only once both cells hold at least one image.
    pub fn is_eligible(&self) -> bool {
        !self.inspiration_images.is_empty() && !self.area_images.is_empty()
    }

    pub fn images(&self, column: ImageColumn) -> &[UploadedImage] {
        match column {
            ImageColumn::Inspiration => &self.inspiration_images,
            ImageColumn::Area => &self.area_images,
        }
    }
}

/// Mutable subset of a row. `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct RowPatch {
    pub inspiration_images: Option<Vec<UploadedImage>>,
    pub area_images: Option<Vec<UploadedImage>>,
    pub output_status: Option<OutputStatus>,
    pub output_image: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

impl RowPatch {
    /// Patch replacing the image collection of one column.
    pub fn images(column: ImageColumn, images: Vec<UploadedImage>) -> Self {
        match column {
            ImageColumn::Inspiration => RowPatch {
                inspiration_images: Some(images),
                ..Default::default()
            },
            ImageColumn::Area => RowPatch {
                area_images: Some(images),
                ..Default::default()
            },
        }
    }
}

impl RecordPatch<TableRow> for RowPatch {
    fn apply_to(&self, record: &mut TableRow) {
        if let Some(ref images) = self.inspiration_images {
            record.inspiration_images = images.clone();
        }
        if let Some(ref images) = self.area_images {
            record.area_images = images.clone();
        }
        if let Some(status) = self.output_status {
            record.output_status = status;
        }
        if let Some(ref image) = self.output_image {
            record.output_image = Some(image.clone());
        }
        if let Some(at) = self.generated_at {
            record.generated_at = Some(at);
        }
    }
}

impl StoreRecord for TableRow {
    const STORE: &'static StoreDef = &store::USER_ROWS;

    fn key(&self) -> StoreKey {
        StoreKey::Integer(self.id as i64)
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![Some(self.user_id.clone())]
    }
}
