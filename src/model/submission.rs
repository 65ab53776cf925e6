//! Submission records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{self, RecordPatch, StoreDef, StoreKey, StoreRecord};

use super::image::UploadedImage;

/// Lifecycle of a generation request.
///
/// Persisted in snake_case; `as_str` returns the same stable strings the
/// status index is built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        }
    }
}

/// A durable record of one request to generate a design from two image sets.
///
/// The id, owner, row reference and image collections never change after
/// creation. Only status, progress and the result image do, and only through
/// [`SubmissionPatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    /// The staging row this submission came from.
    pub row_id: u32,
    pub inspiration_images: Vec<UploadedImage>,
    pub area_images: Vec<UploadedImage>,
    pub status: SubmissionStatus,
    /// Percent complete while in progress.
    pub progress: Option<u8>,
    /// Reference to the generated design once completed.
    pub result_image: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub priority: Option<String>,
}

/// Caller-supplied fields for a new submission. The registry assigns the id
/// and the timestamp and pins the status to pending.
#[derive(Debug, Clone)]
pub struct SubmissionDraft {
    pub user_id: String,
    pub user_name: String,
    pub row_id: u32,
    pub inspiration_images: Vec<UploadedImage>,
    pub area_images: Vec<UploadedImage>,
    pub priority: Option<String>,
}

/// The mutable subset of a submission. Fields left `None` keep their current
/// value; everything not listed here is immutable by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionPatch {
    pub status: Option<SubmissionStatus>,
    pub progress: Option<u8>,
    pub result_image: Option<String>,
}

impl SubmissionPatch {
    pub fn status(status: SubmissionStatus) -> Self {
        SubmissionPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_result(mut self, image: impl Into<String>) -> Self {
        self.result_image = Some(image.into());
        self
    }
}

impl RecordPatch<Submission> for SubmissionPatch {
    fn apply_to(&self, record: &mut Submission) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(progress) = self.progress {
            record.progress = Some(progress);
        }
        if let Some(ref image) = self.result_image {
            record.result_image = Some(image.clone());
        }
    }
}

impl StoreRecord for Submission {
    const STORE: &'static StoreDef = &store::SUBMISSIONS;

    fn key(&self) -> StoreKey {
        StoreKey::text(&self.id)
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.user_id.clone()),
            Some(self.status.as_str().to_string()),
            self.priority.clone(),
        ]
    }
}
