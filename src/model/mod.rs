//! Data model shared between the storage layer and the application services.

pub mod image;
pub mod row;
pub mod submission;

pub use image::{ImageColumn, ImagePatch, StoredImage, UploadedImage};
pub use row::{OutputStatus, RowPatch, TableRow};
pub use submission::{Submission, SubmissionDraft, SubmissionPatch, SubmissionStatus};

/// Identity of the person working the staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioUser {
    pub id: String,
    pub name: String,
}

impl StudioUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        StudioUser {
            id: id.into(),
            name: name.into(),
        }
    }
}
