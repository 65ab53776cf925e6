//! Uploaded image metadata.
//!
//! Records carry metadata only. The binary content lives out-of-band in the
//! blob store under the same id, so image documents stay small enough to
//! embed freely in rows and submissions.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::store::{self, RecordPatch, StoreDef, StoreKey, StoreRecord};

/// Length of the random portion of an image id.
const ID_SUFFIX_LEN: usize = 6;

/// Which cell of a staging row an image was dropped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageColumn {
    Inspiration,
    Area,
}

impl ImageColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageColumn::Inspiration => "inspiration",
            ImageColumn::Area => "area",
        }
    }
}

/// Metadata for one piece of user-supplied image content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedImage {
    /// Unique id, doubling as the blob store key for the bytes.
    pub id: String,
    /// Original filename, e.g. "living-room.jpg".
    pub name: String,
    /// Size of the uploaded bytes.
    pub size: u64,
    /// Pixel dimensions, when the upload could be decoded.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub uploaded_at: DateTime<Utc>,
}

/// An image as kept in the images store: the upload metadata plus the
/// submission that owns it, which is the indexed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    #[serde(flatten)]
    pub image: UploadedImage,
    pub submission_id: String,
}

impl StoredImage {
    pub fn new(image: UploadedImage, submission_id: impl Into<String>) -> Self {
        StoredImage {
            image,
            submission_id: submission_id.into(),
        }
    }
}

impl StoreRecord for StoredImage {
    const STORE: &'static StoreDef = &store::IMAGES;

    fn key(&self) -> StoreKey {
        StoreKey::text(&self.image.id)
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![Some(self.submission_id.clone())]
    }
}

/// Mutable subset of a stored image record. Ownership moves to a newer
/// submission when the same staged image is submitted again.
#[derive(Debug, Clone, Default)]
pub struct ImagePatch {
    pub submission_id: Option<String>,
}

impl RecordPatch<StoredImage> for ImagePatch {
    fn apply_to(&self, record: &mut StoredImage) {
        if let Some(ref id) = self.submission_id {
            record.submission_id = id.clone();
        }
    }
}

/// Build an image id from its row/column placement plus a millisecond
/// timestamp and a random suffix.
///
/// Two uploads into the same cell within the same millisecond still get
/// distinct ids thanks to the suffix.
pub fn new_image_id(row_id: u32, column: ImageColumn) -> String {
    format!(
        "{}-{}-{}-{}",
        row_id,
        column.as_str(),
        Utc::now().timestamp_millis(),
        random_suffix(ID_SUFFIX_LEN)
    )
}

/// Lowercase base-36 random string of the given length.
pub(crate) fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
