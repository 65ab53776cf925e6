//! Pure projection from the submission collection to per-row UI status.
//!
//! The submission collection is the single source of truth; rows never
//! store an authoritative status of their own. Keeping this a free function
//! over a slice makes it trivially testable and safe to call on every
//! render.

use crate::model::{OutputStatus, Submission, SubmissionStatus};

/// Derive the UI-facing status of one staging row.
///
/// A row referenced by no submission is idle. When several submissions
/// reference the same row, the most recently added one wins; the collection
/// is kept in insertion order, so that is the last match.
pub fn project_row_status(submissions: &[Submission], row_id: u32) -> OutputStatus {
    let latest = submissions.iter().rev().find(|s| s.row_id == row_id);
    match latest.map(|s| s.status) {
        None => OutputStatus::Idle,
        Some(SubmissionStatus::Pending) | Some(SubmissionStatus::InProgress) => {
            OutputStatus::Generating
        }
        Some(SubmissionStatus::Completed) => OutputStatus::Completed,
        Some(SubmissionStatus::Failed) => OutputStatus::Error,
    }
}

/// The result image for a completed row, if any.
pub fn project_row_result<'a>(submissions: &'a [Submission], row_id: u32) -> Option<&'a str> {
    submissions
        .iter()
        .rev()
        .find(|s| s.row_id == row_id)
        .filter(|s| s.status == SubmissionStatus::Completed)
        .and_then(|s| s.result_image.as_deref())
}
