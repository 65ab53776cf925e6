//! Shared submission registry.
//!
//! The process-wide collection every consumer reads, kept write-through:
//! mutations land durably first, the in-memory projection second, and the
//! change feed last. A failed durable write leaves memory untouched, so the
//! projection never shows state the store does not hold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::handle::StoreHandle;
use crate::model::image::random_suffix;
use crate::model::{OutputStatus, Submission, SubmissionDraft, SubmissionPatch, SubmissionStatus};
use crate::status::project_row_status;

/// Capacity of the change feed. Slow subscribers lose old events rather
/// than blocking writers.
const EVENT_CAPACITY: usize = 64;

/// Length of the random portion of a submission id.
const ID_SUFFIX_LEN: usize = 9;

/// Change notifications emitted after each successful durable mutation.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// Initial load finished with this many records.
    Loaded { count: usize },
    Added(Submission),
    Updated(Submission),
    Deleted { id: String },
}

pub struct SubmissionRegistry {
    handle: StoreHandle,
    /// Insertion-ordered projection of the submissions store.
    submissions: RwLock<Vec<Submission>>,
    loading: AtomicBool,
    last_error: Mutex<Option<StoreError>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl SubmissionRegistry {
    /// A registry starts empty and loading; call [`load`](Self::load) once
    /// during wiring.
    pub fn new(handle: StoreHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SubmissionRegistry {
            handle,
            submissions: RwLock::new(Vec::new()),
            loading: AtomicBool::new(true),
            last_error: Mutex::new(None),
            events,
        }
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Seed the in-memory collection from the store.
    ///
    /// Consumers see [`is_loading`](Self::is_loading) until this settles, so
    /// an empty collection is distinguishable from one that has not arrived
    /// yet. Hosts without persistence settle quietly on empty.
    pub async fn load(&self) -> StoreResult<()> {
        if !self.handle.gateway().is_supported() {
            self.loading.store(false, Ordering::SeqCst);
            return Ok(());
        }
        let result = self.handle.all_submissions().await;
        self.loading.store(false, Ordering::SeqCst);
        match result {
            Ok(mut all) => {
                // get_all returns rows in table order; pin submission order here.
                all.sort_by_key(|s| s.submitted_at);
                let count = all.len();
                *self.submissions.write().expect("registry lock poisoned") = all;
                self.set_error(None);
                let _ = self.events.send(RegistryEvent::Loaded { count });
                info!(count, "submission registry loaded");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "failed to load submissions");
                self.set_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Durably create a submission from a draft, then project it.
    ///
    /// The id (millisecond timestamp plus random suffix), the timestamp and
    /// the pending status are assigned here; callers never supply them.
    pub async fn add_submission(&self, draft: SubmissionDraft) -> StoreResult<Submission> {
        let submission = Submission {
            id: new_submission_id(),
            user_id: draft.user_id,
            user_name: draft.user_name,
            row_id: draft.row_id,
            inspiration_images: draft.inspiration_images,
            area_images: draft.area_images,
            status: SubmissionStatus::Pending,
            progress: None,
            result_image: None,
            submitted_at: Utc::now(),
            priority: draft.priority,
        };
        match self.handle.add_submission(&submission).await {
            Ok(()) => {
                self.submissions
                    .write()
                    .expect("registry lock poisoned")
                    .push(submission.clone());
                self.set_error(None);
                let _ = self.events.send(RegistryEvent::Added(submission.clone()));
                debug!(id = %submission.id, row = submission.row_id, "submission added");
                Ok(submission)
            }
            Err(err) => {
                self.set_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Durable update first; memory then takes the merged record the store
    /// returned, so the two can never diverge.
    pub async fn update_submission(
        &self,
        id: &str,
        patch: SubmissionPatch,
    ) -> StoreResult<Submission> {
        match self.handle.update_submission(id, patch).await {
            Ok(merged) => {
                {
                    let mut all = self.submissions.write().expect("registry lock poisoned");
                    if let Some(slot) = all.iter_mut().find(|s| s.id == id) {
                        *slot = merged.clone();
                    }
                }
                self.set_error(None);
                let _ = self.events.send(RegistryEvent::Updated(merged.clone()));
                Ok(merged)
            }
            Err(err) => {
                self.set_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    pub async fn delete_submission(&self, id: &str) -> StoreResult<()> {
        match self.handle.delete_submission(id).await {
            Ok(()) => {
                self.submissions
                    .write()
                    .expect("registry lock poisoned")
                    .retain(|s| s.id != id);
                self.set_error(None);
                let _ = self.events.send(RegistryEvent::Deleted { id: id.to_string() });
                debug!(id, "submission deleted");
                Ok(())
            }
            Err(err) => {
                self.set_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Unfiltered snapshot in insertion order.
    pub fn snapshot(&self) -> Vec<Submission> {
        self.submissions
            .read()
            .expect("registry lock poisoned")
            .clone()
    }

    pub fn find(&self, id: &str) -> Option<Submission> {
        self.submissions
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn for_user(&self, user_id: &str) -> Vec<Submission> {
        self.submissions
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn with_status(&self, status: SubmissionStatus) -> Vec<Submission> {
        self.submissions
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }

    /// UI status of a staging row, derived from the collection.
    pub fn row_status(&self, row_id: u32) -> OutputStatus {
        project_row_status(
            &self.submissions.read().expect("registry lock poisoned"),
            row_id,
        )
    }

    /// True from construction until the first [`load`](Self::load) settles.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<StoreError> {
        self.last_error
            .lock()
            .expect("registry lock poisoned")
            .clone()
    }

    /// Subscribe to the change feed. Events arrive strictly after the
    /// durable write and the memory update they describe.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Re-run initialization and reload after a failed start.
    pub async fn retry_initialization(&self) -> StoreResult<()> {
        self.handle.retry_initialization().await?;
        self.loading.store(true, Ordering::SeqCst);
        self.load().await
    }

    fn set_error(&self, err: Option<StoreError>) {
        *self.last_error.lock().expect("registry lock poisoned") = err;
    }
}

/// Millisecond timestamp plus a 9-character base-36 suffix. Unique for the
/// lifetime of a database with overwhelming probability; the add path still
/// refuses duplicates outright.
fn new_submission_id() -> String {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        random_suffix(ID_SUFFIX_LEN)
    )
}
