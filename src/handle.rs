//! Lifecycle bridge between the storage layer and application services.
//!
//! A [`StoreHandle`] is what pages and services hold instead of the raw
//! gateway. It tracks readiness and the most recent storage error, fails
//! fast on hosts without persistence, and brings the connection back up
//! when the engine dropped it, so one evicted connection does not strand
//! the session.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    ImagePatch, RowPatch, StoredImage, Submission, SubmissionPatch, SubmissionStatus, TableRow,
};
use crate::store::gateway::StoreGateway;
use crate::store::StoreKey;

#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    gateway: StoreGateway,
    initialized: AtomicBool,
    last_error: Mutex<Option<StoreError>>,
}

impl StoreHandle {
    /// Wrap a gateway. Call [`init`](Self::init) during wiring, or let the
    /// first operation initialize lazily.
    pub fn new(gateway: StoreGateway) -> Self {
        StoreHandle {
            inner: Arc::new(HandleInner {
                gateway,
                initialized: AtomicBool::new(false),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn gateway(&self) -> &StoreGateway {
        &self.inner.gateway
    }

    /// Explicit initialization; records the outcome either way.
    pub async fn init(&self) -> StoreResult<()> {
        match self.inner.gateway.initialize().await {
            Ok(()) => {
                self.inner.initialized.store(true, Ordering::SeqCst);
                self.set_error(None);
                Ok(())
            }
            Err(err) => {
                self.inner.initialized.store(false, Ordering::SeqCst);
                warn!(%err, "store initialization failed");
                self.set_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Re-run initialization on demand, the retry affordance after a failed
    /// start. Clears the recorded error on success.
    pub async fn retry_initialization(&self) -> StoreResult<()> {
        self.init().await
    }

    /// True once initialization has succeeded, until [`close`](Self::close).
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst) && self.inner.gateway.is_ready()
    }

    /// The most recent storage error, kept until the next success or an
    /// explicit [`clear_error`](Self::clear_error).
    pub fn last_error(&self) -> Option<StoreError> {
        self.inner
            .last_error
            .lock()
            .expect("handle lock poisoned")
            .clone()
    }

    pub fn clear_error(&self) {
        self.set_error(None);
    }

    /// Drop the connection; later operations re-initialize lazily.
    pub fn close(&self) {
        self.inner.gateway.close();
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    // --- submissions ---

    pub async fn add_submission(&self, submission: &Submission) -> StoreResult<()> {
        self.run(self.inner.gateway.add(submission)).await
    }

    pub async fn get_submission(&self, id: &str) -> StoreResult<Option<Submission>> {
        self.run(self.inner.gateway.get(StoreKey::text(id))).await
    }

    pub async fn all_submissions(&self) -> StoreResult<Vec<Submission>> {
        self.run(self.inner.gateway.get_all()).await
    }

    /// Atomic patch of the mutable submission fields; returns the merged
    /// record the store now holds.
    pub async fn update_submission(
        &self,
        id: &str,
        patch: SubmissionPatch,
    ) -> StoreResult<Submission> {
        self.run(self.inner.gateway.update(StoreKey::text(id), patch))
            .await
    }

    pub async fn delete_submission(&self, id: &str) -> StoreResult<()> {
        self.run(self.inner.gateway.delete::<Submission>(StoreKey::text(id)))
            .await
    }

    pub async fn submissions_by_user(&self, user_id: &str) -> StoreResult<Vec<Submission>> {
        self.run(self.inner.gateway.get_by_index("user_id", user_id))
            .await
    }

    pub async fn submissions_by_status(
        &self,
        status: SubmissionStatus,
    ) -> StoreResult<Vec<Submission>> {
        self.run(self.inner.gateway.get_by_index("status", status.as_str()))
            .await
    }

    pub async fn submissions_by_priority(&self, priority: &str) -> StoreResult<Vec<Submission>> {
        self.run(self.inner.gateway.get_by_index("priority", priority))
            .await
    }

    // --- staging rows ---

    pub async fn add_row(&self, row: &TableRow) -> StoreResult<()> {
        self.run(self.inner.gateway.add(row)).await
    }

    pub async fn get_row(&self, id: u32) -> StoreResult<Option<TableRow>> {
        self.run(self.inner.gateway.get(StoreKey::from(id))).await
    }

    pub async fn all_rows(&self) -> StoreResult<Vec<TableRow>> {
        self.run(self.inner.gateway.get_all()).await
    }

    pub async fn update_row(&self, id: u32, patch: RowPatch) -> StoreResult<TableRow> {
        self.run(self.inner.gateway.update(StoreKey::from(id), patch))
            .await
    }

    pub async fn delete_row(&self, id: u32) -> StoreResult<()> {
        self.run(self.inner.gateway.delete::<TableRow>(StoreKey::from(id)))
            .await
    }

    pub async fn rows_by_user(&self, user_id: &str) -> StoreResult<Vec<TableRow>> {
        self.run(self.inner.gateway.get_by_index("user_id", user_id))
            .await
    }

    // --- images ---

    pub async fn add_image(&self, image: &StoredImage) -> StoreResult<()> {
        self.run(self.inner.gateway.add(image)).await
    }

    pub async fn get_image(&self, id: &str) -> StoreResult<Option<StoredImage>> {
        self.run(self.inner.gateway.get(StoreKey::text(id))).await
    }

    pub async fn images_by_submission(&self, submission_id: &str) -> StoreResult<Vec<StoredImage>> {
        self.run(self.inner.gateway.get_by_index("submission_id", submission_id))
            .await
    }

    pub async fn update_image(&self, id: &str, patch: ImagePatch) -> StoreResult<StoredImage> {
        self.run(self.inner.gateway.update(StoreKey::text(id), patch))
            .await
    }

    pub async fn delete_image(&self, id: &str) -> StoreResult<()> {
        self.run(self.inner.gateway.delete::<StoredImage>(StoreKey::text(id)))
            .await
    }

    // --- blobs and prefs ---

    pub async fn put_blob(&self, id: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.run(self.inner.gateway.put_blob(id, bytes)).await
    }

    pub async fn get_blob(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        self.run(self.inner.gateway.get_blob(id)).await
    }

    pub async fn delete_blob(&self, id: &str) -> StoreResult<()> {
        self.run(self.inner.gateway.delete_blob(id)).await
    }

    pub async fn set_pref(&self, key: &str, value: &str) -> StoreResult<()> {
        self.run(self.inner.gateway.set_pref(key, value)).await
    }

    pub async fn get_pref(&self, key: &str) -> StoreResult<Option<String>> {
        self.run(self.inner.gateway.get_pref(key)).await
    }

    pub async fn remove_pref(&self, key: &str) -> StoreResult<()> {
        self.run(self.inner.gateway.remove_pref(key)).await
    }

    // --- maintenance ---

    pub async fn clear_all_data(&self) -> StoreResult<()> {
        self.run(self.inner.gateway.clear_all_data()).await
    }

    pub async fn store_counts(&self) -> StoreResult<Vec<(&'static str, u64)>> {
        self.run(self.inner.gateway.store_counts()).await
    }

    /// Every typed operation goes through here: fail fast on incapable
    /// hosts, reopen a dropped connection, then run the operation and
    /// record its outcome.
    async fn run<T>(&self, op: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        if !self.inner.gateway.is_supported() {
            let err = StoreError::UnsupportedEnvironment;
            self.set_error(Some(err.clone()));
            return Err(err);
        }
        if !self.inner.gateway.is_ready() {
            if let Err(err) = self.inner.gateway.initialize().await {
                self.set_error(Some(err.clone()));
                return Err(err);
            }
            self.inner.initialized.store(true, Ordering::SeqCst);
        }
        match op.await {
            Ok(value) => {
                self.set_error(None);
                Ok(value)
            }
            Err(err) => {
                self.set_error(Some(err.clone()));
                Err(err)
            }
        }
    }

    fn set_error(&self, err: Option<StoreError>) {
        *self.inner.last_error.lock().expect("handle lock poisoned") = err;
    }
}
