//! Design generation jobs: the pluggable producer seam and the runner that
//! walks a submission through its lifecycle.
//!
//! The runner only ever talks to [`DesignGenerator`], so swapping the
//! simulator for a real pipeline changes nothing about persistence or
//! status transitions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::{SubmissionPatch, SubmissionStatus, UploadedImage};
use crate::registry::SubmissionRegistry;
use crate::table::DesignTable;

/// Everything a generator gets to work with. Metadata only; a real backend
/// resolves bytes through the blob store by image id.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub submission_id: String,
    pub row_id: u32,
    pub inspiration_images: Vec<UploadedImage>,
    pub area_images: Vec<UploadedImage>,
}

/// A finished design: a reference to the produced image, URL or blob id.
#[derive(Debug, Clone)]
pub struct GeneratedDesign {
    pub image: String,
}

/// Failure reported by a generator backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("generation failed: {message}")]
pub struct GenerationError {
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        GenerationError {
            message: message.into(),
        }
    }
}

/// Asynchronous design producer.
#[async_trait]
pub trait DesignGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest)
        -> Result<GeneratedDesign, GenerationError>;
}

/// Stand-in outputs served while no real pipeline is wired up.
const SAMPLE_OUTPUTS: [&str; 5] = [
    "https://images.unsplash.com/photo-1586023492125-27b2c045efd7?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1555041469-a586c61ea9bc?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1493809842364-78817add7ffb?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1567538096630-e0c55bd6374c?w=400&h=300&fit=crop",
    "https://images.unsplash.com/photo-1584622650111-993a426fbf0a?w=400&h=300&fit=crop",
];

/// Simulated generator: waits out a configured delay, then returns one of
/// its sample outputs at random.
pub struct MockGenerator {
    delay: Duration,
    outputs: Vec<String>,
}

impl MockGenerator {
    pub fn new(delay: Duration) -> Self {
        MockGenerator {
            delay,
            outputs: SAMPLE_OUTPUTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the sample outputs; tests pin a single value.
    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }
}

#[async_trait]
impl DesignGenerator for MockGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedDesign, GenerationError> {
        debug!(id = %request.submission_id, "mock generation started");
        sleep(self.delay).await;
        if self.outputs.is_empty() {
            return Err(GenerationError::new("no sample outputs configured"));
        }
        let pick = rand::thread_rng().gen_range(0..self.outputs.len());
        Ok(GeneratedDesign {
            image: self.outputs[pick].clone(),
        })
    }
}

/// Drives one submission from pending through in_progress to its terminal
/// status, mirroring the reduced outcome onto the staging row.
///
/// Cloning shares the registry, table and generator.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<SubmissionRegistry>,
    table: Arc<DesignTable>,
    generator: Arc<dyn DesignGenerator>,
}

impl JobRunner {
    pub fn new(
        registry: Arc<SubmissionRegistry>,
        table: Arc<DesignTable>,
        generator: Arc<dyn DesignGenerator>,
    ) -> Self {
        JobRunner {
            registry,
            table,
            generator,
        }
    }

    /// Process one pending submission to completion or failure.
    ///
    /// A submission deleted while the generator ran produces a not-found on
    /// the terminal write; the late result is dropped on purpose instead of
    /// resurrecting the record.
    pub async fn process(&self, submission_id: &str) -> StoreResult<()> {
        let Some(submission) = self.registry.find(submission_id) else {
            debug!(id = submission_id, "submission gone before processing started");
            return Ok(());
        };
        let request = GenerationRequest {
            submission_id: submission.id.clone(),
            row_id: submission.row_id,
            inspiration_images: submission.inspiration_images.clone(),
            area_images: submission.area_images.clone(),
        };

        if !self
            .transition(
                submission_id,
                SubmissionPatch::status(SubmissionStatus::InProgress).with_progress(0),
            )
            .await?
        {
            return Ok(());
        }

        match self.generator.generate(request).await {
            Ok(design) => {
                let generated_at = Utc::now();
                let patch = SubmissionPatch::status(SubmissionStatus::Completed)
                    .with_progress(100)
                    .with_result(design.image.clone());
                if self.transition(submission_id, patch).await? {
                    if let Err(err) = self
                        .table
                        .mark_completed(submission.row_id, &design.image, generated_at)
                        .await
                    {
                        warn!(%err, row = submission.row_id, "row mirror after completion failed");
                    }
                    info!(id = submission_id, row = submission.row_id, "generation completed");
                }
                Ok(())
            }
            Err(failure) => {
                warn!(id = submission_id, %failure, "generation failed");
                if self
                    .transition(submission_id, SubmissionPatch::status(SubmissionStatus::Failed))
                    .await?
                {
                    if let Err(err) = self.table.mark_failed(submission.row_id).await {
                        warn!(%err, row = submission.row_id, "row mirror after failure failed");
                    }
                }
                Ok(())
            }
        }
    }

    /// Status write tolerating a submission deleted mid-flight. Returns
    /// whether the submission is still alive.
    async fn transition(&self, id: &str, patch: SubmissionPatch) -> StoreResult<bool> {
        match self.registry.update_submission(id, patch).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => {
                debug!(id, "submission deleted mid-generation, dropping late result");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Fire-and-forget processing on the runtime.
    pub fn spawn(&self, submission_id: String) -> tokio::task::JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.process(&submission_id).await {
                warn!(%err, id = %submission_id, "submission processing errored");
            }
        })
    }
}
