//! Local-first persistence and submission tracking for an interior-design
//! studio.
//!
//! This crate is the data core of the studio app: an embedded SQLite object
//! store with three record stores and their secondary indexes, a generic
//! repository façade over them, a lifecycle handle with error recovery, a
//! shared submission registry with write-through durability, and the job
//! seam that walks submissions through pending, in_progress and their
//! terminal status.
//!
//! UI layers consume [`SubmissionRegistry`] and [`DesignTable`]; nothing
//! else talks to the store directly.

pub mod config;
pub mod error;
pub mod handle;
pub mod jobs;
pub mod model;
pub mod registry;
pub mod status;
pub mod store;
pub mod table;

pub use config::StudioConfig;
pub use error::{StoreError, StoreResult, StudioError};
pub use handle::StoreHandle;
pub use jobs::{
    DesignGenerator, GeneratedDesign, GenerationError, GenerationRequest, JobRunner, MockGenerator,
};
pub use model::{
    ImageColumn, ImagePatch, OutputStatus, StoredImage, StudioUser, Submission, SubmissionDraft,
    SubmissionPatch, SubmissionStatus, TableRow, UploadedImage,
};
pub use registry::{RegistryEvent, SubmissionRegistry};
pub use status::{project_row_result, project_row_status};
pub use store::blob::{PreviewCache, PreviewHandle};
pub use store::gateway::StoreGateway;
pub use table::{DesignTable, ImageUpload, TableStats};
