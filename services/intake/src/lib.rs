//! Floor Survey Intake - photo intake service for the Great Floor Survey
//!
//! Contributors identify themselves once, upload a batch of floor photos and
//! get a thank-you. Each photo is downscaled, re-encoded as JPEG, given a
//! unique name and written to a blob store; one submission record per batch
//! goes to a row store.
//!
//! ```text
//! identity ─▶ Session ─▶ SubmissionPipeline ─┬─▶ ImageNormalizer
//!                                            ├─▶ FilenameGenerator
//!                                            ├─▶ BlobStore   (S3 | Drive)
//!                                            └─▶ RecordSink  (Postgres | Sheets)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use intake_service::{metadata, storage, Config, ImageNormalizer, SubmissionPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let blobs = storage::from_config(&config.storage).await?;
//!     let records = metadata::from_config(&config.metadata).await?;
//!     let normalizer =
//!         ImageNormalizer::new(config.normalizer.clone(), &config.intake.allowed_extensions);
//!
//!     let _pipeline =
//!         SubmissionPipeline::new(normalizer, blobs, records, config.intake.max_batch_size);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod contributor;
pub mod metadata;
pub mod naming;
pub mod normalizer;
pub mod session;
pub mod storage;
pub mod submission;

pub use config::{Config, ConfigValidationError};
pub use contributor::{Contributor, IdentityForm, ValidationError};
pub use metadata::{RecordError, RecordSink, SubmissionRecord};
pub use naming::FilenameGenerator;
pub use normalizer::{ImageNormalizer, NormalizeError, NormalizedImage};
pub use session::{Session, SessionRegistry, SessionStage, StageError};
pub use storage::{BlobStore, StorageError};
pub use submission::{
    BatchSizeError, BatchSummary, ItemOutcome, SubmissionPipeline, SubmitError, UploadItem,
};
