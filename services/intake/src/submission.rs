//! Batch submission pipeline.
//!
//! Every photo of a batch goes through normalize -> name -> store, strictly
//! one after another. Skipped and undecodable photos are reported per item
//! and do not stop the batch. A storage failure abandons the batch. The
//! submission record is written only after every stored photo was
//! acknowledged, and only when at least one photo was stored.

use crate::contributor::Contributor;
use crate::metadata::{RecordError, RecordSink, SubmissionRecord};
use crate::naming::FilenameGenerator;
use crate::normalizer::{ImageNormalizer, NormalizeError, OUTPUT_EXTENSION};
use crate::session::{BeginBatchError, Session, SessionRegistry, StageError};
use crate::storage::{BlobStore, StorageError};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Timestamp layout shared by object names and records
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One uploaded file, alive only while its batch is processed
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub original_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// What happened to one item of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Stored {
        original_name: String,
        stored_name: String,
        width: u32,
        height: u32,
        size_bytes: usize,
    },
    Skipped {
        original_name: String,
        reason: String,
    },
    Failed {
        original_name: String,
        reason: String,
    },
}

impl ItemOutcome {
    pub fn original_name(&self) -> &str {
        match self {
            ItemOutcome::Stored { original_name, .. }
            | ItemOutcome::Skipped { original_name, .. }
            | ItemOutcome::Failed { original_name, .. } => original_name,
        }
    }
}

/// Per-item results of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    timestamp: String,
    submission_id: Option<Uuid>,
    outcomes: Vec<ItemOutcome>,
}

impl BatchSummary {
    pub fn new(timestamp: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            submission_id: None,
            outcomes: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Set once the batch was recorded
    pub fn submission_id(&self) -> Option<Uuid> {
        self.submission_id
    }

    pub fn outcomes(&self) -> &[ItemOutcome] {
        &self.outcomes
    }

    pub fn stored_count(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Stored { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// Stored object names in upload order
    pub fn stored_names(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Stored { stored_name, .. } => Some(stored_name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// `(original name, stored name)` for every stored item, in upload order
    fn stored_pairs(&self) -> Vec<(String, String)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Stored {
                    original_name,
                    stored_name,
                    ..
                } => Some((original_name.clone(), stored_name.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, f: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(o)).count()
    }
}

/// Batch rejected before processing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchSizeError {
    #[error("Please select at least one photo.")]
    Empty,

    #[error("Please limit your upload to {max} photos ({count} selected).")]
    TooMany { count: usize, max: usize },
}

/// Errors that end a submission attempt
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("session not found")]
    UnknownSession,

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    BatchSize(#[from] BatchSizeError),

    #[error("None of the photos could be stored.")]
    NothingStored(BatchSummary),

    #[error("Upload failed: {source}")]
    Storage { stored: usize, source: StorageError },

    #[error("Upload failed: {0}")]
    Record(#[source] RecordError),

    #[error("Upload failed: batch aborted: {0}")]
    Aborted(String),
}

impl From<BeginBatchError> for SubmitError {
    fn from(err: BeginBatchError) -> Self {
        match err {
            BeginBatchError::Stage(e) => SubmitError::Stage(e),
            BeginBatchError::BatchSize(e) => SubmitError::BatchSize(e),
        }
    }
}

/// Sequences normalizer, naming, blob store and record sink for each batch
pub struct SubmissionPipeline {
    normalizer: Arc<ImageNormalizer>,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordSink>,
    max_batch_size: usize,
}

impl SubmissionPipeline {
    pub fn new(
        normalizer: ImageNormalizer,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordSink>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            blobs,
            records,
            max_batch_size,
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn records(&self) -> &Arc<dyn RecordSink> {
        &self.records
    }

    /// Run a batch for a session, moving it through
    /// Processing -> Recording -> Done (or Failed / back to AwaitingUpload)
    #[instrument(skip(self, sessions, items), fields(session_id = %session_id, items = items.len()))]
    pub async fn submit(
        &self,
        sessions: &SessionRegistry,
        session_id: Uuid,
        items: Vec<UploadItem>,
    ) -> Result<BatchSummary, SubmitError> {
        let item_count = items.len();
        let max_batch_size = self.max_batch_size;
        let contributor = sessions
            .update(session_id, |s| s.begin_batch(item_count, max_batch_size))
            .await
            .ok_or(SubmitError::UnknownSession)??;

        let mut summary = match self.store_batch(items).await {
            Ok(summary) => summary,
            Err(e) => {
                let message = e.to_string();
                transition(sessions, session_id, |s| s.fail(message)).await;
                return Err(e);
            }
        };

        if summary.stored_count() == 0 {
            warn!(
                skipped = summary.skipped_count(),
                failed = summary.failed_count(),
                "No photo of the batch could be stored"
            );
            let reopened = summary.clone();
            transition(sessions, session_id, |s| s.reopen_upload(reopened)).await;
            return Err(SubmitError::NothingStored(summary));
        }

        transition(sessions, session_id, Session::begin_recording).await;

        match self.record_batch(&contributor, &mut summary).await {
            Ok(_) => {
                let done = summary.clone();
                transition(sessions, session_id, |s| s.complete(done)).await;
                Ok(summary)
            }
            Err(e) => {
                let message = e.to_string();
                transition(sessions, session_id, |s| s.fail(message)).await;
                Err(e)
            }
        }
    }

    /// Run [`submit`](Self::submit) on its own task. Once started, the batch
    /// runs to completion even if the caller stops waiting for it. A batch task
    /// that dies leaves the session `Failed`.
    pub async fn submit_detached(
        self: Arc<Self>,
        sessions: Arc<SessionRegistry>,
        session_id: Uuid,
        items: Vec<UploadItem>,
    ) -> Result<BatchSummary, SubmitError> {
        let supervisor = tokio::spawn(async move {
            let batch_sessions = sessions.clone();
            let batch = tokio::spawn(async move {
                self.submit(&batch_sessions, session_id, items).await
            });

            match batch.await {
                Ok(result) => result,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Batch task died");
                    metrics::counter!("intake.batches.failed").increment(1);
                    let err = SubmitError::Aborted(e.to_string());
                    let message = err.to_string();
                    transition(&sessions, session_id, |s| s.fail(message)).await;
                    Err(err)
                }
            }
        });

        supervisor
            .await
            .unwrap_or_else(|e| Err(SubmitError::Aborted(e.to_string())))
    }

    /// Processing stage: normalize, name and store every item in order
    pub async fn store_batch(&self, items: Vec<UploadItem>) -> Result<BatchSummary, SubmitError> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut names = FilenameGenerator::for_batch(&timestamp);
        let mut summary = BatchSummary::new(&timestamp);

        for item in items {
            match self.process_item(item, &mut names).await {
                Ok(outcome) => summary.outcomes.push(outcome),
                Err(e) => {
                    let stored = summary.stored_count();
                    error!(error = %e, stored, "Storage failed, abandoning batch");
                    metrics::counter!("intake.batches.failed").increment(1);
                    return Err(SubmitError::Storage { stored, source: e });
                }
            }
        }

        info!(
            stored = summary.stored_count(),
            skipped = summary.skipped_count(),
            failed = summary.failed_count(),
            "Batch processed"
        );

        Ok(summary)
    }

    /// Recording stage: write the single submission record for the batch
    pub async fn record_batch(
        &self,
        contributor: &Contributor,
        summary: &mut BatchSummary,
    ) -> Result<SubmissionRecord, SubmitError> {
        let record = match SubmissionRecord::new(contributor, summary.timestamp(), &summary.stored_pairs()) {
            Ok(record) => record,
            Err(RecordError::Empty) => return Err(SubmitError::NothingStored(summary.clone())),
            Err(e) => return Err(SubmitError::Record(e)),
        };

        if let Err(e) = self.records.record(&record).await {
            error!(error = %e, submission_id = %record.id(), "Failed to record submission");
            metrics::counter!("intake.batches.failed").increment(1);
            return Err(SubmitError::Record(e));
        }

        summary.submission_id = Some(record.id());
        metrics::counter!("intake.batches.recorded").increment(1);
        info!(
            submission_id = %record.id(),
            num_photos = record.num_photos(),
            backend = self.records.backend(),
            "Submission recorded"
        );

        Ok(record)
    }

    /// Per-item failures become outcomes; only a storage failure is returned as an error
    async fn process_item(
        &self,
        item: UploadItem,
        names: &mut FilenameGenerator,
    ) -> Result<ItemOutcome, StorageError> {
        let UploadItem {
            original_name,
            bytes,
            ..
        } = item;

        if let Err(e) = self.normalizer.check_extension(&original_name) {
            debug!(original_name = %original_name, reason = %e, "Skipping photo");
            metrics::counter!("intake.photos.skipped").increment(1);
            return Ok(ItemOutcome::Skipped {
                original_name,
                reason: e.to_string(),
            });
        }

        let normalizer = self.normalizer.clone();
        let normalized = match tokio::task::spawn_blocking(move || normalizer.normalize(&bytes)).await {
            Ok(Ok(normalized)) => normalized,
            Ok(Err(e)) => return Ok(item_failed(original_name, &e)),
            Err(e) => {
                warn!(original_name = %original_name, error = %e, "Normalization task aborted");
                metrics::counter!("intake.photos.failed").increment(1);
                return Ok(ItemOutcome::Failed {
                    original_name,
                    reason: format!("normalization aborted: {e}"),
                });
            }
        };

        let stored_name = names.next_name(OUTPUT_EXTENSION);
        let size_bytes = normalized.bytes.len();
        let started = Instant::now();

        self.blobs.store(&stored_name, normalized.bytes).await?;

        metrics::histogram!("intake.upload.duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("intake.photos.stored").increment(1);
        metrics::counter!("intake.bytes.uploaded").increment(size_bytes as u64);
        info!(
            original_name = %original_name,
            stored_name = %stored_name,
            width = normalized.width,
            height = normalized.height,
            size_bytes,
            backend = self.blobs.backend(),
            "Photo stored"
        );

        Ok(ItemOutcome::Stored {
            original_name,
            stored_name,
            width: normalized.width,
            height: normalized.height,
            size_bytes,
        })
    }
}

fn item_failed(original_name: String, err: &NormalizeError) -> ItemOutcome {
    warn!(original_name = %original_name, error = %err, "Photo could not be processed");
    metrics::counter!("intake.photos.failed").increment(1);
    ItemOutcome::Failed {
        original_name,
        reason: err.to_string(),
    }
}

async fn transition(
    sessions: &SessionRegistry,
    session_id: Uuid,
    f: impl FnOnce(&mut Session) -> Result<(), StageError>,
) {
    match sessions.update(session_id, f).await {
        Some(Ok(())) => {}
        Some(Err(e)) => warn!(session_id = %session_id, error = %e, "Unexpected session stage"),
        None => warn!(session_id = %session_id, "Session disappeared during submission"),
    }
}
