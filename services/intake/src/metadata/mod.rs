//! Submission records.
//!
//! One [`SubmissionRecord`] is written per batch, after every photo in it was
//! stored. Backends: a PostgreSQL table ([`TableRecordSink`]) or the first
//! sheet of a spreadsheet ([`SpreadsheetRecordSink`]).

mod spreadsheet;
mod table;

pub use spreadsheet::SpreadsheetRecordSink;
pub use table::TableRecordSink;

use crate::config::{MetadataBackend, MetadataConfig};
use crate::contributor::Contributor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// Errors raised while writing a submission record
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("spreadsheet rejected row: {0}")]
    Spreadsheet(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("a submission record needs at least one stored photo")]
    Empty,

    #[error("record cannot be stored: {0}")]
    Invalid(String),
}

/// Summary of one stored batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionRecord {
    id: Uuid,
    name: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    organisation: Option<String>,
    timestamp: String,
    num_photos: usize,
    photo_names: Vec<String>,
    #[serde(skip)]
    original_names: Vec<String>,
}

impl SubmissionRecord {
    /// Build a record from `(original name, stored name)` pairs in upload order.
    /// The photo count always equals the number of stored names.
    pub fn new(
        contributor: &Contributor,
        timestamp: &str,
        stored: &[(String, String)],
    ) -> Result<Self, RecordError> {
        if stored.is_empty() {
            return Err(RecordError::Empty);
        }

        let (original_names, photo_names): (Vec<String>, Vec<String>) =
            stored.iter().cloned().unzip();

        Ok(Self {
            id: Uuid::new_v4(),
            name: contributor.name().to_string(),
            email: contributor.email().to_string(),
            organisation: contributor.organisation().map(str::to_string),
            timestamp: timestamp.to_string(),
            num_photos: photo_names.len(),
            photo_names,
            original_names,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn organisation(&self) -> Option<&str> {
        self.organisation.as_deref()
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn num_photos(&self) -> usize {
        self.num_photos
    }

    /// Stored object names, in upload order
    pub fn photo_names(&self) -> &[String] {
        &self.photo_names
    }

    /// Filenames as the contributor uploaded them, same order as `photo_names`
    pub fn original_names(&self) -> &[String] {
        &self.original_names
    }
}

/// Append-only destination for submission records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one record. Not idempotent: a retry may duplicate the row.
    async fn record(&self, record: &SubmissionRecord) -> Result<(), RecordError>;

    /// Readiness probe
    async fn check(&self) -> Result<(), RecordError>;

    /// Short backend label for logs and readiness output
    fn backend(&self) -> &'static str;
}

/// Build the configured record sink
pub async fn from_config(config: &MetadataConfig) -> Result<Arc<dyn RecordSink>> {
    match config.backend {
        MetadataBackend::Table => {
            let database = config
                .database
                .as_ref()
                .context("metadata.database section missing")?;
            let sink = TableRecordSink::new(database)
                .await
                .context("Failed to initialize submission table")?;

            if database.run_migrations {
                sink.run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            Ok(Arc::new(sink))
        }
        MetadataBackend::Spreadsheet => {
            let sheet = config
                .spreadsheet
                .as_ref()
                .context("metadata.spreadsheet section missing")?;
            let sink = SpreadsheetRecordSink::new(sheet)
                .context("Failed to initialize spreadsheet sink")?;
            info!(spreadsheet_id = %sheet.spreadsheet_id, "Spreadsheet sink initialized");
            Ok(Arc::new(sink))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{contributor, record};
    use super::*;

    #[test]
    fn test_count_matches_names() {
        let record = record();
        assert_eq!(record.num_photos(), 2);
        assert_eq!(record.photo_names().len(), record.num_photos());
        assert_eq!(record.original_names(), ["hall.jpg", "bath.png"]);
    }

    #[test]
    fn test_empty_batch_has_no_record() {
        assert!(matches!(
            SubmissionRecord::new(&contributor(), "2024-01-15 10:30:45", &[]),
            Err(RecordError::Empty)
        ));
    }

    #[test]
    fn test_record_serialization() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["name"], "Jo Lee");
        assert_eq!(value["email"], "jo@example.com");
        assert_eq!(value["organisation"], "Sunny Care");
        assert_eq!(value["timestamp"], "2024-01-15 10:30:45");
        assert_eq!(value["num_photos"], 2);
        assert_eq!(value["photo_names"][1], "2024-01-15_10-30-45_00000002.jpg");
        assert!(value.get("original_names").is_none());
    }
}
