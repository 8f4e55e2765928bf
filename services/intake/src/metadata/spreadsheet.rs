use super::{RecordError, RecordSink, SubmissionRecord};
use crate::config::SpreadsheetConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Appends one row per submission to a spreadsheet
pub struct SpreadsheetRecordSink {
    http_client: reqwest::Client,
    config: SpreadsheetConfig,
}

impl SpreadsheetRecordSink {
    pub fn new(config: &SpreadsheetConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client for Sheets API")?;

        Ok(Self {
            http_client,
            config: config.clone(),
        })
    }

    /// `.../v4/spreadsheets/{id}/values/{range}:append`
    fn append_url(&self) -> Result<Url, RecordError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| RecordError::Spreadsheet(format!("invalid api_base: {e}")))?;

        url.path_segments_mut()
            .map_err(|_| RecordError::Spreadsheet("api_base cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str(), "values"])
            .push(&format!("{}:append", self.config.range));

        Ok(url)
    }
}

/// Row layout: timestamp, name, email, photo count, original filenames
pub fn spreadsheet_row(record: &SubmissionRecord) -> Value {
    json!([
        record.timestamp(),
        record.name(),
        record.email(),
        record.num_photos(),
        record.original_names().join(", "),
    ])
}

#[async_trait]
impl RecordSink for SpreadsheetRecordSink {
    #[instrument(skip(self, record), fields(submission_id = %record.id(), num_photos = record.num_photos()))]
    async fn record(&self, record: &SubmissionRecord) -> Result<(), RecordError> {
        let response = self
            .http_client
            .post(self.append_url()?)
            .bearer_auth(&self.config.access_token)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({
                "majorDimension": "ROWS",
                "values": [spreadsheet_row(record)],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RecordError::Spreadsheet(format!("{status}: {detail}")));
        }

        debug!(submission_id = %record.id(), "Spreadsheet row appended");
        Ok(())
    }

    async fn check(&self) -> Result<(), RecordError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "spreadsheet"
    }
}
