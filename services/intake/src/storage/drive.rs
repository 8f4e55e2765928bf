use super::{get_content_type, BlobStore, StorageError};
use crate::config::DriveConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Drive blob store.
///
/// The upload API reads from a file, so every photo is first written to a
/// scratch file which is removed again whether the upload succeeds or not.
pub struct DriveBlobStore {
    http_client: reqwest::Client,
    config: DriveConfig,
}

impl DriveBlobStore {
    pub fn new(config: &DriveConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client for Drive API")?;

        info!(folder_id = %config.folder_id, "Drive blob store initialized");

        Ok(Self {
            http_client,
            config: config.clone(),
        })
    }

    /// Write `bytes` to a fresh scratch file. The file is deleted when the
    /// returned handle is dropped.
    async fn write_scratch(&self, bytes: &[u8]) -> Result<NamedTempFile, StorageError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("intake-");
        let scratch = match &self.config.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        tokio::fs::write(scratch.path(), bytes).await?;
        Ok(scratch)
    }

    /// Create `name` inside the configured folder from the file at `path`
    async fn upload_from_path(&self, name: &str, path: &Path) -> Result<(), StorageError> {
        let content = tokio::fs::read(path).await?;
        let boundary = format!("intake-{}", Uuid::new_v4().simple());
        let metadata = serde_json::json!({
            "name": name,
            "parents": [self.config.folder_id],
            "mimeType": get_content_type(name),
        });
        let body = multipart_related_body(&boundary, &metadata, get_content_type(name), &content);

        let url = format!(
            "{}/upload/drive/v3/files?uploadType=multipart&supportsAllDrives=true",
            self.config.api_base.trim_end_matches('/')
        );

        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::Drive {
                name: name.to_string(),
                message: format!("{status}: {detail}"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl BlobStore for DriveBlobStore {
    #[instrument(skip(self, bytes), fields(folder_id = %self.config.folder_id, size_bytes = bytes.len()))]
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let scratch = self.write_scratch(&bytes).await?;
        debug!(name = %name, scratch = %scratch.path().display(), "Uploading photo to drive");

        let result = self.upload_from_path(name, scratch.path()).await;

        if let Err(e) = scratch.close() {
            warn!(error = %e, "Failed to remove scratch file");
        }

        result
    }

    fn backend(&self) -> &'static str {
        "file_sync"
    }
}

fn multipart_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    content_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    async fn spawn_drive(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/upload/drive/v3/files",
                post(
                    move |State(captured): State<Captured>, headers: HeaderMap, body: Bytes| async move {
                        let content_type = headers
                            .get(CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        captured.lock().unwrap().push((content_type, body.to_vec()));
                        status
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), captured)
    }

    fn drive_config(api_base: String, scratch_dir: &Path) -> DriveConfig {
        DriveConfig {
            folder_id: "folder-123".to_string(),
            access_token: "token".to_string(),
            api_base,
            scratch_dir: Some(scratch_dir.to_path_buf()),
            request_timeout_secs: 5,
        }
    }

    fn scratch_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_uploads_into_folder_and_removes_scratch_file() {
        let (api_base, captured) = spawn_drive(StatusCode::OK).await;
        let scratch_dir = tempfile::tempdir().unwrap();
        let store = DriveBlobStore::new(&drive_config(api_base, scratch_dir.path())).unwrap();

        store
            .store("2024-01-15_10-30-45_0badf00d.jpg", b"jpeg-bytes".to_vec())
            .await
            .unwrap();

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (content_type, body) = &requests[0];
        assert!(content_type.starts_with("multipart/related; boundary=intake-"));
        let body = String::from_utf8_lossy(body);
        assert!(body.contains("\"name\":\"2024-01-15_10-30-45_0badf00d.jpg\""));
        assert!(body.contains("\"parents\":[\"folder-123\"]"));
        assert!(body.contains("Content-Type: image/jpeg"));
        assert!(body.contains("jpeg-bytes"));
        assert_eq!(scratch_files(scratch_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_still_removes_scratch_file() {
        let (api_base, _captured) = spawn_drive(StatusCode::FORBIDDEN).await;
        let scratch_dir = tempfile::tempdir().unwrap();
        let store = DriveBlobStore::new(&drive_config(api_base, scratch_dir.path())).unwrap();

        let err = store.store("a.jpg", b"jpeg-bytes".to_vec()).await.unwrap_err();

        assert!(matches!(err, StorageError::Drive { ref name, .. } if name == "a.jpg"));
        assert!(err.to_string().contains("403"));
        assert_eq!(scratch_files(scratch_dir.path()), 0);
    }

    #[test]
    fn test_multipart_related_body_layout() {
        let body = multipart_related_body(
            "b",
            &serde_json::json!({"name": "a.jpg"}),
            "image/jpeg",
            b"xyz",
        );
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "--b\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"a.jpg\"}\r\n\
             --b\r\nContent-Type: image/jpeg\r\n\r\nxyz\r\n--b--\r\n"
        );
    }
}
