use super::{get_content_type, BlobStore, StorageError};
use crate::config::S3Config;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use tracing::{debug, info, instrument, warn};

/// S3 blob store; uploads straight from memory
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    storage_class: Option<StorageClass>,
    config: S3Config,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            storage_class = ?config.storage_class,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            storage_class: config.storage_class.as_deref().map(StorageClass::from),
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(get_content_type(key))
            .set_storage_class(self.storage_class.clone())
            .send()
            .await
            .map_err(|e| object_store_error(key, e))?;

        Ok(())
    }

    /// Multipart upload for large files; the upload is aborted if any part fails
    async fn multipart_upload(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(get_content_type(key))
            .set_storage_class(self.storage_class.clone())
            .send()
            .await
            .map_err(|e| object_store_error(key, e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StorageError::ObjectStore {
                key: key.to_string(),
                message: "no upload ID in response".to_string(),
            })?
            .to_string();

        match self.upload_parts(key, &upload_id, &bytes).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key = %key,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| object_store_error(key, e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| object_store_error(key, e))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size_bytes = bytes.len()))]
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        debug!(key = %name, "Uploading photo to S3");

        if bytes.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(name, bytes).await
        } else {
            self.simple_upload(name, bytes).await
        }
    }

    fn backend(&self) -> &'static str {
        "object_store"
    }
}

fn object_store_error<E: std::error::Error>(key: &str, err: E) -> StorageError {
    StorageError::ObjectStore {
        key: key.to_string(),
        message: DisplayErrorContext(&err).to_string(),
    }
}
