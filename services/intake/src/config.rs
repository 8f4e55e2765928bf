use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the intake service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Contributor form and batch limits
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Image normalization settings
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    /// Blob storage backend selection
    pub storage: StorageConfig,
    /// Submission record backend selection
    pub metadata: MetadataConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// API configuration for the intake endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes (a whole photo batch)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Form and batch rules
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    /// Maximum number of photos accepted in one upload action
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Lower-case file extensions accepted for upload
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Whether the organisation field must be filled in
    #[serde(default)]
    pub require_organisation: bool,
    /// Title shown above the identity form
    #[serde(default = "default_title")]
    pub title: String,
    /// Welcome and photo instructions shown with the identity form
    #[serde(default = "default_intro_text")]
    pub intro_text: String,
    /// Shown after a batch was recorded
    #[serde(default = "default_thank_you_text")]
    pub thank_you_text: String,
    /// Idle sessions are dropped after this many seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// How often expired sessions are swept
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
}

/// Image normalization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerConfig {
    /// Downscale images wider than `max_width`
    #[serde(default = "default_true")]
    pub resize: bool,
    /// Maximum output width in pixels
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// JPEG encoder quality (1-100)
    #[serde(default = "default_output_quality")]
    pub output_quality: u8,
}

/// Which blob store receives the photos
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Direct object storage (S3 or compatible)
    ObjectStore,
    /// Folder on a file-sync drive
    FileSync,
}

/// Which row store receives the submission records
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetadataBackend {
    /// PostgreSQL table
    Table,
    /// First sheet of a spreadsheet
    Spreadsheet,
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Selected backend
    pub backend: StorageBackend,
    /// S3 settings (object_store backend)
    pub s3: Option<S3Config>,
    /// Drive settings (file_sync backend)
    pub drive: Option<DriveConfig>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for photo storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Storage class hint, e.g. STANDARD_IA or INTELLIGENT_TIERING
    pub storage_class: Option<String>,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Drive (file-sync) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    /// Pre-provisioned shared folder receiving the photos
    pub folder_id: String,
    /// OAuth bearer token supplied by the deployment
    pub access_token: String,
    /// API base URL
    #[serde(default = "default_drive_api_base")]
    pub api_base: String,
    /// Directory for scratch files (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Metadata backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Selected backend
    pub backend: MetadataBackend,
    /// PostgreSQL settings (table backend)
    pub database: Option<DatabaseConfig>,
    /// Spreadsheet settings (spreadsheet backend)
    pub spreadsheet: Option<SpreadsheetConfig>,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Spreadsheet configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SpreadsheetConfig {
    /// Target spreadsheet
    pub spreadsheet_id: String,
    /// A1 range rows are appended to
    #[serde(default = "default_sheet_range")]
    pub range: String,
    /// OAuth bearer token supplied by the deployment
    pub access_token: String,
    /// API base URL
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "intake-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    512 * 1024 * 1024 // 512MB
}

fn default_max_batch_size() -> usize {
    50
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

fn default_title() -> String {
    "The Great Floor Survey!".to_string()
}

fn default_intro_text() -> String {
    "Welcome to our research effort to reduce falls and preserve active independence in the elderly.\n\n\
     We're asking for your help by taking top-down photos of common floor surfaces in aged care environments.\n\n\
     - Take clear top-down photos\n\
     - Include a variety of surfaces (e.g. carpet, tiles, mats, wood)\n\
     - Upload up to {max_batch_size} photos at a time"
        .to_string()
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_session_sweep_interval_secs() -> u64 {
    60
}

fn default_thank_you_text() -> String {
    "Thank you for joining us on the journey to reduce falls and preserve active independence in the elderly."
        .to_string()
}

fn default_max_width() -> u32 {
    1280
}

fn default_output_quality() -> u8 {
    85
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

/// S3 rejects multipart parts below 5 MiB, except the last one
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

fn default_part_size() -> usize {
    MIN_PART_SIZE_BYTES
}

fn default_drive_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_sheet_range() -> String {
    "Sheet1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/intake").required(false))
            .add_source(config::File::with_name("/etc/floorsurvey/intake").required(false))
            // Override with environment variables
            // INTAKE__STORAGE__S3__BUCKET -> storage.s3.bucket
            .add_source(
                config::Environment::with_prefix("INTAKE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("intake.allowed_extensions")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the selected backends are configured and limits are sane
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.intake.max_batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "intake.max_batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.intake.allowed_extensions.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "intake.allowed_extensions".to_string(),
                message: "at least one extension must be allowed".to_string(),
            });
        }

        if self.intake.session_sweep_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "intake.session_sweep_interval_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.normalizer.max_width == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "normalizer.max_width".to_string(),
                message: "width must be greater than 0".to_string(),
            });
        }

        if !(1..=100).contains(&self.normalizer.output_quality) {
            return Err(ConfigValidationError::InvalidValue {
                field: "normalizer.output_quality".to_string(),
                message: "quality must be between 1 and 100".to_string(),
            });
        }

        match self.storage.backend {
            StorageBackend::ObjectStore => match &self.storage.s3 {
                Some(s3) if s3.bucket.is_empty() => {
                    return Err(ConfigValidationError::MissingField("storage.s3.bucket".to_string()))
                }
                Some(s3) if s3.part_size_bytes < MIN_PART_SIZE_BYTES => {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "storage.s3.part_size_bytes".to_string(),
                        message: format!("part size must be at least {MIN_PART_SIZE_BYTES} bytes"),
                    })
                }
                Some(_) => {}
                None => return Err(ConfigValidationError::MissingField("storage.s3".to_string())),
            },
            StorageBackend::FileSync => match &self.storage.drive {
                Some(drive) if drive.folder_id.is_empty() => {
                    return Err(ConfigValidationError::MissingField(
                        "storage.drive.folder_id".to_string(),
                    ))
                }
                Some(_) => {}
                None => {
                    return Err(ConfigValidationError::MissingField("storage.drive".to_string()))
                }
            },
        }

        match self.metadata.backend {
            MetadataBackend::Table => {
                if self.metadata.database.is_none() {
                    return Err(ConfigValidationError::MissingField(
                        "metadata.database".to_string(),
                    ));
                }
            }
            MetadataBackend::Spreadsheet => match &self.metadata.spreadsheet {
                Some(sheet) if sheet.spreadsheet_id.is_empty() => {
                    return Err(ConfigValidationError::MissingField(
                        "metadata.spreadsheet.spreadsheet_id".to_string(),
                    ))
                }
                Some(_) => {}
                None => {
                    return Err(ConfigValidationError::MissingField(
                        "metadata.spreadsheet".to_string(),
                    ))
                }
            },
        }

        Ok(())
    }
}

impl IntakeConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }

    /// Intro text with `{max_batch_size}` filled in
    pub fn render_intro(&self) -> String {
        self.intro_text
            .replace("{max_batch_size}", &self.max_batch_size.to_string())
    }
}

impl DatabaseConfig {
    /// Get database connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl DriveConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SpreadsheetConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            allowed_extensions: default_allowed_extensions(),
            require_organisation: false,
            title: default_title(),
            intro_text: default_intro_text(),
            thank_you_text: default_thank_you_text(),
            session_ttl_secs: default_session_ttl_secs(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            resize: true,
            max_width: default_max_width(),
            output_quality: default_output_quality(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            api: ApiConfig::default(),
            intake: IntakeConfig::default(),
            normalizer: NormalizerConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::ObjectStore,
                s3: Some(S3Config {
                    bucket: "floor-photos".to_string(),
                    region: default_region(),
                    endpoint_url: None,
                    force_path_style: false,
                    storage_class: Some("STANDARD_IA".to_string()),
                    multipart_threshold_bytes: default_multipart_threshold(),
                    part_size_bytes: default_part_size(),
                }),
                drive: None,
            },
            metadata: MetadataConfig {
                backend: MetadataBackend::Table,
                database: Some(DatabaseConfig {
                    url: "postgres://localhost/floorsurvey".to_string(),
                    max_connections: 5,
                    min_connections: 1,
                    connect_timeout_secs: 30,
                    idle_timeout_secs: 600,
                    run_migrations: true,
                }),
                spreadsheet: None,
            },
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_width(), 1280);
        assert_eq!(default_output_quality(), 85);
        assert_eq!(default_max_batch_size(), 50);
        assert_eq!(default_allowed_extensions(), vec!["jpg", "jpeg", "png"]);
    }

    #[test]
    fn test_valid_config() {
        assert!(create_test_config().validate().is_ok());
    }

    #[test]
    fn test_missing_s3_section() {
        let mut config = create_test_config();
        config.storage.s3 = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(field)) if field == "storage.s3"
        ));
    }

    #[test]
    fn test_file_sync_requires_drive() {
        let mut config = create_test_config();
        config.storage.backend = StorageBackend::FileSync;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(field)) if field == "storage.drive"
        ));
    }

    #[test]
    fn test_spreadsheet_requires_section() {
        let mut config = create_test_config();
        config.metadata.backend = MetadataBackend::Spreadsheet;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_quality() {
        let mut config = create_test_config();
        config.normalizer.output_quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = create_test_config();
        config.intake.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_part_size_below_s3_minimum() {
        let mut config = create_test_config();
        if let Some(s3) = config.storage.s3.as_mut() {
            s3.part_size_bytes = 1024 * 1024;
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { field, .. }) if field == "storage.s3.part_size_bytes"
        ));

        if let Some(s3) = config.storage.s3.as_mut() {
            s3.part_size_bytes = MIN_PART_SIZE_BYTES;
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_intro_mentions_batch_limit() {
        let intake = IntakeConfig {
            max_batch_size: 20,
            ..IntakeConfig::default()
        };
        let intro = intake.render_intro();
        assert!(intro.contains("top-down photos"));
        assert!(intro.contains("Upload up to 20 photos"));
        assert!(!intro.contains("{max_batch_size}"));
    }

    #[test]
    fn test_session_expiry_defaults() {
        let intake = IntakeConfig::default();
        assert_eq!(intake.session_ttl(), Duration::from_secs(3600));
        assert_eq!(intake.session_sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_backend_names_deserialize() {
        let backend: StorageBackend = serde_json::from_str("\"file_sync\"").unwrap();
        assert_eq!(backend, StorageBackend::FileSync);
        let backend: MetadataBackend = serde_json::from_str("\"spreadsheet\"").unwrap();
        assert_eq!(backend, MetadataBackend::Spreadsheet);
    }
}
