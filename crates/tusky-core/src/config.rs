//! Configuration module
//!
//! Server and upload-engine settings, read from the environment (and `.env`).

use std::env;
use std::time::Duration;

use crate::storage_types::{ChecksumAlgorithm, StorageBackend};

const SERVER_PORT: u16 = 3000;
const HTTP_CONCURRENCY_LIMIT: usize = 10_000;
const MAX_UPLOAD_SIZE: &str = "5GB";
const HASH_CACHE_CAPACITY: usize = 1024;
const HASH_CACHE_TTL_SECS: u64 = 60;
const CHUNK_ORDER_WAIT_MS: u64 = 10_000;
const DEFAULT_META_SUFFIX: &str = ".META";

/// Base HTTP server configuration
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub http_concurrency_limit: usize,
    pub log_format: String,
}

/// Upload engine configuration
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub base: BaseConfig,
    // Storage
    pub storage_backend: StorageBackend,
    pub directory: String,
    pub meta_directory: String,
    pub meta_prefix: String,
    pub meta_suffix: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // MinIO, R2, Spaces...
    pub aws_region: Option<String>,
    pub gcs_bucket: Option<String>,
    // Limits and lifecycle
    pub max_upload_size: u64,
    pub allow_mime: Vec<String>,
    pub ttl: Option<Duration>,
    // Integrity
    pub checksum_algorithm: ChecksumAlgorithm,
    pub hash_cache_capacity: usize,
    pub hash_cache_ttl: Duration,
    /// How long an out-of-order chunk waits for its predecessor.
    pub chunk_order_wait: Duration,
    /// Periodic expiry sweep. 0 = disabled.
    pub cleanup_interval_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<UploadConfig>);

impl Config {
    fn as_upload(&self) -> &UploadConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let environment = self.as_upload().base.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = UploadConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_upload().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_upload().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_upload().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.as_upload().base.environment
    }

    pub fn http_concurrency_limit(&self) -> usize {
        self.as_upload().base.http_concurrency_limit
    }

    pub fn log_format(&self) -> &str {
        &self.as_upload().base.log_format
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_upload().storage_backend
    }

    pub fn directory(&self) -> &str {
        &self.as_upload().directory
    }

    pub fn meta_directory(&self) -> &str {
        &self.as_upload().meta_directory
    }

    pub fn meta_prefix(&self) -> &str {
        &self.as_upload().meta_prefix
    }

    pub fn meta_suffix(&self) -> &str {
        &self.as_upload().meta_suffix
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.as_upload().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.as_upload().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_upload().s3_endpoint.as_deref()
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.as_upload().aws_region.as_deref()
    }

    pub fn gcs_bucket(&self) -> Option<&str> {
        self.as_upload().gcs_bucket.as_deref()
    }

    pub fn max_upload_size(&self) -> u64 {
        self.as_upload().max_upload_size
    }

    pub fn allow_mime(&self) -> &[String] {
        &self.as_upload().allow_mime
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.as_upload().ttl
    }

    pub fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        self.as_upload().checksum_algorithm
    }

    pub fn hash_cache_capacity(&self) -> usize {
        self.as_upload().hash_cache_capacity
    }

    pub fn hash_cache_ttl(&self) -> Duration {
        self.as_upload().hash_cache_ttl
    }

    pub fn chunk_order_wait(&self) -> Duration {
        self.as_upload().chunk_order_wait
    }

    pub fn cleanup_interval_secs(&self) -> u64 {
        self.as_upload().cleanup_interval_secs
    }
}

impl UploadConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse::<StorageBackend>()?;

        let directory = env::var("UPLOAD_DIRECTORY").unwrap_or_else(|_| "./files".to_string());
        let meta_directory = env::var("META_DIRECTORY").unwrap_or_else(|_| directory.clone());

        let max_upload_size = parse_byte_size(
            &env::var("MAX_UPLOAD_SIZE").unwrap_or_else(|_| MAX_UPLOAD_SIZE.to_string()),
        )?;

        let ttl = match env::var("UPLOAD_TTL") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_duration(&raw)?),
            _ => None,
        };

        let checksum_algorithm = env::var("CHECKSUM_ALGORITHM")
            .unwrap_or_else(|_| "sha1".to_string())
            .parse::<ChecksumAlgorithm>()?;

        Ok(Self {
            base: BaseConfig {
                server_port: env::var("PORT")
                    .unwrap_or_else(|_| SERVER_PORT.to_string())
                    .parse()
                    .unwrap_or(SERVER_PORT),
                cors_origins: split_list(&cors_origins_str),
                environment,
                http_concurrency_limit: env::var("HTTP_CONCURRENCY_LIMIT")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(HTTP_CONCURRENCY_LIMIT)
                    .max(1),
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
            },
            storage_backend,
            directory,
            meta_directory,
            meta_prefix: env::var("META_PREFIX").unwrap_or_default(),
            meta_suffix: env::var("META_SUFFIX")
                .unwrap_or_else(|_| DEFAULT_META_SUFFIX.to_string()),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_region: env::var("AWS_REGION").ok(),
            gcs_bucket: env::var("GCS_BUCKET").ok(),
            max_upload_size,
            allow_mime: split_list(&env::var("ALLOW_MIME").unwrap_or_default()),
            ttl,
            checksum_algorithm,
            hash_cache_capacity: env::var("HASH_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(HASH_CACHE_CAPACITY),
            hash_cache_ttl: Duration::from_secs(
                env::var("HASH_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(HASH_CACHE_TTL_SECS),
            ),
            chunk_order_wait: Duration::from_millis(
                env::var("CHUNK_ORDER_WAIT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(CHUNK_ORDER_WAIT_MS),
            ),
            cleanup_interval_secs: env::var("CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }

    /// Local-disk configuration with defaults, rooted at `directory`.
    pub fn local(directory: impl Into<String>) -> Self {
        let directory = directory.into();
        Self {
            base: BaseConfig {
                server_port: SERVER_PORT,
                cors_origins: vec!["*".to_string()],
                environment: "development".to_string(),
                http_concurrency_limit: HTTP_CONCURRENCY_LIMIT,
                log_format: "compact".to_string(),
            },
            storage_backend: StorageBackend::Local,
            meta_directory: directory.clone(),
            directory,
            meta_prefix: String::new(),
            meta_suffix: DEFAULT_META_SUFFIX.to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            aws_region: None,
            gcs_bucket: None,
            max_upload_size: 5 * 1024 * 1024 * 1024,
            allow_mime: Vec::new(),
            ttl: None,
            checksum_algorithm: ChecksumAlgorithm::Sha1,
            hash_cache_capacity: HASH_CACHE_CAPACITY,
            hash_cache_ttl: Duration::from_secs(HASH_CACHE_TTL_SECS),
            chunk_order_wait: Duration::from_millis(CHUNK_ORDER_WAIT_MS),
            cleanup_interval_secs: 0,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage_backend {
            StorageBackend::Local => {
                if self.directory.trim().is_empty() || self.meta_directory.trim().is_empty() {
                    anyhow::bail!("UPLOAD_DIRECTORY and META_DIRECTORY must not be empty");
                }
            }
            StorageBackend::S3 => {
                if self.s3_bucket.as_deref().map_or(true, str::is_empty) {
                    anyhow::bail!("S3_BUCKET is required when STORAGE_BACKEND=s3");
                }
            }
            StorageBackend::Gcs => {
                if self.gcs_bucket.as_deref().map_or(true, str::is_empty) {
                    anyhow::bail!("GCS_BUCKET is required when STORAGE_BACKEND=gcs");
                }
            }
        }
        if self.max_upload_size == 0 {
            anyhow::bail!("MAX_UPLOAD_SIZE must be greater than zero");
        }
        if self.meta_suffix.is_empty() && self.meta_prefix.is_empty() {
            anyhow::bail!("META_PREFIX and META_SUFFIX cannot both be empty");
        }
        if let Some(ttl) = self.ttl {
            let representable = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
                .is_some();
            if !representable {
                anyhow::bail!("UPLOAD_TTL of {}s is too large", ttl.as_secs());
            }
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a byte-size string such as `100MB`, `1.5GB`, `512kb` or `1024`.
///
/// Units are 1024-based.
pub fn parse_byte_size(raw: &str) -> Result<u64, anyhow::Error> {
    let trimmed = raw.trim();
    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let value: f64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid byte size: {}", raw))?;
    let multiplier: u64 = match unit.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        "t" | "tb" => 1 << 40,
        other => return Err(anyhow::anyhow!("Unknown byte size unit: {}", other)),
    };
    Ok((value * multiplier as f64).floor() as u64)
}

/// Parse a duration such as `30s`, `15m`, `1h`, `7d` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, anyhow::Error> {
    let trimmed = raw.trim();
    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    let value: u64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid duration: {}", raw))?;
    let multiplier: u64 = match unit.trim().to_lowercase().as_str() {
        "" | "s" | "sec" | "secs" => 1,
        "m" | "min" | "mins" => 60,
        "h" | "hr" | "hrs" => 3600,
        "d" | "day" | "days" => 86_400,
        other => return Err(anyhow::anyhow!("Unknown duration unit: {}", other)),
    };
    let seconds = value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Duration out of range: {}", raw))?;
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("100MB").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_byte_size("1.5kb").unwrap(), 1536);
        assert_eq!(parse_byte_size("2048").unwrap(), 2048);
        assert_eq!(parse_byte_size(" 5 GB ").unwrap(), 5 * 1024 * 1024 * 1024);
        assert!(parse_byte_size("ten MB").is_err());
        assert!(parse_byte_size("10PB").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert!(parse_duration("1w").is_err());
        assert!(parse_duration("18446744073709551615d").is_err());
    }

    #[test]
    fn test_local_config_validates() {
        let config = Config(Box::new(UploadConfig::local("/tmp/tusky")));
        assert!(config.validate().is_ok());
        assert_eq!(config.meta_directory(), "/tmp/tusky");
        assert!(!config.is_production());
    }

    #[test]
    fn test_validate_requires_bucket() {
        let mut upload = UploadConfig::local("/tmp/tusky");
        upload.storage_backend = StorageBackend::S3;
        assert!(upload.validate().is_err());
        upload.s3_bucket = Some("uploads".to_string());
        assert!(upload.validate().is_ok());

        upload.storage_backend = StorageBackend::Gcs;
        assert!(upload.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_ttl() {
        let mut upload = UploadConfig::local("/tmp/tusky");
        upload.ttl = Some(Duration::from_secs(7 * 86_400));
        assert!(upload.validate().is_ok());

        upload.ttl = Some(Duration::from_secs(u64::MAX / 2));
        assert!(upload.validate().is_err());
    }
}
