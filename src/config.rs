use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    pub processing: ProcessingConfig,
}

/// SQLite pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

/// Tracing output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Expected `X-Telegram-Bot-Api-Secret-Token`; unchecked when unset
    pub webhook_secret: Option<String>,
}

/// Bot API access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Base URL for Bot API methods
    pub api_base: String,
    /// Base URL for file downloads
    pub file_base: String,
    /// Minimum spacing between Bot API calls
    pub min_request_interval_ms: u64,
    pub metadata_retry: RetryPolicy,
    pub download_retry: RetryPolicy,
}

/// Object storage bucket and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_url: String,
    pub bucket: String,
    pub service_key: String,
    pub cache_control: String,
    pub upload_retry: RetryPolicy,
}

/// Limits shared by ingestion and the repair jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Seconds in `processing` without analysis before a message counts as stalled
    pub stall_threshold_secs: u64,
    /// How long a stored `file_id` is trusted
    pub file_id_freshness_hours: i64,
    pub validation_batch_size: usize,
    pub max_batch_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/media.db".to_string(),
            max_connections: 10,
            connection_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            format: "text".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            webhook_secret: None,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            file_base: "https://api.telegram.org".to_string(),
            min_request_interval_ms: 50,
            metadata_retry: RetryPolicy::metadata(),
            download_retry: RetryPolicy::download(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            bucket: "telegram-media".to_string(),
            service_key: String::new(),
            cache_control: "3600".to_string(),
            upload_retry: RetryPolicy::upload(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: 1800,
            file_id_freshness_hours: 24,
            validation_batch_size: 100,
            max_batch_limit: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, optionally adding an explicit file on top of the defaults
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .map_err(|e| anyhow::anyhow!("Failed to build default configuration: {}", e))?;

        let mut builder = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let config = builder
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("MEDIA_INGEST").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate retry budgets
        for (name, policy) in [
            ("telegram.metadata_retry", &self.telegram.metadata_retry),
            ("telegram.download_retry", &self.telegram.download_retry),
            ("storage.upload_retry", &self.storage.upload_retry),
        ] {
            Self::validate_retry(name, policy)?;
        }

        // Validate storage config
        if self.storage.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("storage.bucket must not be empty"));
        }

        // Validate processing config
        if self.processing.stall_threshold_secs == 0 {
            return Err(anyhow::anyhow!("stall_threshold_secs must be greater than 0"));
        }
        if self.processing.file_id_freshness_hours <= 0 {
            return Err(anyhow::anyhow!("file_id_freshness_hours must be greater than 0"));
        }
        if self.processing.validation_batch_size == 0
            || self.processing.validation_batch_size > self.processing.max_batch_limit
        {
            return Err(anyhow::anyhow!(
                "validation_batch_size must be between 1 and max_batch_limit ({})",
                self.processing.max_batch_limit
            ));
        }

        Ok(())
    }

    fn validate_retry(name: &str, policy: &RetryPolicy) -> Result<()> {
        if !(1..=10).contains(&policy.max_retries) {
            return Err(anyhow::anyhow!("{name}.max_retries must be between 1 and 10"));
        }
        if policy.backoff_factor < 1.0 {
            return Err(anyhow::anyhow!("{name}.backoff_factor must be at least 1.0"));
        }
        if !(0.0..=0.5).contains(&policy.jitter_ratio) {
            return Err(anyhow::anyhow!("{name}.jitter_ratio must be between 0.0 and 0.5"));
        }
        Ok(())
    }

    /// Get database URL from environment or config
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }

    /// Socket address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
