//! # Unified Application Configuration
//!
//! This module consolidates all application settings into a single, structured
//! configuration object. Values come from environment variables (after `.env` is
//! loaded by the binary), every section validates itself, and defaults make an
//! empty environment a working local setup with an in-memory store.

use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{error_logging, AppError, AppResult};
use crate::notifications::DEFAULT_CHANNEL_CAPACITY;
use crate::observability_config::ObservabilityConfig;
use crate::ocr_config::OcrConfig;
use crate::preprocessing::PreprocessConfig;

/// Database configuration settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; analyses are kept in memory when unset
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections
    pub min_connections: u32,
    /// Pool acquire timeout in seconds
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    pub fn validate(&self) -> AppResult<()> {
        if let Some(url) = &self.url {
            if url.trim().is_empty() {
                return Err(AppError::Config("Database URL cannot be empty".to_string()));
            }
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                return Err(AppError::Config(
                    "Database URL must start with 'postgresql://' or 'postgres://'".to_string(),
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(AppError::Config("Max connections cannot be 0".to_string()));
        }
        if self.max_connections > 100 {
            return Err(AppError::Config(
                "Max connections cannot be greater than 100".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(AppError::Config(
                "Min connections cannot be greater than max connections".to_string(),
            ));
        }
        if self.acquire_timeout_secs == 0 || self.acquire_timeout_secs > 300 {
            return Err(AppError::Config(
                "Acquire timeout must be between 1 and 300 seconds".to_string(),
            ));
        }

        Ok(())
    }
}

/// Analysis pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory uploads are stored in
    pub upload_dir: PathBuf,
    /// Contrast and sharpening parameters
    pub preprocess: PreprocessConfig,
    /// Per-user progress channel capacity
    pub event_channel_capacity: usize,
    /// History page size when none is given
    pub default_page_size: u32,
    /// Largest accepted history page size
    pub max_page_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            preprocess: PreprocessConfig::default(),
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl PipelineConfig {
    /// Validate pipeline configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.upload_dir.as_os_str().is_empty() {
            return Err(AppError::Config("Upload directory cannot be empty".to_string()));
        }
        self.preprocess
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        if self.event_channel_capacity == 0 {
            return Err(AppError::Config(
                "Event channel capacity cannot be 0".to_string(),
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(AppError::Config(format!(
                "Default page size must be between 1 and {}",
                self.max_page_size
            )));
        }
        Ok(())
    }
}

/// Unified application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ocr: OcrConfig,
    pub pipeline: PipelineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut config = Self::default();

        // Database
        config.database.url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        config.database.max_connections =
            parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", config.database.max_connections)?;
        config.database.min_connections =
            parse_var(&lookup, "DATABASE_MIN_CONNECTIONS", config.database.min_connections)?;
        config.database.acquire_timeout_secs = parse_var(
            &lookup,
            "DATABASE_ACQUIRE_TIMEOUT_SECS",
            config.database.acquire_timeout_secs,
        )?;

        // OCR
        if let Some(languages) = lookup("OCR_LANGUAGES") {
            config.ocr.languages = languages;
        }
        if let Some(model) = lookup("OCR_MODEL") {
            config.ocr.model_type = model.parse().map_err(AppError::Config)?;
        }
        config.ocr.recovery.operation_timeout_secs = parse_var(
            &lookup,
            "OCR_TIMEOUT_SECS",
            config.ocr.recovery.operation_timeout_secs,
        )?;

        // Pipeline
        if let Some(dir) = lookup("UPLOAD_DIR") {
            config.pipeline.upload_dir = PathBuf::from(dir);
        }
        config.pipeline.event_channel_capacity = parse_var(
            &lookup,
            "EVENT_CHANNEL_CAPACITY",
            config.pipeline.event_channel_capacity,
        )?;

        config.observability = ObservabilityConfig::from_lookup(&lookup);

        Ok(config)
    }

    /// Validate all configuration sections, logging the first one that is invalid
    pub fn validate(&self) -> AppResult<()> {
        let sections = [
            ("database", self.database.validate()),
            ("ocr", self.ocr.validate()),
            ("pipeline", self.pipeline.validate()),
            ("observability", self.observability.validate()),
        ];
        for (section, result) in sections {
            if let Err(e) = result {
                error_logging::log_config_error(&e, section, "validate");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: db_url={}, upload_dir={}, ocr_languages={}, metrics_export={}, metrics_port={}",
            if self.database.url.is_some() { "[REDACTED]" } else { "<in-memory>" },
            self.pipeline.upload_dir.display(),
            self.ocr.languages,
            self.observability.enable_metrics_export,
            self.observability.metrics_port
        )
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> AppResult<T> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid number", key))),
        None => Ok(default),
    }
}
