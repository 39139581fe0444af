//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the keyword highlighting engine, supporting
//! TOML files and environment variable overrides with validation and
//! type-safe access to all system settings.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Selector syntax, range checks on debounce and threshold
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (highest priority)
//! 2. Configuration file
//! 3. Default values (lowest priority)
//!
//! ## Usage
//! ```rust,no_run
//! use keyword_highlighter::config::EngineConfig;
//!
//! let config = EngineConfig::from_file("config.toml").unwrap();
//! println!("Debounce: {}ms", config.scan.debounce_ms);
//! ```

use crate::dom::Selector;
use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scan cycle and annotation behavior
    pub scan: ScanConfig,
    /// Settings store location
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Scan cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Selectors identifying candidate elements (scan targets)
    pub item_selectors: Vec<String>,
    /// Selector for the sub-element the relevance banner is inserted after
    pub banner_anchor: String,
    /// Quiet period after the last relevant mutation before a rescan (ms)
    pub debounce_ms: u64,
    /// Fallback highlight threshold when a setting supplies none
    pub default_threshold: u32,
}

/// Settings store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database path for persisted setting groups
    pub db_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl EngineConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
                message: format!("Failed to read config file {:?}: {}", path, e),
            })?;
            toml::from_str(&content).map_err(|e| EngineError::Config {
                message: format!("Failed to parse config file {:?}: {}", path, e),
            })?
        } else {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db_path) = std::env::var("HIGHLIGHTER_DB_PATH") {
            self.store.db_path = PathBuf::from(db_path);
        }
        if let Ok(level) = std::env::var("HIGHLIGHTER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(debounce) = std::env::var("HIGHLIGHTER_DEBOUNCE_MS") {
            self.scan.debounce_ms = debounce.parse().map_err(|_| EngineError::Config {
                message: "Invalid value in HIGHLIGHTER_DEBOUNCE_MS".to_string(),
            })?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.item_selectors.is_empty() {
            return Err(EngineError::ValidationFailed {
                field: "scan.item_selectors".to_string(),
                reason: "At least one candidate selector is required".to_string(),
            });
        }

        // Selectors must parse up front, not at scan time
        for raw in &self.scan.item_selectors {
            Selector::parse(raw)?;
        }
        Selector::parse(&self.scan.banner_anchor)?;

        if self.scan.debounce_ms == 0 {
            return Err(EngineError::ValidationFailed {
                field: "scan.debounce_ms".to_string(),
                reason: "Debounce window must be at least 1ms".to_string(),
            });
        }

        if self.scan.default_threshold < 1 {
            return Err(EngineError::ValidationFailed {
                field: "scan.default_threshold".to_string(),
                reason: "Highlight threshold must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Parsed candidate selectors
    pub fn item_selectors(&self) -> Result<Vec<Selector>> {
        self.scan
            .item_selectors
            .iter()
            .map(|raw| Selector::parse(raw))
            .collect()
    }

    /// Parsed banner anchor selector
    pub fn banner_anchor(&self) -> Result<Selector> {
        Selector::parse(&self.scan.banner_anchor)
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config {
            message: format!("Failed to serialize config to TOML: {}", e),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig {
                item_selectors: vec![
                    ".job-list-item".to_string(),
                    ".job-list-container".to_string(),
                ],
                banner_anchor: ".comp-name".to_string(),
                debounce_ms: 300,
                default_threshold: 1,
            },
            store: StoreConfig {
                db_path: PathBuf::from("./data/highlighter.db"),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
