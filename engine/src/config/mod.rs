//! Configuration management
//!
//! This module handles loading, validation, and management of the Wayfarer
//! configuration. Configuration is stored in TOML format at
//! ~/.wayfarer/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level
//! - **llm**: Generation backend settings
//! - **store**: Request store path and retention
//! - **workflow**: Retry bound and execution ceiling
//! - **research**: Research capability endpoints
//! - **api_server**: Intake server bind address
//!
//! API credentials are never stored in the file; each section names the
//! environment variable it reads its key from.

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Generation backend configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Request store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Workflow engine configuration
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Research capability configuration
    #[serde(default)]
    pub research: ResearchConfig,

    /// Intake server configuration
    #[serde(default)]
    pub api_server: ApiServerConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Generation backend configuration
///
/// The extraction call runs at temperature 0 regardless of what is
/// configured here; `temperature` applies to the synthesis stage only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the Anthropic-compatible Messages API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Token budget for extraction calls
    #[serde(default = "default_extraction_max_tokens")]
    pub extraction_max_tokens: u32,

    /// Token budget for synthesis calls
    #[serde(default = "default_synthesis_max_tokens")]
    pub synthesis_max_tokens: u32,

    /// Sampling temperature for synthesis calls
    #[serde(default = "default_synthesis_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            extraction_max_tokens: default_extraction_max_tokens(),
            synthesis_max_tokens: default_synthesis_max_tokens(),
            temperature: default_synthesis_temperature(),
        }
    }
}

/// Request store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file name, resolved under the data directory
    #[serde(default = "default_db_file")]
    pub db_file: String,

    /// Advisory retention window for request records, in days
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
            retention_days: default_retention_days(),
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Attempts per task before catch routing
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,

    /// Ceiling duration for one execution, in seconds
    #[serde(default = "default_execution_ceiling_secs")]
    pub execution_ceiling_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_task_attempts: default_max_task_attempts(),
            execution_ceiling_secs: default_execution_ceiling_secs(),
        }
    }
}

/// Research capability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchConfig {
    /// Flight search (Amadeus-style) settings
    #[serde(default)]
    pub flight: FlightConfig,

    /// Places search settings, shared by hotel and events lookups
    #[serde(default)]
    pub places: PlacesConfig,

    /// Weather forecast settings
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// Flight search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightConfig {
    #[serde(default = "default_flight_base_url")]
    pub base_url: String,

    #[serde(default = "default_flight_client_id_env")]
    pub client_id_env: String,

    #[serde(default = "default_flight_client_secret_env")]
    pub client_secret_env: String,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            base_url: default_flight_base_url(),
            client_id_env: default_flight_client_id_env(),
            client_secret_env: default_flight_client_secret_env(),
        }
    }
}

/// Places search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacesConfig {
    #[serde(default = "default_places_base_url")]
    pub base_url: String,

    #[serde(default = "default_places_api_key_env")]
    pub api_key_env: String,
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            base_url: default_places_base_url(),
            api_key_env: default_places_api_key_env(),
        }
    }
}

/// Weather forecast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,

    #[serde(default = "default_weather_api_key_env")]
    pub api_key_env: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_base_url(),
            api_key_env: default_weather_api_key_env(),
        }
    }
}

/// Intake server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerConfig {
    /// Bind address for the intake HTTP server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.wayfarer")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_llm_model() -> String {
    "claude-3-haiku-20240307".to_string()
}

fn default_llm_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_extraction_max_tokens() -> u32 {
    1024
}

fn default_synthesis_max_tokens() -> u32 {
    2000
}

fn default_synthesis_temperature() -> f32 {
    0.7
}

fn default_db_file() -> String {
    "requests.db".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_max_task_attempts() -> u32 {
    2
}

fn default_execution_ceiling_secs() -> u64 {
    300
}

fn default_flight_base_url() -> String {
    "https://test.api.amadeus.com".to_string()
}

fn default_flight_client_id_env() -> String {
    "AMADEUS_CLIENT_ID".to_string()
}

fn default_flight_client_secret_env() -> String {
    "AMADEUS_CLIENT_SECRET".to_string()
}

fn default_places_base_url() -> String {
    "https://places.googleapis.com".to_string()
}

fn default_places_api_key_env() -> String {
    "GOOGLE_PLACES_API_KEY".to_string()
}

fn default_weather_base_url() -> String {
    "https://api.openweathermap.org".to_string()
}

fn default_weather_api_key_env() -> String {
    "OPENWEATHER_API_KEY".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8470".to_string()
}

impl Config {
    /// Load configuration from the default location, creating a default
    /// file if none exists yet.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let path = Self::default_path()?;
        if !path.exists() {
            Config::default().save_to_path(&path)?;
        }
        // Loading (rather than returning the in-memory default) keeps the
        // fresh-install path identical to every later boot: tilde expansion
        // and validation always run.
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| {
            EngineError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;

        config.core.data_dir = expand_tilde(&config.core.data_dir)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration to the given path, creating parent
    /// directories as needed.
    pub fn save_to_path(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("failed to write {}: {}", path.display(), e))
        })
    }

    /// Default config file location: ~/.wayfarer/config.toml
    pub fn default_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".wayfarer").join("config.toml"))
    }

    /// Resolved database path under the data directory
    pub fn db_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.store.db_file)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), EngineError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "invalid log level '{}', expected one of {:?}",
                self.core.log_level, valid_levels
            )));
        }
        if self.workflow.max_task_attempts == 0 {
            return Err(EngineError::Config(
                "workflow.max_task_attempts must be at least 1".to_string(),
            ));
        }
        if self.workflow.execution_ceiling_secs == 0 {
            return Err(EngineError::Config(
                "workflow.execution_ceiling_secs must be positive".to_string(),
            ));
        }
        if self.store.retention_days <= 0 {
            return Err(EngineError::Config(
                "store.retention_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand a leading ~ to the user's home directory
fn expand_tilde(path: &Path) -> Result<PathBuf, EngineError> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("could not determine home directory".to_string()))?;
        return Ok(home.join(rest));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workflow.max_task_attempts, 2);
        assert_eq!(config.workflow.execution_ceiling_secs, 300);
        assert_eq!(config.store.retention_days, 30);
    }

    #[test]
    fn test_round_trip_through_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config::default();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.llm.model, config.llm.model);
        assert_eq!(loaded.api_server.bind_addr, config.api_server.bind_addr);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[llm]\nmodel = \"claude-3-5-sonnet-latest\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.llm.model, "claude-3-5-sonnet-latest");
        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.workflow.max_task_attempts, 2);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[core]\nlog_level = \"verbose\"\n").unwrap();

        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[workflow]\nmax_task_attempts = 0\n").unwrap();

        assert!(Config::load_from_path(&path).is_err());
    }
}
