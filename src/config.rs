use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

pub const ENDPOINT_ENV: &str = "PHOTO_TAGGER_ENDPOINT";
pub const API_KEY_ENV: &str = "PHOTO_TAGGER_API_KEY";
pub const API_SECRET_ENV: &str = "PHOTO_TAGGER_API_SECRET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub api_key: String,
    pub api_secret: String,
    pub field_name: String,
    pub file_name: String,
    pub jpeg_quality: u8,
    pub max_dimension: u32,
    pub progress_chunk_size: usize,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://api.imagga.com/v1/content".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            field_name: "imagefile".to_string(),
            file_name: "image.jpg".to_string(),
            jpeg_quality: 50,
            max_dimension: 4096,
            progress_chunk_size: 64 * 1024,
            request_timeout_secs: 120,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Value for the `Authorization` header: `Basic base64(key:secret)`.
    pub fn authorization_header(&self) -> AppResult<String> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(AppError::Config(format!(
                "API credentials are not configured (set api_key/api_secret or {} and {})",
                API_KEY_ENV, API_SECRET_ENV
            )));
        }
        InputValidator::validate_credentials(&self.api_key, &self.api_secret)?;

        let credential = format!("{}:{}", self.api_key, self.api_secret);
        Ok(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credential)
        ))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_ENV) {
            log::debug!("Endpoint overridden from environment");
            self.endpoint = endpoint;
        }
        if let Some(api_key) = lookup(API_KEY_ENV) {
            self.api_key = api_key;
        }
        if let Some(api_secret) = lookup(API_SECRET_ENV) {
            self.api_secret = api_secret;
        }
    }

    /// Copy safe for display, with the secret masked.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if !copy.api_secret.is_empty() {
            copy.api_secret = "********".to_string();
        }
        copy
    }
}

fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("Photo Tagger");

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<Config> {
    let config_path = get_config_path()?;
    load_config_from(&config_path)
}

/// Load the config at `config_path`, writing defaults there if it does not exist.
/// Environment overrides are applied before validation.
pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    let mut config = if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        })
    } else {
        let default_config = Config::default();
        save_config_to(&default_config, config_path)?;
        default_config
    };

    config.apply_env_overrides();
    validate_config(&config)?;

    Ok(config)
}

pub fn save_config_to(config: &Config, config_path: &Path) -> AppResult<()> {
    validate_config(config)?;

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn reset_config() -> AppResult<()> {
    let config_path = get_config_path()?;
    reset_config_at(&config_path)
}

pub fn reset_config_at(config_path: &Path) -> AppResult<()> {
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.reset_backup");
        fs::copy(config_path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    save_config_to(&Config::default(), config_path)?;

    log::info!("Configuration reset to defaults");
    Ok(())
}

/// Credentials are checked lazily by [`Config::authorization_header`] so a
/// fresh default config still validates.
pub fn validate_config(config: &Config) -> AppResult<()> {
    InputValidator::validate_endpoint_url(&config.endpoint)?;

    if config.field_name.trim().is_empty() {
        return Err(AppError::invalid_input("field_name", "Must not be empty"));
    }

    if config.file_name.trim().is_empty() {
        return Err(AppError::invalid_input("file_name", "Must not be empty"));
    }

    if config.jpeg_quality == 0 || config.jpeg_quality > 100 {
        return Err(AppError::invalid_input("jpeg_quality", "Must be between 1 and 100"));
    }

    if config.max_dimension == 0 {
        return Err(AppError::invalid_input("max_dimension", "Must be greater than 0"));
    }

    if config.progress_chunk_size < 1024 {
        return Err(AppError::invalid_input("progress_chunk_size", "Must be at least 1024 bytes"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::invalid_input("request_timeout_secs", "Must be greater than 0"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::invalid_input("log_level", "Must be a valid log level"));
    }

    Ok(())
}
