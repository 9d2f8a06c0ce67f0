use regex::Regex;
use std::path::Path;
use crate::errors::{AppError, AppResult};

pub struct InputValidator;

impl InputValidator {
    pub fn validate_endpoint_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::invalid_input("endpoint", "Endpoint URL cannot be empty"));
        }

        if trimmed.len() > 500 {
            return Err(AppError::invalid_input("endpoint", "Endpoint URL too long"));
        }

        let parsed = reqwest::Url::parse(trimmed).map_err(|_| AppError::invalid_endpoint(trimmed))?;

        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(AppError::invalid_endpoint(trimmed));
        }

        Ok(())
    }

    pub fn validate_credentials(api_key: &str, api_secret: &str) -> AppResult<()> {
        if api_key.trim().is_empty() {
            return Err(AppError::invalid_input("api_key", "API key cannot be empty"));
        }

        if api_secret.trim().is_empty() {
            return Err(AppError::invalid_input("api_secret", "API secret cannot be empty"));
        }

        // The key is the user part of a Basic credential
        if api_key.contains(':') {
            return Err(AppError::invalid_input("api_key", "API key cannot contain ':'"));
        }

        if api_key.chars().chain(api_secret.chars()).any(char::is_control) {
            return Err(AppError::invalid_input(
                "credentials",
                "Credentials contain control characters",
            ));
        }

        Ok(())
    }

    pub fn validate_file_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::invalid_input("file_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        if let Some(extension) = path_obj.extension() {
            let ext = extension.to_string_lossy().to_lowercase();
            if !matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp") {
                return Err(AppError::invalid_file_type(path));
            }
        } else {
            return Err(AppError::invalid_input("file_path", "File must have an extension"));
        }

        // Resolves `..` segments and symlinks to the file actually read
        let resolved = path_obj
            .canonicalize()
            .map_err(|_| AppError::file_not_found(path))?;

        if !resolved.is_file() {
            return Err(AppError::invalid_input("file_path", "Path is not a file"));
        }

        Ok(())
    }

    pub fn validate_image_file(file_path: &str) -> AppResult<()> {
        Self::validate_file_path(file_path)?;

        let metadata = std::fs::metadata(file_path)?;

        const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(AppError::file_too_large(file_path));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = match Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#) {
            Ok(unsafe_chars) => unsafe_chars.replace_all(filename.trim(), "_").to_string(),
            Err(_) => filename.trim().to_string(),
        };

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized
        }
    }
}
