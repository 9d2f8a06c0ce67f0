use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image loading error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {reason}")]
    Encoding { reason: String },

    #[error("Upload rejected by server with HTTP {status}")]
    Validation { status: u16, body: String },

    #[error("Invalid information received from service: {reason}")]
    MalformedResponse { reason: String },

    #[error("Upload cancelled")]
    UploadCancelled,

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file type: {path}. Only image files are supported.")]
    InvalidFileType { path: String },

    #[error("File too large: {path}. Maximum size is 25MB.")]
    FileTooLarge { path: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn encoding(reason: impl std::fmt::Display) -> Self {
        Self::Encoding {
            reason: reason.to_string(),
        }
    }

    pub fn malformed_response(reason: &str) -> Self {
        Self::MalformedResponse {
            reason: reason.to_string(),
        }
    }

    pub fn invalid_input(field: &str, message: &str) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn invalid_file_type(path: &str) -> Self {
        Self::InvalidFileType {
            path: path.to_string(),
        }
    }

    pub fn file_too_large(path: &str) -> Self {
        Self::FileTooLarge {
            path: path.to_string(),
        }
    }

    pub fn invalid_endpoint(url: &str) -> Self {
        Self::InvalidEndpoint {
            url: url.to_string(),
        }
    }

    /// Errors produced before anything was sent over the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AppError::Encoding { .. }
                | AppError::Image(_)
                | AppError::Io(_)
                | AppError::FileNotFound { .. }
                | AppError::InvalidFileType { .. }
                | AppError::FileTooLarge { .. }
                | AppError::InvalidInput { .. }
                | AppError::Config(_)
        )
    }
}
