pub mod config;
pub mod errors;
pub mod image_processor;
pub mod security;
pub mod uploader;

pub use errors::{AppError, AppResult};
pub use image_processor::EncodableImage;
pub use uploader::{UploadClient, UploadOutcome};
