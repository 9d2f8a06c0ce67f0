use bytes::Bytes;

use crate::errors::AppError;

/// Encoded image bytes plus the metadata of the multipart file part.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    data: Bytes,
    file_name: String,
    mime_type: String,
}

impl ImagePayload {
    pub fn new(data: impl Into<Bytes>, file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One multipart POST carrying a single image field.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub endpoint: String,
    pub authorization: String,
    pub field_name: String,
    pub payload: ImagePayload,
}

/// Terminal result of one upload.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Identifiers returned by the service; the first is the first uploaded file's id.
    Success(Vec<String>),
    Failure(AppError),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success(_))
    }

    pub fn ids(&self) -> Option<&[String]> {
        match self {
            UploadOutcome::Success(ids) => Some(ids.as_slice()),
            UploadOutcome::Failure(_) => None,
        }
    }

    pub fn first_id(&self) -> Option<&str> {
        self.ids().and_then(|ids| ids.first()).map(String::as_str)
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            UploadOutcome::Success(_) => None,
            UploadOutcome::Failure(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<Vec<String>, AppError> {
        match self {
            UploadOutcome::Success(ids) => Ok(ids),
            UploadOutcome::Failure(e) => Err(e),
        }
    }
}

impl From<Result<Vec<String>, AppError>> for UploadOutcome {
    fn from(result: Result<Vec<String>, AppError>) -> Self {
        match result {
            Ok(ids) => UploadOutcome::Success(ids),
            Err(e) => UploadOutcome::Failure(e),
        }
    }
}
