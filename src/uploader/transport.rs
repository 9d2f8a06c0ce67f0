use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, multipart, Body, Client};
use tokio::time::Duration;

#[cfg(test)]
use mockall::automock;

use super::payload::UploadRequest;
use super::progress_tracker::ProgressSink;
use crate::errors::AppResult;

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one multipart upload.
///
/// Implementations report file bytes to `progress` as they hand them to the
/// connection and return any HTTP response, whatever its status. Only failures to
/// complete the exchange are errors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> AppResult<TransportResponse>;
}

/// reqwest transport streaming the file part in fixed-size chunks.
pub struct HttpTransport {
    client: Client,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(timeout: Duration, chunk_size: usize) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, chunk_size))
    }

    pub fn with_client(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }

    fn build_form(&self, request: &UploadRequest, progress: ProgressSink) -> AppResult<multipart::Form> {
        let payload = &request.payload;
        let total = payload.len() as u64;
        let chunks = split_into_chunks(payload.data(), self.chunk_size);

        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            progress.bytes_sent(sent, total);
            Ok::<Bytes, std::io::Error>(chunk)
        }));

        let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(payload.file_name().to_string())
            .mime_str(payload.mime_type())?;

        Ok(multipart::Form::new().part(request.field_name.clone(), part))
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> AppResult<TransportResponse> {
        let form = self.build_form(&request, progress)?;

        log::info!(
            "Uploading {} ({} bytes) to {}",
            request.payload.file_name(),
            request.payload.len(),
            request.endpoint
        );

        let response = self
            .client
            .post(&request.endpoint)
            .header(header::AUTHORIZATION, &request.authorization)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();

        let body = if status.is_success() {
            response.text().await?
        } else {
            response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string())
        };

        Ok(TransportResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn split_into_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut offset = 0;

    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }

    chunks
}
