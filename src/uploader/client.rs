use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::payload::{UploadOutcome, UploadRequest};
use super::progress_tracker::{ProgressSink, UploadCallbacks};
use super::response::parse_upload_response;
use super::transport::{HttpTransport, UploadTransport};
use crate::config::{validate_config, Config};
use crate::errors::{AppError, AppResult};
use crate::image_processor::{to_jpeg_payload, EncodableImage};

static NEXT_UPLOAD_ID: AtomicU64 = AtomicU64::new(1);

/// Read-only request parameters shared by every upload of a client.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub endpoint: String,
    pub authorization: String,
    pub field_name: String,
    pub file_name: String,
    pub jpeg_quality: u8,
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        validate_config(config)?;

        Ok(Self {
            endpoint: config.endpoint.trim().to_string(),
            authorization: config.authorization_header()?,
            field_name: config.field_name.clone(),
            file_name: config.file_name.clone(),
            jpeg_quality: config.jpeg_quality,
        })
    }
}

/// Uploads single images and reports progress plus one terminal outcome per upload.
///
/// Uploads are independent: nothing is queued or serialized between calls, and the
/// only shared state is the read-only settings and the transport's connection pool.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn UploadTransport>,
    settings: Arc<UploadSettings>,
    runtime: Handle,
}

impl UploadClient {
    /// Build a client using the reqwest transport. Must be called inside a Tokio runtime.
    ///
    /// Uploads run on that runtime. If it has shut down, an upload (or one still in
    /// flight when it shuts down) completes with `Failure(AppError::Internal)`.
    pub fn new(config: &Config) -> AppResult<Self> {
        let settings = UploadSettings::from_config(config)?;
        let transport = HttpTransport::new(
            Duration::from_secs(config.request_timeout_secs),
            config.progress_chunk_size,
        )?;
        Self::with_transport(Arc::new(transport), settings)
    }

    pub fn with_transport(
        transport: Arc<dyn UploadTransport>,
        settings: UploadSettings,
    ) -> AppResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            AppError::Config("UploadClient must be created inside a Tokio runtime".to_string())
        })?;

        Ok(Self {
            transport,
            settings: Arc::new(settings),
            runtime,
        })
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    fn prepare<I>(&self, image: &I) -> AppResult<UploadRequest>
    where
        I: EncodableImage + ?Sized,
    {
        let payload = to_jpeg_payload(image, self.settings.jpeg_quality, &self.settings.file_name)?;

        Ok(UploadRequest {
            endpoint: self.settings.endpoint.clone(),
            authorization: self.settings.authorization.clone(),
            field_name: self.settings.field_name.clone(),
            payload,
        })
    }

    /// Encode `image` and upload it in the background.
    ///
    /// Encoding runs on the calling thread; if it fails, `on_complete` receives
    /// `Failure(AppError::Encoding)` before this returns and nothing is sent.
    /// Otherwise this returns immediately and the callbacks fire from a runtime
    /// worker: `on_progress` zero or more times with non-decreasing fractions, then
    /// `on_complete` exactly once. Callers marshal results onto their own context.
    ///
    /// Dropping the handle does not cancel the upload.
    pub fn upload<I, P, C>(&self, image: &I, on_progress: P, on_complete: C) -> UploadHandle
    where
        I: EncodableImage + ?Sized,
        P: FnMut(f32) + Send + 'static,
        C: FnOnce(UploadOutcome) + Send + 'static,
    {
        let upload_id = NEXT_UPLOAD_ID.fetch_add(1, Ordering::Relaxed);
        let callbacks = UploadCallbacks::new(upload_id, on_progress, on_complete);

        let request = match self.prepare(image) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Could not encode image for upload {}: {}", upload_id, e);
                callbacks.complete(UploadOutcome::Failure(e));
                return UploadHandle {
                    callbacks,
                    task: None,
                };
            }
        };

        let transport = self.transport.clone();
        let guard = CompletionGuard(callbacks.clone());
        let task = self.runtime.spawn(async move {
            let outcome = run_guarded(transport.as_ref(), request, guard.0.sink()).await;
            guard.0.complete(outcome);
        });

        UploadHandle {
            callbacks,
            task: Some(task),
        }
    }

    /// Channel form of [`UploadClient::upload`]: a finite progress stream that closes
    /// before the single outcome is sent.
    pub fn upload_channels<I>(&self, image: &I) -> UploadChannels
    where
        I: EncodableImage + ?Sized,
    {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let handle = self.upload(
            image,
            move |fraction| {
                let _ = progress_tx.send(fraction);
            },
            move |outcome| {
                let _ = outcome_tx.send(outcome);
            },
        );

        UploadChannels {
            progress: progress_rx,
            outcome: outcome_rx,
            handle,
        }
    }

    /// Upload on the current task and return the outcome.
    pub async fn upload_and_wait<I, P>(&self, image: &I, on_progress: P) -> UploadOutcome
    where
        I: EncodableImage + ?Sized,
        P: FnMut(f32) + Send + 'static,
    {
        let upload_id = NEXT_UPLOAD_ID.fetch_add(1, Ordering::Relaxed);

        let request = match self.prepare(image) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Could not encode image for upload {}: {}", upload_id, e);
                return UploadOutcome::Failure(e);
            }
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let callbacks = UploadCallbacks::new(upload_id, on_progress, move |outcome| {
            let _ = outcome_tx.send(outcome);
        });

        let outcome = run_guarded(self.transport.as_ref(), request, callbacks.sink()).await;
        callbacks.complete(outcome);

        outcome_rx
            .await
            .unwrap_or_else(|_| UploadOutcome::Failure(AppError::UploadCancelled))
    }
}

async fn run_guarded(
    transport: &dyn UploadTransport,
    request: UploadRequest,
    progress: ProgressSink,
) -> UploadOutcome {
    match AssertUnwindSafe(submit(transport, request, progress))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            log::error!("Upload transport panicked");
            UploadOutcome::Failure(AppError::Internal("upload transport panicked".to_string()))
        }
    }
}

async fn submit(
    transport: &dyn UploadTransport,
    request: UploadRequest,
    progress: ProgressSink,
) -> UploadOutcome {
    let response = match transport.send(request, progress).await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Error while uploading file: {}", e);
            return UploadOutcome::Failure(e);
        }
    };

    if !response.is_success() {
        log::warn!(
            "Upload rejected with HTTP {}: {}",
            response.status,
            response.body.chars().take(300).collect::<String>()
        );
        return UploadOutcome::Failure(AppError::Validation {
            status: response.status,
            body: response.body,
        });
    }

    let parsed = parse_upload_response(&response.body);
    if let Err(e) = &parsed {
        log::warn!("{}", e);
    }
    parsed.into()
}

/// Delivers a failure if the upload future is dropped before it produced an outcome,
/// e.g. when the runtime shuts down.
struct CompletionGuard(UploadCallbacks);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.0.is_complete() {
            return;
        }
        log::error!("Upload task {} dropped before completing", self.0.upload_id());
        self.0.complete(UploadOutcome::Failure(AppError::Internal(
            "upload task stopped before completing".to_string(),
        )));
    }
}

/// Handle to a background upload started by [`UploadClient::upload`].
pub struct UploadHandle {
    callbacks: UploadCallbacks,
    task: Option<JoinHandle<()>>,
}

impl UploadHandle {
    pub fn upload_id(&self) -> u64 {
        self.callbacks.upload_id()
    }

    /// True once the outcome has been delivered.
    pub fn is_finished(&self) -> bool {
        self.callbacks.is_complete()
    }

    /// Stop the upload. If no outcome was delivered yet, `Failure(UploadCancelled)`
    /// is delivered now and nothing fires afterwards; returns whether that happened.
    ///
    /// May be called from inside the upload's own callbacks.
    pub fn cancel(&self) -> bool {
        let delivered = self
            .callbacks
            .complete(UploadOutcome::Failure(AppError::UploadCancelled));

        // Outcome first, so the aborted task's guard finds it already delivered
        if let Some(task) = &self.task {
            task.abort();
        }

        if delivered {
            log::info!("Upload {} cancelled", self.upload_id());
        }
        delivered
    }

    /// Wait for the background task to end.
    pub async fn join(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::error!("Upload task {} failed: {}", self.callbacks.upload_id(), e);
                }
            }
        }
    }
}

/// Progress stream and outcome of one upload.
pub struct UploadChannels {
    pub progress: mpsc::UnboundedReceiver<f32>,
    pub outcome: oneshot::Receiver<UploadOutcome>,
    pub handle: UploadHandle,
}

impl UploadChannels {
    /// Drain the progress stream, then return the outcome.
    pub async fn collect(mut self) -> (Vec<f32>, UploadOutcome) {
        let mut fractions = Vec::new();
        while let Some(fraction) = self.progress.recv().await {
            fractions.push(fraction);
        }

        let outcome = self
            .outcome
            .await
            .unwrap_or_else(|_| UploadOutcome::Failure(AppError::UploadCancelled));
        (fractions, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::transport::{MockUploadTransport, TransportResponse};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Mutex;

    struct BrokenBitmap;

    impl EncodableImage for BrokenBitmap {
        fn encode_jpeg(&self, _quality: u8) -> AppResult<Vec<u8>> {
            Err(AppError::encoding("bitmap has no backing data"))
        }
    }

    fn settings() -> UploadSettings {
        UploadSettings {
            endpoint: "http://localhost/v1/content".to_string(),
            authorization: "Basic dXNlcjpwYXNz".to_string(),
            field_name: "imagefile".to_string(),
            file_name: "image.jpg".to_string(),
            jpeg_quality: 50,
        }
    }

    fn photo() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([200, 100, 50])))
    }

    fn respond(status: u16, body: &'static str) -> MockUploadTransport {
        let mut transport = MockUploadTransport::new();
        transport.expect_send().times(1).returning(move |_, _| {
            Ok(TransportResponse {
                status,
                body: body.to_string(),
            })
        });
        transport
    }

    #[tokio::test]
    async fn test_encoding_failure_skips_transport() {
        let mut transport = MockUploadTransport::new();
        transport.expect_send().times(0);
        let client = UploadClient::with_transport(Arc::new(transport), settings()).unwrap();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let handle = client.upload(&BrokenBitmap, |_| {}, move |outcome| {
            sink.lock().unwrap().push(outcome);
        });

        // Delivered synchronously, before upload returns
        assert!(handle.is_finished());
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], UploadOutcome::Failure(AppError::Encoding { .. })));
    }

    #[tokio::test]
    async fn test_request_uses_configured_fields() {
        let mut transport = MockUploadTransport::new();
        transport.expect_send().times(1).returning(|request, progress| {
            assert_eq!(request.endpoint, "http://localhost/v1/content");
            assert_eq!(request.authorization, "Basic dXNlcjpwYXNz");
            assert_eq!(request.field_name, "imagefile");
            assert_eq!(request.payload.file_name(), "image.jpg");
            assert_eq!(request.payload.mime_type(), "image/jpeg");
            assert_eq!(&request.payload.data()[..2], &[0xFF, 0xD8]);

            let total = request.payload.len() as u64;
            progress.bytes_sent(total / 2, total);
            progress.bytes_sent(total, total);
            Ok(TransportResponse {
                status: 200,
                body: r#"{"uploaded":[{"id":"abc123"}]}"#.to_string(),
            })
        });
        let client = UploadClient::with_transport(Arc::new(transport), settings()).unwrap();

        let (fractions, outcome) = client.upload_channels(&photo()).collect().await;

        assert_eq!(fractions.last().copied(), Some(1.0));
        assert_eq!(outcome.first_id(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_validation_error() {
        let transport = respond(401, r#"{"uploaded":[{"id":"abc123"}]}"#);
        let client = UploadClient::with_transport(Arc::new(transport), settings()).unwrap();

        let outcome = client.upload_and_wait(&photo(), |_| {}).await;
        assert!(matches!(
            outcome,
            UploadOutcome::Failure(AppError::Validation { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_success_body() {
        let transport = respond(200, r#"{"uploaded":[]}"#);
        let client = UploadClient::with_transport(Arc::new(transport), settings()).unwrap();

        let outcome = client.upload_and_wait(&photo(), |_| {}).await;
        assert!(matches!(
            outcome,
            UploadOutcome::Failure(AppError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_upload_and_wait_encoding_failure() {
        let mut transport = MockUploadTransport::new();
        transport.expect_send().times(0);
        let client = UploadClient::with_transport(Arc::new(transport), settings()).unwrap();

        let outcome = client.upload_and_wait(&BrokenBitmap, |_| {}).await;
        assert!(matches!(outcome, UploadOutcome::Failure(AppError::Encoding { .. })));
    }

    #[test]
    fn test_client_requires_runtime() {
        let transport = MockUploadTransport::new();
        assert!(matches!(
            UploadClient::with_transport(Arc::new(transport), settings()),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_upload_on_stopped_runtime_reports_internal_failure() {
        let mut transport = MockUploadTransport::new();
        transport.expect_send().times(0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let client = {
            let _enter = runtime.enter();
            UploadClient::with_transport(Arc::new(transport), settings()).unwrap()
        };
        drop(runtime);

        let (tx, rx) = std::sync::mpsc::channel();
        let _handle = client.upload(&photo(), |_| {}, move |outcome| {
            let _ = tx.send(outcome);
        });

        let outcome = rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("outcome delivered");
        assert!(matches!(outcome, UploadOutcome::Failure(AppError::Internal(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_settings_from_config_require_credentials() {
        let mut config = Config::default();
        assert!(UploadSettings::from_config(&config).is_err());

        config.api_key = "user".to_string();
        config.api_secret = "pass".to_string();
        let settings = UploadSettings::from_config(&config).unwrap();
        assert_eq!(settings.authorization, "Basic dXNlcjpwYXNz");
        assert_eq!(settings.field_name, "imagefile");
    }
}
