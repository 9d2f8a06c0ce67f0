// Uploader module - everything between an encoded image and the tagging service
//
// The client drives one multipart upload per call and reports through the callback gate

pub mod client;
pub mod payload;
pub mod progress_tracker;
pub mod response;
pub mod transport;

pub use client::{UploadChannels, UploadClient, UploadHandle, UploadSettings};
pub use payload::{ImagePayload, UploadOutcome, UploadRequest};
pub use progress_tracker::ProgressSink;
pub use transport::{HttpTransport, TransportResponse, UploadTransport};
