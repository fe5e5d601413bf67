//! Remote job API: the narrow contract to the AI job queue and asset store.
//!
//! DESIGN
//! ======
//! Workflows depend on the [`RemoteApi`] trait, never on HTTP directly. The
//! production implementation is [`http::HttpRemoteApi`] (reqwest, JSON);
//! tests substitute an in-memory mock. Submissions return the server's
//! `{success, jobId?, error?}` envelope untouched so callers decide how to
//! surface a rejection; transport and status failures are `RemoteError`s.

pub mod http;
pub mod types;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};

pub use types::{
    BackgroundRequest, BackgroundResponse, BackgroundUrls, DecomposeRequest, HistoryItem, HistoryLayer,
    HistoryResponse, HistoryStats, JobResult, JobStatus, JobStatusResponse, JobSubmission, RemoteError,
    RemoveBackgroundRequest, RemoveElementRequest, SaveHistoryRequest, StaticElementPositionRequest, SuccessResponse,
    UpscaleRequest, UrlResponse,
};

/// MIME type of every raster the editor produces.
pub const PNG_MIME: &str = "image/png";

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn submit_decompose(&self, request: &DecomposeRequest) -> Result<JobSubmission, RemoteError>;

    async fn submit_upscale(&self, request: &UpscaleRequest) -> Result<JobSubmission, RemoteError>;

    async fn submit_remove_element(&self, request: &RemoveElementRequest) -> Result<JobSubmission, RemoteError>;

    /// Store a base64 payload and return its durable URL.
    async fn upload_binary(&self, base64_payload: &str, mime_type: &str) -> Result<UrlResponse, RemoteError>;

    async fn save_history_item(&self, request: &SaveHistoryRequest) -> Result<SuccessResponse, RemoteError>;

    async fn get_history(&self, template_id: Option<&str>) -> Result<HistoryResponse, RemoteError>;

    async fn check_job_status(&self, job_id: &str) -> Result<JobStatusResponse, RemoteError>;

    /// Move a template's static element to follow its paired layer.
    async fn sync_static_element_position(
        &self,
        request: &StaticElementPositionRequest,
    ) -> Result<SuccessResponse, RemoteError>;

    /// Strip the background from an image. Returns a URL of the cut-out PNG.
    async fn remove_background(&self, request: &RemoveBackgroundRequest) -> Result<UrlResponse, RemoteError>;

    /// Persist a new background image, with its thumbnail and preview, for
    /// one side of an asset.
    async fn update_background(&self, request: &BackgroundRequest) -> Result<BackgroundResponse, RemoteError>;

    /// Download raw image bytes.
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Base64 (standard alphabet, padded) for upload bodies.
#[must_use]
pub fn encode_payload(bytes: &[u8]) -> String {
    Base64::encode_string(bytes)
}

/// Unwrap a `{success, url?}` envelope into the URL.
pub fn require_url(response: UrlResponse) -> Result<String, RemoteError> {
    match (response.success, response.url) {
        (true, Some(url)) if !url.is_empty() => Ok(url),
        (_, _) => Err(RemoteError::Rejected(response.error.unwrap_or_else(|| "no URL returned".into()))),
    }
}

/// Unwrap an `update_background` envelope into the full-size URL.
pub fn require_background_urls(response: BackgroundResponse) -> Result<BackgroundUrls, RemoteError> {
    match (response.success, response.urls) {
        (true, Some(urls)) if !urls.full_url.is_empty() => Ok(urls),
        (_, _) => Err(RemoteError::Rejected(response.error.unwrap_or_else(|| "no background URLs returned".into()))),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
