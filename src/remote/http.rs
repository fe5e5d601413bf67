//! reqwest-backed [`RemoteApi`].
//!
//! Endpoints are resolved against `CARDLAYERS_API_BASE_URL`:
//!
//! | Call                           | Method | Path                          |
//! |--------------------------------|--------|-------------------------------|
//! | `submit_decompose`             | POST   | `/decompose`                  |
//! | `submit_upscale`               | POST   | `/upscale`                    |
//! | `submit_remove_element`        | POST   | `/remove-element`             |
//! | `upload_binary`                | POST   | `/upload`                     |
//! | `save_history_item`            | POST   | `/history`                    |
//! | `get_history`                  | GET    | `/history?templateId=`        |
//! | `check_job_status`             | GET    | `/jobs/{id}`                  |
//! | `sync_static_element_position` | POST   | `/static-elements/position`   |
//! | `remove_background`            | POST   | `/remove-background`          |
//! | `update_background`            | POST   | `/background`                 |

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::*;
use super::RemoteApi;
use crate::config::EditorConfig;

pub struct HttpRemoteApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(config: &EditorConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| RemoteError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.api_base_url.trim_end_matches('/').to_string(), token: config.api_token.clone() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T, RemoteError> {
        let request = self.authorize(self.http.post(self.url(path))).json(body);
        let text = send(request).await?;
        parse(&text)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, RemoteError> {
        let request = self.authorize(self.http.get(self.url(path))).query(query);
        let text = send(request).await?;
        parse(&text)
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<String, RemoteError> {
    let response = request.send().await.map_err(|e| RemoteError::ApiRequest(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(|e| RemoteError::ApiRequest(e.to_string()))?;
    if !(200..300).contains(&status) {
        return Err(RemoteError::ApiResponse { status, body: text });
    }
    Ok(text)
}

fn parse<T: DeserializeOwned>(text: &str) -> Result<T, RemoteError> {
    serde_json::from_str(text).map_err(|e| RemoteError::ApiParse(e.to_string()))
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn submit_decompose(&self, request: &DecomposeRequest) -> Result<JobSubmission, RemoteError> {
        debug!(image_url = %request.image_url, num_layers = request.num_layers, "remote: submit decompose");
        self.post_json("/decompose", request).await
    }

    async fn submit_upscale(&self, request: &UpscaleRequest) -> Result<JobSubmission, RemoteError> {
        debug!(image_url = %request.image_url, model = %request.model, "remote: submit upscale");
        self.post_json("/upscale", request).await
    }

    async fn submit_remove_element(&self, request: &RemoveElementRequest) -> Result<JobSubmission, RemoteError> {
        debug!(image_url = %request.image_url, "remote: submit remove-element");
        self.post_json("/remove-element", request).await
    }

    async fn upload_binary(&self, base64_payload: &str, mime_type: &str) -> Result<UrlResponse, RemoteError> {
        let body = UploadRequest { base64: base64_payload.to_string(), mime_type: mime_type.to_string() };
        self.post_json("/upload", &body).await
    }

    async fn save_history_item(&self, request: &SaveHistoryRequest) -> Result<SuccessResponse, RemoteError> {
        self.post_json("/history", request).await
    }

    async fn get_history(&self, template_id: Option<&str>) -> Result<HistoryResponse, RemoteError> {
        match template_id {
            Some(id) => self.get_json("/history", &[("templateId", id)]).await,
            None => self.get_json("/history", &[]).await,
        }
    }

    async fn check_job_status(&self, job_id: &str) -> Result<JobStatusResponse, RemoteError> {
        self.get_json(&format!("/jobs/{job_id}"), &[]).await
    }

    async fn sync_static_element_position(
        &self,
        request: &StaticElementPositionRequest,
    ) -> Result<SuccessResponse, RemoteError> {
        self.post_json("/static-elements/position", request).await
    }

    async fn remove_background(&self, request: &RemoveBackgroundRequest) -> Result<UrlResponse, RemoteError> {
        debug!(bytes = request.image_base64.len(), "remote: remove background");
        self.post_json("/remove-background", request).await
    }

    async fn update_background(&self, request: &BackgroundRequest) -> Result<BackgroundResponse, RemoteError> {
        debug!(asset_id = %request.asset_id, side = %request.side, "remote: update background");
        self.post_json("/background", request).await
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self.http.get(url).send().await.map_err(|e| RemoteError::ApiRequest(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::ApiResponse { status, body });
        }
        let bytes = response.bytes().await.map_err(|e| RemoteError::ApiRequest(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
