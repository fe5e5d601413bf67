use super::*;
use crate::error::ErrorCode;
use crate::layers::Side;

// =========================================================================
// encode_payload / require_url
// =========================================================================

#[test]
fn encode_payload_is_padded_standard_base64() {
    assert_eq!(encode_payload(b"png"), "cG5n");
    assert_eq!(encode_payload(b"ab"), "YWI=");
    assert_eq!(encode_payload(&[]), "");
}

#[test]
fn require_url_returns_url_on_success() {
    let response = UrlResponse { success: true, url: Some("https://cdn/x.png".into()), error: None };
    assert_eq!(require_url(response).unwrap(), "https://cdn/x.png");
}

#[test]
fn require_url_rejects_failure_with_server_message() {
    let response = UrlResponse { success: false, url: None, error: Some("quota".into()) };
    assert_eq!(require_url(response).unwrap_err(), RemoteError::Rejected("quota".into()));
}

#[test]
fn require_url_rejects_success_without_url() {
    let response = UrlResponse { success: true, url: Some(String::new()), error: None };
    assert!(matches!(require_url(response), Err(RemoteError::Rejected(_))));
}

#[test]
fn background_urls_require_success_and_full_url() {
    let urls = BackgroundUrls {
        full_url: "https://cdn/full.png".into(),
        thumb_url: "https://cdn/thumb.jpg".into(),
        preview_url: "https://cdn/preview.jpg".into(),
    };
    let ok = BackgroundResponse { success: true, urls: Some(urls.clone()), error: None };
    assert_eq!(require_background_urls(ok).unwrap(), urls);

    let rejected = BackgroundResponse { success: false, urls: None, error: Some("not linked".into()) };
    assert_eq!(require_background_urls(rejected).unwrap_err(), RemoteError::Rejected("not linked".into()));
}

// =========================================================================
// Wire types
// =========================================================================

#[test]
fn history_item_parses_camel_case_with_defaults() {
    let json = r#"{
        "id": "j1",
        "createdAt": "2024-05-01T12:00:00Z",
        "status": "processing",
        "inputImageUrl": "https://cdn/in.png",
        "side": "back",
        "creditsUsed": 4
    }"#;
    let item: HistoryItem = serde_json::from_str(json).unwrap();
    assert_eq!(item.id, "j1");
    assert_eq!(item.status, JobStatus::Processing);
    assert_eq!(item.input_image_ref, "https://cdn/in.png");
    assert_eq!(item.side, Some(Side::Back));
    assert_eq!(item.credits_used, 4);
    assert!(item.layers.is_empty());
    assert!(!item.is_optimistic);
}

#[test]
fn job_status_response_with_result_layers() {
    let json = r#"{
        "status": "completed",
        "result": {
            "layers": [
                {"imageUrl": "https://cdn/a.png", "name": "Text"},
                {"imageUrl": "https://cdn/b.png", "bounds": {"x": 1, "y": 2, "width": 3, "height": 4}}
            ],
            "creditsUsed": 2
        }
    }"#;
    let response: JobStatusResponse = serde_json::from_str(json).unwrap();
    assert!(response.status.is_terminal());
    let result = response.result.unwrap();
    assert_eq!(result.layers.len(), 2);
    assert_eq!(result.layers[0].name.as_deref(), Some("Text"));
    assert_eq!(result.layers[1].bounds.unwrap().width, 3);
    assert_eq!(result.credits_used, Some(2));
}

#[test]
fn decompose_request_serializes_camel_case_and_skips_none() {
    let request = DecomposeRequest {
        image_url: "https://cdn/in.png".into(),
        num_layers: 4,
        prompt: None,
        negative_prompt: Some("blur".into()),
        side: Side::Front,
        template_id: None,
        settings: serde_json::json!({}),
    };
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["imageUrl"], "https://cdn/in.png");
    assert_eq!(value["numLayers"], 4);
    assert_eq!(value["negativePrompt"], "blur");
    assert_eq!(value["side"], "front");
    assert!(value.get("prompt").is_none());
    assert!(value.get("templateId").is_none());
}

#[test]
fn non_terminal_statuses() {
    assert!(!JobStatus::Pending.is_terminal());
    assert!(!JobStatus::Processing.is_terminal());
    assert!(JobStatus::Failed.is_terminal());
}

// =========================================================================
// RemoteError
// =========================================================================

#[test]
fn retryable_statuses() {
    assert!(RemoteError::ApiRequest("timeout".into()).retryable());
    assert!(RemoteError::ApiResponse { status: 503, body: String::new() }.retryable());
    assert!(RemoteError::ApiResponse { status: 429, body: String::new() }.retryable());
    assert!(!RemoteError::ApiResponse { status: 400, body: String::new() }.retryable());
    assert!(!RemoteError::Rejected("no".into()).retryable());
    assert_eq!(RemoteError::ApiParse("x".into()).error_code(), "E_API_PARSE");
}

#[test]
fn background_request_serializes_variant_fields() {
    let request = BackgroundRequest {
        asset_id: "a1".into(),
        side: Side::Back,
        full_base64: "Zg==".into(),
        thumb_base64: "dA==".into(),
        preview_base64: "cA==".into(),
        content_type: "image/png".into(),
    };
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["assetId"], "a1");
    assert_eq!(json["fullBase64"], "Zg==");
    assert_eq!(json["thumbBase64"], "dA==");
    assert_eq!(json["previewBase64"], "cA==");
    assert_eq!(json["contentType"], "image/png");

    let response: BackgroundResponse = serde_json::from_str(
        r#"{"success":true,"urls":{"fullUrl":"f","thumbUrl":"t","previewUrl":"p"}}"#,
    )
    .unwrap();
    assert_eq!(response.urls.map(|u| u.preview_url).as_deref(), Some("p"));
}
