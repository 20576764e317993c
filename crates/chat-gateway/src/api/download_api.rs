//! Re-serves a generated image as an attachment.

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::Url;
use tracing::{debug, error};

use crate::error::ApiError;
use crate::shared_state::AppState;
use crate::validation::{parse_body, validate, ImageDownloadInput};

const DOWNLOAD_FAILED: &str = "Failed to download image";

/// Largest image body the download endpoint will buffer.
pub const MAX_DOWNLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Parse and vet the target URL: http(s) only, and on the host allow-list
/// when one is configured.
pub fn check_download_url(raw: &str, allowed_hosts: &[String]) -> Result<Url, ApiError> {
    let url = Url::parse(raw)
        .map_err(|_| ApiError::Validation(vec!["imageUrl: Invalid image URL".to_string()]))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::Validation(vec![
            "imageUrl: Only http and https URLs are supported".to_string(),
        ]));
    }

    if !allowed_hosts.is_empty() {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !allowed_hosts.iter().any(|allowed| *allowed == host) {
            return Err(ApiError::Validation(vec![
                "imageUrl: Image host is not allowed".to_string(),
            ]));
        }
    }

    Ok(url)
}

/// POST /api/download-image
pub async fn download_image(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let input = validate::<ImageDownloadInput>(&parse_body(&body)).into_result()?;
    let url = check_download_url(&input.image_url, &state.config.download_allowed_hosts)?;

    debug!("Downloading image from {}", url);
    let response = state.http_client.get(url.clone()).send().await.map_err(|e| {
        error!("Image download from {} failed: {}", url, e);
        ApiError::Internal(DOWNLOAD_FAILED.to_string())
    })?;

    if !response.status().is_success() {
        error!("Image download from {} returned {}", url, response.status());
        return Err(ApiError::Internal(DOWNLOAD_FAILED.to_string()));
    }

    let bytes = read_capped(response, MAX_DOWNLOAD_BYTES).await.map_err(|e| {
        error!("Reading image body from {} failed: {}", url, e);
        ApiError::Internal(DOWNLOAD_FAILED.to_string())
    })?;

    let disposition = format!(
        "attachment; filename=\"generated-image-{}.png\"",
        Utc::now().timestamp_millis()
    );
    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Buffer a response body, failing once it grows past `cap` bytes.
/// A declared Content-Length over the cap fails before any body is read.
pub async fn read_capped(response: reqwest::Response, cap: usize) -> anyhow::Result<Vec<u8>> {
    if let Some(declared) = response.content_length() {
        if declared > cap as u64 {
            anyhow::bail!("declared body of {} bytes exceeds {} byte limit", declared, cap);
        }
    }

    let mut body = Vec::new();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > cap {
            anyhow::bail!("body exceeds {} byte limit", cap);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rejects_non_http_schemes() {
        assert!(check_download_url("file:///etc/passwd", &[]).is_err());
        assert!(check_download_url("ftp://host/a.png", &[]).is_err());
        assert!(check_download_url("https://host/a.png", &[]).is_ok());
    }

    #[test]
    fn test_host_allow_list() {
        let allowed = vec!["cdn.example.com".to_string()];
        assert!(check_download_url("https://CDN.example.com/a.png", &allowed).is_ok());
        match check_download_url("http://169.254.169.254/latest", &allowed) {
            Err(ApiError::Validation(errors)) => assert!(errors[0].starts_with("imageUrl:")),
            other => panic!("expected validation error, got {:?}", other.map(|u| u.to_string())),
        }
    }

    #[tokio::test]
    async fn test_read_capped_stops_chunked_body_past_limit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/big.png")
            .with_status(200)
            .with_chunked_body(|w| {
                for _ in 0..8 {
                    w.write_all(&[0u8; 16])?;
                }
                Ok(())
            })
            .create_async()
            .await;

        let url = format!("{}/big.png", server.url());

        let response = reqwest::get(&url).await.unwrap();
        let err = read_capped(response, 64).await.unwrap_err();
        assert!(err.to_string().contains("64 byte limit"));

        let response = reqwest::get(&url).await.unwrap();
        let body = read_capped(response, 128).await.unwrap();
        assert_eq!(body.len(), 128);
    }

    #[tokio::test]
    async fn test_read_capped_rejects_declared_length() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/declared.png")
            .with_status(200)
            .with_body(vec![1u8; 100])
            .create_async()
            .await;

        let response = reqwest::get(format!("{}/declared.png", server.url())).await.unwrap();
        let err = read_capped(response, 10).await.unwrap_err();
        assert!(err.to_string().contains("declared body of 100 bytes"));
    }
}
