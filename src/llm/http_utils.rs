//! HTTP utilities for vision providers
//!
//! Shared request/response handling for the `OpenAI`-compatible chat
//! completion endpoints.

use crate::llm::AiError;
use reqwest::header::HeaderMap;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// Creates an HTTP client with the given request timeout.
///
/// Prevents infinite hangs when the API is slow or unresponsive.
#[must_use]
pub fn create_http_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Reads `Retry-After` as whole seconds
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Turns a non-success status and body into an `AiError`.
///
/// 429 becomes `RateLimit`, 401/403 become `AuthError`, anything else is an
/// `ApiError` with HTML pages hidden and long bodies truncated.
pub fn error_for_status(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> AiError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => AiError::RateLimit {
            wait_secs: parse_retry_after(headers),
            message: clean_error_body(body),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AiError::AuthError(format!("{provider} rejected the API key ({status})"))
        }
        _ => {
            let is_html = body.trim_start().starts_with("<!DOCTYPE")
                || body.trim_start().starts_with("<html")
                || body.trim_start().starts_with("<HTML");

            if is_html {
                // Don't include raw HTML in error message
                AiError::ApiError(format!(
                    "{provider} API error: {status} (Server returned HTML error page)"
                ))
            } else {
                AiError::ApiError(format!(
                    "{provider} API error: {status} - {}",
                    clean_error_body(body)
                ))
            }
        }
    }
}

fn clean_error_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY {
        format!(
            "{}... (truncated)",
            crate::utils::truncate_str(body, MAX_ERROR_BODY)
        )
    } else {
        body.to_string()
    }
}

/// Sends an HTTP POST request with JSON body and returns parsed JSON response.
///
/// # Errors
///
/// Returns `AiError::NetworkError` on connectivity issues (timeouts included),
/// the mapped status error on non-success codes, or `AiError::JsonError` if
/// parsing fails.
pub async fn send_json_request(
    client: &HttpClient,
    provider: &str,
    url: &str,
    body: &Value,
    auth_header: &str,
) -> Result<Value, AiError> {
    let response = client
        .post(url)
        .header("Authorization", auth_header)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| AiError::NetworkError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let error_text = response.text().await.unwrap_or_default();
        return Err(error_for_status(provider, status, &headers, &error_text));
    }

    response
        .json()
        .await
        .map_err(|e| AiError::JsonError(e.to_string()))
}

/// Extracts text content from a JSON response by navigating a path.
///
/// ```ignore
/// let content = extract_text_content(&response, &["choices", "0", "message", "content"])?;
/// ```
///
/// # Errors
///
/// Returns `AiError::InvalidResponse` if the path is invalid or the target is not a string.
pub fn extract_text_content(response: &Value, path: &[&str]) -> Result<String, AiError> {
    let mut current = response;

    for segment in path {
        if let Ok(index) = segment.parse::<usize>() {
            current = current.get(index).ok_or_else(|| {
                AiError::InvalidResponse(format!("Invalid path: missing index {index}"))
            })?;
        } else {
            current = current.get(*segment).ok_or_else(|| {
                AiError::InvalidResponse(format!("Invalid path: missing key {segment}"))
            })?;
        }
    }

    current
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| AiError::InvalidResponse(format!("Expected string at path, got: {current}")))
}
