//! Google Sheets and Drive access
//!
//! Thin REST clients over the v4 Sheets and v3 Drive APIs, OAuth2 token
//! handling for an authorized-user `token.json`, and the archive pipeline
//! that writes a confirmed record and stores the uploaded file.

pub mod archive;
pub mod auth;
pub mod drive;
pub mod sheets;

pub use archive::{ArchiveService, SaveOutcome, ServiceHealth};
pub use auth::{GoogleAuth, TokenSource};
pub use drive::{DriveApi, DriveClient, DriveFile};
pub use sheets::{SheetInfo, SheetsApi, SheetsClient};

use reqwest::{Client as HttpClient, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 300;

/// Errors from the Google APIs
#[derive(Debug, Error)]
pub enum GoogleError {
    /// Credentials missing, unreadable or rejected
    #[error("Google authentication failed: {0}")]
    AuthError(String),
    /// 404 from an API
    #[error("Not found: {0}")]
    NotFound(String),
    /// 403 from an API
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Any other non-success status
    #[error("Google API error {status}: {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        message: String,
    },
    /// Transport failure or timeout
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Unexpected response shape
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Local file access (credentials, token)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Branch code without a folder or sheet mapping
    #[error("Invalid branch: {0}")]
    InvalidBranch(String),
}

impl From<reqwest::Error> for GoogleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::JsonError(e.to_string())
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}

/// Maps a non-success status to an error; `context` names the resource
#[must_use]
pub fn error_for_status(status: StatusCode, context: &str, body: &str) -> GoogleError {
    match status {
        StatusCode::NOT_FOUND => GoogleError::NotFound(context.to_string()),
        StatusCode::FORBIDDEN => GoogleError::PermissionDenied(context.to_string()),
        StatusCode::UNAUTHORIZED => GoogleError::AuthError(format!("{context}: access token rejected")),
        _ => GoogleError::ApiError {
            status: status.as_u16(),
            message: crate::utils::truncate_str(body.trim(), MAX_ERROR_BODY),
        },
    }
}

/// Passes successful responses through, maps the rest
pub(crate) async fn check_response(response: Response, context: &str) -> Result<Response, GoogleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, context, &body))
}

/// HTTP client with the Google API timeout
pub fn create_http_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        assert!(matches!(
            error_for_status(StatusCode::NOT_FOUND, "sheet 'X'", ""),
            GoogleError::NotFound(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN, "folder", ""),
            GoogleError::PermissionDenied(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, "drive", ""),
            GoogleError::AuthError(_)
        ));

        let long = "e".repeat(1000);
        match error_for_status(StatusCode::BAD_REQUEST, "append", &long) {
            GoogleError::ApiError { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message.chars().count(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
