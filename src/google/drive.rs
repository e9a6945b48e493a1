//! Google Drive v3 client

use super::auth::TokenSource;
use super::{check_response, GoogleError};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::{Client as HttpClient, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Metadata of a Drive file or folder
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// RFC 3339 creation time
    #[serde(default)]
    pub created_time: Option<String>,
    /// RFC 3339 modification time
    #[serde(default)]
    pub modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Operations the archive needs from Drive
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Id of a non-trashed folder named `name` directly under `parent_id`
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, GoogleError>;

    /// Creates a folder and returns its id
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, GoogleError>;

    /// Uploads file content into `folder_id`; returns the new file id
    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<String, GoogleError>;

    /// Metadata of a file or folder
    async fn get_file(&self, file_id: &str) -> Result<DriveFile, GoogleError>;

    /// Folders directly under `parent_id`
    async fn list_subfolders(&self, parent_id: &str) -> Result<Vec<DriveFile>, GoogleError>;

    /// Cheapest authenticated call, used by health checks
    async fn ping(&self) -> Result<(), GoogleError>;
}

/// Escapes a literal for a Drive `q` expression
#[must_use]
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Search expression for a named subfolder
#[must_use]
pub fn folder_query(parent_id: &str, name: &str) -> String {
    format!(
        "'{}' in parents and name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
        escape_query_value(parent_id),
        escape_query_value(name)
    )
}

/// Body of a `multipart/related` upload: JSON metadata part then content part
#[must_use]
pub fn build_multipart_body(boundary: &str, metadata: &Value, mime_type: &str, content: &[u8]) -> Bytes {
    let metadata = metadata.to_string();
    let mut body = BytesMut::with_capacity(content.len() + metadata.len() + 256);

    body.put_slice(format!("--{boundary}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata.as_bytes());
    body.put_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.put_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.put_slice(content);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    body.freeze()
}

/// REST client for Drive
pub struct DriveClient {
    http: HttpClient,
    tokens: Arc<dyn TokenSource>,
}

impl DriveClient {
    /// Create a Drive client
    #[must_use]
    pub fn new(http: HttpClient, tokens: Arc<dyn TokenSource>) -> Self {
        Self { http, tokens }
    }

    async fn list(&self, query: &str, page_size: Option<u32>) -> Result<Vec<DriveFile>, GoogleError> {
        let token = self.tokens.access_token().await?;
        let mut request = self
            .http
            .get(DRIVE_FILES_URL)
            .bearer_auth(token)
            .query(&[
                ("q", query),
                ("spaces", "drive"),
                ("fields", "files(id, name, createdTime, modifiedTime)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]);
        if let Some(size) = page_size {
            request = request.query(&[("pageSize", size)]);
        }

        let response = check_response(request.send().await?, "drive files").await?;
        let list: FileList = response.json().await?;
        Ok(list.files)
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, GoogleError> {
        let files = self.list(&folder_query(parent_id, name), None).await?;
        Ok(files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, GoogleError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(DRIVE_FILES_URL)
            .bearer_auth(token)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent_id]
            }))
            .send()
            .await?;
        let response = check_response(response, &format!("folder {parent_id}")).await?;
        let created: CreatedFile = response.json().await?;

        info!("Created new folder: {name}");
        Ok(created.id)
    }

    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<String, GoogleError> {
        let token = self.tokens.access_token().await?;
        let boundary = format!("upload-{}", uuid::Uuid::new_v4().simple());
        let metadata = json!({ "name": name, "parents": [folder_id] });
        let body = build_multipart_body(&boundary, &metadata, mime_type, &content);

        let response = self
            .http
            .post(DRIVE_UPLOAD_URL)
            .bearer_auth(token)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id"),
                ("supportsAllDrives", "true"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        let response = check_response(response, &format!("folder {folder_id}")).await?;
        let created: CreatedFile = response.json().await?;

        info!("Uploaded file to Drive: {name} (ID: {})", created.id);
        Ok(created.id)
    }

    async fn get_file(&self, file_id: &str) -> Result<DriveFile, GoogleError> {
        let token = self.tokens.access_token().await?;
        let url = file_url(file_id)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("fields", "id, name, createdTime, modifiedTime"),
                ("supportsAllDrives", "true"),
            ])
            .send()
            .await?;
        let response = check_response(response, &format!("file {file_id}")).await?;
        Ok(response.json().await?)
    }

    async fn list_subfolders(&self, parent_id: &str) -> Result<Vec<DriveFile>, GoogleError> {
        let query = format!(
            "'{}' in parents and mimeType = '{FOLDER_MIME}' and trashed = false",
            escape_query_value(parent_id)
        );
        self.list(&query, None).await
    }

    async fn ping(&self) -> Result<(), GoogleError> {
        self.list("trashed = false", Some(1)).await.map(|_| ())
    }
}

/// Metadata URL of one file, with the id percent-encoded as a single path segment
fn file_url(file_id: &str) -> Result<Url, GoogleError> {
    let mut url = Url::parse(DRIVE_FILES_URL)
        .map_err(|e| GoogleError::NetworkError(format!("invalid Drive URL: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| GoogleError::NetworkError("Drive URL cannot take a path".to_string()))?
        .push(file_id);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_query_escapes_quotes() {
        let q = folder_query("1AbC", "Toko 'Maju'");
        assert_eq!(
            q,
            "'1AbC' in parents and name = 'Toko \\'Maju\\'' and \
             mimeType = 'application/vnd.google-apps.folder' and trashed = false"
        );
    }

    #[test]
    fn test_multipart_body_layout() {
        let metadata = json!({"name": "BUDI - KTP.jpg", "parents": ["f1"]});
        let body = build_multipart_body("b0undary", &metadata, "image/jpeg", &[0xFF, 0xD8]);

        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--b0undary\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{"));
        assert!(text.contains("\"BUDI - KTP.jpg\""));
        assert!(text.contains("\r\n--b0undary\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with("\r\n--b0undary--\r\n"));
        assert!(body.windows(2).any(|w| w == [0xFF, 0xD8]));
    }

    #[test]
    fn test_drive_file_deserialize() {
        let file: DriveFile = serde_json::from_value(json!({
            "id": "abc",
            "name": "PDF",
            "createdTime": "2024-01-01T00:00:00.000Z"
        }))
        .expect("drive file");
        assert_eq!(file.name, "PDF");
        assert_eq!(file.created_time.as_deref(), Some("2024-01-01T00:00:00.000Z"));
        assert!(file.modified_time.is_none());
    }

    #[test]
    fn test_file_url_encodes_id() {
        let plain = file_url("1Ab_c-D").expect("url");
        assert_eq!(
            plain.as_str(),
            "https://www.googleapis.com/drive/v3/files/1Ab_c-D"
        );

        let odd = file_url("../x?y#z").expect("url");
        assert_eq!(
            odd.as_str(),
            "https://www.googleapis.com/drive/v3/files/..%2Fx%3Fy%23z"
        );
        assert!(odd.query().is_none());
    }
}
