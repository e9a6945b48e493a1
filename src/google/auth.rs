//! OAuth2 access tokens for an authorized-user `token.json`.
//!
//! The token file is produced once by an interactive consent flow outside the
//! bot. Exchanging the refresh token, caching the access token and refreshing
//! it before expiry is done by `google-cloud-auth`.

use super::GoogleError;
use crate::config::GOOGLE_SCOPES;
use async_trait::async_trait;
use google_cloud_auth::credentials::{user_account, CacheableResource, Credentials};
use http::{header::AUTHORIZATION, Extensions, HeaderMap};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info};

/// Source of bearer tokens for Google API calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A currently valid access token
    async fn access_token(&self) -> Result<String, GoogleError>;
}

/// Fields of `token.json` the credentials need; the rest is ignored
#[derive(Debug, Deserialize)]
struct TokenFile {
    refresh_token: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

/// OAuth client section of `credentials.json`
#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// Authorized-user document plus the scopes to request
#[derive(Debug)]
struct AuthorizedUser {
    document: Value,
    scopes: Vec<String>,
}

/// Reads `token.json`, completing client id/secret from `credentials.json`
/// when the token file lacks them.
async fn read_authorized_user(
    credentials_path: &Path,
    token_path: &Path,
) -> Result<AuthorizedUser, GoogleError> {
    let raw = tokio::fs::read_to_string(token_path).await.map_err(|e| {
        GoogleError::AuthError(format!(
            "cannot read token file {}: {e}",
            token_path.display()
        ))
    })?;
    let mut token: TokenFile = serde_json::from_str(&raw)
        .map_err(|e| GoogleError::AuthError(format!("invalid token file: {e}")))?;

    if token.client_id.is_none() || token.client_secret.is_none() {
        let secrets = read_client_secrets(credentials_path).await?;
        token.client_id.get_or_insert(secrets.client_id);
        token.client_secret.get_or_insert(secrets.client_secret);
        if token.token_uri.is_none() {
            token.token_uri = secrets.token_uri;
        }
    }

    let mut document = json!({
        "type": "authorized_user",
        "client_id": token.client_id,
        "client_secret": token.client_secret,
        "refresh_token": token.refresh_token,
    });
    if let Some(uri) = token.token_uri {
        document["token_uri"] = Value::String(uri);
    }

    let scopes = if token.scopes.is_empty() {
        GOOGLE_SCOPES.iter().map(ToString::to_string).collect()
    } else {
        token.scopes
    };

    Ok(AuthorizedUser { document, scopes })
}

async fn read_client_secrets(path: &Path) -> Result<ClientSecrets, GoogleError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        GoogleError::AuthError(format!("cannot read credentials file {}: {e}", path.display()))
    })?;
    let file: CredentialsFile = serde_json::from_str(&raw)
        .map_err(|e| GoogleError::AuthError(format!("invalid credentials file: {e}")))?;
    file.installed.or(file.web).ok_or_else(|| {
        GoogleError::AuthError("credentials file has no 'installed' or 'web' client".to_string())
    })
}

/// Access token from an `Authorization: Bearer <token>` header map
fn bearer_token(headers: &HeaderMap) -> Result<String, GoogleError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(ToString::to_string)
        .ok_or_else(|| GoogleError::AuthError("credentials produced no bearer token".to_string()))
}

/// Authorized-user credentials backed by `token.json`
pub struct GoogleAuth {
    credentials: Credentials,
}

impl GoogleAuth {
    /// Loads the authorized-user credentials. No token is fetched until the
    /// first API call.
    ///
    /// # Errors
    ///
    /// Returns `GoogleError::AuthError` if the files are missing or malformed.
    pub async fn load(
        credentials_path: impl AsRef<Path>,
        token_path: impl AsRef<Path>,
    ) -> Result<Self, GoogleError> {
        let token_path = token_path.as_ref();
        let user = read_authorized_user(credentials_path.as_ref(), token_path).await?;

        let credentials = user_account::Builder::new(user.document)
            .with_scopes(user.scopes)
            .build()
            .map_err(|e| GoogleError::AuthError(format!("invalid authorized user: {e}")))?;

        info!(
            "Loaded Google OAuth2 credentials from {}",
            token_path.display()
        );
        Ok(Self { credentials })
    }
}

#[async_trait]
impl TokenSource for GoogleAuth {
    async fn access_token(&self) -> Result<String, GoogleError> {
        match self.credentials.headers(Extensions::new()).await {
            Ok(CacheableResource::New { data, .. }) => bearer_token(&data),
            Ok(CacheableResource::NotModified) => {
                debug!("Credentials reported cached headers without an entity tag");
                Err(GoogleError::AuthError(
                    "credentials returned no headers".to_string(),
                ))
            }
            Err(e) => Err(GoogleError::AuthError(format!("token refresh failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write temp file");
        file
    }

    #[tokio::test]
    async fn test_token_file_with_client() {
        let token = write_temp(
            r#"{"token": "ya29.cached", "refresh_token": "1//r", "client_id": "id",
                "client_secret": "secret", "expiry": "2025-01-01T00:00:00Z",
                "universe_domain": "googleapis.com"}"#,
        );
        let creds = write_temp("{}");

        let user = read_authorized_user(creds.path(), token.path())
            .await
            .expect("token file should load");
        assert_eq!(user.document["type"], "authorized_user");
        assert_eq!(user.document["client_id"], "id");
        assert_eq!(user.document["refresh_token"], "1//r");
        assert!(user.document.get("token_uri").is_none());
        assert_eq!(user.scopes.len(), GOOGLE_SCOPES.len());
    }

    #[tokio::test]
    async fn test_token_file_falls_back_to_client_secrets() {
        let token = write_temp(
            r#"{"refresh_token": "1//r", "scopes": ["https://www.googleapis.com/auth/drive"]}"#,
        );
        let creds = write_temp(
            r#"{"installed": {"client_id": "cid", "client_secret": "cs",
                "token_uri": "https://example.test/token"}}"#,
        );

        let user = read_authorized_user(creds.path(), token.path())
            .await
            .expect("token file should load");
        assert_eq!(user.document["client_id"], "cid");
        assert_eq!(user.document["client_secret"], "cs");
        assert_eq!(user.document["token_uri"], "https://example.test/token");
        assert_eq!(user.scopes, ["https://www.googleapis.com/auth/drive"]);
    }

    #[tokio::test]
    async fn test_load_errors() {
        let creds = write_temp("{}");
        let missing = GoogleAuth::load(creds.path(), "/nonexistent/token.json").await;
        assert!(matches!(missing, Err(GoogleError::AuthError(_))));

        let token = write_temp(r#"{"refresh_token": "1//r"}"#);
        let no_client = GoogleAuth::load(creds.path(), token.path()).await;
        assert!(matches!(no_client, Err(GoogleError::AuthError(_))));

        let no_refresh = write_temp(r#"{"client_id": "id", "client_secret": "s"}"#);
        let invalid = GoogleAuth::load(creds.path(), no_refresh.path()).await;
        assert!(matches!(invalid, Err(GoogleError::AuthError(_))));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer ya29.abc"));
        assert_eq!(bearer_token(&headers).expect("bearer"), "ya29.abc");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(bearer_token(&headers).is_err());
    }
}
