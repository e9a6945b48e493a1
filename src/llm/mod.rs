//! AI vision providers and extraction client
//!
//! Provides a unified interface to the vision backends (`OpenAI`, `DeepSeek`)
//! used to read KTP/NPWP fields from a photo.

pub mod extraction;
mod http_utils;
/// Implementations of specific vision providers
pub mod providers;

use crate::config::{AiService, Settings, AI_BACKOFF_FACTOR_MS, AI_MAX_ATTEMPTS, AI_MAX_BACKOFF_MS};
use crate::document::DocumentData;
use crate::validators;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{info, instrument, warn};

/// Errors that can occur during AI extraction
#[derive(Debug, Error)]
pub enum AiError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Missing provider configuration or API key
    #[error("Missing client/API key: {0}")]
    MissingConfig(String),
    /// API key rejected (401/403)
    #[error("Authentication error: {0}")]
    AuthError(String),
    /// Rate limit exceeded (429), optionally with a wait time
    #[error("Rate limit exceeded: {message} (wait: {wait_secs:?}s)")]
    RateLimit {
        /// Retry-After duration in seconds, if provided by the server
        wait_secs: Option<u64>,
        /// Error message from the server
        message: String,
    },
    /// Response parsed but does not describe a KTP/NPWP
    #[error("Invalid extraction: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Authentication and configuration problems are not worth retrying
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthError(_) | Self::MissingConfig(_))
    }
}

/// Interface for all vision providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Sends the image with the extraction prompt and returns the parsed
    /// JSON object from the model's answer
    async fn extract_json(&self, image_bytes: &[u8], prompt: &str) -> Result<Value, AiError>;

    /// Cheap reachability check, returns a short status text
    async fn health(&self) -> Result<String, AiError>;
}

/// Extraction client: provider selection, retries and result parsing
pub struct AiClient {
    provider: Arc<dyn VisionProvider>,
    service: AiService,
    validate: bool,
    max_attempts: usize,
    backoff_factor_ms: u64,
}

impl AiClient {
    /// Create the client for the configured AI service
    ///
    /// # Errors
    ///
    /// Returns `AiError::MissingConfig` if the service is unknown or its key is absent.
    pub fn new(settings: &Settings) -> Result<Self, AiError> {
        let service = settings.ai_service().ok_or_else(|| {
            AiError::MissingConfig(format!("unknown AI service '{}'", settings.active_ai_service))
        })?;
        let timeout = Duration::from_secs(settings.ai_timeout_secs);

        let provider: Arc<dyn VisionProvider> = match service {
            AiService::OpenAi => {
                let key = non_empty(settings.openai_api_key.as_deref())
                    .ok_or_else(|| AiError::MissingConfig("OPENAI_API_KEY".to_string()))?;
                Arc::new(providers::OpenAiProvider::new(
                    key,
                    settings.openai_model.clone(),
                    timeout,
                ))
            }
            AiService::DeepSeek => {
                let key = non_empty(settings.deepseek_api_key.as_deref())
                    .ok_or_else(|| AiError::MissingConfig("DEEPSEEK_API_KEY".to_string()))?;
                Arc::new(providers::DeepSeekProvider::new(
                    key,
                    settings.deepseek_model.clone(),
                    timeout,
                ))
            }
        };

        Ok(Self::with_provider(
            provider,
            service,
            settings.enable_data_validation,
        ))
    }

    /// Create a client around an existing provider
    #[must_use]
    pub fn with_provider(provider: Arc<dyn VisionProvider>, service: AiService, validate: bool) -> Self {
        Self {
            provider,
            service,
            validate,
            max_attempts: AI_MAX_ATTEMPTS,
            backoff_factor_ms: AI_BACKOFF_FACTOR_MS,
        }
    }

    /// Overrides attempt count and backoff scale (delays are
    /// `2^n * factor_ms` with jitter)
    #[must_use]
    pub fn with_retry(mut self, max_attempts: usize, backoff_factor_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_factor_ms = backoff_factor_ms;
        self
    }

    /// Active service
    #[must_use]
    pub const fn service(&self) -> AiService {
        self.service
    }

    /// Extracts KTP/NPWP fields from a photo.
    ///
    /// Retries transient failures with exponential backoff; authentication
    /// and configuration errors fail immediately.
    ///
    /// # Errors
    ///
    /// Returns the last `AiError` once attempts are exhausted.
    #[instrument(skip(self, image_bytes), fields(service = self.service.as_str(), size = image_bytes.len()))]
    pub async fn extract_document(&self, image_bytes: &[u8]) -> Result<DocumentData, AiError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.backoff_factor_ms)
            .max_delay(Duration::from_millis(AI_MAX_BACKOFF_MS))
            .map(jitter)
            .take(self.max_attempts - 1);

        let mut attempt = 0usize;
        let mut document = RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                let current = attempt;
                async move {
                    info!("AI extraction attempt {}/{}", current, self.max_attempts);
                    let raw = self
                        .provider
                        .extract_json(image_bytes, extraction::EXTRACTION_PROMPT)
                        .await?;
                    extraction::parse_extraction(&raw)
                }
            },
            |e: &AiError| {
                warn!("AI extraction failed: {e}");
                e.is_retryable()
            },
        )
        .await?;

        if self.validate {
            let issues = validators::validate_document(&document);
            if !issues.is_empty() {
                warn!("Extracted data has validation issues: {:?}", issues);
            }
        }

        document.ai_service = Some(self.service.as_str().to_string());
        info!(
            "Extracted {} data with {}",
            document.document_type,
            self.service.as_str()
        );
        Ok(document)
    }

    /// Provider reachability for `/status`
    ///
    /// # Errors
    ///
    /// Returns the provider error if the check fails.
    pub async fn health(&self) -> Result<String, AiError> {
        self.provider.health().await
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentType;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client(mock: MockVisionProvider) -> AiClient {
        AiClient::with_provider(Arc::new(mock), AiService::OpenAi, true).with_retry(3, 1)
    }

    fn ktp_json() -> Value {
        json!({
            "document_type": "ktp",
            "nama": "SITI AMINAH",
            "nik": "3201014508900002",
            "npwp_15": null,
            "npwp_16": null,
            "alamat": "Jl. Melati 3 RT 001 RW 002 Kel. Cibodas Kec. Cibodas"
        })
    }

    #[tokio::test]
    async fn test_extract_document_success() {
        let mut mock = MockVisionProvider::new();
        mock.expect_extract_json()
            .times(1)
            .returning(|_, _| Ok(ktp_json()));

        let doc = client(mock)
            .extract_document(b"jpeg")
            .await
            .expect("extraction should succeed");

        assert_eq!(doc.document_type, DocumentType::Ktp);
        assert_eq!(doc.nik.as_deref(), Some("3201014508900002"));
        assert_eq!(doc.ai_service.as_deref(), Some("openai"));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut mock = MockVisionProvider::new();
        mock.expect_extract_json().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AiError::RateLimit {
                    wait_secs: None,
                    message: "slow down".to_string(),
                })
            } else {
                Ok(ktp_json())
            }
        });

        let result = client(mock).extract_document(b"jpeg").await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let mut mock = MockVisionProvider::new();
        mock.expect_extract_json()
            .times(1)
            .returning(|_, _| Err(AiError::AuthError("invalid key".to_string())));

        let result = client(mock).extract_document(b"jpeg").await;
        assert!(matches!(result, Err(AiError::AuthError(_))));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut mock = MockVisionProvider::new();
        mock.expect_extract_json()
            .times(3)
            .returning(|_, _| Ok(json!({"document_type": "SIM", "nama": "X"})));

        let result = client(mock).extract_document(b"jpeg").await;
        assert!(matches!(result, Err(AiError::InvalidResponse(_))));
    }

    #[test]
    fn test_new_requires_key_for_active_service() {
        let mut settings = crate::config::test_settings();
        settings.active_ai_service = "deepseek".to_string();
        settings.deepseek_api_key = Some("  ".to_string());

        assert!(matches!(
            AiClient::new(&settings),
            Err(AiError::MissingConfig(_))
        ));
    }
}
