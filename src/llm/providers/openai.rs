use crate::config::{AI_MAX_TOKENS, AI_TEMPERATURE};
use crate::llm::extraction::parse_json_content;
use crate::llm::http_utils::{create_http_client, extract_text_content, send_json_request};
use crate::llm::{AiError, VisionProvider};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Vision provider for `OpenAI` chat completions
pub struct OpenAiProvider {
    http_client: HttpClient,
    client: Client<OpenAIConfig>,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    /// Create a new `OpenAI` provider instance
    #[must_use]
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.clone())
            .with_api_base(OPENAI_API_BASE);
        Self {
            http_client: create_http_client(timeout),
            client: Client::with_config(config),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl VisionProvider for OpenAiProvider {
    async fn extract_json(&self, image_bytes: &[u8], prompt: &str) -> Result<Value, AiError> {
        let url = format!("{OPENAI_API_BASE}/chat/completions");
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(image_bytes));

        let body = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt},
                        {"type": "image_url", "image_url": {"url": data_url}}
                    ]
                }
            ],
            "max_tokens": AI_MAX_TOKENS,
            "temperature": AI_TEMPERATURE
        });

        let auth = format!("Bearer {}", self.api_key);
        let res_json = send_json_request(&self.http_client, "OpenAI", &url, &body, &auth).await?;
        let content = extract_text_content(&res_json, &["choices", "0", "message", "content"])?;
        debug!(len = content.len(), "OpenAI returned extraction content");

        if content.trim().is_empty() {
            return Err(AiError::InvalidResponse("Empty response from OpenAI".to_string()));
        }
        parse_json_content(&content)
    }

    async fn health(&self) -> Result<String, AiError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content("test")
            .build()
            .map_err(|e| AiError::ApiError(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(vec![message.into()])
            .max_tokens(1_u32)
            .build()
            .map_err(|e| AiError::ApiError(e.to_string()))?;

        self.client
            .chat()
            .create(request)
            .await
            .map_err(|e| AiError::ApiError(e.to_string()))?;

        Ok(format!("healthy ({})", self.model))
    }
}
