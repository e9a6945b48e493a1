use crate::config::{AI_MAX_TOKENS, AI_TEMPERATURE};
use crate::llm::http_utils::{create_http_client, extract_text_content, send_json_request};
use crate::llm::{AiError, VisionProvider};
use crate::utils::truncate_str;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;

const DEEPSEEK_URL: &str = "https://api.deepseek.com/v1/chat/completions";

/// Vision provider for `DeepSeek`
///
/// The API takes the image as a data URL inlined in front of the prompt.
pub struct DeepSeekProvider {
    http_client: HttpClient,
    api_key: String,
    model: String,
}

impl DeepSeekProvider {
    /// Create a new `DeepSeek` provider instance
    #[must_use]
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http_client: create_http_client(timeout),
            api_key,
            model,
        }
    }
}

/// Content must be a bare JSON object
fn parse_strict_json(content: &str) -> Result<Value, AiError> {
    let trimmed = content.trim();
    if !trimmed.starts_with('{') {
        return Err(AiError::InvalidResponse(format!(
            "Invalid response format from DeepSeek: {}...",
            truncate_str(trimmed, 100)
        )));
    }
    serde_json::from_str(trimmed).map_err(|e| AiError::JsonError(e.to_string()))
}

#[async_trait]
impl VisionProvider for DeepSeekProvider {
    async fn extract_json(&self, image_bytes: &[u8], prompt: &str) -> Result<Value, AiError> {
        let image_base64 = BASE64.encode(image_bytes);

        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": format!("data:image/jpeg;base64,{image_base64}\n{prompt}")
                }
            ],
            "max_tokens": AI_MAX_TOKENS,
            "temperature": AI_TEMPERATURE
        });

        let auth = format!("Bearer {}", self.api_key);
        let res_json =
            send_json_request(&self.http_client, "DeepSeek", DEEPSEEK_URL, &body, &auth).await?;
        let content = extract_text_content(&res_json, &["choices", "0", "message", "content"])?;
        parse_strict_json(&content)
    }

    async fn health(&self) -> Result<String, AiError> {
        // No test call, it would spend quota
        Ok(format!("configured ({})", self.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_json_requires_leading_brace() {
        let value = parse_strict_json("  {\"nama\": \"A\"}\n").expect("bare object");
        assert_eq!(value["nama"], "A");

        assert!(matches!(
            parse_strict_json("```json\n{\"nama\": \"A\"}\n```"),
            Err(AiError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_strict_json("{\"nama\": "),
            Err(AiError::JsonError(_))
        ));
    }
}
