use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use specsmith_core::config::ModelConfig;
use specsmith_core::error::{Result, SpecsmithError};
use specsmith_core::traits::Oracle;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicOracle {
    http: Client,
    config: ModelConfig,
}

impl AnthropicOracle {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

// Anthropic API request types
#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// Anthropic API response types
#[derive(Deserialize, Debug)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn build_request<'a>(config: &'a ModelConfig, prompt: &'a str) -> AnthropicRequest<'a> {
    AnthropicRequest {
        model: &config.model_id,
        max_tokens: config.max_tokens,
        temperature: if config.temperature > 0.0 {
            Some(config.temperature)
        } else {
            None
        },
        messages: vec![ApiMessage {
            role: "user",
            content: prompt,
        }],
    }
}

/// Concatenate the text blocks of a Messages API response.
fn extract_text(body: &str) -> Result<String> {
    let parsed: MessageResponse = serde_json::from_str(body)
        .map_err(|e| SpecsmithError::OracleResponse(format!("invalid message body: {}", e)))?;

    if let Some(usage) = &parsed.usage {
        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Anthropic usage"
        );
    }
    if parsed.stop_reason.as_deref() == Some("max_tokens") {
        warn!("Anthropic reply truncated at max_tokens");
    }

    let text: String = parsed
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect();

    if text.is_empty() {
        return Err(SpecsmithError::OracleResponse(
            "message has no text content".into(),
        ));
    }
    Ok(text)
}

impl Oracle for AnthropicOracle {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            let api_key = self
                .config
                .api_key
                .as_deref()
                .ok_or_else(|| SpecsmithError::Config("Anthropic API key not set".into()))?;

            let base_url = self
                .config
                .base_url
                .as_deref()
                .unwrap_or(ANTHROPIC_API_URL);

            let body = build_request(&self.config, &prompt);

            let response = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| SpecsmithError::OracleRequest(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| SpecsmithError::OracleRequest(e.to_string()))?;

            if !status.is_success() {
                return Err(SpecsmithError::OracleRequest(format!(
                    "HTTP {}: {}",
                    status, text
                )));
            }

            extract_text(&text)
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_zero_temperature() {
        let cfg = ModelConfig {
            provider: "anthropic".into(),
            model_id: "claude-sonnet-4-20250514".into(),
            api_key: Some("k".into()),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.0,
            retry: None,
        };
        let body = serde_json::to_value(build_request(&cfg, "p")).unwrap();
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["messages"][0]["content"], "p");
    }

    #[test]
    fn test_extract_text_joins_blocks() {
        let body = r#"{"content":[
            {"type":"text","text":"{\"operations\":"},
            {"type":"thinking","thinking":"hmm"},
            {"type":"text","text":"[]}"}
        ],"stop_reason":"end_turn","usage":{"input_tokens":3,"output_tokens":4}}"#;
        assert_eq!(extract_text(body).unwrap(), r#"{"operations":[]}"#);
    }

    #[test]
    fn test_extract_text_empty() {
        assert!(extract_text(r#"{"content":[]}"#).is_err());
        assert!(extract_text("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let cfg = ModelConfig {
            provider: "anthropic".into(),
            model_id: "m".into(),
            api_key: None,
            base_url: None,
            max_tokens: 16,
            temperature: 0.0,
            retry: None,
        };
        let err = AnthropicOracle::new(cfg).complete("hi").await.unwrap_err();
        assert!(matches!(err, SpecsmithError::Config(_)));
    }
}
