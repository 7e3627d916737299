use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use specsmith_core::config::ModelConfig;
use specsmith_core::error::{Result, SpecsmithError};
use specsmith_core::traits::Oracle;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible oracle. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiOracle {
    http: Client,
    config: ModelConfig,
}

impl OpenAiOracle {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn build_request<'a>(config: &'a ModelConfig, prompt: &'a str) -> ChatRequest<'a> {
    // o-series models reject temperature
    let is_o_series = config.model_id.starts_with("o1")
        || config.model_id.starts_with("o3")
        || config.model_id.starts_with("o4");

    ChatRequest {
        model: &config.model_id,
        messages: vec![OaiMessage {
            role: "user",
            content: prompt,
        }],
        max_tokens: config.max_tokens,
        temperature: if is_o_series {
            None
        } else if config.temperature > 0.0 {
            Some(config.temperature)
        } else {
            None
        },
        stream: false,
    }
}

/// Pull the reply text out of a chat completion body.
fn extract_text(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| SpecsmithError::OracleResponse(format!("invalid completion body: {}", e)))?;

    if let Some(usage) = &parsed.usage {
        debug!(
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "OpenAI usage"
        );
    }

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| SpecsmithError::OracleResponse("completion has no choices".into()))?;

    if choice.finish_reason.as_deref() == Some("length") {
        debug!("OpenAI reply truncated at max_tokens");
    }

    choice
        .message
        .content
        .filter(|c| !c.is_empty())
        .ok_or_else(|| SpecsmithError::OracleResponse("completion has no text content".into()))
}

impl Oracle for OpenAiOracle {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            let base_url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = build_request(&self.config, &prompt);

            let mut req = self.http.post(base_url).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
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
        "openai"
    }
}
