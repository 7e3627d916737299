pub mod providers;
pub mod retry;

use specsmith_core::config::{ModelConfig, RetryConfig};
use specsmith_core::traits::Oracle;

pub use providers::anthropic::AnthropicOracle;
pub use providers::openai::OpenAiOracle;
pub use retry::RetryingOracle;

/// Create an oracle based on the provider name.
pub fn create_oracle(config: &ModelConfig) -> Box<dyn Oracle> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicOracle::new(config.clone())),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiOracle::new(config.clone())),
    }
}

/// Build the primary oracle, wrapped with retries and fallbacks when configured.
pub fn build_oracle(primary: &ModelConfig, fallbacks: &[ModelConfig]) -> Box<dyn Oracle> {
    let oracle = create_oracle(primary);
    if fallbacks.is_empty() && primary.retry.is_none() {
        return oracle;
    }

    let retry_config = primary.retry.clone().unwrap_or_else(RetryConfig::default);
    let fallbacks = fallbacks.iter().map(create_oracle).collect();
    Box::new(RetryingOracle::new(oracle, fallbacks, retry_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model_id: "m".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 1024,
            temperature: 0.0,
            retry: None,
        }
    }

    #[test]
    fn test_create_oracle_by_provider() {
        assert_eq!(create_oracle(&model("anthropic")).name(), "anthropic");
        assert_eq!(create_oracle(&model("claude")).name(), "anthropic");
        assert_eq!(create_oracle(&model("openai")).name(), "openai");
        assert_eq!(create_oracle(&model("ollama")).name(), "openai");
    }

    #[test]
    fn test_build_oracle_wraps_when_fallbacks_present() {
        assert_eq!(build_oracle(&model("openai"), &[]).name(), "openai");
        assert_eq!(
            build_oracle(&model("openai"), &[model("anthropic")]).name(),
            "retrying"
        );

        let mut with_retry = model("anthropic");
        with_retry.retry = Some(RetryConfig::default());
        assert_eq!(build_oracle(&with_retry, &[]).name(), "retrying");
    }
}
