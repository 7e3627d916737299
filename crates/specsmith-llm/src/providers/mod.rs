pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicOracle;
pub use openai::OpenAiOracle;
