//! Mocks and fixtures shared by specsmith tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use specsmith_core::catalog::{BlockSchema, ConfigField, PortSchema, StaticCatalog};
use specsmith_core::error::{Result, SpecsmithError};
use specsmith_core::traits::Oracle;
use specsmith_core::types::{Link, Node, Specification};

/// One scripted oracle reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(String),
    /// Sleep before answering with the text. Pair with a paused tokio clock.
    Delayed(Duration, String),
}

/// An oracle that replays a fixed script and records every prompt it sees.
///
/// Once the script runs out, every further call fails.
#[derive(Clone, Default)]
pub struct MockOracle {
    script: Arc<Mutex<VecDeque<MockReply>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(MockReply::Text(text.into()))
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(MockReply::Error(message.into()))
    }

    pub fn with_delayed_reply(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(MockReply::Delayed(delay, text.into()))
    }

    fn push(self, reply: MockReply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Oracle for MockOracle {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();

        Box::pin(async move {
            match next {
                Some(MockReply::Text(text)) => Ok(text),
                Some(MockReply::Error(message)) => Err(SpecsmithError::OracleRequest(message)),
                Some(MockReply::Delayed(delay, text)) => {
                    tokio::time::sleep(delay).await;
                    Ok(text)
                }
                None => Err(SpecsmithError::OracleRequest("mock script exhausted".into())),
            }
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A small catalog covering typed, untyped and multi-input ports.
///
/// - `TextInput`: config `value`; output `result: string`
/// - `Summarize`: config `max_words`, `style`; input `text: string`; output `summary: string`
/// - `Output`: input `value` (untyped)
/// - `Counter`: output `count: integer`
/// - `Join`: config `separator`; multi-input `parts: string`; output `joined: string`
pub fn sample_catalog() -> StaticCatalog {
    StaticCatalog::new(vec![
        BlockSchema::new("TextInput")
            .with_description("Provides a fixed text value")
            .with_config_field(ConfigField::new("value", Some("string")))
            .with_output(PortSchema::new("result", Some("string"))),
        BlockSchema::new("Summarize")
            .with_description("Summarizes text with an LLM")
            .with_config_field(ConfigField::new("max_words", Some("integer")))
            .with_config_field(ConfigField::new("style", Some("string")))
            .with_input(PortSchema::new("text", Some("string")))
            .with_output(PortSchema::new("summary", Some("string"))),
        BlockSchema::new("Output")
            .with_description("Emits a value from the agent")
            .with_input(PortSchema::new("value", None)),
        BlockSchema::new("Counter")
            .with_description("Counts invocations")
            .with_output(PortSchema::new("count", Some("integer"))),
        BlockSchema::new("Join")
            .with_description("Joins several strings")
            .with_config_field(ConfigField::new("separator", Some("string")))
            .with_input(PortSchema::new("parts", Some("string")).multi())
            .with_output(PortSchema::new("joined", Some("string"))),
    ])
}

/// `input -> summarize -> output`, valid against [`sample_catalog`].
pub fn sample_spec() -> Specification {
    let mut spec = Specification::new("Summarizer", "Summarizes a fixed text")
        .with_node(
            Node::new("input", "TextInput")
                .with_config("value", json!("The quick brown fox"))
                .with_position(0, 0),
        )
        .with_node(
            Node::new("summarize", "Summarize")
                .with_config("style", json!("concise"))
                .with_position(200, 0),
        )
        .with_node(Node::new("output", "Output").with_position(400, 0))
        .with_link(Link::new("input", "result", "summarize", "text"))
        .with_link(Link::new("summarize", "summary", "output", "value"));
    spec.metadata
        .properties
        .insert("owner".into(), json!("platform-team"));
    spec
}

/// Reply text for a patch made of the given operation objects.
pub fn patch_reply(operations: serde_json::Value) -> String {
    json!({ "operations": operations }).to_string()
}
