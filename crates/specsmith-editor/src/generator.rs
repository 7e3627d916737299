//! Prompting the oracle for a patch and decoding its reply.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use specsmith_core::catalog::BlockSchema;
use specsmith_core::config::EditorConfig;
use specsmith_core::traits::{BlockCatalog, Oracle};
use specsmith_core::types::Specification;

use crate::extract::extract_json_object;
use crate::patch::RawPatch;

/// A question the oracle needs answered before it can produce a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    pub question: String,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub example: String,
}

#[derive(Deserialize)]
struct ClarificationReply {
    #[serde(default)]
    questions: Vec<ClarifyingQuestion>,
}

/// What one oracle call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Patch(RawPatch),
    Clarification(Vec<ClarifyingQuestion>),
}

/// A failed generation attempt. Each one consumes an attempt of the edit cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("reply is not a valid patch: {0}")]
    ParseFailure(String),

    #[error("oracle call failed: {0}")]
    Oracle(String),

    #[error("oracle did not answer within {0}s")]
    Timeout(u64),

    #[error("cannot build prompt: {0}")]
    Prompt(String),
}

const GRAMMAR: &str = r#"Reply with a single JSON object and nothing else:

{
  "intent": {"summary": "<one sentence>", "affected_node_ids": ["<id>", ...]},
  "operations": [ <operation>, ... ]
}

Each operation is exactly one of:
  {"op": "add_node", "node": {"id": "<new id>", "block_type": "<block id>", "config": {<field>: <value>}, "position": {"x": 0, "y": 0}}}
  {"op": "remove_node", "node_id": "<id>"}
  {"op": "modify_node", "node_id": "<id>", "changes": {<field>: <new value>}}
  {"op": "add_link", "link": {"source_id": "<id>", "source_port": "<output>", "sink_id": "<id>", "sink_port": "<input>"}}
  {"op": "remove_link", "link": {"source_id": "<id>", "source_port": "<output>", "sink_id": "<id>", "sink_port": "<input>"}}

Rules:
- Only emit operations that touch the parts of the agent the request is about. Everything else is kept as is.
- Operations run in the order given. Add a node before linking to it.
- remove_node also removes every link touching that node.
- modify_node replaces only the listed config fields.
- Use only block types, ports and config fields from the block schemas below.
- An input port accepts one link unless its schema says "multi_input": true.
- A config field marked "required": true must be set in config or fed by a link to the input of the same name.
- No fields other than the ones shown above."#;

const CLARIFICATION: &str = r#"If the request is too ambiguous to edit safely, reply instead with:

{"type": "clarifying_questions", "questions": [{"question": "<question>", "keyword": "<topic>", "example": "<example answer>"}]}"#;

/// Block schemas worth showing the oracle for this edit.
///
/// Blocks already used by `base` always come first. Blocks whose id or name
/// appears in the request follow, and the rest of the catalog fills up to
/// `max_blocks`.
pub fn relevant_blocks<'a>(
    base: &Specification,
    request: &str,
    catalog: &'a dyn BlockCatalog,
    max_blocks: usize,
) -> Vec<&'a BlockSchema> {
    let mut picked: Vec<&BlockSchema> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for block_type in base.block_types() {
        if let Some(block) = catalog.lookup(block_type) {
            if seen.insert(block.id.as_str()) {
                picked.push(block);
            }
        }
    }

    let request = request.to_lowercase();
    let all = catalog.all();
    for block in all.iter().copied() {
        if picked.len() >= max_blocks {
            break;
        }
        let mentioned = request.contains(&block.id.to_lowercase())
            || (!block.name.is_empty() && request.contains(&block.name.to_lowercase()));
        if mentioned && seen.insert(block.id.as_str()) {
            picked.push(block);
        }
    }
    for block in all {
        if picked.len() >= max_blocks {
            break;
        }
        if seen.insert(block.id.as_str()) {
            picked.push(block);
        }
    }

    picked
}

/// Render the full prompt for one attempt.
pub fn build_prompt(
    base: &Specification,
    request: &str,
    catalog: &dyn BlockCatalog,
    config: &EditorConfig,
) -> specsmith_core::Result<String> {
    let blocks = relevant_blocks(base, request, catalog, config.max_prompt_blocks);
    let blocks_json = serde_json::to_string_pretty(&blocks)?;
    let spec_json = base.to_json_pretty()?;

    let mut prompt = String::new();
    prompt.push_str(
        "You edit agent specifications by emitting small structural patches. \
         Do not regenerate the specification.\n\n",
    );
    prompt.push_str(GRAMMAR);
    if config.allow_clarification {
        prompt.push_str("\n\n");
        prompt.push_str(CLARIFICATION);
    }
    prompt.push_str("\n\n## Block schemas\n\n");
    prompt.push_str(&blocks_json);
    prompt.push_str("\n\n## Current specification\n\n");
    prompt.push_str(&spec_json);
    prompt.push_str("\n\n## Change request\n\n");
    prompt.push_str(request);
    prompt.push('\n');

    debug!(
        blocks = blocks.len(),
        prompt_len = prompt.len(),
        "Built patch prompt"
    );
    Ok(prompt)
}

/// Decode an oracle reply into a proposal.
///
/// Anything outside the patch grammar is a `ParseFailure`. A clarification
/// reply is accepted only when `allow_clarification` is set and it carries at
/// least one question.
pub fn parse_reply(text: &str, allow_clarification: bool) -> Result<Proposal, GenerationError> {
    let value = extract_json_object(text)
        .ok_or_else(|| GenerationError::ParseFailure("reply contains no JSON object".into()))?;

    if value.get("type").and_then(|t| t.as_str()) == Some("clarifying_questions") {
        if !allow_clarification {
            return Err(GenerationError::ParseFailure(
                "clarifying questions are not allowed here".into(),
            ));
        }
        let reply: ClarificationReply = serde_json::from_value(value)
            .map_err(|e| GenerationError::ParseFailure(e.to_string()))?;
        if reply.questions.is_empty() {
            return Err(GenerationError::ParseFailure(
                "clarification reply has no questions".into(),
            ));
        }
        return Ok(Proposal::Clarification(reply.questions));
    }

    let raw: RawPatch =
        serde_json::from_value(value).map_err(|e| GenerationError::ParseFailure(e.to_string()))?;

    if let Some(intent) = &raw.intent {
        info!(
            summary = %intent.summary,
            affected = ?intent.affected_node_ids,
            "Patch intent"
        );
    }
    if raw.operations.is_empty() {
        warn!("Oracle proposed an empty patch");
    }
    Ok(Proposal::Patch(raw))
}

/// Asks the oracle for a patch, one call per attempt.
pub struct PatchGenerator {
    oracle: Arc<dyn Oracle>,
    config: EditorConfig,
}

impl PatchGenerator {
    pub fn new(oracle: Arc<dyn Oracle>, config: EditorConfig) -> Self {
        Self { oracle, config }
    }

    pub async fn propose_patch(
        &self,
        base: &Specification,
        request: &str,
        catalog: &dyn BlockCatalog,
    ) -> Result<Proposal, GenerationError> {
        let prompt = build_prompt(base, request, catalog, &self.config)
            .map_err(|e| GenerationError::Prompt(e.to_string()))?;

        let secs = self.config.oracle_timeout_secs;
        let reply = tokio::time::timeout(Duration::from_secs(secs), self.oracle.complete(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(secs))?
            .map_err(|e| GenerationError::Oracle(e.to_string()))?;

        debug!(oracle = self.oracle.name(), reply_len = reply.len(), "Oracle replied");
        parse_reply(&reply, self.config.allow_clarification)
    }
}
