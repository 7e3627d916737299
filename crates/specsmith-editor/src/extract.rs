use std::sync::OnceLock;

use regex::Regex;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```(?:json)?[ \t]*\r?\n?(.*?)```").expect("static regex is valid")
    })
}

/// Candidate JSON texts in an oracle reply, most specific first:
/// the first fenced block, the whole reply, then the outermost `{...}` span.
pub fn json_candidates(reply: &str) -> Vec<&str> {
    let mut candidates = Vec::new();

    if let Some(inner) = fence_re().captures(reply).and_then(|c| c.get(1)) {
        candidates.push(inner.as_str().trim());
    }

    candidates.push(reply.trim());

    if let (Some(l), Some(r)) = (reply.find('{'), reply.rfind('}')) {
        if r > l {
            candidates.push(reply[l..=r].trim());
        }
    }

    candidates.dedup();
    candidates
}

/// First candidate that parses as a JSON object.
///
/// Extraction is the only lenient step; the caller still decodes the value
/// strictly against the patch grammar.
pub fn extract_json_object(reply: &str) -> Option<serde_json::Value> {
    json_candidates(reply)
        .into_iter()
        .filter_map(|c| serde_json::from_str::<serde_json::Value>(c).ok())
        .find(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json() {
        let reply = "Here is the patch:\n```json\n{\"operations\": []}\n```\nDone.";
        let value = extract_json_object(reply).unwrap();
        assert!(value["operations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fence_without_language() {
        let reply = "```\n{\"operations\": [{\"op\": \"remove_node\", \"node_id\": \"a\"}]}\n```";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["operations"][0]["node_id"], "a");
    }

    #[test]
    fn test_raw_json() {
        let value = extract_json_object("  {\"operations\": []}  ").unwrap();
        assert!(value.get("operations").is_some());
    }

    #[test]
    fn test_prose_around_braces() {
        let reply = "Sure! {\"operations\": []} Let me know if you need more.";
        assert!(extract_json_object(reply).is_some());
    }

    #[test]
    fn test_nested_backticks_inside_fence() {
        let reply = "```json\n{\"note\": \"use `code`\", \"operations\": []}\n```";
        let value = extract_json_object(reply).unwrap();
        assert_eq!(value["note"], "use `code`");
    }

    #[test]
    fn test_array_is_not_an_object() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_plain_text() {
        assert!(extract_json_object("I cannot help with that.").is_none());
        assert_eq!(json_candidates("no json here"), vec!["no json here"]);
    }
}
