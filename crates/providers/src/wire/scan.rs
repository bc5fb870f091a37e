//! Fallback tool-call extraction from reply text.
//!
//! Some models answer a tool-enabled request with the invocation written
//! into the message body instead of the structured field. Recovering those
//! calls is inherently approximate, so the heuristic sits behind a trait and
//! every call it produces is tagged `ToolCallOrigin::TextScan`.

use kiln_core::{ToolCall, ToolCallOrigin, ToolDefinition};

/// A strategy for finding tool invocations in free text.
pub trait ToolCallScanner: Send + Sync {
    fn scan(&self, content: &str, declared: &[ToolDefinition]) -> Vec<ToolCall>;
}

/// Finds JSON objects that name a declared tool.
///
/// Accepts `{"name": .., "arguments": ..}`, `{"name": .., "parameters": ..}`
/// and the same shapes wrapped in `{"function": {..}}`. Arguments given as
/// an object are re-serialized to a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonToolCallScanner;

impl ToolCallScanner for JsonToolCallScanner {
    fn scan(&self, content: &str, declared: &[ToolDefinition]) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        let mut cursor = 0;

        while let Some(offset) = content[cursor..].find('{') {
            let start = cursor + offset;
            let mut objects =
                serde_json::Deserializer::from_str(&content[start..]).into_iter::<serde_json::Value>();

            if let Some(Ok(value)) = objects.next() {
                if let Some((name, arguments)) = match_invocation(&value, declared) {
                    let mut call =
                        ToolCall::new(format!("text_call_{}", calls.len()), name, arguments);
                    call.origin = ToolCallOrigin::TextScan;
                    calls.push(call);
                    cursor = start + objects.byte_offset();
                    continue;
                }
            }

            // Not a call here; a nested object may still be one
            cursor = start + 1;
        }

        calls
    }
}

fn match_invocation(value: &serde_json::Value, declared: &[ToolDefinition]) -> Option<(String, String)> {
    let object = value.as_object()?;
    let object = match object.get("function").and_then(|f| f.as_object()) {
        Some(inner) if inner.contains_key("name") => inner,
        _ => object,
    };

    let name = object.get("name")?.as_str()?;
    if !declared.iter().any(|d| d.name == name) {
        return None;
    }

    let arguments = object.get("arguments").or_else(|| object.get("parameters"))?;
    let arguments = match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };

    Some((name.to_string(), arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::tool::file_tool_definitions;

    #[test]
    fn finds_call_in_prose() {
        let text = r#"Sure, creating it now:
```json
{"name": "create_file", "arguments": {"file_path": "src/lib.rs", "content": "pub fn a() {}"}}
```
Done."#;
        let calls = JsonToolCallScanner.scan(text, &file_tool_definitions());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "text_call_0");
        assert_eq!(calls[0].origin, ToolCallOrigin::TextScan);
        assert_eq!(calls[0].string_argument("file_path").as_deref(), Some("src/lib.rs"));
    }

    #[test]
    fn finds_several_and_wrapped_calls() {
        let text = r#"{"function": {"name": "edit_file", "parameters": {"file_path": "a", "content": "x"}}}
and then {"name": "create_file", "arguments": "{\"file_path\":\"b\",\"content\":\"\"}"}"#;
        let calls = JsonToolCallScanner.scan(text, &file_tool_definitions());
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["edit_file", "create_file"]);
        assert_eq!(calls[1].id, "text_call_1");
        assert_eq!(calls[1].string_argument("file_path").as_deref(), Some("b"));
    }

    #[test]
    fn ignores_undeclared_tools_and_plain_json() {
        let text = r#"{"name": "rm_rf", "arguments": {}} and {"file_path": "x"} and fn main() { }"#;
        assert!(JsonToolCallScanner.scan(text, &file_tool_definitions()).is_empty());
    }

    #[test]
    fn nothing_declared_means_nothing_found() {
        let text = r#"{"name": "create_file", "arguments": {}}"#;
        assert!(JsonToolCallScanner.scan(text, &[]).is_empty());
    }
}
