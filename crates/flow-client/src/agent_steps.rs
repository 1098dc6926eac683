//! Tool-call descriptors embedded in `add_message` and `end` payloads.

use serde_json::{Map, Value};

const AGENT_STEPS_TITLE: &str = "Agent Steps";
const MAX_OUTPUT_CHARS: usize = 500;

/// Shown for a tool step whose output has not arrived yet.
pub const RUNNING_PLACEHOLDER: &str = "Running...";

/// One tool invocation reported by the flow.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
    pub output: Option<Value>,
}

/// Agent activity found in a message's content blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentSteps {
    /// Text of the `Input` header entry, empty when absent.
    pub input_text: String,
    pub tools: Vec<ToolCall>,
}

/// Reads the `Agent Steps` content blocks of a message.
pub fn extract_agent_steps(message: &Map<String, Value>) -> AgentSteps {
    let mut steps = AgentSteps::default();
    let blocks = message
        .get("content_blocks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for block in blocks {
        if block.get("title").and_then(Value::as_str) != Some(AGENT_STEPS_TITLE) {
            continue;
        }
        let contents = block
            .get("contents")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for content in contents {
            match content.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let title = content
                        .get("header")
                        .and_then(|h| h.get("title"))
                        .and_then(Value::as_str);
                    if title == Some("Input") {
                        steps.input_text = content
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                    }
                }
                Some("tool_use") => steps.tools.push(ToolCall {
                    name: content
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input: content
                        .get("tool_input")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Map::new())),
                    output: content.get("output").filter(|v| !v.is_null()).cloned(),
                }),
                _ => {}
            }
        }
    }
    steps
}

/// Collects tool calls from the final messages of an `end` event
/// (`result.outputs[].outputs[].results.message`).
pub fn final_tool_calls(end_data: &Map<String, Value>) -> Vec<ToolCall> {
    let outputs = end_data
        .get("result")
        .and_then(|r| r.get("outputs"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    let mut tools = Vec::new();
    for output in outputs {
        let inner = output
            .get("outputs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for out in inner {
            if let Some(message) = out
                .get("results")
                .and_then(|r| r.get("message"))
                .and_then(Value::as_object)
            {
                tools.extend(extract_agent_steps(message).tools);
            }
        }
    }
    tools
}

/// False for null, `false`, zero, and empty strings, arrays, and objects.
pub(crate) fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Renders a tool input for display: objects as pretty JSON, anything else
/// as plain text.
pub fn format_tool_input(input: &Value) -> String {
    match input {
        Value::Object(_) => serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders a tool output for display. Structured outputs are pretty-printed
/// and cut to 500 characters.
pub fn format_tool_output(output: &Value) -> String {
    if !has_content(output) {
        return RUNNING_PLACEHOLDER.to_string();
    }
    match output {
        Value::Array(_) | Value::Object(_) => {
            let pretty =
                serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string());
            if pretty.chars().count() > MAX_OUTPUT_CHARS {
                let cut: String = pretty.chars().take(MAX_OUTPUT_CHARS).collect();
                format!("{cut}\n...")
            } else {
                pretty
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
