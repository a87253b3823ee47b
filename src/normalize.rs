//! Event Normalizer (C1).
//!
//! Pure, stateless mapping from an arbitrary execution-plane event object
//! into the UI-facing event envelope. Each recognized input shape is a
//! tagged variant of [`RawEvent`]; [`normalize`] is total over that sum
//! type and returns `None` for anything unrecognized, matching the source
//! system's "type absent or unrecognized ⇒ null" contract without ever
//! needing an `unwrap`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// One event as the execution plane sends it, tagged by its `type` field.
/// Fields the table marks optional are `Option` here; anything not listed
/// for a variant is ignored rather than rejected.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    #[serde(rename = "thinking")]
    Thinking {
        content: Option<String>,
        stage: Option<String>,
    },
    #[serde(rename = "plan_created")]
    PlanCreated {
        #[serde(default)]
        steps: Vec<Value>,
    },
    #[serde(rename = "plan_step_start")]
    PlanStepStart {
        step_id: Option<String>,
        tool: Option<String>,
        params: Option<Value>,
    },
    #[serde(rename = "plan_step_complete")]
    PlanStepComplete {
        step_id: Option<String>,
        result: Option<Value>,
        duration_ms: Option<u64>,
    },
    #[serde(rename = "plan_step_failed")]
    PlanStepFailed {
        step_id: Option<String>,
        error: Option<String>,
    },
    #[serde(rename = "tool_call_start")]
    ToolCallStart {
        tool_name: Option<String>,
        arguments: Option<Value>,
    },
    #[serde(rename = "tool_call_complete")]
    ToolCallComplete {
        tool_name: Option<String>,
        result: Option<Value>,
        success: Option<bool>,
    },
    #[serde(rename = "tool_call")]
    ToolCallBridge {
        tool_name: Option<String>,
        input: Option<Value>,
    },
    #[serde(rename = "tool_result")]
    ToolResultBridge {
        tool_name: Option<String>,
        output: Option<Value>,
        result: Option<Value>,
        success: Option<bool>,
    },
    #[serde(rename = "skill_call_start")]
    SkillCallStart {
        skill_name: Option<String>,
        arguments: Option<Value>,
    },
    #[serde(rename = "skill_call_complete")]
    SkillCallComplete {
        skill_name: Option<String>,
        result: Option<Value>,
        success: Option<bool>,
    },
    #[serde(rename = "mcp_call_start")]
    McpCallStart {
        server: Option<String>,
        tool: Option<String>,
        arguments: Option<Value>,
    },
    #[serde(rename = "mcp_call_complete")]
    McpCallComplete {
        server: Option<String>,
        tool: Option<String>,
        result: Option<Value>,
        success: Option<bool>,
    },
    #[serde(rename = "text_chunk")]
    TextChunk { content: Option<String> },
    #[serde(rename = "text")]
    Text { content: Option<String> },
    #[serde(rename = "file_created")]
    FileCreated {
        url: Option<String>,
        filename: Option<String>,
        mime_type: Option<String>,
        size: Option<u64>,
    },
    /// Any `type` this table does not recognize, and — since `serde(tag=
    /// ..)` requires the field to be present — anything missing a `type`
    /// at all falls out of deserialization entirely rather than landing
    /// here; [`normalize`] treats both cases identically.
    #[serde(other)]
    Unrecognized,
}

/// The `type` discriminant of a [`UiMessage`], matching §4.1's output
/// column verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UiMessageType {
    Thinking,
    Plan,
    PlanStep,
    ToolCall,
    ToolResult,
    SkillCall,
    SkillResult,
    McpCall,
    McpResult,
    Text,
    File,
}

impl UiMessageType {
    /// The "process" subset buffered by C7 pending a terminal event.
    #[must_use]
    pub fn is_process_event(self) -> bool {
        matches!(
            self,
            Self::Thinking
                | Self::Plan
                | Self::PlanStep
                | Self::ToolCall
                | Self::ToolResult
                | Self::McpCall
                | Self::McpResult
        )
    }
}

/// The UI event envelope: `{id, type, data, timestamp}` (§6.2).
#[derive(Debug, Clone, Serialize)]
pub struct UiMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub msg_type: UiMessageType,
    pub data: Value,
    pub timestamp: String,
}

impl UiMessage {
    fn new(msg_type: UiMessageType, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            msg_type,
            data,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

fn str_or_empty(value: Option<String>) -> String {
    value.unwrap_or_default()
}

fn value_or_null(value: Option<Value>) -> Value {
    value.unwrap_or(Value::Null)
}

fn value_or_empty_map(value: Option<Value>) -> Value {
    value.unwrap_or_else(|| json!({}))
}

/// Map one execution-plane event into the UI event envelope, or `None` if
/// its `type` is absent or unrecognized (§4.1).
#[must_use]
pub fn normalize(event: &Value) -> Option<UiMessage> {
    let raw: RawEvent = serde_json::from_value(event.clone()).ok()?;

    let (msg_type, data) = match raw {
        RawEvent::Unrecognized => return None,
        RawEvent::Thinking { content, stage } => (
            UiMessageType::Thinking,
            json!({ "content": str_or_empty(content), "stage": stage }),
        ),
        RawEvent::PlanCreated { steps } => {
            let steps: Vec<Value> = steps
                .into_iter()
                .map(|mut step| {
                    if let Value::Object(map) = &mut step {
                        map.insert("status".to_string(), json!("pending"));
                    }
                    step
                })
                .collect();
            (
                UiMessageType::Plan,
                json!({ "steps": steps, "currentStep": "" }),
            )
        }
        RawEvent::PlanStepStart {
            step_id,
            tool,
            params,
        } => (
            UiMessageType::PlanStep,
            json!({
                "stepId": str_or_empty(step_id),
                "status": "running",
                "tool": tool,
                "params": params,
            }),
        ),
        RawEvent::PlanStepComplete {
            step_id,
            result,
            duration_ms,
        } => (
            UiMessageType::PlanStep,
            json!({
                "stepId": str_or_empty(step_id),
                "status": "completed",
                "result": value_or_null(result),
                "durationMs": duration_ms,
            }),
        ),
        RawEvent::PlanStepFailed { step_id, error } => (
            UiMessageType::PlanStep,
            json!({
                "stepId": str_or_empty(step_id),
                "status": "failed",
                "error": error.unwrap_or_else(|| "Unknown error".to_string()),
            }),
        ),
        RawEvent::ToolCallStart {
            tool_name,
            arguments,
        } => (
            UiMessageType::ToolCall,
            json!({
                "toolName": str_or_empty(tool_name),
                "status": "calling",
                "arguments": value_or_empty_map(arguments),
            }),
        ),
        RawEvent::ToolCallComplete {
            tool_name,
            result,
            success,
        } => (
            UiMessageType::ToolResult,
            json!({
                "toolName": str_or_empty(tool_name),
                "result": value_or_null(result),
                "success": success.unwrap_or(true),
            }),
        ),
        RawEvent::ToolCallBridge { tool_name, input } => (
            UiMessageType::ToolCall,
            json!({
                "toolName": str_or_empty(tool_name),
                "status": "calling",
                "arguments": value_or_empty_map(input),
            }),
        ),
        RawEvent::ToolResultBridge {
            tool_name,
            output,
            result,
            success,
        } => (
            UiMessageType::ToolResult,
            json!({
                "toolName": str_or_empty(tool_name),
                "result": value_or_null(output.or(result)),
                "success": success.unwrap_or(true),
            }),
        ),
        RawEvent::SkillCallStart {
            skill_name,
            arguments,
        } => (
            UiMessageType::SkillCall,
            json!({
                "skillName": str_or_empty(skill_name),
                "status": "calling",
                "arguments": value_or_empty_map(arguments),
            }),
        ),
        RawEvent::SkillCallComplete {
            skill_name,
            result,
            success,
        } => (
            UiMessageType::SkillResult,
            json!({
                "skillName": str_or_empty(skill_name),
                "result": value_or_null(result),
                "success": success.unwrap_or(true),
            }),
        ),
        RawEvent::McpCallStart {
            server,
            tool,
            arguments,
        } => (
            UiMessageType::McpCall,
            json!({
                "server": str_or_empty(server),
                "tool": str_or_empty(tool),
                "status": "calling",
                "arguments": value_or_empty_map(arguments),
            }),
        ),
        RawEvent::McpCallComplete {
            server,
            tool,
            result,
            success,
        } => (
            UiMessageType::McpResult,
            json!({
                "server": str_or_empty(server),
                "tool": str_or_empty(tool),
                "result": value_or_null(result),
                "success": success.unwrap_or(true),
            }),
        ),
        RawEvent::TextChunk { content } | RawEvent::Text { content } => (
            UiMessageType::Text,
            json!({ "content": str_or_empty(content) }),
        ),
        RawEvent::FileCreated {
            url,
            filename,
            mime_type,
            size,
        } => (
            UiMessageType::File,
            json!({
                "url": str_or_empty(url),
                "filename": filename.unwrap_or_else(|| "file".to_string()),
                "mimeType": mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
                "size": size,
            }),
        ),
    };

    Some(UiMessage::new(msg_type, data))
}

/// `isComplete(ev) ≡ ev.type == "execution_complete"` (§4.1).
#[must_use]
pub fn is_complete(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some("execution_complete")
}

/// `isError(ev) ≡ ev.type == "execution_error"` (§4.1).
#[must_use]
pub fn is_error(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some("execution_error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_type_is_null() {
        assert!(normalize(&json!({"content": "hi"})).is_none());
    }

    #[test]
    fn test_unrecognized_type_is_null() {
        assert!(normalize(&json!({"type": "something_else"})).is_none());
    }

    #[test]
    fn test_thinking_maps_content_and_stage() {
        let msg = normalize(&json!({"type": "thinking", "content": "hi", "stage": "analyzing"}))
            .unwrap();
        assert_eq!(msg.msg_type, UiMessageType::Thinking);
        assert_eq!(msg.data["content"], json!("hi"));
        assert_eq!(msg.data["stage"], json!("analyzing"));
    }

    #[test]
    fn test_plan_created_steps_get_pending_status() {
        let msg = normalize(&json!({
            "type": "plan_created",
            "steps": [{"step_id": "s1"}, {"step_id": "s2"}],
        }))
        .unwrap();
        assert_eq!(msg.msg_type, UiMessageType::Plan);
        assert_eq!(msg.data["steps"][0]["status"], json!("pending"));
        assert_eq!(msg.data["currentStep"], json!(""));
    }

    #[test]
    fn test_plan_step_failed_defaults_error_message() {
        let msg = normalize(&json!({"type": "plan_step_failed", "step_id": "s1"})).unwrap();
        assert_eq!(msg.data["error"], json!("Unknown error"));
        assert_eq!(msg.data["status"], json!("failed"));
    }

    #[test]
    fn test_tool_call_complete_success_defaults_true() {
        let msg = normalize(&json!({"type": "tool_call_complete", "tool_name": "grep"})).unwrap();
        assert_eq!(msg.msg_type, UiMessageType::ToolResult);
        assert_eq!(msg.data["success"], json!(true));
    }

    #[test]
    fn test_bridge_tool_result_prefers_output_over_result() {
        // Scenario 4 in the testable-properties list: bridge-variant tool event.
        let msg = normalize(&json!({
            "type": "tool_result",
            "tool_name": "grep",
            "output": {"matches": 3},
            "success": true,
        }))
        .unwrap();
        assert_eq!(msg.msg_type, UiMessageType::ToolResult);
        assert_eq!(msg.data["toolName"], json!("grep"));
        assert_eq!(msg.data["result"], json!({"matches": 3}));
        assert_eq!(msg.data["success"], json!(true));
    }

    #[test]
    fn test_bridge_tool_result_falls_back_to_result_field() {
        let msg = normalize(&json!({
            "type": "tool_result",
            "tool_name": "grep",
            "result": {"matches": 1},
        }))
        .unwrap();
        assert_eq!(msg.data["result"], json!({"matches": 1}));
    }

    #[test]
    fn test_text_chunk_and_text_both_map_to_text() {
        let a = normalize(&json!({"type": "text_chunk", "content": "a"})).unwrap();
        let b = normalize(&json!({"type": "text", "content": "b"})).unwrap();
        assert_eq!(a.msg_type, UiMessageType::Text);
        assert_eq!(b.msg_type, UiMessageType::Text);
    }

    #[test]
    fn test_file_created_defaults() {
        let msg = normalize(&json!({"type": "file_created", "url": "https://x/f"})).unwrap();
        assert_eq!(msg.data["filename"], json!("file"));
        assert_eq!(msg.data["mimeType"], json!("application/octet-stream"));
    }

    #[test]
    fn test_every_message_has_fresh_id_and_timestamp() {
        let a = normalize(&json!({"type": "text", "content": "a"})).unwrap();
        let b = normalize(&json!({"type": "text", "content": "a"})).unwrap();
        assert_ne!(a.id, b.id);
        assert!(!a.timestamp.is_empty());
    }

    #[test]
    fn test_is_complete_and_is_error() {
        assert!(is_complete(&json!({"type": "execution_complete"})));
        assert!(!is_complete(&json!({"type": "execution_error"})));
        assert!(is_error(&json!({"type": "execution_error"})));
        assert!(!is_error(&json!({"type": "thinking"})));
    }

    #[test]
    fn test_process_event_subset() {
        assert!(UiMessageType::Thinking.is_process_event());
        assert!(UiMessageType::ToolCall.is_process_event());
        assert!(UiMessageType::McpResult.is_process_event());
        assert!(!UiMessageType::Text.is_process_event());
        assert!(!UiMessageType::File.is_process_event());
    }
}
