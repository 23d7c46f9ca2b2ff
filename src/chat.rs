use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model. `arguments` is the raw JSON text
/// exactly as the model produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One entry of a conversation. Order matters: histories are replayed to the
/// model as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None, tool_calls: Vec::new() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None, tool_calls: Vec::new() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None, tool_calls: Vec::new() }
    }

    /// Assistant turn that asks for tools. Any text the model sent alongside
    /// the calls is kept.
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self { role: Role::Assistant, content: content.unwrap_or_default(), tool_call_id: None, tool_calls: calls }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_call_id: Some(tool_call_id.into()), tool_calls: Vec::new() }
    }

    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(s: Option<&str>) -> Self {
        match s {
            Some("stop") | None => FinishReason::Stop,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }
}

/// What the chat loop needs from one model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
}

impl Completion {
    #[cfg(test)]
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), tool_calls: Vec::new(), finish_reason: FinishReason::Stop }
    }

    #[cfg(test)]
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self { content: None, tool_calls: calls, finish_reason: FinishReason::ToolCalls }
    }

    pub fn wants_tool_calls(&self) -> bool {
        self.finish_reason == FinishReason::ToolCalls
    }
}

/// Checks the pairing rule the completion API enforces: each assistant
/// tool-call message is followed by exactly one tool message per call id, and
/// no tool message appears without a request.
pub fn tool_results_are_paired(history: &[Message]) -> bool {
    let mut i = 0;
    while i < history.len() {
        let msg = &history[i];
        if msg.role == Role::Tool {
            return false;
        }
        i += 1;
        if !msg.requests_tools() {
            continue;
        }
        let mut pending: Vec<&str> = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
        while i < history.len() && history[i].role == Role::Tool {
            let Some(id) = history[i].tool_call_id.as_deref() else { return false };
            let Some(pos) = pending.iter().position(|p| *p == id) else { return false };
            pending.remove(pos);
            i += 1;
        }
        if !pending.is_empty() {
            return false;
        }
    }
    true
}
