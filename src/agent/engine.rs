use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::tools::ToolRegistry;
use crate::chat::{tool_results_are_paired, Message, ToolCallRequest};
use crate::error::ChatError;
use crate::models::{ChatModel, ChatRequest};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub system_message: String,
    pub model_name: String,
    /// Tool rounds allowed in one turn before the turn is abandoned.
    pub max_tool_rounds: usize,
}

impl LoopConfig {
    pub fn new(system_message: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self { system_message: system_message.into(), model_name: model_name.into(), max_tool_rounds: 8 }
    }
}

/// Runs one user turn against the model, executing requested tools until the
/// model answers with plain text.
pub struct ChatLoop {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    config: LoopConfig,
}

impl ChatLoop {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        Self { model, tools, config }
    }

    /// Appends the user message and completes the turn.
    pub async fn converse(&self, mut history: Vec<Message>, new_user_text: &str) -> Result<Vec<Message>, ChatError> {
        history.push(Message::user(new_user_text));
        self.complete_turn(history).await
    }

    /// Completes a turn whose user message the caller already appended.
    ///
    /// The returned history holds every assistant tool-call message and tool
    /// result produced along the way, and ends with the final assistant reply.
    pub async fn complete_turn(&self, mut history: Vec<Message>) -> Result<Vec<Message>, ChatError> {
        let schemas = self.tools.schemas();
        let mut rounds = 0;
        loop {
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(Message::system(self.config.system_message.clone()));
            messages.extend(history.iter().cloned());
            info!(model = %self.config.model_name, message_count = messages.len(), round = rounds, "calling chat model");
            let completion = self
                .model
                .complete(ChatRequest { model: self.config.model_name.clone(), messages, tools: schemas.clone() })
                .await?;

            if !completion.wants_tool_calls() {
                let reply = completion.content.unwrap_or_default();
                if reply.trim().is_empty() {
                    return Err(ChatError::MalformedModelOutput(format!(
                        "empty reply with finish reason {:?}",
                        completion.finish_reason
                    )));
                }
                history.push(Message::assistant(reply));
                debug_assert!(tool_results_are_paired(&history));
                debug!(history_len = history.len(), "turn complete");
                return Ok(history);
            }

            if completion.tool_calls.is_empty() {
                return Err(ChatError::MalformedModelOutput("tool_calls finish reason without any tool calls".into()));
            }
            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                warn!(rounds, "model keeps requesting tools; giving up on this turn");
                return Err(ChatError::ToolLoopExhausted(self.config.max_tool_rounds));
            }

            info!(count = completion.tool_calls.len(), "calling tools");
            let mut results = Vec::with_capacity(completion.tool_calls.len());
            for call in &completion.tool_calls {
                results.push(Message::tool_result(call.id.clone(), self.dispatch(call).await));
            }
            history.push(Message::assistant_tool_calls(completion.content, completion.tool_calls));
            history.extend(results);
        }
    }

    /// Runs one tool call. Tool-level failures come back as text so the model
    /// can see them and recover.
    async fn dispatch(&self, call: &ToolCallRequest) -> String {
        let label = self.metric_label(&call.name).to_string();
        match self.try_dispatch(call).await {
            Ok(out) => {
                metrics::counter!("chatbot_tool_calls_total", "tool" => label, "outcome" => "ok").increment(1);
                debug!(tool = %call.name, id = %call.id, result = %out, "tool returned");
                out
            }
            Err(e) => {
                metrics::counter!("chatbot_tool_calls_total", "tool" => label, "outcome" => e.kind()).increment(1);
                warn!(tool = %call.name, id = %call.id, err = %e, "tool call failed");
                format!("Error: {}", e)
            }
        }
    }

    /// Names the model invents are folded into one label.
    fn metric_label<'a>(&'a self, name: &str) -> &'a str {
        self.tools.resolve(name).map(|t| t.name()).unwrap_or("unknown")
    }

    async fn try_dispatch(&self, call: &ToolCallRequest) -> Result<String, ChatError> {
        let tool = self.tools.resolve(&call.name)?;
        let args = parse_arguments(&call.name, &call.arguments)?;
        tool.run(args).await.map_err(|e| match e {
            e if e.is_recoverable_tool_error() => e,
            other => ChatError::ToolExecutionFault { tool: call.name.clone(), reason: other.to_string() },
        })
    }
}

/// Argument text must be a JSON object; an empty string counts as `{}`.
fn parse_arguments(tool: &str, raw: &str) -> Result<Value, ChatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let v: Value = serde_json::from_str(raw)
        .map_err(|e| ChatError::InvalidToolArguments { tool: tool.to_string(), reason: e.to_string() })?;
    if !v.is_object() {
        return Err(ChatError::InvalidToolArguments { tool: tool.to_string(), reason: "arguments must be a JSON object".into() });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{object_schema, Tool, TravelData};
    use crate::chat::{Completion, Role};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned completions and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<Completion, ChatError>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Completion, ChatError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), seen: Mutex::new(Vec::new()) })
        }
        fn requests(&self) -> Vec<ChatRequest> { self.seen.lock().unwrap().clone() }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn complete(&self, req: ChatRequest) -> Result<Completion, ChatError> {
            self.seen.lock().unwrap().push(req);
            self.replies.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Completion::text("fallback")))
        }
    }

    struct Exploding;

    #[async_trait]
    impl Tool for Exploding {
        fn name(&self) -> &str { "explode" }
        fn description(&self) -> &str { "Always fails." }
        fn parameters(&self) -> Value { object_schema(&[]) }
        async fn run(&self, _args: Value) -> Result<String, ChatError> {
            Err(ChatError::ModelUnavailable("disk on fire".into()))
        }
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest { id: id.into(), name: name.into(), arguments: args.into() }
    }

    fn chat_loop(model: Arc<Scripted>, data: TravelData) -> ChatLoop {
        let mut registry = ToolRegistry::with_travel_tools(data);
        registry.register(Box::new(Exploding));
        ChatLoop::new(model, Arc::new(registry), LoopConfig::new("You are FlightAI.", "gpt-4.1-mini"))
    }

    #[tokio::test]
    async fn plain_answer_without_tools() {
        let model = Scripted::new(vec![Ok(Completion::text("Hello!"))]);
        let cl = chat_loop(model.clone(), TravelData::legacy());
        let h = cl.converse(vec![Message::user("hi"), Message::assistant("hey")], "how are you").await.unwrap();
        assert_eq!(h.len(), 4);
        assert_eq!(h[3], Message::assistant("Hello!"));
        let reqs = model.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].messages[0].role, Role::System);
        assert_eq!(reqs[0].messages[0].content, "You are FlightAI.");
        assert_eq!(reqs[0].messages[3], Message::user("how are you"));
        assert_eq!(reqs[0].tools.len(), 3);
        assert_eq!(reqs[0].model, "gpt-4.1-mini");
    }

    #[tokio::test]
    async fn berlin_ticket_end_to_end() {
        let model = Scripted::new(vec![
            Ok(Completion::tool_calls(vec![call("call_1", "get_ticket_price", r#"{"destination_city":"Berlin"}"#)])),
            Ok(Completion::text("A return ticket to Berlin costs $199.")),
        ]);
        let cl = chat_loop(model.clone(), TravelData::flight_ai());
        let h = cl.converse(Vec::new(), "How much is a ticket to Berlin?").await.unwrap();

        assert_eq!(h.len(), 4);
        assert_eq!(h[0], Message::user("How much is a ticket to Berlin?"));
        assert!(h[1].requests_tools());
        assert_eq!(h[2], Message::tool_result("call_1", "The price of a ticket to Berlin is $199"));
        assert_eq!(h[3].role, Role::Assistant);
        assert!(tool_results_are_paired(&h));

        let reqs = model.requests();
        assert_eq!(reqs.len(), 2);
        // second request replays the tool call and its result after the system prompt
        assert_eq!(reqs[1].messages.len(), 4);
        assert_eq!(reqs[1].messages[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn multiple_calls_resolve_in_model_order() {
        let model = Scripted::new(vec![
            Ok(Completion::tool_calls(vec![
                call("b", "get_danger_level", r#"{"destination_city":"Paris"}"#),
                call("a", "get_ticket_price", r#"{"destination_city":"paris"}"#),
            ])),
            Ok(Completion::text("Paris: $899, danger 5.")),
        ]);
        let cl = chat_loop(model, TravelData::legacy());
        let h = cl.converse(Vec::new(), "Paris?").await.unwrap();
        assert_eq!(h.len(), 5);
        assert_eq!(h[2].tool_call_id.as_deref(), Some("b"));
        assert_eq!(h[2].content, "The danger level of Paris is 5");
        assert_eq!(h[3].tool_call_id.as_deref(), Some("a"));
        assert!(h[3].content.contains("$899"));
        assert!(tool_results_are_paired(&h));
    }

    #[tokio::test]
    async fn tool_failures_become_diagnostic_results() {
        let model = Scripted::new(vec![
            Ok(Completion::tool_calls(vec![
                call("1", "get_weather", r#"{"city":"Oslo"}"#),
                call("2", "get_ticket_price", "{not json"),
                call("3", "get_ticket_price", r#"["Berlin"]"#),
                call("4", "explode", ""),
            ])),
            Ok(Completion::text("Sorry, I could not look that up.")),
        ]);
        let cl = chat_loop(model.clone(), TravelData::legacy());
        let h = cl.converse(Vec::new(), "weather?").await.unwrap();

        assert_eq!(h.len(), 7);
        assert_eq!(h[2].content, "Error: tool 'get_weather' is not available");
        assert!(h[3].content.starts_with("Error: invalid arguments for tool 'get_ticket_price'"));
        assert!(h[4].content.contains("must be a JSON object"));
        assert!(h[5].content.starts_with("Error: tool 'explode' failed"));
        assert!(tool_results_are_paired(&h));
        assert_eq!(h.last().unwrap().content, "Sorry, I could not look that up.");
        // the model got a second chance after the failures
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let model = Scripted::new(vec![Err(ChatError::ModelUnavailable("timeout".into()))]);
        let cl = chat_loop(model, TravelData::legacy());
        let err = cl.converse(Vec::new(), "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn model_failure_mid_loop_propagates() {
        let model = Scripted::new(vec![
            Ok(Completion::tool_calls(vec![call("1", "get_ticket_price", r#"{"destination_city":"Tokyo"}"#)])),
            Err(ChatError::ModelUnavailable("502".into())),
        ]);
        let cl = chat_loop(model, TravelData::legacy());
        assert!(matches!(cl.converse(Vec::new(), "Tokyo?").await, Err(ChatError::ModelUnavailable(_))));
    }

    #[tokio::test]
    async fn endless_tool_requests_are_cut_off() {
        let replies = (0..20)
            .map(|i| Ok(Completion::tool_calls(vec![call(&i.to_string(), "get_ticket_price", r#"{"destination_city":"Tokyo"}"#)])))
            .collect();
        let model = Scripted::new(replies);
        let cl = chat_loop(model.clone(), TravelData::legacy());
        let err = cl.converse(Vec::new(), "loop").await.unwrap_err();
        assert!(matches!(err, ChatError::ToolLoopExhausted(8)));
        assert_eq!(model.requests().len(), 9);
    }

    #[tokio::test]
    async fn empty_reply_is_malformed() {
        let model = Scripted::new(vec![Ok(Completion { content: Some("  ".into()), tool_calls: Vec::new(), finish_reason: crate::chat::FinishReason::Stop })]);
        let cl = chat_loop(model, TravelData::legacy());
        assert!(matches!(cl.converse(Vec::new(), "hi").await, Err(ChatError::MalformedModelOutput(_))));
    }

    #[tokio::test]
    async fn complete_turn_uses_caller_appended_message() {
        let model = Scripted::new(vec![Ok(Completion::text("ok"))]);
        let cl = chat_loop(model.clone(), TravelData::legacy());
        let h = cl.complete_turn(vec![Message::user("already here")]).await.unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(model.requests()[0].messages.len(), 2);
    }

    #[test]
    fn metric_label_is_bounded_by_registry() {
        let cl = chat_loop(Scripted::new(Vec::new()), TravelData::flight_ai());
        assert_eq!(cl.metric_label("get_ticket_price"), "get_ticket_price");
        assert_eq!(cl.metric_label("explode"), "explode");
        assert_eq!(cl.metric_label("get_weather"), "unknown");
        assert_eq!(cl.metric_label("drop table tools; --"), "unknown");
    }

    #[test]
    fn empty_arguments_mean_empty_object() {
        assert_eq!(parse_arguments("t", "  ").unwrap(), serde_json::json!({}));
        assert!(parse_arguments("t", "42").is_err());
    }
}
