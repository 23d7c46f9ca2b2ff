use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{Completion, FinishReason, Message, Role, ToolCallRequest};
use crate::error::ChatError;
use crate::settings::{Provider, ProviderCredentials};

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ChatError>;
}

#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Returns the base64 payload of the first generated image.
    async fn generate(&self, req: ImageRequest) -> Result<String, ChatError>;
}

/// Client for any endpoint speaking the OpenAI chat-completions and
/// image-generation wire format.
#[derive(Clone)]
pub struct OpenAICompatible {
    pub base_url: String,
    pub api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAICompatible {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.into(), api_key, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R, ChatError> {
        let mut rb = self.client.post(self.endpoint(path)).json(body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        metrics::counter!("chatbot_model_calls_total", "endpoint" => path.to_string()).increment(1);
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, endpoint = path, body = %truncate(&detail, 512), "model call failed");
            return Err(ChatError::ModelUnavailable(format!("{} returned {}", path, status)));
        }
        Ok(resp.json::<R>().await?)
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
}

#[derive(Debug, Serialize, Deserialize)]
struct OaiMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OaiToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OaiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: OaiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String { "function".into() }

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    message: OaiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct OaiImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct OaiImageResponse {
    data: Vec<OaiImageData>,
}

#[derive(Debug, Deserialize)]
struct OaiImageData {
    b64_json: Option<String>,
}

impl From<&Message> for OaiMessage {
    fn from(m: &Message) -> Self {
        let content = if m.requests_tools() && m.content.is_empty() { None } else { Some(m.content.clone()) };
        OaiMessage {
            role: m.role,
            content,
            tool_call_id: m.tool_call_id.clone(),
            tool_calls: m
                .tool_calls
                .iter()
                .map(|c| OaiToolCall {
                    id: c.id.clone(),
                    kind: function_type(),
                    function: OaiFunction { name: c.name.clone(), arguments: c.arguments.clone() },
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAICompatible {
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ChatError> {
        let body = OaiChatRequest {
            model: &req.model,
            messages: req.messages.iter().map(OaiMessage::from).collect(),
            tools: &req.tools,
        };
        let v: OaiChatResponse = self.post("chat/completions", &body).await?;
        let choice = v
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::ModelUnavailable("response had no choices".into()))?;
        Ok(Completion {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolCallRequest { id: c.id, name: c.function.name, arguments: c.function.arguments })
                .collect(),
            finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
        })
    }
}

#[async_trait]
impl ImageModel for OpenAICompatible {
    async fn generate(&self, req: ImageRequest) -> Result<String, ChatError> {
        let body = OaiImageRequest { model: &req.model, prompt: &req.prompt, size: &req.size, n: 1, response_format: "b64_json" };
        let v: OaiImageResponse = self.post("images/generations", &body).await?;
        v.data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| ChatError::MalformedModelOutput("image response carried no b64_json payload".into()))
    }
}

/// One client per provider that has credentials, built at startup.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    clients: HashMap<Provider, Arc<OpenAICompatible>>,
}

impl ProviderRouter {
    pub fn new(credentials: &[ProviderCredentials], timeout: Duration) -> Result<Self, ChatError> {
        let mut clients = HashMap::new();
        for c in credentials {
            let Some(key) = &c.api_key else { continue };
            clients.insert(c.provider, Arc::new(OpenAICompatible::new(c.base_url.clone(), Some(key.clone()), timeout)?));
        }
        Ok(Self { clients })
    }

    #[cfg(test)]
    pub fn insert(&mut self, provider: Provider, client: Arc<OpenAICompatible>) {
        self.clients.insert(provider, client);
    }

    pub fn client(&self, provider: Provider) -> Result<Arc<OpenAICompatible>, ChatError> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| ChatError::MissingCredentials(provider.to_string()))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
