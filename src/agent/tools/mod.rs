use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ChatError;

pub mod danger_level;
pub mod ticket_price;
pub mod travel_data;

pub use travel_data::TravelData;

/// A function the model may call. `parameters` is the JSON schema advertised
/// to the completion API and must match what `run` accepts.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn run(&self, args: Value) -> Result<String, ChatError>;
}

/// Name-keyed set of tools, built once at startup and shared read-only.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

impl ToolRegistry {
    pub fn new() -> Self { Self { tools: Vec::new() } }

    pub fn with_travel_tools(data: TravelData) -> Self {
        let data = std::sync::Arc::new(data);
        let mut r = Self::new();
        r.register(Box::new(ticket_price::TicketPriceTool::new(data.clone())));
        r.register(Box::new(danger_level::DangerLevelTool::new(data)));
        r
    }

    /// Adds a tool; a tool with the same name is replaced in place.
    pub fn register(&mut self, t: Box<dyn Tool>) {
        match self.tools.iter().position(|existing| existing.name() == t.name()) {
            Some(i) => self.tools[i] = t,
            None => self.tools.push(t),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<&dyn Tool, ChatError> {
        self.tools
            .iter()
            .map(|b| b.as_ref())
            .find(|t| t.name() == name)
            .ok_or_else(|| ChatError::UnknownTool(name.to_string()))
    }

    /// Schemas in registration order, in the `{"type":"function","function":{..}}`
    /// envelope the completion API expects.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters(),
                    }
                })
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> { self.tools.iter().map(|t| t.name()).collect() }
}

/// Object schema of `(name, type, description)` properties, all required,
/// no extra keys allowed.
pub fn object_schema(properties: &[(&str, &str, &str)]) -> Value {
    let mut props = serde_json::Map::new();
    for (name, ty, description) in properties {
        props.insert((*name).to_string(), json!({ "type": ty, "description": description }));
    }
    let required: Vec<&str> = properties.iter().map(|(name, _, _)| *name).collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false,
    })
}

/// Decodes tool arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ChatError> {
    serde_json::from_value(args).map_err(|e| ChatError::InvalidToolArguments { tool: tool.to_string(), reason: e.to_string() })
}
