//! Z.AI native wire shapes and the tool-declaration translator.
//!
//! Z.AI's chat endpoint is shaped quite differently from OpenAI's: tool
//! declarations are flat `{name, description, parameters}` triples in a
//! `tool_servers` array, and the payload carries a handful of web-client
//! fields (`chat_id`, `features`, `model_item`, ...) that the proxy fills
//! in on the caller's behalf.

use crate::schemas::chat_completions::{ChatCompletionRequest, ChatMessage, Tool};
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// A tool declaration in Z.AI's flat form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZaiTool {
    pub name: String,
    /// Serialized even when null, matching the upstream contract.
    pub description: Option<String>,
    pub parameters: Value,
}

/// Rewrite OpenAI-style tool declarations into Z.AI's flat triples.
///
/// One output record per `type: "function"` entry, in input order, with
/// `parameters` defaulting to `{}` when absent. Entries of any other type
/// are dropped without error (carried over from the observed contract).
/// Absent or empty input yields an empty sequence.
pub fn translate_tools(tools: Option<&[Tool]>) -> Vec<ZaiTool> {
    let Some(tools) = tools else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|tool| {
            if tool.tool_type != "function" {
                tracing::debug!(tool_type = %tool.tool_type, "Dropping non-function tool entry");
                return None;
            }
            tool.function.as_ref().map(|function| ZaiTool {
                name: function.name.clone(),
                description: function.description.clone(),
                parameters: function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| Value::Object(Map::new())),
            })
        })
        .collect()
}

/// Per-request background task switches in the Z.AI payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTasks {
    pub title_generation: bool,
    pub tags_generation: bool,
}

/// Feature toggles. `code_interpreter` is enabled when tools are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub image_generation: bool,
    pub code_interpreter: bool,
    pub web_search: bool,
    pub auto_web_search: bool,
}

/// The model descriptor the Z.AI web client embeds in every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelItem {
    pub id: String,
    pub name: String,
    pub owned_by: String,
}

/// The request body POSTed to Z.AI's chat endpoint.
///
/// Always streams upstream; the proxy decides client-side whether to relay
/// chunks or aggregate them.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct ZaiChatRequest {
    pub stream: bool,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub background_tasks: BackgroundTasks,
    pub chat_id: String,
    pub features: Features,
    pub id: String,
    pub mcp_servers: Vec<String>,
    pub model_item: ModelItem,
    pub params: Value,
    pub tool_servers: Vec<ZaiTool>,
    pub variables: Value,
}

impl ZaiChatRequest {
    /// Build the upstream payload from a validated OpenAI request.
    ///
    /// `upstream_model` is the Z.AI-side model id; `display_name` is the
    /// advertised name echoed in `model_item`.
    pub fn from_openai(
        request: &ChatCompletionRequest,
        upstream_model: &str,
        display_name: &str,
    ) -> Self {
        let tool_servers = translate_tools(request.tools.as_deref());
        let has_tools = !tool_servers.is_empty();

        let mut mcp_servers = vec!["deep-web-search".to_string()];
        if has_tools {
            mcp_servers.push("code-executor".to_string());
        }

        ZaiChatRequest::builder()
            .stream(true)
            .model(upstream_model.to_string())
            .messages(request.messages.clone())
            .background_tasks(BackgroundTasks {
                title_generation: true,
                tags_generation: true,
            })
            .chat_id(Uuid::new_v4().to_string())
            .features(Features {
                image_generation: false,
                code_interpreter: has_tools,
                web_search: false,
                auto_web_search: false,
            })
            .id(Uuid::new_v4().to_string())
            .mcp_servers(mcp_servers)
            .model_item(ModelItem {
                id: upstream_model.to_string(),
                name: display_name.to_string(),
                owned_by: "openai".to_string(),
            })
            .params(Value::Object(Map::new()))
            .tool_servers(tool_servers)
            .variables(json!({
                "{{USER_NAME}}": "User",
                "{{USER_LOCATION}}": "Unknown",
                "{{CURRENT_DATETIME}}": crate::unix_timestamp().to_string(),
            }))
            .build()
    }
}

/// One event from Z.AI's SSE stream.
///
/// The interesting fields live under `data`; everything else is kept open
/// for forward compatibility.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZaiStreamEvent {
    #[serde(default)]
    pub data: Option<ZaiEventData>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// The data member of an upstream stream event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZaiEventData {
    #[serde(default)]
    pub delta_content: Option<String>,
    /// Generation phase, e.g. "thinking" or "answer".
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ZaiStreamEvent {
    /// Upstream-reported error detail, if this event carries one at either
    /// nesting level.
    pub fn error_detail(&self) -> Option<String> {
        let error = self
            .error
            .as_ref()
            .or_else(|| self.data.as_ref().and_then(|d| d.error.as_ref()))?;
        let detail = error
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        Some(detail)
    }
}
