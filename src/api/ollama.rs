//! Client for a local Ollama server.

use crate::api::http;
use crate::api::{ChatModel, ChatRequest, ChatResponse, Embedder, Message, ToolCall, ToolSchema};
use crate::error::{ProviderError, Res};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub(crate) struct OllamaClient {
    client: reqwest::Client,
    chat_url: Url,
    embed_url: Url,
    model: String,
}

impl OllamaClient {
    pub(crate) fn new(base_url: &str, model: &str, timeout_secs: u64) -> Res<Self> {
        Ok(Self {
            client: http::client(timeout_secs)?,
            chat_url: http::endpoint(base_url, "api/chat")?,
            embed_url: http::endpoint(base_url, "api/embed")?,
            model: model.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = ChatBody::new(&self.model, request);
        let response: ChatReply = http::post_json(&self.client, &self.chat_url, None, &body).await?;
        debug!(
            model = %self.model,
            tool_calls = response.message.tool_calls.len(),
            "ollama chat received"
        );
        let tool_calls = response
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, c)| ToolCall {
                id: format!("call_{i}"),
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();
        Ok(ChatResponse {
            content: Some(response.message.content).filter(|c| !c.is_empty()),
            tool_calls,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = EmbedBody {
            model: &self.model,
            input: text,
        };
        let response: EmbedReply =
            http::post_json(&self.client, &self.embed_url, None, &body).await?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("response has no embedding".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

impl<'a> ChatBody<'a> {
    fn new(model: &'a str, request: &'a ChatRequest) -> Self {
        let tools: Vec<WireTool<'a>> = request
            .tools
            .iter()
            .map(|function| WireTool {
                kind: "function",
                function,
            })
            .collect();
        let format = (request.json_mode && tools.is_empty()).then_some("json");
        Self {
            model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            stream: false,
            format,
            tools,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: String,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: m.role.to_string(),
            content: &m.content,
            tool_calls: m
                .tool_calls
                .iter()
                .map(|c| WireToolCall {
                    function: WireFunction {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSchema,
}

/// Unlike OpenAI, Ollama carries tool arguments as a JSON object.
#[derive(Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct ChatReply {
    message: WireReplyMessage,
}

#[derive(Deserialize)]
struct WireReplyMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedReply {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}
