//! Client for OpenAI-compatible chat completion and embedding APIs.

use crate::api::http;
use crate::api::{ChatModel, ChatRequest, ChatResponse, Embedder, Message, ToolCall, ToolSchema};
use crate::error::{ProviderError, Res};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub(crate) struct OpenAiClient {
    client: reqwest::Client,
    chat_url: Url,
    embeddings_url: Url,
    model: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub(crate) fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Res<Self> {
        Ok(Self {
            client: http::client(timeout_secs)?,
            chat_url: http::endpoint(base_url, "chat/completions")?,
            embeddings_url: http::endpoint(base_url, "embeddings")?,
            model: model.to_string(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = ChatBody::new(&self.model, request);
        let response: ChatCompletion =
            http::post_json(&self.client, &self.chat_url, self.api_key.as_deref(), &body).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("response has no choices".to_string()))?;
        debug!(
            model = %self.model,
            tool_calls = choice.message.tool_calls.len(),
            "chat completion received"
        );
        Ok(ChatResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(WireToolCall::into_tool_call)
                .collect(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = EmbeddingBody {
            model: &self.model,
            input: text,
        };
        let response: EmbeddingResponse = http::post_json(
            &self.client,
            &self.embeddings_url,
            self.api_key.as_deref(),
            &body,
        )
        .await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
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
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

impl<'a> ChatBody<'a> {
    fn new(model: &'a str, request: &'a ChatRequest) -> Self {
        let tools: Vec<WireTool<'a>> = request.tools.iter().map(WireTool::from).collect();
        let tool_choice = (!tools.is_empty()).then_some("required");
        let response_format = (request.json_mode && tools.is_empty())
            .then(|| serde_json::json!({ "type": "json_object" }));
        Self {
            model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            response_format,
            tools,
            tool_choice,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCallOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(m: &'a Message) -> Self {
        let tool_calls: Vec<WireToolCallOut> = m
            .tool_calls
            .iter()
            .map(|c| WireToolCallOut {
                id: c.id.clone(),
                kind: "function",
                function: WireFunctionOut {
                    name: c.name.clone(),
                    arguments: c.arguments.to_string(),
                },
            })
            .collect();
        let content = if m.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(m.content.as_str())
        };
        Self {
            role: m.role.to_string(),
            content,
            tool_calls,
            tool_call_id: m.tool_call_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct WireToolCallOut {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionOut,
}

#[derive(Serialize)]
struct WireFunctionOut {
    name: String,
    /// OpenAI sends and expects function arguments as a JSON-encoded string.
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSchema,
}

impl<'a> From<&'a ToolSchema> for WireTool<'a> {
    fn from(schema: &'a ToolSchema) -> Self {
        Self {
            kind: "function",
            function: schema,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl WireToolCall {
    /// Arguments that are not valid JSON are passed on as a string so that validation can report
    /// them back to the model.
    fn into_tool_call(self) -> ToolCall {
        let arguments = serde_json::from_str(&self.function.arguments)
            .unwrap_or(Value::String(self.function.arguments));
        ToolCall {
            id: self.id,
            name: self.function.name,
            arguments,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json_mode: bool, tools: Vec<ToolSchema>) -> ChatRequest {
        ChatRequest {
            messages: vec![Message::system("sys"), Message::user("hi")],
            tools,
            json_mode,
        }
    }

    #[test]
    fn test_json_mode_body() {
        let request = request(true, Vec::new());
        let body = serde_json::to_value(ChatBody::new("gpt", &request)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("tools").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_tools_body_requires_a_call() {
        let tool = ToolSchema {
            name: "record".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let request = request(true, vec![tool]);
        let body = serde_json::to_value(ChatBody::new("gpt", &request)).unwrap();
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "record");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_assistant_tool_call_arguments_are_a_string() {
        let call = ToolCall {
            id: "c1".to_string(),
            name: "record".to_string(),
            arguments: serde_json::json!({"a": 1}),
        };
        let message = Message::assistant_tool_call(call);
        let wire = serde_json::to_value(WireMessage::from(&message)).unwrap();
        assert!(wire.get("content").is_none());
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"a\":1}");
    }

    #[test]
    fn test_parse_tool_call_response() {
        let raw = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"call_9","type":"function","function":{"name":"record","arguments":"{\"x\":2}"}},
            {"id":"call_10","type":"function","function":{"name":"record","arguments":"{broken"}}
        ]}}]}"#;
        let parsed: ChatCompletion = serde_json::from_str(raw).unwrap();
        let message = parsed.choices.into_iter().next().unwrap().message;
        let calls: Vec<ToolCall> = message
            .tool_calls
            .into_iter()
            .map(WireToolCall::into_tool_call)
            .collect();
        assert_eq!(calls[0].arguments, serde_json::json!({"x": 2}));
        assert_eq!(calls[1].arguments, Value::String("{broken".to_string()));
    }
}
