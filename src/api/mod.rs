//! Model and embedding providers.
//!
//! The rest of the crate talks to providers only through the `ChatModel` and `Embedder` traits.
//! One struct exists per backend, and `chat_model` / `embedder` choose among them once at startup
//! based on the config and the `Mode`.

mod http;
mod ollama;
mod openai;
mod test_client;

use crate::config::{Backend, ClassifierConfig, EmbedderConfig};
use crate::error::{ProviderError, Res};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub(crate) use ollama::OllamaClient;
pub(crate) use openai::OpenAiClient;
pub use test_client::{TestEmbedder, TestModel};

/// Environment variable that, when set to a non-empty value, replaces all providers with the
/// offline ones in `test_client`.
pub const TEST_MODE_ENV: &str = "SPENDLENS_IN_TEST_MODE";

/// Whether to talk to real providers or to the deterministic offline ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Live,
    Test,
}

impl Mode {
    /// `Mode::Test` if `SPENDLENS_IN_TEST_MODE` is set and non-empty, otherwise `Mode::Live`.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Test,
            _ => Mode::Live,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

serde_plain::derive_display_from_serialize!(Role);

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned ID used to pair the call with its result. Some backends do not assign
    /// one, in which case the client makes one up.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages, the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: vec![call],
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A function the model may call, with a JSON schema for its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Generates the parameter schema from `T`.
    pub fn for_type<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        let schema = schemars::schema_for!(T);
        Self {
            name: name.into(),
            description: description.into(),
            parameters: schema.to_value(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// When non-empty the model must answer with a call to one of these.
    pub tools: Vec<ToolSchema>,
    /// Ask for a bare JSON object as the message content.
    pub json_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// A chat-completion provider used for classification.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    fn model_name(&self) -> &str;
}

/// Turns text into a vector. Implementations must be safe to call concurrently.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn model_name(&self) -> &str;
}

/// Builds the classification provider described by `config`.
pub fn chat_model(config: &ClassifierConfig, mode: Mode) -> Res<Arc<dyn ChatModel>> {
    if mode == Mode::Test {
        return Ok(Arc::new(TestModel::default()));
    }
    let api_key = http::api_key(config.api_key_env.as_deref())?;
    Ok(match config.backend {
        Backend::OpenAi => Arc::new(OpenAiClient::new(
            &config.base_url,
            &config.model,
            api_key,
            config.timeout_secs,
        )?),
        Backend::Ollama => Arc::new(OllamaClient::new(
            &config.base_url,
            &config.model,
            config.timeout_secs,
        )?),
    })
}

/// Builds the embedding provider described by `config`.
pub fn embedder(config: &EmbedderConfig, mode: Mode) -> Res<Arc<dyn Embedder>> {
    if mode == Mode::Test {
        return Ok(Arc::new(TestEmbedder::default()));
    }
    let api_key = http::api_key(config.api_key_env.as_deref())?;
    Ok(match config.backend {
        Backend::OpenAi => Arc::new(OpenAiClient::new(
            &config.base_url,
            &config.model,
            api_key,
            config.timeout_secs,
        )?),
        Backend::Ollama => Arc::new(OllamaClient::new(
            &config.base_url,
            &config.model,
            config.timeout_secs,
        )?),
    })
}
