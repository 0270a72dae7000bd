pub mod openai;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::AppResult;

pub use openai::{ModelFamily, OpenAiClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The single function the model is forced to call with its answer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tool: Option<OutputTool>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    ToolCall { name: String, arguments: String },
    Text(String),
}

/// A chat-completion style text generation service.
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    fn complete<'a>(&'a self, api_key: &'a str, request: &'a ChatRequest) -> BoxFuture<'a, AppResult<ChatReply>>;
}
