//! Per-segment rewrite protocol.
//!
//! Chat models answer twice: a first draft through the `output` tool, then a
//! self-review turn that sees the draft and outputs the final version.
//! Reasoning models get one turn that asks for the review up front.

pub mod prompts;

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    core::{
        errors::{AppError, AppResult},
        types::Variant,
    },
    providers::{ChatBackend, ChatMessage, ChatReply, ChatRequest, ModelFamily, OutputTool},
};

/// Arguments of the `output` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RewriteOutput {
    /// The rewritten HTML fragment.
    pub html: String,
}

pub fn output_tool() -> OutputTool {
    OutputTool {
        name: prompts::OUTPUT_TOOL_NAME.to_string(),
        description: prompts::OUTPUT_TOOL_DESCRIPTION.to_string(),
        parameters: schemars::schema_for!(RewriteOutput).to_value(),
    }
}

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub max_tokens: u32,
    pub custom_instruction: Option<String>,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            custom_instruction: None,
        }
    }
}

#[derive(Clone)]
pub struct Rewriter {
    backend: Arc<dyn ChatBackend>,
    options: RewriteOptions,
}

impl Rewriter {
    pub fn new(backend: Arc<dyn ChatBackend>, options: RewriteOptions) -> Self {
        Self { backend, options }
    }

    pub fn family(&self) -> ModelFamily {
        ModelFamily::detect(self.backend.model())
    }

    /// Rewritten markup, or `None` when the segment should be left as is.
    pub async fn rewrite(&self, credential: &str, variant: &Variant, original: &str) -> Option<String> {
        let result = match self.family() {
            ModelFamily::Chat => self.two_pass(credential, variant, original).await,
            ModelFamily::Reasoning => self.single_pass(credential, variant, original).await,
        };

        match result {
            Ok(html) => {
                let trimmed = html.trim();
                if trimmed.is_empty() {
                    debug!(variant = %variant.name, "rewrite came back empty, skipping");
                    None
                } else if trimmed == original.trim() {
                    debug!(variant = %variant.name, "rewrite left the segment unchanged, skipping");
                    None
                } else {
                    Some(html)
                }
            }
            Err(err) => {
                warn!(variant = %variant.name, code = err.code(), error = %err, "rewrite failed");
                None
            }
        }
    }

    async fn two_pass(&self, credential: &str, variant: &Variant, original: &str) -> AppResult<String> {
        let instruction = prompts::system_instruction(
            &variant.instructions,
            self.options.custom_instruction.as_deref(),
        );
        let mut messages = vec![ChatMessage::system(instruction), ChatMessage::user(original)];

        let draft = self.call(credential, &messages).await?;
        parse_output(&draft)?;
        messages.push(ChatMessage::assistant(draft));
        messages.push(ChatMessage::user(prompts::CRITIQUE_PROMPT));

        let final_arguments = self.call(credential, &messages).await?;
        parse_output(&final_arguments)
    }

    async fn single_pass(&self, credential: &str, variant: &Variant, original: &str) -> AppResult<String> {
        let instruction = prompts::reasoning_instruction(
            &variant.instructions,
            self.options.custom_instruction.as_deref(),
        );
        let messages = vec![ChatMessage::system(instruction), ChatMessage::user(original)];
        let arguments = self.call(credential, &messages).await?;
        parse_output(&arguments)
    }

    /// One forced `output` tool call; returns the raw arguments.
    async fn call(&self, credential: &str, messages: &[ChatMessage]) -> AppResult<String> {
        let request = ChatRequest {
            messages: messages.to_vec(),
            tool: Some(output_tool()),
            max_tokens: self.options.max_tokens,
        };
        match self.backend.complete(credential, &request).await? {
            ChatReply::ToolCall { name, arguments } if name == prompts::OUTPUT_TOOL_NAME => Ok(arguments),
            ChatReply::ToolCall { name, .. } => Err(AppError::ProviderInvalidResponse(format!(
                "model called unexpected tool {name}"
            ))),
            ChatReply::Text(_) => Err(AppError::ProviderInvalidResponse(
                "model answered without calling the output tool".to_string(),
            )),
        }
    }
}

fn parse_output(arguments: &str) -> AppResult<String> {
    serde_json::from_str::<RewriteOutput>(arguments)
        .map(|output| output.html)
        .map_err(|err| AppError::ProviderInvalidResponse(format!("output arguments not parseable: {err}")))
}
