use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    core::errors::{AppError, AppResult},
    providers::{ChatBackend, ChatReply, ChatRequest},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Chat,
    /// `o1`, `o3`, `o4-mini`, ...: no system-role tuning, separate token budget field.
    Reasoning,
}

impl ModelFamily {
    pub fn detect(model: &str) -> Self {
        let mut chars = model.trim().chars();
        match (chars.next(), chars.next()) {
            (Some('o'), Some(digit)) if digit.is_ascii_digit() => Self::Reasoning,
            _ => Self::Chat,
        }
    }

    pub fn token_param(self) -> &'static str {
        match self {
            Self::Chat => "max_tokens",
            Self::Reasoning => "max_completion_tokens",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Network(err.to_string()))?;
        Ok(Self {
            http,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn family(&self) -> ModelFamily {
        ModelFamily::detect(&self.model)
    }

    fn payload(&self, request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": request.messages,
        });
        payload[self.family().token_param()] = json!(request.max_tokens);
        if let Some(tool) = &request.tool {
            payload["tools"] = json!([{
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            }]);
            payload["tool_choice"] = json!("required");
        }
        payload
    }

    async fn send(&self, api_key: &str, request: &ChatRequest) -> AppResult<ChatReply> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AppError::ProviderTimeout
                } else {
                    AppError::Network(err.to_string())
                }
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(AppError::ProviderAuth),
            StatusCode::TOO_MANY_REQUESTS => return Err(AppError::ProviderRateLimited),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::ProviderInvalidResponse(format!(
                    "status {status} body {body}"
                )));
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| AppError::ProviderInvalidResponse(err.to_string()))?;
        if let Some(usage) = body.get("usage") {
            debug!(model = %self.model, %usage, "chat completion finished");
        }
        parse_reply(&body)
    }
}

fn parse_reply(body: &Value) -> AppResult<ChatReply> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices: &Vec<Value>| choices.first())
        .and_then(|choice: &Value| choice.get("message"))
        .ok_or_else(|| AppError::ProviderInvalidResponse("missing message choice".to_string()))?;

    let call = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls: &Vec<Value>| calls.first())
        .and_then(|call: &Value| call.get("function"));
    if let Some(function) = call {
        let name = function.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = function
            .get("arguments")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ProviderInvalidResponse("tool call without arguments".to_string()))?;
        return Ok(ChatReply::ToolCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        });
    }

    message
        .get("content")
        .and_then(Value::as_str)
        .map(|text| ChatReply::Text(text.to_string()))
        .ok_or_else(|| AppError::ProviderInvalidResponse("message has neither tool call nor content".to_string()))
}

impl ChatBackend for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete<'a>(&'a self, api_key: &'a str, request: &'a ChatRequest) -> BoxFuture<'a, AppResult<ChatReply>> {
        self.send(api_key, request).boxed()
    }
}
