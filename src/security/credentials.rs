//! Picks the API credential a generation run is going to use.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::{
    core::errors::{AppError, AppResult},
    providers::{ChatBackend, ChatMessage, ChatRequest},
};

const PING_MAX_TOKENS: u32 = 16;
const SHARED_KEY_TIMEOUT: Duration = Duration::from_secs(15);

/// Resolves the credential for one session. Never fails: the caller-supplied
/// fallback is the last resort.
pub trait CredentialStrategy: Send + Sync {
    fn resolve<'a>(&'a self, user_key: Option<&'a str>, fallback_key: &'a str) -> BoxFuture<'a, String>;
}

/// Remote location of a shared, base64-encoded credential.
pub trait SharedKeySource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, AppResult<String>>;
}

#[derive(Debug, Clone)]
pub struct HttpSharedKeySource {
    http: reqwest::Client,
    url: String,
}

impl HttpSharedKeySource {
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(SHARED_KEY_TIMEOUT)
            .build()
            .map_err(|err| AppError::Network(err.to_string()))?;
        Ok(Self { http, url: url.into() })
    }

    async fn download(&self) -> AppResult<String> {
        let response = self.http.get(&self.url).send().await.map_err(|err| {
            if err.is_timeout() {
                AppError::ProviderTimeout
            } else {
                AppError::Network(err.to_string())
            }
        })?;
        match response.status() {
            StatusCode::OK => response
                .text()
                .await
                .map_err(|err| AppError::Network(err.to_string())),
            status => Err(AppError::Network(format!("shared key source answered {status}"))),
        }
    }
}

impl SharedKeySource for HttpSharedKeySource {
    fn fetch(&self) -> BoxFuture<'_, AppResult<String>> {
        self.download().boxed()
    }
}

/// Base64 payload to a trimmed UTF-8 key.
pub fn decode_shared_key(raw: &str) -> AppResult<String> {
    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|err| AppError::InvalidInput(format!("shared key is not base64: {err}")))?;
    let key = String::from_utf8(bytes)
        .map_err(|err| AppError::InvalidInput(format!("shared key is not UTF-8: {err}")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(AppError::InvalidInput("shared key is empty".to_string()));
    }
    Ok(key.to_string())
}

/// User key if the service accepts it, else the shared key, else the fallback.
pub struct FallbackChain {
    backend: Arc<dyn ChatBackend>,
    shared: Option<Arc<dyn SharedKeySource>>,
}

impl FallbackChain {
    pub fn new(backend: Arc<dyn ChatBackend>, shared: Option<Arc<dyn SharedKeySource>>) -> Self {
        Self { backend, shared }
    }

    async fn validate(&self, key: &str) -> AppResult<()> {
        let request = ChatRequest {
            messages: vec![ChatMessage::system("ping")],
            tool: None,
            max_tokens: PING_MAX_TOKENS,
        };
        self.backend.complete(key, &request).await.map(|_| ())
    }

    async fn shared_or_fallback(&self, fallback_key: &str) -> String {
        let Some(source) = &self.shared else {
            debug!("no shared key source configured, using fallback key");
            return fallback_key.to_string();
        };
        match source.fetch().await.and_then(|raw| decode_shared_key(&raw)) {
            Ok(key) => {
                info!("using shared credential");
                key
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "shared key unavailable, using fallback key");
                fallback_key.to_string()
            }
        }
    }

    async fn run(&self, user_key: Option<&str>, fallback_key: &str) -> String {
        let user_key = user_key.map(str::trim).filter(|key| !key.is_empty());
        if let Some(key) = user_key {
            match self.validate(key).await {
                Ok(()) => {
                    debug!("user credential accepted");
                    return key.to_string();
                }
                Err(err) => {
                    warn!(code = err.code(), error = %err, "user credential rejected");
                }
            }
        }
        self.shared_or_fallback(fallback_key).await
    }
}

impl CredentialStrategy for FallbackChain {
    fn resolve<'a>(&'a self, user_key: Option<&'a str>, fallback_key: &'a str) -> BoxFuture<'a, String> {
        self.run(user_key, fallback_key).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_padded_base64_with_whitespace() {
        let encoded = STANDARD.encode("sk-shared-credential-0001\n");
        assert_eq!(
            decode_shared_key(&format!("  {encoded}\n")).expect("decodes"),
            "sk-shared-credential-0001"
        );
    }

    #[test]
    fn rejects_garbage_and_blank_payloads() {
        assert!(decode_shared_key("not base64 !!").is_err());
        assert!(decode_shared_key(&STANDARD.encode("   ")).is_err());
        assert!(decode_shared_key(&STANDARD.encode([0xff, 0xfe])).is_err());
    }
}
