use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{AppError, AppResult};
use crate::segmenter::address::StructuralPath;

/// Name of the store holding the untouched segment extraction of a page.
pub const ORIGINAL_STORE: &str = "original";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Layout {
    pub left: f64,
    pub top: f64,
}

/// One selected content region as captured from the live document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub path: StructuralPath,
    pub layout: Layout,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSegment {
    pub path: StructuralPath,
    pub html: String,
}

/// A named rewriting style.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub name: String,
    #[serde(alias = "generation")]
    pub instructions: String,
}

impl Variant {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
        }
    }
}

/// `hostname + pathname` of a page; scopes every cached store of that page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentIdentity(String);

impl DocumentIdentity {
    pub fn from_url(raw: &str) -> AppResult<Self> {
        let parsed = url::Url::parse(raw.trim())
            .map_err(|err| AppError::InvalidInput(format!("invalid page url {raw}: {err}")))?;
        let host = parsed.host_str().unwrap_or_default();
        Ok(Self(format!("{host}{}", parsed.path())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub identity: DocumentIdentity,
    pub store: String,
}

impl StoreKey {
    pub fn new(identity: &DocumentIdentity, store: impl Into<String>) -> Self {
        Self {
            identity: identity.clone(),
            store: store.into(),
        }
    }

    pub fn original(identity: &DocumentIdentity) -> Self {
        Self::new(identity, ORIGINAL_STORE)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.identity, self.store)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub name: String,
    pub item_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Tagged requests arriving over the host message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HostMessage {
    Setup {
        url: String,
        #[serde(default)]
        templates: BTreeMap<String, Variant>,
    },
    SetTemplate {
        url: String,
        template: Variant,
    },
    Generate {
        url: String,
        #[serde(default)]
        key: String,
    },
    #[serde(rename = "clear-cache")]
    ClearCache {
        url: String,
    },
    NavigationCompleted {
        url: String,
    },
    #[serde(alias = "push_openai_to_background")]
    SetApiKey {
        key: String,
    },
}

/// Status notifications published to whoever listens on the host side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Notification {
    GenerationInitialized {
        run_id: String,
    },
    GenerationCompleted {
        run_id: String,
        rewritten: usize,
    },
    GenerationFailed {
        run_id: String,
        code: String,
        message: String,
        retryable: bool,
    },
    TemplateCached {
        template_name: String,
    },
    CacheDeleted,
    ClosePopup,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub run_id: String,
    pub attempted: usize,
    pub rewritten: usize,
    pub written_back: usize,
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keeps_host_and_path_only() {
        let identity =
            DocumentIdentity::from_url("https://news.example.com/world/article?id=4#top")
                .expect("valid url");
        assert_eq!(identity.as_str(), "news.example.com/world/article");
    }

    #[test]
    fn host_messages_use_action_tags() {
        let message: HostMessage =
            serde_json::from_str(r#"{"action":"clear-cache","url":"https://a.test/x"}"#)
                .expect("clear-cache parses");
        assert!(matches!(message, HostMessage::ClearCache { .. }));

        let message: HostMessage = serde_json::from_str(
            r#"{"action":"set_template","url":"https://a.test/x","template":{"name":"pirate","generation":"Talk like a pirate."}}"#,
        )
        .expect("set_template parses");
        match message {
            HostMessage::SetTemplate { template, .. } => {
                assert_eq!(template.instructions, "Talk like a pirate.");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn notifications_serialize_with_snake_case_actions() {
        let value = serde_json::to_value(Notification::TemplateCached {
            template_name: "pirate".to_string(),
        })
        .expect("serializes");
        assert_eq!(value["action"], "template_cached");
        assert_eq!(value["template_name"], "pirate");
    }
}
