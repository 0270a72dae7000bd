use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    errors::{AppError, AppResult},
    types::{Variant, ORIGINAL_STORE},
};

const MIN_MAX_TOKENS: u32 = 100;
const MAX_MAX_TOKENS: u32 = 10_000;
const MIN_API_KEY_LEN: usize = 20;

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_min_visible_text() -> usize {
    40
}

fn default_rewrite_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub custom_prompt: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub shared_key_url: Option<String>,
    #[serde(default)]
    pub default_key: String,
    #[serde(default)]
    pub templates: BTreeMap<String, Variant>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            custom_prompt: String::new(),
            base_url: default_base_url(),
            shared_key_url: None,
            default_key: String::new(),
            templates: BTreeMap::new(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Tunables of the segment collection and generation fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    #[serde(default = "default_min_visible_text")]
    pub min_visible_text: usize,
    #[serde(default = "default_rewrite_timeout_secs")]
    pub rewrite_timeout_secs: u64,
    #[serde(default)]
    pub max_concurrent_rewrites: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_visible_text: default_min_visible_text(),
            rewrite_timeout_secs: default_rewrite_timeout_secs(),
            max_concurrent_rewrites: None,
        }
    }
}

impl PipelineSettings {
    pub fn rewrite_timeout(&self) -> Option<Duration> {
        (self.rewrite_timeout_secs > 0).then(|| Duration::from_secs(self.rewrite_timeout_secs))
    }
}

impl Settings {
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Io(format!("cannot read config {}: {err}", path.display())))?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads `FOXVOX_CONFIG` when set, otherwise falls back to defaults.
    pub fn from_env() -> AppResult<Self> {
        match std::env::var("FOXVOX_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim())),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.model.trim().is_empty() {
            return Err(AppError::InvalidInput("model cannot be empty".to_string()));
        }
        if !(MIN_MAX_TOKENS..=MAX_MAX_TOKENS).contains(&self.max_tokens) {
            return Err(AppError::InvalidInput(format!(
                "max tokens must be between {MIN_MAX_TOKENS} and {MAX_MAX_TOKENS}"
            )));
        }
        if let Some(key) = self.user_key() {
            if !key.starts_with("sk-") || key.len() < MIN_API_KEY_LEN {
                return Err(AppError::InvalidInput(format!(
                    "api key must start with \"sk-\" and be at least {MIN_API_KEY_LEN} characters long"
                )));
            }
        }
        for (slot, variant) in &self.templates {
            let name = variant.name.trim();
            if name.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "template {slot} has an empty name"
                )));
            }
            if name == ORIGINAL_STORE {
                return Err(AppError::InvalidInput(format!(
                    "template name \"{ORIGINAL_STORE}\" is reserved"
                )));
            }
        }
        Ok(())
    }

    pub fn user_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn custom_instruction(&self) -> Option<&str> {
        Some(self.custom_prompt.trim()).filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_extension_settings() {
        let settings: Settings = serde_json::from_str("{}").expect("empty config parses");
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.max_tokens, 4000);
        assert_eq!(settings.pipeline.min_visible_text, 40);
        assert!(settings.pipeline.max_concurrent_rewrites.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_token_budget() {
        let settings = Settings {
            max_tokens: 50,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn rejects_malformed_user_key() {
        let settings = Settings {
            api_key: Some("not-a-key".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            api_key: Some("sk-0123456789abcdefghij".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_reserved_template_name() {
        let mut templates = BTreeMap::new();
        templates.insert(
            "a".to_string(),
            Variant::new("original", "Keep everything as is."),
        );
        let settings = Settings {
            templates,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
