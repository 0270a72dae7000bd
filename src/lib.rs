pub mod commands;
pub mod core;
pub mod db;
pub mod document;
pub mod pipeline;
pub mod providers;
pub mod rewriter;
pub mod security;
pub mod segmenter;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::{
    config::Settings,
    errors::{AppError, AppResult},
    types::{HostMessage, Provider, Variant},
};
use crate::db::{default_data_dir, Database};
use crate::document::surface::{DocumentSurface, HtmlSurface};
use crate::pipeline::Orchestrator;
use crate::providers::{ChatBackend, OpenAiClient};
use crate::rewriter::{RewriteOptions, Rewriter};
use crate::security::{
    credentials::{FallbackChain, HttpSharedKeySource, SharedKeySource},
    keyring,
};

fn log_level_from_env() -> &'static str {
    match std::env::var("FOXVOX_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn sqlx_debug_enabled() -> bool {
    matches!(
        std::env::var("FOXVOX_SQLX_DEBUG")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Installs the stderr subscriber. Stdout is reserved for the message bus.
pub fn init_logging() {
    let level = log_level_from_env();
    let directives = if sqlx_debug_enabled() {
        level.to_string()
    } else {
        format!("{level},sqlx::query=warn")
    };
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Last-resort credential when neither the user key nor the shared key works.
    pub default_key: String,
    /// Variants prepared on `setup` when the message names none.
    pub templates: BTreeMap<String, Variant>,
    pub persist_api_key: bool,
}

impl AppState {
    /// Wires the production collaborators around `surface`.
    pub fn from_settings(settings: &Settings, db: Database, surface: Arc<dyn DocumentSurface>) -> AppResult<Self> {
        let backend: Arc<dyn ChatBackend> = Arc::new(OpenAiClient::new(&settings.model, &settings.base_url)?);
        let shared: Option<Arc<dyn SharedKeySource>> = match &settings.shared_key_url {
            Some(url) if !url.trim().is_empty() => Some(Arc::new(HttpSharedKeySource::new(url.trim())?)),
            _ => None,
        };
        let credentials = Arc::new(FallbackChain::new(Arc::clone(&backend), shared));
        let rewriter = Rewriter::new(
            backend,
            RewriteOptions {
                max_tokens: settings.max_tokens,
                custom_instruction: settings.custom_instruction().map(str::to_string),
            },
        );
        let orchestrator = Orchestrator::new(db, surface, rewriter, credentials, settings.pipeline.clone());

        let user_key = match settings.user_key() {
            Some(key) => Some(key.to_string()),
            None => keyring::get_provider_key(Provider::OpenAi).unwrap_or_else(|err| {
                debug!(error = %err, "no api key available from the OS keyring");
                None
            }),
        };
        orchestrator.set_user_key(user_key)?;

        Ok(Self {
            orchestrator,
            default_key: settings.default_key.clone(),
            templates: settings.templates.clone(),
            persist_api_key: true,
        })
    }
}

fn print_line(value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!(error = %err, "could not encode bus message"),
    }
}

#[derive(serde::Serialize)]
struct CommandFailed<'a> {
    action: &'static str,
    error: &'a AppError,
}

/// `foxvox <page.html> [out.html]`: serves JSON messages from stdin against the page
/// and writes the resulting markup once stdin is exhausted.
pub async fn run(args: Vec<String>) -> AppResult<()> {
    let mut args = args.into_iter();
    let page_path = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| AppError::InvalidInput("usage: foxvox <page.html> [out.html]".to_string()))?;
    let output_path = args.next().map(PathBuf::from);

    let settings = Settings::from_env()?;
    let markup = tokio::fs::read_to_string(&page_path)
        .await
        .map_err(|err| AppError::Io(format!("cannot read {}: {err}", page_path.display())))?;
    let surface = Arc::new(HtmlSurface::from_html(&markup));

    let data_dir = default_data_dir(None)?;
    let db = Database::new(&data_dir).await?;
    info!(data_dir = %data_dir.display(), page = %page_path.display(), "foxvox host started");

    let state = AppState::from_settings(&settings, db, surface.clone())?;
    let mut notifications = state.orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => print_line(&notification),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification listener fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut running = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<HostMessage>(&line) {
            Ok(message) => commands::handle_message(&state, message).await,
            Err(err) => Err(AppError::InvalidInput(format!("unreadable message: {err}"))),
        };
        match outcome {
            Ok(Some(handle)) => running.push(handle),
            Ok(None) => {}
            Err(err) => print_line(&CommandFailed {
                action: "command_failed",
                error: &err,
            }),
        }
    }

    for handle in running {
        if let Err(err) = handle.await {
            warn!(error = %err, "generation task aborted");
        }
    }
    drop(state);
    let _ = printer.await;

    let result = surface.markup()?;
    match output_path {
        Some(path) => tokio::fs::write(&path, result).await?,
        None => println!("{result}"),
    }
    Ok(())
}
