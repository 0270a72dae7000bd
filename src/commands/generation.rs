use tokio::task::JoinHandle;
use tracing::debug;

use crate::{commands::pages::require_session_page, core::errors::AppResult, AppState};

/// Starts a generation run in the background. Progress and failures arrive as notifications.
pub fn generate(state: &AppState, url: &str, key: &str) -> AppResult<JoinHandle<()>> {
    require_session_page(state, url)?;
    let fallback_key = if key.trim().is_empty() {
        state.default_key.clone()
    } else {
        key.trim().to_string()
    };
    let orchestrator = state.orchestrator.clone();

    Ok(tokio::spawn(async move {
        match orchestrator.generate(&fallback_key).await {
            Ok(report) => debug!(run_id = %report.run_id, cached = report.cached, "generation task done"),
            Err(err) => debug!(code = err.code(), "generation task ended with an error"),
        }
    }))
}
