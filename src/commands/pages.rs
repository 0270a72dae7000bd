use std::collections::BTreeMap;

use crate::{
    core::{
        errors::{AppError, AppResult},
        types::{DocumentIdentity, Variant},
    },
    AppState,
};

pub async fn setup(state: &AppState, url: &str, templates: BTreeMap<String, Variant>) -> AppResult<usize> {
    let identity = DocumentIdentity::from_url(url)?;
    let templates = if templates.is_empty() {
        state.templates.clone()
    } else {
        templates
    };
    let names: Vec<String> = templates.into_values().map(|variant| variant.name).collect();
    state.orchestrator.setup(identity, &names).await
}

pub async fn set_template(state: &AppState, url: &str, template: Variant) -> AppResult<usize> {
    require_session_page(state, url)?;
    state.orchestrator.select_variant(template).await
}

pub async fn clear_cache(state: &AppState, url: &str) -> AppResult<bool> {
    let identity = DocumentIdentity::from_url(url)?;
    state.orchestrator.clear_cache(&identity).await
}

pub async fn navigation_completed(state: &AppState, url: &str) -> AppResult<()> {
    state.orchestrator.navigation_completed(url).await
}

/// The identity of `url`, which must be the page the session was set up for.
pub(crate) fn require_session_page(state: &AppState, url: &str) -> AppResult<DocumentIdentity> {
    let identity = DocumentIdentity::from_url(url)?;
    match state.orchestrator.session()?.identity {
        Some(current) if current == identity => Ok(identity),
        Some(current) => Err(AppError::InvalidState(format!(
            "session is on {current}, not {identity}"
        ))),
        None => Err(AppError::InvalidState(format!("page {identity} has not been set up"))),
    }
}
