use tracing::{info, warn};

use crate::{
    core::{
        errors::{AppError, AppResult},
        types::Provider,
    },
    security::keyring,
    AppState,
};

pub fn set_api_key(state: &AppState, api_key: String) -> AppResult<()> {
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        return Err(AppError::InvalidInput("api key cannot be empty".to_string()));
    }
    if state.persist_api_key {
        if let Err(err) = keyring::set_provider_key(Provider::OpenAi, &api_key) {
            warn!(error = %err, "could not store api key in the OS keyring");
        }
    }
    state.orchestrator.set_user_key(Some(api_key))?;
    info!("user api key updated");
    Ok(())
}
