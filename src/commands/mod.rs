pub mod generation;
pub mod pages;
pub mod settings;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    core::{errors::AppResult, types::HostMessage},
    AppState,
};

/// Dispatches one bus message. `generate` returns the handle of its background task.
pub async fn handle_message(state: &AppState, message: HostMessage) -> AppResult<Option<JoinHandle<()>>> {
    match message {
        HostMessage::Setup { url, templates } => {
            let segments = pages::setup(state, &url, templates).await?;
            debug!(url = %url, segments, "setup handled");
            Ok(None)
        }
        HostMessage::SetTemplate { url, template } => {
            let replayed = pages::set_template(state, &url, template).await?;
            debug!(url = %url, replayed, "set_template handled");
            Ok(None)
        }
        HostMessage::Generate { url, key } => generation::generate(state, &url, &key).map(Some),
        HostMessage::ClearCache { url } => {
            pages::clear_cache(state, &url).await?;
            Ok(None)
        }
        HostMessage::NavigationCompleted { url } => {
            pages::navigation_completed(state, &url).await?;
            Ok(None)
        }
        HostMessage::SetApiKey { key } => {
            settings::set_api_key(state, key)?;
            Ok(None)
        }
    }
}
