use crate::core::{errors::AppResult, types::Provider};

const SERVICE: &str = "foxvox";

fn username_for_provider(provider: &Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "openai",
    }
}

fn entry(provider: &Provider) -> AppResult<keyring::Entry> {
    Ok(keyring::Entry::new(SERVICE, username_for_provider(provider))?)
}

pub fn set_provider_key(provider: Provider, api_key: &str) -> AppResult<()> {
    entry(&provider)?.set_password(api_key)?;
    Ok(())
}

/// The stored key, `None` when nothing was ever saved for `provider`.
pub fn get_provider_key(provider: Provider) -> AppResult<Option<String>> {
    match entry(&provider)?.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
