//! Seeds the default backend from environment variables
//!
//! Deployments that only ever talk to one Discord server configure it once
//! through `BOT_TOKEN`, `SERVER_ID`, and `CHANNEL_ID`; everything else in
//! the crate treats the resulting `discord_default` backend as ordinary
//! directory data.

use crate::backend::{BackendRegistry, PLATFORM_DISCORD};
use crate::catalog::{Catalog, CatalogError};
use serde_json::json;
use thiserror::Error;
use tracing::info;

/// Name of the backend seeded from the environment
pub const DEFAULT_BACKEND_NAME: &str = "discord_default";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("environment variable {0} must be set")]
    MissingEnv(&'static str),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Outcome of a seeding run
#[derive(Debug, PartialEq, Eq)]
pub enum Seeded {
    Created,
    AlreadyExists,
}

/// Create the `discord_default` backend from `BOT_TOKEN`, `SERVER_ID`, and
/// `CHANNEL_ID` if it does not exist yet.
pub fn seed_default_backend(
    catalog: &Catalog,
    registry: &BackendRegistry,
) -> Result<Seeded, BootstrapError> {
    let bot_token = required_env("BOT_TOKEN")?;
    let server_id = required_env("SERVER_ID")?;
    let channel_id = required_env("CHANNEL_ID")?;

    if catalog.get_backend_by_name(DEFAULT_BACKEND_NAME)?.is_some() {
        info!(target: "bootstrap", name = DEFAULT_BACKEND_NAME, "backend already exists");
        return Ok(Seeded::AlreadyExists);
    }

    let config = json!({
        "bot_token": bot_token,
        "server_id": server_id,
        "channel_id": channel_id,
    });
    catalog.create_backend(DEFAULT_BACKEND_NAME, PLATFORM_DISCORD, &config, registry)?;
    info!(target: "bootstrap", name = DEFAULT_BACKEND_NAME, "created default backend");
    Ok(Seeded::Created)
}

fn required_env(name: &'static str) -> Result<String, BootstrapError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(BootstrapError::MissingEnv(name)),
    }
}
