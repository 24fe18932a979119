//! Creates the default Discord backend from environment variables.

use anyhow::Context;
use discord_vault::backend::BackendRegistry;
use discord_vault::bootstrap::{BootstrapError, Seeded, seed_default_backend};
use discord_vault::catalog::Catalog;
use discord_vault::logging::{LogConfig, init_logging};

fn main() {
    std::process::exit(match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    });
}

fn run() -> anyhow::Result<()> {
    // Console only; a one-shot command has no use for the file log
    let _log_guard = init_logging(LogConfig {
        log_to_file: false,
        ..LogConfig::from_env()
    })?;

    let catalog = Catalog::open_default().context("failed to open catalog")?;
    let registry = BackendRegistry::builtin();

    match seed_default_backend(&catalog, &registry) {
        Ok(Seeded::Created) => {
            println!("Created new Discord storage backend.");
            Ok(())
        }
        Ok(Seeded::AlreadyExists) => {
            println!("Discord storage backend already exists.");
            Ok(())
        }
        Err(err @ BootstrapError::MissingEnv(_)) => {
            Err(anyhow::anyhow!(err)).context("BOT_TOKEN, SERVER_ID, and CHANNEL_ID must be set")
        }
        Err(err) => Err(err.into()),
    }
}
