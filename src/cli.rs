//! CLI module for the push service
//!
//! Runs the HTTP server by default and offers maintenance commands that do
//! not need it: schema migration, VAPID key generation and a one-off send.

use std::{fs::OpenOptions, io::Write, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::{
    configuration::{
        get_configuration, set_configuration, AppState, Config, State,
    },
    dao::{MemoryStore, SubscriptionStore},
    error::Error,
    handler::send_push::send,
    provider::{DatabasePool, HTTP},
    push::VapidKeys,
    types::NotificationMessage,
};

/// Web Push delivery service
#[derive(Parser)]
#[command(name = "pushd")]
#[command(about = "Web Push notification delivery service", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default if no command specified)
    Serve,

    /// Apply the subscription schema to DATABASE_URL
    Migrate,

    /// Generate a VAPID key pair
    GenerateVapidKeys {
        /// Write the private key PEM here instead of stdout (never overwrites)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Send one notification to every device of a user and print the report
    Send {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        body: String,

        #[arg(long)]
        url: Option<String>,
    },
}

/// Initialize configuration and return Config
pub fn init_config() -> Result<Config, Error> {
    set_configuration()?;
    get_configuration()
}

/// Postgres when `DATABASE_URL` is set, otherwise a process-local store.
pub async fn init_store(
    config: &Config,
) -> Result<Arc<dyn SubscriptionStore>, Error> {
    if config.database_url.is_empty() {
        warn!("DATABASE_URL is empty, subscriptions are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let database = DatabasePool::new(config).await?;
    State::init_migrations(&database).await?;

    Ok(Arc::new(database.push_subscription))
}

pub async fn init_state(config: Config) -> Result<AppState<State>, Error> {
    let signer = config.vapid_signer()?;
    let http = HTTP::new(&config)?;
    let store = init_store(&config).await?;

    info!(
        "VAPID public key {}",
        signer.keys().public_key_base64url()
    );

    Ok(AppState::new(State::new(config, store, signer, http)))
}

pub async fn run_migrate() -> Result<(), Error> {
    let config = init_config()?;

    if config.database_url.is_empty() {
        return Err(Error::ConfigurationError(String::from(
            "DATABASE_URL is required for migrate",
        )));
    }

    let database = DatabasePool::new(&config).await?;
    info!("Running database migrations...");
    State::init_migrations(&database).await?;
    info!("Migrations complete");

    Ok(())
}

pub fn run_generate_vapid_keys(out: Option<PathBuf>) -> Result<(), Error> {
    let keys = VapidKeys::generate();
    let pem = keys.to_pem()?;

    match out {
        Some(path) => {
            let mut file =
                OpenOptions::new().write(true).create_new(true).open(&path)?;
            file.write_all(pem.as_bytes())?;
            info!("Private key written to {}", path.display());
        },
        None => print!("{}", pem),
    }

    println!("VAPID public key: {}", keys.public_key_base64url());

    Ok(())
}

pub async fn run_send(
    user_id: String,
    title: String,
    body: String,
    url: Option<String>,
) -> Result<(), Error> {
    let config = init_config()?;
    let app_state = init_state(config).await?;
    let notification = NotificationMessage::new(&title, &body, url.as_deref());

    let report = send(app_state, user_id, notification).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
