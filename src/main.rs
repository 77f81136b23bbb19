use clap::Parser;
use tracing::{error, Level};

use pushd::{
    cli::{self, Cli, Commands},
    error::Error,
    server,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let result = app_main().await;

    if let Err(err) = &result {
        error!("{}", err);
    }

    result
}

async fn app_main() -> Result<(), Error> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_level(true)
        .with_max_level({
            #[cfg(debug_assertions)]
            {
                Level::DEBUG
            }

            #[cfg(not(debug_assertions))]
            {
                Level::INFO
            }
        })
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Migrate => cli::run_migrate().await,
        Commands::GenerateVapidKeys { out } => cli::run_generate_vapid_keys(out),
        Commands::Send {
            user_id,
            title,
            body,
            url,
        } => cli::run_send(user_id, title, body, url).await,
    }
}

async fn serve() -> Result<(), Error> {
    let config = match cli::init_config() {
        Ok(config) => config,
        Err(e) => return Err(Error::ConfigurationError(e.to_string())),
    };

    let app_state = cli::init_state(config).await?;

    server::server_task(&app_state).await
}
