use std::{
    env, fs,
    ops::Deref,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use tracing::info;

use crate::{
    dao::{get_path, SubscriptionStore},
    error::Error,
    handler::send_push::{DispatchOptions, Dispatcher},
    helpers::parse_list,
    provider::{DatabasePool, HTTP},
    push::{vapid::DEFAULT_EXPIRATION_HOURS, VapidKeys, VapidSigner},
    types::{PushHeader, Urgency},
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

pub struct State {
    pub config: Config,
    pub database: Arc<dyn SubscriptionStore>,
    pub signer: Arc<VapidSigner>,
    pub dispatcher: Dispatcher,
}

impl State {
    pub fn new(
        config: Config,
        database: Arc<dyn SubscriptionStore>,
        signer: VapidSigner,
        http: HTTP,
    ) -> State {
        let signer = Arc::new(signer);
        let dispatcher = Dispatcher::new(
            database.clone(),
            Arc::new(http),
            signer.clone(),
            DispatchOptions::from(&config),
        );

        Self {
            config,
            database,
            signer,
            dispatcher,
        }
    }

    pub async fn init_migrations(database: &DatabasePool) -> Result<(), Error> {
        let files = vec!["push_subscription.sql"];

        let dir = env!("CARGO_MANIFEST_DIR");

        for file in files {
            let data = fs::read_to_string(get_path(dir, file))?;
            sqlx::raw_sql(data.as_str()).execute(&database.pool).await?;
            info!("Applied schema {}", file);
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub database_url: String,
    pub max_connections: u32,
    pub timeout: u64,
    pub max_tasks: usize,
    pub push_ttl: u32,
    pub push_urgency: Urgency,
    pub status_code_to_delete: Vec<u16>,
    pub mail_to: String,
    pub vapid_expiration_hours: i64,
    pub vapid_private_key: PathBuf,
    pub auth: String,
}

impl Config {
    pub fn push_header(&self) -> PushHeader {
        PushHeader {
            ttl: self.push_ttl,
            urgency: self.push_urgency,
        }
    }

    pub fn vapid_signer(&self) -> Result<VapidSigner, Error> {
        let keys = VapidKeys::load(&self.vapid_private_key).map_err(|e| {
            Error::ConfigurationError(format!(
                "VAPID key {}: {}",
                self.vapid_private_key.display(),
                e
            ))
        })?;

        VapidSigner::new(keys, &self.mail_to, self.vapid_expiration_hours)
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> Result<T, Error> {
    let value = var_or(key, default);
    value.trim().parse::<T>().map_err(|_| {
        Error::ConfigurationError(format!("{} has invalid value {}", key, value))
    })
}

pub fn get_configuration() -> Result<Config, Error> {
    let server_host = var_or("SERVER_HOST", "127.0.0.1");
    let port: u16 = parse_var("PORT", "8080")?;
    let allowed_origins = parse_list(&var_or("ALLOWED_ORIGINS", "*"));
    let database_url = var_or("DATABASE_URL", "");
    let max_connections = parse_var("MAX_CONNECTIONS", "20")?;
    let timeout = parse_var("TIMEOUT", "5")?;
    let max_tasks: usize = parse_var("MAX_TASKS", "16")?;
    let push_ttl = parse_var("PUSH_TTL", "86400")?;
    let push_urgency = parse_var("PUSH_URGENCY", "high")?;
    let mail_to = env::var("MAIL_TO")?;
    let vapid_expiration_hours = parse_var(
        "VAPID_EXPIRATION_HOURS",
        &DEFAULT_EXPIRATION_HOURS.to_string(),
    )?;
    let auth = env::var("AUTH")?;

    let vapid_private_key = {
        let value = var_or("VAPID_PRIVATE_KEY", "cert/vapid_private.pem");
        let path = Path::new(&value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(env!("CARGO_MANIFEST_DIR")).join(path)
        }
    };

    let mut status_code_to_delete = vec![];
    for code in parse_list(&var_or("STATUS_CODE_TO_DELETE", "404,410")) {
        status_code_to_delete.push(code.parse::<u16>()?);
    }

    if max_tasks == 0 {
        return Err(Error::ConfigurationError(String::from(
            "MAX_TASKS must be greater than 0",
        )));
    }

    if auth.trim().is_empty() {
        return Err(Error::ConfigurationError(String::from(
            "AUTH must not be empty",
        )));
    }

    let config = Config {
        server_host,
        port,
        allowed_origins,
        database_url,
        max_connections,
        timeout,
        max_tasks,
        push_ttl,
        push_urgency,
        status_code_to_delete,
        mail_to,
        vapid_expiration_hours,
        vapid_private_key,
        auth,
    };

    Ok(config)
}

/// Seeds the environment from `<manifest>/.env`. Variables already present in
/// the process environment win.
pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";

    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);

    if !Path::new(&path).exists() {
        return Ok(());
    }

    let config_string = fs::read_to_string(path)?;
    parse_config_string(config_string);

    Ok(())
}

fn parse_config_string(config: String) {
    let params = config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')));

    for (key, value) in params {
        if env::var_os(key).is_none() {
            env::set_var(key, value);
        }
    }
}
