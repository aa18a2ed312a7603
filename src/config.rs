//! Configuration manager for trailbound.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime mode. Controls error verbosity and cookie hardening.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name, shown in startup logs.
    pub name: String,
    /// Public base URL of the instance.
    pub url: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to bearer-token signing.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to the checkout provider.
    #[serde(skip_serializing)]
    pub payment: Option<Payment>,
    /// Related to uploaded assets.
    #[serde(default, skip_serializing)]
    pub uploads: Uploads,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    /// Overridden by the `POSTGRES_PASSWORD` environment variable.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Mail-queue (AMQP) configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// amqp(s)://hostname:(?port) for the broker.
    pub address: String,
    /// Broker vhost.
    pub vhost: Option<String>,
    /// Username to access the queue.
    pub username: String,
    /// Password to access the queue.
    pub password: String,
    /// Queue name to publish mailing events.
    pub queue: String,
}

/// Checkout-provider configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Base URL of the provider API.
    pub api_url: String,
    /// API secret key.
    /// Overridden by the `PAYMENT_SECRET_KEY` environment variable.
    #[serde(default)]
    pub secret_key: String,
    /// Shared secret used to verify webhook signatures.
    /// Overridden by the `PAYMENT_WEBHOOK_SECRET` environment variable.
    #[serde(default)]
    pub webhook_secret: String,
    /// ISO 4217 currency code for checkout sessions.
    pub currency: Option<String>,
}

/// Uploaded-asset configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uploads {
    /// Directory served as static assets; resized images land under
    /// `img/tours` and `img/users` inside it.
    pub public_dir: PathBuf,
    /// Directory holding tera templates.
    pub templates_dir: PathBuf,
}

impl Default for Uploads {
    fn default() -> Self {
        Self {
            public_dir: PathBuf::from("public"),
            templates_dir: PathBuf::from("templates"),
        }
    }
}

/// Bearer-token configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// HMAC signing secret.
    /// Overridden by the `TOKEN_SECRET` environment variable.
    #[serde(default)]
    pub secret: String,
    /// Token lifetime in seconds. Default is 90 days.
    pub expires_in: Option<u64>,
    /// `jwt` cookie lifetime in days. Default matches `expires_in`.
    pub cookie_expires_days: Option<u64>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment-variable overrides for secrets.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                config.version = VERSION.to_owned();
                config.url = self.normalize_url(&config.url)?;
                config.override_from_env();

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    fn override_from_env(&mut self) {
        if let Ok(secret) = std::env::var("TOKEN_SECRET") {
            self.token.get_or_insert_with(Token::default).secret = secret;
        }
        if let Ok(password) = std::env::var("POSTGRES_PASSWORD") {
            if let Some(postgres) = self.postgres.as_mut() {
                postgres.password = Some(password);
            }
        }
        if let Some(payment) = self.payment.as_mut() {
            if let Ok(key) = std::env::var("PAYMENT_SECRET_KEY") {
                payment.secret_key = key;
            }
            if let Ok(secret) = std::env::var("PAYMENT_WEBHOOK_SECRET") {
                payment.webhook_secret = secret;
            }
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}
