//! Configuration for the registration server.

use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Discord webhook configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origin allowed by CORS
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// Deployment mode; `development` exposes error details
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Directory served for non-API paths
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", self.listen_addr))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for admin endpoints
    #[serde(default)]
    pub token: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Discord webhook URL; notifications fail when unset
    #[serde(default)]
    pub url: Option<SecretString>,

    /// Per-attempt request timeout
    #[serde(default = "default_webhook_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Attempts per registration
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base; attempt `n` is followed by `backoff_unit * 2^n`
    #[serde(default = "default_backoff_unit", with = "humantime_serde")]
    pub backoff_unit: Duration,

    /// Ask Discord to return the created message so its id can be stored
    #[serde(default = "default_true")]
    pub wait_for_message: bool,
}

impl WebhookConfig {
    /// Configured URL, ignoring blank values.
    pub fn url(&self) -> Option<&str> {
        self.url
            .as_ref()
            .map(|u| u.expose_secret().trim())
            .filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per client IP per `window`
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Registrations per client IP per `registration_window`
    #[serde(default = "default_registrations_per_window")]
    pub registrations_per_window: u32,

    #[serde(default = "default_registration_window", with = "humantime_serde")]
    pub registration_window: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            frontend_url: default_frontend_url(),
            environment: default_environment(),
            static_dir: None,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_webhook_timeout(),
            max_attempts: default_max_attempts(),
            backoff_unit: default_backoff_unit(),
            wait_for_message: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window: default_window(),
            registrations_per_window: default_registrations_per_window(),
            registration_window: default_registration_window(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

fn default_frontend_url() -> String {
    "http://localhost:3000".into()
}

fn default_environment() -> String {
    "production".into()
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_unit() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite:registrations.db".into()
}

fn default_max_connections() -> u32 {
    5
}

fn default_requests_per_window() -> u32 {
    100
}

fn default_window() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_registrations_per_window() -> u32 {
    3
}

fn default_registration_window() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Largest accepted `webhook.max_attempts`.
pub const MAX_WEBHOOK_ATTEMPTS: u32 = 10;

/// Largest accepted `webhook.backoff_unit`.
pub const MAX_BACKOFF_UNIT: Duration = Duration::from_secs(60);

/// Flat variable names accepted as fallbacks for the sectioned ones.
const LEGACY_VARIABLES: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("FRONTEND_URL", "server.frontend_url"),
    ("NODE_ENV", "server.environment"),
    ("ADMIN_TOKEN", "admin.token"),
    ("DISCORD_WEBHOOK_URL", "webhook.url"),
];

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_sources(
            config::Environment::default()
                .separator("__")
                .try_parsing(false),
            |name| std::env::var(name).ok(),
        )
    }

    /// Build configuration from an environment source plus a lookup for the
    /// flat variable names. Sectioned variables win over flat ones.
    pub fn from_sources<F>(environment: config::Environment, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder();
        for (variable, key) in LEGACY_VARIABLES {
            if let Some(value) = lookup(variable) {
                builder = builder
                    .set_default(*key, value)
                    .with_context(|| format!("Invalid value for {}", variable))?;
            }
        }

        let config = builder
            .add_source(environment)
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings outside their supported range.
    pub fn validate(&self) -> Result<()> {
        let webhook = &self.webhook;
        if !(1..=MAX_WEBHOOK_ATTEMPTS).contains(&webhook.max_attempts) {
            bail!(
                "webhook.max_attempts must be between 1 and {}, got {}",
                MAX_WEBHOOK_ATTEMPTS,
                webhook.max_attempts
            );
        }
        if webhook.backoff_unit > MAX_BACKOFF_UNIT {
            bail!(
                "webhook.backoff_unit must be at most {:?}, got {:?}",
                MAX_BACKOFF_UNIT,
                webhook.backoff_unit
            );
        }
        if webhook.timeout.is_zero() {
            bail!("webhook.timeout must be greater than zero");
        }
        Ok(())
    }
}
