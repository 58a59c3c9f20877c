//! Configuration for the prediction gateway.

use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::Deserialize;

/// Main configuration structure, resolved once at startup.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// RabbitMQ connection and work queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_guest")]
    pub username: String,
    #[serde(default = "default_guest")]
    pub password: String,
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
    #[serde(default = "default_broker_hostname")]
    pub hostname: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Queue the backend workers consume from.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            username: default_guest(),
            password: default_guest(),
            virtual_host: default_virtual_host(),
            hostname: default_broker_hostname(),
            port: default_broker_port(),
            queue_name: default_queue_name(),
        }
    }
}

impl BrokerConfig {
    /// Build the AMQP URI; the vhost is passed verbatim so `/` needs no escaping.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.hostname.clone(),
                port: self.port,
            },
            vhost: self.virtual_host.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis connection string.
    #[serde(default = "default_cache_url")]
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// How long a bounded-wait call waits for its reply.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reply_timeout_secs: default_reply_timeout(),
        }
    }
}

impl DispatchConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5001
}
fn default_guest() -> String {
    "guest".to_string()
}
fn default_virtual_host() -> String {
    "/".to_string()
}
fn default_broker_hostname() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    5672
}
fn default_queue_name() -> String {
    "rpc_queue".to_string()
}
fn default_cache_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_reply_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Deployment variables understood by existing worker installations, and the
/// keys they set.
const DEPLOYMENT_ENV: &[(&str, &str)] = &[
    ("RABBITMQ_USERNAME", "broker.username"),
    ("RABBITMQ_PASSWORD", "broker.password"),
    ("RABBITMQ_VIRTUALHOST", "broker.virtual_host"),
    ("RABBITMQ_HOSTNAME", "broker.hostname"),
    ("RABBITMQ_PORT", "broker.port"),
    ("RABBITMQ_QUEUENAME", "broker.queue_name"),
    ("REDIS_CONNECTION_STRING", "cache.url"),
];

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Deployment variables (RABBITMQ_*, REDIS_CONNECTION_STRING)
    /// 2. Environment variables (PROCAPI__SECTION__KEY format)
    /// 3. config.toml file (if present)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder(File::with_name("config").required(false), |name| {
            std::env::var(name).ok()
        })?
        .build()?
        .try_deserialize()
    }

    fn builder(
        file: File<config::FileSourceFile, config::FileFormat>,
        deployment_var: impl Fn(&str) -> Option<String>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let mut builder = ConfigLoader::builder()
            .set_default("api.port", default_port() as i64)?
            .set_default("broker.port", default_broker_port() as i64)?
            .set_default("dispatch.reply_timeout_secs", default_reply_timeout() as i64)?
            .add_source(file)
            .add_source(
                Environment::with_prefix("PROCAPI")
                    .separator("__")
                    .try_parsing(true),
            );

        for (name, key) in DEPLOYMENT_ENV {
            let value = deployment_var(name).filter(|v| !v.is_empty());
            builder = builder.set_override_option(*key, value)?;
        }
        Ok(builder)
    }
}
