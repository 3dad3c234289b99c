use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable {name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// The configuration of a fissa client
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api: ApiConfig,
    pub broker: BrokerConfig,
    pub sync: SyncConfig,
    pub catalog: CatalogConfig,
}

/// Where the session backend lives
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base url every REST path is appended to
    pub url: String,
}

/// How to reach the realtime broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep alive interval sent to the broker
    pub keep_alive: Duration,
    pub retry: RetryPolicy,
}

/// The wire protocol used to talk to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Tls,
    Ws,
    Wss,
}

/// Bounded linear backoff used for subscribe and unsubscribe attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How many attempts are made before giving up
    pub attempts: u32,
    /// The delay before attempt `n` (zero based) is `n * step`
    pub step: Duration,
}

/// Timing of the eventual consistency fallbacks
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// If set, an active session fully resyncs on this interval regardless of app state
    pub resync_interval: Option<Duration>,
}

/// Settings for browsing the music provider's catalog
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub url: String,
    /// Items requested per page
    pub page_size: u32,
    /// Upper bound on pages followed for a single listing
    pub max_pages: u32,
}

impl RetryPolicy {
    /// Returns the delay to wait before the given zero based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://api.fissa.app/api".to_string(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.fissa.app".to_string(),
            port: 8883,
            protocol: Protocol::Tls,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            step: Duration::from_millis(1000),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "https://api.spotify.com/v1".to_string(),
            page_size: 50,
            // Generous for real playlists, but stops a backend that never ends pagination
            max_pages: 40,
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" | "mqtt" => Ok(Protocol::Tcp),
            "tls" | "mqtts" | "ssl" => Ok(Protocol::Tls),
            "ws" => Ok(Protocol::Ws),
            "wss" => Ok(Protocol::Wss),
            _ => Err(()),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
            Protocol::Ws => "ws",
            Protocol::Wss => "wss",
        };

        f.write_str(result)
    }
}

impl Config {
    /// Builds a config from the `FISSA_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let vars = Vars(&lookup);

        if let Some(url) = vars.string("FISSA_API_URL") {
            config.api.url = url;
        }

        if let Some(host) = vars.string("FISSA_BROKER_HOST") {
            config.broker.host = host;
        }
        if let Some(port) = vars.parse("FISSA_BROKER_PORT")? {
            config.broker.port = port;
        }
        if let Some(protocol) = vars.parse("FISSA_BROKER_PROTOCOL")? {
            config.broker.protocol = protocol;
        }
        config.broker.username = vars.string("FISSA_BROKER_USERNAME");
        config.broker.password = vars.string("FISSA_BROKER_PASSWORD");

        if let Some(attempts) = vars.parse("FISSA_RETRY_ATTEMPTS")? {
            config.broker.retry.attempts = attempts;
        }
        if let Some(step) = vars.parse("FISSA_RETRY_STEP_MS")? {
            config.broker.retry.step = Duration::from_millis(step);
        }

        config.sync.resync_interval = vars
            .parse::<u64>("FISSA_RESYNC_INTERVAL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        if let Some(max_pages) = vars.parse("FISSA_MAX_PAGES")? {
            config.catalog.max_pages = max_pages;
        }

        Ok(config)
    }
}

struct Vars<'a, F>(&'a F);

impl<'a, F> Vars<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &'static str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        match self.string(name) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}
