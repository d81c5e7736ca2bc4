use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Environment variable prefix shared by every setting.
const ENV_PREFIX: &str = "NOTEO_";

/// Output format of the process logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Default verbosity of the process logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// What the delivery queue does once a message has used up all its attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Stop the whole delivery engine and let the process exit.
    #[default]
    Shutdown,
    /// Record the message in the dead-letter queue and keep consuming.
    DeadLetter,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(anyhow::anyhow!(
                "invalid log format: {} (must be 'json' or 'text')",
                other
            )),
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(anyhow::anyhow!(
                "invalid log level: {} (must be one of: debug, info, warn, error)",
                other
            )),
        }
    }
}

impl FromStr for ExhaustionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shutdown" => Ok(ExhaustionPolicy::Shutdown),
            "dead_letter" => Ok(ExhaustionPolicy::DeadLetter),
            other => Err(anyhow::anyhow!(
                "invalid exhaustion policy: {} (must be 'shutdown' or 'dead_letter')",
                other
            )),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token used by the delivery sender
    pub bot_token: String,

    /// Database DSN. `:memory:` selects the in-process store.
    pub db_dsn: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// HMAC secret for management API tokens
    pub jwt_secret: String,

    /// HTTP listen port (default: 8080)
    pub port: u16,

    pub log_format: LogFormat,
    pub log_level: LogLevel,

    /// Delivery queue buffer size (default: 1000)
    pub queue_capacity: usize,

    /// First backoff delay after a failed delivery (default: 1s)
    pub queue_initial_retry_delay: Duration,

    /// Upper bound for the backoff delay (default: 1m)
    pub queue_max_retry_delay: Duration,

    /// Delivery attempts per message, including the first one (default: 10)
    pub queue_max_attempts: u32,

    pub queue_on_exhausted: ExhaustionPolicy,

    /// Dead-letter entries kept before the oldest is dropped (default: 1000)
    pub queue_dead_letter_capacity: usize,

    /// How long shutdown waits for the delivery queue to drain (default: 30s)
    pub shutdown_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Keys are passed without the `NOTEO_` prefix.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| setting(&lookup, key);
        let required = |key: &str| required_setting(&lookup, key);

        let port: u16 = parse_or(&get, "PORT", 8080u32).and_then(|port| {
            u16::try_from(port)
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| {
                    anyhow::anyhow!("invalid port value: {} (must be between 1 and 65535)", port)
                })
        })?;

        let initial_delay_ms: u64 = parse_or(&get, "QUEUE_INITIAL_RETRY_DELAY_MS", 1000)?;
        let max_delay_ms: u64 = parse_or(&get, "QUEUE_MAX_RETRY_DELAY_MS", 60_000)?;
        if max_delay_ms < initial_delay_ms {
            return Err(anyhow::anyhow!(
                "{ENV_PREFIX}QUEUE_MAX_RETRY_DELAY_MS ({}) must not be smaller than {ENV_PREFIX}QUEUE_INITIAL_RETRY_DELAY_MS ({})",
                max_delay_ms,
                initial_delay_ms
            ));
        }

        let max_attempts: u32 = parse_or(&get, "QUEUE_MAX_ATTEMPTS", 10)?;
        if max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "{ENV_PREFIX}QUEUE_MAX_ATTEMPTS must be at least 1"
            ));
        }

        let shutdown_timeout_secs: u64 = parse_or(&get, "SHUTDOWN_TIMEOUT_SECS", 30)?;

        Ok(Self {
            bot_token: required("BOT_TOKEN")?,
            db_dsn: required("DB_DSN")?,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 5)?,
            jwt_secret: required("JWT_SECRET")?,
            port,
            log_format: parse_or(&get, "LOG_FORMAT", LogFormat::Json)?,
            log_level: parse_or(&get, "LOG_LEVEL", LogLevel::Info)?,
            queue_capacity: parse_or(&get, "QUEUE_CAPACITY", 1000)?,
            queue_initial_retry_delay: Duration::from_millis(initial_delay_ms),
            queue_max_retry_delay: Duration::from_millis(max_delay_ms),
            queue_max_attempts: max_attempts,
            queue_on_exhausted: parse_or(&get, "QUEUE_ON_EXHAUSTED", ExhaustionPolicy::Shutdown)?,
            queue_dead_letter_capacity: parse_or(&get, "QUEUE_DEAD_LETTER_CAPACITY", 1000)?,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        })
    }

    /// Load only the JWT secret, for tooling that signs management tokens
    /// without the rest of the server settings.
    pub fn jwt_secret_from_env() -> anyhow::Result<String> {
        dotenvy::dotenv().ok();
        Self::jwt_secret_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn jwt_secret_from_lookup<F>(lookup: F) -> anyhow::Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        required_setting(&lookup, "JWT_SECRET")
    }

    /// Whether the in-process (non-persistent) store was requested.
    pub fn uses_memory_store(&self) -> bool {
        self.db_dsn == ":memory:"
    }
}

/// Look up `NOTEO_<key>`. Blank values count as unset.
fn setting<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&format!("{ENV_PREFIX}{key}"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_setting<F>(lookup: &F, key: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    setting(lookup, key).ok_or_else(|| anyhow::anyhow!("{ENV_PREFIX}{key} is required"))
}

/// Parse an optional setting, falling back to `default` when unset.
fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{ENV_PREFIX}{key} is invalid: {}", e)),
        None => Ok(default),
    }
}
