use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use harvester_core::retry::RetryPolicy;
use harvester_storage::S3Config;

/// Problems with the environment, reported once at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub s3: S3Config,
    /// Root of the local staging tree.
    pub staging_root: PathBuf,
    pub scan_interval: Duration,
    pub cache_purge_interval: Duration,
    pub queue_poll_interval: Duration,
    pub scan_concurrency: usize,
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
    /// Wait between the two stats of a stability check.
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
    pub ssh_connect_timeout: Duration,
    pub remove_staged_after_upload: bool,
    /// How long to wait for runners to drain on shutdown.
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("database_url", &"***")
            .field("s3", &self.s3)
            .field("staging_root", &self.staging_root)
            .field("scan_interval", &self.scan_interval)
            .field("cache_purge_interval", &self.cache_purge_interval)
            .field("queue_poll_interval", &self.queue_poll_interval)
            .field("scan_concurrency", &self.scan_concurrency)
            .field("download_concurrency", &self.download_concurrency)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("settle_delay", &self.settle_delay)
            .field("retry", &self.retry)
            .field("ssh_connect_timeout", &self.ssh_connect_timeout)
            .field("remove_staged_after_upload", &self.remove_staged_after_upload)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `DATABASE_URL`               | required                |
    /// | `S3_ENDPOINT`                | `http://localhost:9000` |
    /// | `S3_ACCESS_KEY`              | required                |
    /// | `S3_SECRET_KEY`              | required                |
    /// | `S3_REGION`                  | `us-east-1`             |
    /// | `STAGING_ROOT`               | `./staging`             |
    /// | `SCAN_INTERVAL_SECS`         | `60`                    |
    /// | `CACHE_PURGE_INTERVAL_SECS`  | `3600`                  |
    /// | `QUEUE_POLL_INTERVAL_MS`     | `1000`                  |
    /// | `SCAN_CONCURRENCY`           | `1`                     |
    /// | `DOWNLOAD_CONCURRENCY`       | `8`                     |
    /// | `UPLOAD_CONCURRENCY`         | `8`                     |
    /// | `SETTLE_DELAY_SECS`          | `10`                    |
    /// | `MAX_ATTEMPTS`               | `10`                    |
    /// | `RETRY_DELAY_SECS`           | `60`                    |
    /// | `UNSTABLE_RETRY_DELAY_SECS`  | `30`                    |
    /// | `SSH_CONNECT_TIMEOUT_SECS`   | `30`                    |
    /// | `REMOVE_STAGED_AFTER_UPLOAD` | `false`                 |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `30`                    |
    /// | `LOG_FORMAT`                 | `text`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let max_attempts: u32 = env.parse("MAX_ATTEMPTS", 10)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let retry = RetryPolicy {
            max_attempts,
            failure_delay: Duration::from_secs(env.parse("RETRY_DELAY_SECS", 60)?),
            unstable_delay: Duration::from_secs(env.parse("UNSTABLE_RETRY_DELAY_SECS", 30)?),
            ..Default::default()
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            s3: S3Config {
                endpoint: env.string("S3_ENDPOINT", "http://localhost:9000"),
                access_key: env.required("S3_ACCESS_KEY")?,
                secret_key: env.required("S3_SECRET_KEY")?,
                region: env.string("S3_REGION", "us-east-1"),
            },
            staging_root: PathBuf::from(env.string("STAGING_ROOT", "./staging")),
            scan_interval: Duration::from_secs(env.positive("SCAN_INTERVAL_SECS", 60)?),
            cache_purge_interval: Duration::from_secs(
                env.positive("CACHE_PURGE_INTERVAL_SECS", 3600)?,
            ),
            queue_poll_interval: Duration::from_millis(
                env.positive("QUEUE_POLL_INTERVAL_MS", 1000)?,
            ),
            scan_concurrency: env.positive("SCAN_CONCURRENCY", 1)? as usize,
            download_concurrency: env.positive("DOWNLOAD_CONCURRENCY", 8)? as usize,
            upload_concurrency: env.positive("UPLOAD_CONCURRENCY", 8)? as usize,
            settle_delay: Duration::from_secs(env.parse("SETTLE_DELAY_SECS", 10)?),
            retry,
            ssh_connect_timeout: Duration::from_secs(
                env.positive("SSH_CONNECT_TIMEOUT_SECS", 30)?,
            ),
            remove_staged_after_upload: env.parse("REMOVE_STAGED_AFTER_UPLOAD", false)?,
            shutdown_timeout: Duration::from_secs(env.parse("SHUTDOWN_TIMEOUT_SECS", 30)?),
            log_format: env.parse("LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank value of `name`.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive(&self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value: u64 = self.parse(name, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                name,
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(value)
    }
}
