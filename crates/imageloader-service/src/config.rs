use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::types::SizeVariant;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "imageloader".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Tuning of the image load queue.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// The URL prefix image files are served from.
    ///
    /// This may be relative, in which case it is resolved against [`HttpConfig::origin`].
    pub base_url: String,

    /// The maximum number of loads holding an admission slot at the same time.
    ///
    /// Also the batch size of priority loads. Defaults to `20`, the typical per-origin
    /// connection limit of browsers.
    pub max_concurrent_loads: usize,

    /// Timeout of a single load attempt.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// How many times a failed attempt is retried.
    pub retry_attempts: usize,

    /// Fixed delay between two attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Size variant used when none is requested explicitly.
    pub default_size: SizeVariant,

    /// Look-ahead margin (in px) around the viewport within which images start loading.
    pub preload_distance: f64,

    /// Distance (in px) to the viewport within which images are loaded with high priority.
    pub priority_load_distance: f64,

    /// Intersection ratios at which visibility watchers report changes.
    pub thresholds: Vec<f64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: "/api/images/file".into(),
            max_concurrent_loads: 20,
            timeout: Duration::from_secs(10),
            retry_attempts: 2,
            retry_delay: Duration::from_secs(1),
            default_size: SizeVariant::Medium,
            preload_distance: 2000.0,
            priority_load_distance: 500.0,
            thresholds: vec![0.0, 0.1, 0.5, 1.0],
        }
    }
}

/// Settings of the HTTP client used to fetch images.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Scheme, host and port of the gallery backend, used to resolve relative image URLs.
    pub origin: Option<Url>,

    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long idle connections are kept in the pool.
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,

    /// The `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Accept invalid TLS certificates, for self-hosted galleries.
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            origin: None,
            connect_timeout: Duration::from_secs(1),
            pool_idle_timeout: Duration::from_secs(30),
            user_agent: concat!("imageloader/", env!("CARGO_PKG_VERSION")).into(),
            accept_invalid_certs: false,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The image load queue.
    pub loader: LoaderConfig,

    /// The HTTP client fetching images.
    pub http: HttpConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Self = serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        if config.loader.max_concurrent_loads == 0 {
            anyhow::bail!("loader.max_concurrent_loads must be at least 1");
        }
        Ok(config)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
