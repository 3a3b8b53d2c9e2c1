use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use imageloader_service::config::Config;
use imageloader_service::gallery::{DisplayProfile, EffectiveConnection};
use imageloader_service::types::{ParseSizeVariantError, Priority, PriorityEntry, SizeVariant};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Outputs all results as JSON.
    Json,
    /// Outputs one table row per image.
    Table,
}

/// The size to request, either fixed or derived from a display profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SizeChoice {
    Fixed(SizeVariant),
    Auto,
}

impl FromStr for SizeChoice {
    type Err = ParseSizeVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse().map(Self::Fixed)
    }
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Load images and wait for all of them.
    Load {
        /// The images to load.
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Preload images with low priority and report how many succeeded.
    Preload {
        /// The images to preload.
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Load images in batches ordered by priority.
    Priority {
        /// The images to load, as `ID` or `ID:PRIORITY` with a priority of high, normal
        /// or low.
        #[arg(required = true, value_parser = parse_priority_entry)]
        entries: Vec<PriorityEntry>,
    },
}

/// Warms the image caches of a gallery backend.
///
/// Images are loaded with the same concurrency limit, coalescing and retry policy as the
/// gallery front end. Failed images are reported, not fatal.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scheme, host and port of the gallery backend.
    #[arg(long, global = true)]
    origin: Option<Url>,

    /// The URL prefix image files are served from.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// The maximum number of concurrent loads.
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Timeout of a single load attempt, e.g. `5s`.
    #[arg(long, global = true)]
    timeout: Option<humantime::Duration>,

    /// The size to load: small, medium, large, original, or auto.
    ///
    /// `auto` picks a size for the display described by `--dpr`, `--viewport-width` and
    /// `--slow-connection`.
    #[arg(long, global = true)]
    size: Option<SizeChoice>,

    /// Device pixel ratio used by `--size auto`.
    #[arg(long, global = true, default_value_t = 1.0)]
    dpr: f64,

    /// Viewport width in px used by `--size auto`.
    #[arg(long, global = true, default_value_t = 1024)]
    viewport_width: u32,

    /// Treat the connection as slow for `--size auto`.
    #[arg(long, global = true)]
    slow_connection: bool,

    /// The output format.
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// The severity level of logging output.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Commands,
}

fn parse_priority_entry(s: &str) -> Result<PriorityEntry, Infallible> {
    // Only a valid priority after the last colon is split off, file names may contain colons.
    if let Some((id, priority)) = s.rsplit_once(':') {
        if let Ok(priority) = priority.parse::<Priority>() {
            return Ok(PriorityEntry::new(id, priority));
        }
    }
    Ok(PriorityEntry {
        resource_id: s.to_owned(),
        priority: None,
    })
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub command: Commands,
    pub config: Config,
    pub size: SizeVariant,
    pub output_format: OutputFormat,
}

impl Settings {
    pub fn get() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Result<Self> {
        let mut config = Config::get(cli.config.as_deref()).context("failed loading config")?;

        if let Some(origin) = cli.origin {
            config.http.origin = Some(origin);
        }
        if let Some(base_url) = cli.base_url {
            config.loader.base_url = base_url;
        }
        if let Some(max_concurrent) = cli.max_concurrent {
            if max_concurrent == 0 {
                bail!("--max-concurrent must be at least 1");
            }
            config.loader.max_concurrent_loads = max_concurrent;
        }
        if let Some(timeout) = cli.timeout {
            config.loader.timeout = timeout.into();
        }
        if let Some(level) = cli.log_level {
            config.logging.level = level;
        }

        if config.http.origin.is_none()
            && Url::parse(&config.loader.base_url) == Err(url::ParseError::RelativeUrlWithoutBase)
        {
            bail!(
                "The base URL `{}` is relative. Pass the backend's address via `--origin` or `http.origin`.",
                config.loader.base_url
            );
        }

        let size = match cli.size {
            Some(SizeChoice::Fixed(size)) => size,
            Some(SizeChoice::Auto) => DisplayProfile {
                device_pixel_ratio: cli.dpr,
                viewport_width: cli.viewport_width,
                connection: cli.slow_connection.then_some(EffectiveConnection::TwoG),
                save_data: false,
            }
            .adaptive_size(),
            None => config.loader.default_size,
        };

        Ok(Self {
            command: cli.command,
            config,
            size,
            output_format: cli.format,
        })
    }
}
