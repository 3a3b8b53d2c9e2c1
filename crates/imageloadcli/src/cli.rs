//! Runs the command line application.

use std::sync::Arc;

use anyhow::{Context, Result};
use imageloader_service::loader::{HttpFetcher, ImageLoader};
use imageloader_service::{logging, metrics};

use crate::output::{self, PreloadSummary};
use crate::settings::{Commands, Settings};

/// Runs the main application.
pub fn execute() -> Result<()> {
    let settings = Settings::get()?;
    let config = &settings.config;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No other threads have been spawned yet.
    unsafe { logging::init_logging(config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("imageloader")
        .enable_all()
        .build()
        .context("failed to create the runtime")?;

    let fetcher =
        HttpFetcher::from_config(&config.http).context("failed to create the HTTP client")?;
    let loader = ImageLoader::new(
        config.loader.clone(),
        Arc::new(fetcher),
        runtime.handle().clone(),
    );
    tracing::debug!(?loader, "created image loader");

    runtime.block_on(run(loader, settings))
}

async fn run(loader: ImageLoader, settings: Settings) -> Result<()> {
    let options = loader.default_options().with_size(settings.size);

    match settings.command {
        Commands::Load { ids } => {
            let results = loader.load_many(&ids, options).await;
            output::print_results(&results, settings.output_format)?;
        }
        Commands::Preload { ids } => {
            let preload = loader.preload(&ids, options);
            let requested = preload.len();
            let loaded = preload.settled().await;
            let summary = PreloadSummary {
                requested,
                loaded,
                stats: loader.cache_stats(),
            };
            output::print_preload(&summary, settings.output_format)?;
        }
        Commands::Priority { entries } => {
            let results = loader.load_with_priority(entries, settings.size).await;
            output::print_results(&results, settings.output_format)?;
        }
    }

    tracing::info!(stats = ?loader.cache_stats(), "done");
    Ok(())
}
