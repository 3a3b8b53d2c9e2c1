use std::sync::Arc;
use std::time::Duration;

use imageloader_service::config::{HttpConfig, LoaderConfig};
use imageloader_service::loader::{HttpFetcher, ImageLoader};
use imageloader_test::ImageServer;
use tokio::runtime::Handle;

/// Creates a loader fetching from `server`, with a short retry delay.
pub fn setup_loader<F>(server: &ImageServer, configure: F) -> ImageLoader
where
    F: FnOnce(&mut LoaderConfig),
{
    imageloader_test::setup();

    let mut config = LoaderConfig {
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    };
    configure(&mut config);

    let http = HttpConfig {
        origin: Some(server.origin()),
        ..Default::default()
    };
    let fetcher = HttpFetcher::from_config(&http).unwrap();

    ImageLoader::new(config, Arc::new(fetcher), Handle::current())
}
