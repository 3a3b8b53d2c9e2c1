use std::sync::Arc;

use imageloader_service::config::{HttpConfig, LoaderConfig};
use imageloader_service::gallery;
use imageloader_service::loader::{HttpFetcher, ImageLoader};
use imageloader_service::types::{LoadOptions, LoadedImage, SizeVariant};
use imageloader_test::ImageServer;
use tokio::runtime::Handle;

use crate::utils::setup_loader;

#[tokio::test]
async fn test_load_success() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |_| {});

    let options = LoadOptions::default().with_size(SizeVariant::Small);
    let result = loader.load("a.png", options).await;

    assert!(result.loaded, "{:?}", result.error);
    assert_eq!(result.url, "/api/images/file/a.png?size=small");
    assert!(result.load_time.is_some());
    let image = result.image.unwrap();
    assert_eq!(
        image,
        LoadedImage {
            format: "png".into(),
            width: 6,
            height: 4,
            size_bytes: imageloader_test::png_bytes(6, 4).len() as u64,
        }
    );
    assert_eq!(server.hits("/api/images/file/a.png?size=small"), 1);
}

#[tokio::test]
async fn test_original_has_no_size() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |_| {});

    let result = gallery::load_full_image(&loader, "a.png").await;

    assert!(result.loaded, "{:?}", result.error);
    assert_eq!(result.url, "/api/images/file/a.png");
    let image = result.image.unwrap();
    assert_eq!((image.width, image.height), (40, 20));
    assert_eq!(server.hits("/api/images/file/a.png"), 1);
}

#[tokio::test]
async fn test_coalescing() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |_| {});

    let results = loader
        .load_many(["a.png", "a.png", "a.png"], LoadOptions::default())
        .await;

    assert!(results.iter().all(|result| result.loaded));
    assert_eq!(results[0], results[2]);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_clear_cache() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |_| {});

    assert!(loader.load("a.png", LoadOptions::default()).await.loaded);
    assert!(loader.load("a.png", LoadOptions::default()).await.loaded);
    assert_eq!(server.accesses(), 1);

    loader.clear_cache();
    assert!(loader.load("a.png", LoadOptions::default()).await.loaded);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_gallery_images() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |config| config.max_concurrent_loads = 2);

    let ids = ["a.png", "b.png", "c.png", "d.png"];
    let results = gallery::load_gallery_images(&loader, ids).await;

    for (id, result) in ids.iter().zip(&results) {
        assert!(result.loaded, "{:?}", result.error);
        assert_eq!(result.url, format!("/api/images/file/{id}?size=medium"));
        let image = result.image.as_ref().unwrap();
        assert_eq!((image.width, image.height), (12, 8));
    }
    assert_eq!(loader.cache_stats().size, 4);
    assert_eq!(server.accesses(), 4);
}

#[tokio::test]
async fn test_preload_next_images() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |_| {});

    let ids = ["a.png", "b.png", "missing.png"];
    let window = gallery::navigation_window(1, ids.len(), gallery::NAVIGATION_RADIUS);
    let preload = gallery::preload_next_images(
        &loader,
        window.iter().map(|index| ids[*index]),
        SizeVariant::Large,
    );

    assert_eq!(preload.len(), 2);
    assert_eq!(preload.settled().await, 1);
    assert_eq!(server.hits("/api/images/file/a.png?size=large"), 1);
    assert_eq!(server.hits("/api/images/file/b.png?size=large"), 0);
}

#[tokio::test]
async fn test_absolute_base_url() {
    imageloader_test::setup();
    let server = ImageServer::new();

    let config = LoaderConfig {
        base_url: server.base_url(),
        ..Default::default()
    };
    let fetcher = HttpFetcher::from_config(&HttpConfig::default()).unwrap();
    let loader = ImageLoader::new(config, Arc::new(fetcher), Handle::current());

    let result = loader
        .load("a.png", LoadOptions::default().with_size(SizeVariant::Large))
        .await;

    assert!(result.loaded, "{:?}", result.error);
    assert!(result.url.starts_with("http://localhost:"));
    assert_eq!(server.hits("/api/images/file/a.png?size=large"), 1);
}
