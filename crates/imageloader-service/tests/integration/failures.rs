use std::time::Duration;

use imageloader_service::types::LoadOptions;
use imageloader_test::ImageServer;

use crate::utils::setup_loader;

#[tokio::test]
async fn test_not_found() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |_| {});

    let result = loader.load("missing.png", LoadOptions::default()).await;

    assert!(!result.loaded);
    assert_eq!(
        result.error.as_deref(),
        Some("failed to load `/api/images/file/missing.png?size=medium`: not found")
    );
    // one attempt and two retries
    assert_eq!(server.hits("/api/images/file/missing.png?size=medium"), 3);
}

#[tokio::test]
async fn test_permission_denied() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |config| config.retry_attempts = 0);

    let result = loader.load("forbidden.png", LoadOptions::default()).await;

    assert!(!result.loaded);
    assert!(
        result
            .error
            .unwrap()
            .ends_with("permission denied: 403 Forbidden")
    );
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_retry_then_success() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |_| {});

    let result = loader.load("flaky2.png", LoadOptions::default()).await;

    assert!(result.loaded, "{:?}", result.error);
    assert_eq!(server.hits("/api/images/file/flaky2.png?size=medium"), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |config| config.retry_attempts = 1);

    let result = loader.load("flaky2.png", LoadOptions::default()).await;

    assert!(!result.loaded);
    assert!(
        result
            .error
            .unwrap()
            .ends_with("download failed: 500 Internal Server Error")
    );
    assert_eq!(server.hits("/api/images/file/flaky2.png?size=medium"), 2);
}

#[tokio::test]
async fn test_malformed() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |config| config.retry_attempts = 0);

    let result = loader.load("corrupt.png", LoadOptions::default()).await;

    assert!(!result.loaded);
    assert!(result.error.unwrap().contains("malformed image"));
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_timeout() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |config| config.retry_attempts = 0);

    let options = LoadOptions::default().with_timeout(Duration::from_millis(50));
    let result = loader.load("slow500.png", options).await;

    assert!(!result.loaded);
    assert!(result.error.unwrap().ends_with("load timed out after 50ms"));
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_failures_do_not_leak_slots() {
    let server = ImageServer::new();
    let loader = setup_loader(&server, |config| {
        config.max_concurrent_loads = 1;
        config.retry_attempts = 0;
    });

    let results = loader
        .load_many(["missing.png", "corrupt.png", "a.png"], LoadOptions::default())
        .await;

    let loaded: Vec<_> = results.iter().map(|result| result.loaded).collect();
    assert_eq!(loaded, [false, false, true]);
    let stats = loader.cache_stats();
    assert_eq!(stats.active_loads, 0);
    assert_eq!(stats.pending_queue, 0);
}
