//! The image load queue.
//!
//! [`ImageLoader`] serves image loads under a global concurrency ceiling. Identical
//! requests are coalesced into one load, failed attempts are retried after a fixed delay,
//! and every outcome, including terminal failures, is reported as a [`LoadResult`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, JoinAll, Shared, join_all};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::config::LoaderConfig;
use crate::types::{
    CacheKey, CacheStats, LoadOptions, LoadResult, LoadedImage, Priority, PriorityEntry,
    SizeVariant,
};
use crate::utils::futures::MeasureGuard;
use crate::visibility::{Rect, VisibilityEntry, VisibilityOptions, VisibilityWatcher};

mod admission;
mod error;
mod fetch;

pub use admission::*;
pub use error::*;
pub use fetch::*;

/// A load shared by every caller that requested the same [`CacheKey`].
///
/// The load runs on the loader's runtime whether or not this future is polled.
pub type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

/// How the attempts of a single load are carried out.
#[derive(Clone, Copy, Debug)]
struct RetryPolicy {
    timeout: Duration,
    retry_attempts: usize,
    retry_delay: Duration,
}

/// Bounded-concurrency, coalescing, retrying image loader.
///
/// Cloning is cheap and all clones share the same cache and admission control. Separate
/// instances created with [`ImageLoader::new`] share nothing.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<Inner>,
}

struct Inner {
    config: LoaderConfig,
    fetcher: Arc<dyn ImageFetcher>,
    runtime: Handle,
    admission: Arc<Admission>,
    entries: Mutex<HashMap<CacheKey, LoadFuture>>,
    viewport: Mutex<Option<Rect>>,
}

impl ImageLoader {
    /// Creates a new loader which spawns its loads onto `runtime`.
    pub fn new(config: LoaderConfig, fetcher: Arc<dyn ImageFetcher>, runtime: Handle) -> Self {
        let admission = Admission::new(config.max_concurrent_loads);
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                runtime,
                admission,
                entries: Mutex::default(),
                viewport: Mutex::default(),
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Options used by [`load`](Self::load) callers that do not care.
    pub fn default_options(&self) -> LoadOptions {
        LoadOptions {
            size: self.inner.config.default_size,
            priority: Priority::Normal,
            timeout: Some(self.inner.config.timeout),
        }
    }

    /// Sets the viewport of the host.
    ///
    /// [`create_visibility_watcher`](Self::create_visibility_watcher) needs a viewport.
    pub fn set_viewport(&self, viewport: Option<Rect>) {
        *self
            .inner
            .viewport
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = viewport;
    }

    /// Builds the URL of `resource_id` in the given size.
    ///
    /// The original size is requested without a `size` parameter.
    pub fn get_url(&self, resource_id: &str, size: SizeVariant) -> String {
        let base = self.inner.config.base_url.trim_end_matches('/');
        match size.query_param() {
            Some(size) => format!("{base}/{resource_id}?size={size}"),
            None => format!("{base}/{resource_id}"),
        }
    }

    /// Loads a single image.
    ///
    /// If the same image in the same size was requested before, the existing load is returned
    /// and no new request is made. Otherwise a slot is requested from admission control right
    /// away, and the load starts once the slot is granted.
    ///
    /// The returned future never fails. Terminal failures resolve to a [`LoadResult`] with
    /// `loaded == false`.
    pub fn load(&self, resource_id: &str, options: LoadOptions) -> LoadFuture {
        let key = CacheKey::new(resource_id, options.size);
        metric!(counter("loads.access") += 1, "size" => options.size.as_str());

        let mut entries = self.inner.lock_entries();
        if let Some(load) = entries.get(&key) {
            metric!(counter("loads.coalesced") += 1);
            return load.clone();
        }

        let url = self.get_url(resource_id, options.size);
        let policy = RetryPolicy {
            timeout: options.timeout.unwrap_or(self.inner.config.timeout),
            retry_attempts: self.inner.config.retry_attempts,
            retry_delay: self.inner.config.retry_delay,
        };

        // Entering while holding the entries lock keeps admission order equal to call order.
        let ticket = self.inner.admission.enter();
        let task = load_task(Arc::clone(&self.inner.fetcher), url.clone(), ticket, policy);
        let handle = self.inner.runtime.spawn(task);

        let load = async move {
            match handle.await {
                Ok(result) => result,
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "image load task failed"
                    );
                    LoadResult::failure(url, &LoadError::InternalError)
                }
            }
        }
        .boxed()
        .shared();

        tracing::trace!(%key, priority = %options.priority, "created load");
        entries.insert(key, load.clone());
        load
    }

    /// Loads all images at once, resolving to their results in input order.
    pub fn load_many<I, S>(&self, resource_ids: I, options: LoadOptions) -> JoinAll<LoadFuture>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let loads: Vec<_> = resource_ids
            .into_iter()
            .map(|id| self.load(id.as_ref(), options))
            .collect();
        join_all(loads)
    }

    /// Starts loading images in the background with low priority.
    ///
    /// The loads run to completion even if the returned [`Preload`] is dropped.
    pub fn preload<I, S>(&self, resource_ids: I, options: LoadOptions) -> Preload
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let options = options.with_priority(Priority::Low);
        let loads = resource_ids
            .into_iter()
            .map(|id| self.load(id.as_ref(), options))
            .collect();
        Preload { loads }
    }

    /// Loads images in batches ordered by priority.
    ///
    /// Entries are stably sorted by priority, then submitted in batches of
    /// `max_concurrent_loads`. Every batch settles before the next one starts. The results
    /// are returned in sorted submission order.
    pub async fn load_with_priority(
        &self,
        mut entries: Vec<PriorityEntry>,
        size: SizeVariant,
    ) -> Vec<LoadResult> {
        entries.sort_by_key(|entry| entry.priority.unwrap_or_default().rank());

        let mut results = Vec::with_capacity(entries.len());
        for batch in entries.chunks(self.inner.admission.max()) {
            let loads = batch.iter().map(|entry| {
                let options = LoadOptions {
                    size,
                    priority: entry.priority.unwrap_or_default(),
                    timeout: None,
                };
                self.load(&entry.resource_id, options)
            });
            results.extend(join_all(loads).await);
        }
        results
    }

    /// Drops all cached loads.
    ///
    /// Loads already handed out keep running and resolve as usual. Admission control is not
    /// affected.
    pub fn clear_cache(&self) {
        let mut entries = self.inner.lock_entries();
        tracing::debug!(entries = entries.len(), "clearing image cache");
        entries.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.lock_entries().len(),
            active_loads: self.inner.admission.active(),
            pending_queue: self.inner.admission.pending(),
        }
    }

    /// The priority of an image `distance` px away from the viewport.
    pub fn priority_for_distance(&self, distance: f64) -> Priority {
        let config = &self.inner.config;
        Priority::for_distance(
            distance,
            config.priority_load_distance,
            config.preload_distance,
        )
    }

    /// Creates a watcher reporting targets that approach the viewport.
    ///
    /// Returns `None` if no viewport was set.
    pub fn create_visibility_watcher<T, F>(&self, callback: F) -> Option<VisibilityWatcher<T>>
    where
        T: Clone + PartialEq,
        F: FnMut(Vec<VisibilityEntry<T>>) + Send + 'static,
    {
        let viewport = (*self
            .inner
            .viewport
            .lock()
            .unwrap_or_else(PoisonError::into_inner))?;

        let options = VisibilityOptions {
            root_margin: self.inner.config.preload_distance,
            thresholds: self.inner.config.thresholds.clone(),
        };
        Some(VisibilityWatcher::new(viewport, options, callback))
    }
}

impl Inner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<CacheKey, LoadFuture>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.inner.config)
            .field("admission", &self.inner.admission)
            .finish_non_exhaustive()
    }
}

/// Loads started by [`ImageLoader::preload`].
///
/// Dropping this discards the outcomes, the loads themselves keep running.
#[derive(Debug)]
pub struct Preload {
    loads: Vec<LoadFuture>,
}

impl Preload {
    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// Waits for all loads and returns how many of them succeeded.
    pub async fn settled(self) -> usize {
        join_all(self.loads)
            .await
            .iter()
            .filter(|result| result.loaded)
            .count()
    }
}

async fn load_task(
    fetcher: Arc<dyn ImageFetcher>,
    url: String,
    ticket: Ticket,
    policy: RetryPolicy,
) -> LoadResult {
    let mut guard = MeasureGuard::new("image_load");
    let Some(_permit) = ticket.wait().await else {
        return LoadResult::failure(url, &LoadError::InternalError);
    };
    guard.start();

    let start = Instant::now();
    match fetch_with_retry(fetcher.as_ref(), &url, policy).await {
        Ok(image) => {
            let load_time = start.elapsed();
            metric!(timer("loads.duration") = load_time);
            metric!(counter("loads.result") += 1, "status" => "loaded");
            guard.done("loaded");
            LoadResult::success(url, load_time, image)
        }
        Err(error) => {
            tracing::debug!(
                url = %url,
                error = &error as &dyn std::error::Error,
                "image load failed"
            );
            metric!(counter("loads.result") += 1, "status" => error.metrics_tag());
            guard.done(error.metrics_tag());
            LoadResult::failure(url, &error)
        }
    }
}

/// Runs up to `1 + retry_attempts` attempts, each bounded by the timeout.
///
/// An attempt that times out is dropped before the next one starts.
async fn fetch_with_retry(
    fetcher: &dyn ImageFetcher,
    url: &str,
    policy: RetryPolicy,
) -> Result<LoadedImage, LoadError> {
    let mut tries = 0;
    loop {
        tries += 1;
        metric!(counter("loads.attempt") += 1);

        let result = match tokio::time::timeout(policy.timeout, fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(LoadError::Timeout(policy.timeout)),
        };

        match result {
            Ok(image) => break Ok(image),
            Err(error) if tries > policy.retry_attempts => break Err(error),
            Err(error) => {
                tracing::trace!(url, tries, %error, "retrying image load");
                metric!(counter("loads.retry") += 1, "reason" => error.metrics_tag());
                tokio::time::sleep(policy.retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const DEFAULT_DELAY: Duration = Duration::from_millis(100);

    /// Fetcher recording every attempt, with per-image delays and failures.
    #[derive(Default)]
    struct MockFetcher {
        delays: HashMap<&'static str, Duration>,
        /// Number of initial attempts that fail.
        failures: HashMap<&'static str, usize>,
        hanging: HashSet<&'static str>,
        panicking: HashSet<&'static str>,
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        started: Vec<String>,
        started_at: Vec<Instant>,
        active: usize,
        max_active: usize,
    }

    struct ActiveGuard<'a>(&'a Mutex<MockState>);

    impl Drop for ActiveGuard<'_> {
        fn drop(&mut self) {
            self.0.lock().unwrap().active -= 1;
        }
    }

    fn resource_id(url: &str) -> &str {
        let name = url.rsplit('/').next().unwrap();
        name.split('?').next().unwrap()
    }

    impl MockFetcher {
        fn delay(mut self, id: &'static str, delay: Duration) -> Self {
            self.delays.insert(id, delay);
            self
        }

        fn fail(mut self, id: &'static str, attempts: usize) -> Self {
            self.failures.insert(id, attempts);
            self
        }

        fn hang(mut self, id: &'static str) -> Self {
            self.hanging.insert(id);
            self
        }

        fn panic(mut self, id: &'static str) -> Self {
            self.panicking.insert(id);
            self
        }

        fn started(&self) -> Vec<String> {
            self.state.lock().unwrap().started.clone()
        }

        fn calls(&self, id: &str) -> usize {
            self.started()
                .iter()
                .filter(|url| resource_id(url) == id)
                .count()
        }

        /// Start times of all attempts, relative to `origin`.
        fn start_offsets(&self, origin: Instant) -> Vec<(String, Duration)> {
            let state = self.state.lock().unwrap();
            let offsets = state.started_at.iter().map(|at| at.duration_since(origin));
            state.started.iter().cloned().zip(offsets).collect()
        }

        fn max_active(&self) -> usize {
            self.state.lock().unwrap().max_active
        }
    }

    impl ImageFetcher for MockFetcher {
        fn fetch(&self, url: &str) -> BoxFuture<'_, Result<LoadedImage, LoadError>> {
            let url = url.to_owned();
            async move {
                let id = resource_id(&url);
                let attempt = {
                    let mut state = self.state.lock().unwrap();
                    state.started.push(url.clone());
                    state.started_at.push(Instant::now());
                    state.active += 1;
                    state.max_active = state.max_active.max(state.active);
                    state
                        .started
                        .iter()
                        .filter(|started| resource_id(started) == id)
                        .count()
                };
                let _active = ActiveGuard(&self.state);

                if self.panicking.contains(id) {
                    panic!("decoder exploded");
                }
                if self.hanging.contains(id) {
                    std::future::pending::<()>().await;
                }
                let delay = self.delays.get(id).copied().unwrap_or(DEFAULT_DELAY);
                tokio::time::sleep(delay).await;

                match self.failures.get(id) {
                    Some(&failures) if attempt <= failures => Err(LoadError::NotFound),
                    _ => Ok(LoadedImage {
                        format: "png".into(),
                        width: 12,
                        height: 8,
                        size_bytes: 64,
                    }),
                }
            }
            .boxed()
        }
    }

    fn config(max_concurrent_loads: usize) -> LoaderConfig {
        LoaderConfig {
            max_concurrent_loads,
            ..Default::default()
        }
    }

    fn setup(config: LoaderConfig, fetcher: MockFetcher) -> (ImageLoader, Arc<MockFetcher>) {
        let fetcher = Arc::new(fetcher);
        let loader = ImageLoader::new(config, fetcher.clone(), Handle::current());
        (loader, fetcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_url() {
        let (loader, _) = setup(config(1), MockFetcher::default());
        assert_eq!(
            loader.get_url("abc.png", SizeVariant::Original),
            "/api/images/file/abc.png"
        );
        assert_eq!(
            loader.get_url("abc.png", SizeVariant::Small),
            "/api/images/file/abc.png?size=small"
        );

        let config = LoaderConfig {
            base_url: "http://localhost:8000/images//".into(),
            ..Default::default()
        };
        let (loader, _) = setup(config, MockFetcher::default());
        assert_eq!(
            loader.get_url("abc.png", SizeVariant::Large),
            "http://localhost:8000/images/abc.png?size=large"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesces_identical_loads() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default());
        let options = LoadOptions::default();

        let loads: Vec<_> = (0..5).map(|_| loader.load("a.png", options)).collect();
        assert_eq!(loader.cache_stats().size, 1);

        let results = join_all(loads).await;
        assert_eq!(fetcher.calls("a.png"), 1);
        assert!(results[0].loaded);
        assert!(results.iter().all(|result| *result == results[0]));

        // completed loads are served from the cache as well
        let again = loader.load("a.png", options).await;
        assert_eq!(again, results[0]);
        assert_eq!(fetcher.calls("a.png"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sizes_are_separate_loads() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default());

        let small = loader.load("a.png", LoadOptions::default().with_size(SizeVariant::Small));
        let large = loader.load("a.png", LoadOptions::default().with_size(SizeVariant::Large));
        let (small, large) = futures::join!(small, large);

        assert_eq!(small.url, "/api/images/file/a.png?size=small");
        assert_eq!(large.url, "/api/images/file/a.png?size=large");
        assert_eq!(fetcher.calls("a.png"), 2);
        assert_eq!(loader.cache_stats().size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling() {
        let (loader, fetcher) = setup(config(2), MockFetcher::default());
        let ids = ["a.png", "b.png", "c.png", "d.png", "e.png"];

        let all = loader.load_many(ids, LoadOptions::default());
        insta::assert_debug_snapshot!(loader.cache_stats(), @r###"
        CacheStats {
            size: 5,
            active_loads: 2,
            pending_queue: 3,
        }
        "###);

        let results = all.await;
        assert!(results.iter().all(|result| result.loaded));
        assert_eq!(fetcher.max_active(), 2);
        assert_eq!(fetcher.started().len(), 5);
        assert_eq!(loader.cache_stats().active_loads, 0);
        assert_eq!(loader.cache_stats().pending_queue, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_is_fifo() {
        let fetcher = MockFetcher::default()
            .delay("a.png", Duration::from_millis(300))
            .delay("c.png", Duration::from_millis(10));
        let (loader, fetcher) = setup(config(1), fetcher);

        // a low priority load made first still wins admission
        let first = loader.load("a.png", LoadOptions::default().with_priority(Priority::Low));
        let second = loader.load("b.png", LoadOptions::default().with_priority(Priority::High));
        let third = loader.load("c.png", LoadOptions::default());
        futures::join!(third, second, first);

        assert_eq!(
            fetcher.started(),
            [
                "/api/images/file/a.png?size=medium",
                "/api/images/file/b.png?size=medium",
                "/api/images/file/c.png?size=medium",
            ]
        );
        assert_eq!(fetcher.max_active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default().fail("a.png", 2));

        let result = loader.load("a.png", LoadOptions::default()).await;
        assert!(result.loaded);
        assert_eq!(result.error, None);
        assert_eq!(fetcher.calls("a.png"), 3);

        // three attempts of 100ms, separated by two delays of 1s
        let load_time = result.load_time.unwrap();
        assert!(load_time >= Duration::from_millis(2300));
        assert!(load_time < Duration::from_millis(2400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempts_fail() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default().fail("a.png", 3));

        let result = loader.load("a.png", LoadOptions::default()).await;
        assert!(!result.loaded);
        assert_eq!(result.load_time, None);
        assert_eq!(
            result.error.as_deref(),
            Some("failed to load `/api/images/file/a.png?size=medium`: not found")
        );
        assert_eq!(fetcher.calls("a.png"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries() {
        let config = LoaderConfig {
            retry_attempts: 0,
            ..Default::default()
        };
        let (loader, fetcher) = setup(config, MockFetcher::default().fail("a.png", 1));

        let result = loader.load("a.png", LoadOptions::default()).await;
        assert!(!result.loaded);
        assert_eq!(fetcher.calls("a.png"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default().hang("a.png"));

        let start = Instant::now();
        let result = loader.load("a.png", LoadOptions::default()).await;
        let elapsed = start.elapsed();

        assert!(!result.loaded);
        assert!(result.error.unwrap().ends_with("load timed out after 10s"));
        assert_eq!(fetcher.calls("a.png"), 3);
        // every timed out attempt was dropped
        assert_eq!(fetcher.state.lock().unwrap().active, 0);
        // 3 attempts of 10s plus 2 retry delays of 1s
        assert!(elapsed >= Duration::from_secs(32));
        assert!(elapsed < Duration::from_secs(33));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout() {
        let config = LoaderConfig {
            retry_attempts: 0,
            ..Default::default()
        };
        let fetcher = MockFetcher::default().delay("a.png", Duration::from_secs(2));
        let (loader, _) = setup(config, fetcher);

        let options = LoadOptions::default().with_timeout(Duration::from_secs(1));
        let result = loader.load("a.png", options).await;
        assert!(!result.loaded);
        assert!(result.error.unwrap().ends_with("load timed out after 1s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_many_preserves_order() {
        let fetcher = MockFetcher::default()
            .delay("a.png", Duration::from_millis(300))
            .delay("b.png", Duration::from_millis(100))
            .delay("c.png", Duration::from_millis(200))
            .fail("c.png", 3);
        let (loader, _) = setup(config(20), fetcher);

        let results = loader
            .load_many(["a.png", "b.png", "c.png"], LoadOptions::default())
            .await;

        let urls: Vec<_> = results.iter().map(|result| result.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "/api/images/file/a.png?size=medium",
                "/api/images/file/b.png?size=medium",
                "/api/images/file/c.png?size=medium",
            ]
        );
        let loaded: Vec<_> = results.iter().map(|result| result.loaded).collect();
        assert_eq!(loaded, [true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_with_priority_batches() {
        let (loader, fetcher) = setup(config(1), MockFetcher::default());

        let entries = vec![
            PriorityEntry::new("x.png", Priority::Low),
            PriorityEntry::new("y.png", Priority::High),
        ];
        let results = loader
            .load_with_priority(entries, SizeVariant::Small)
            .await;

        assert_eq!(
            fetcher.started(),
            [
                "/api/images/file/y.png?size=small",
                "/api/images/file/x.png?size=small",
            ]
        );
        assert_eq!(results[0].url, "/api/images/file/y.png?size=small");
        assert_eq!(results[1].url, "/api/images/file/x.png?size=small");
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_with_priority_waits_for_batch() {
        let fetcher = MockFetcher::default()
            .delay("slow.png", Duration::from_millis(500))
            .delay("fast.png", Duration::from_millis(10));
        let (loader, fetcher) = setup(config(2), fetcher);

        let entries = vec![
            PriorityEntry::new("third.png", Priority::Low),
            PriorityEntry::new("slow.png", Priority::High),
            PriorityEntry::new("fast.png", Priority::High),
        ];
        let origin = Instant::now();
        let results = loader
            .load_with_priority(entries, SizeVariant::Small)
            .await;
        assert!(results.iter().all(|result| result.loaded));

        let starts = fetcher.start_offsets(origin);
        let urls: Vec<_> = starts.iter().map(|(url, _)| url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "/api/images/file/slow.png?size=small",
                "/api/images/file/fast.png?size=small",
                "/api/images/file/third.png?size=small",
            ]
        );
        assert!(starts[0].1 < Duration::from_millis(10));
        assert!(starts[1].1 < Duration::from_millis(10));
        // the free slot after `fast` is not used until the whole first batch settled
        assert!(starts[2].1 >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_with_priority_is_stable() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default());

        let entries = vec![
            PriorityEntry::new("x.png", Priority::Low),
            PriorityEntry {
                resource_id: "n1.png".into(),
                priority: None,
            },
            PriorityEntry::new("y.png", Priority::High),
            PriorityEntry::new("n2.png", Priority::Normal),
        ];
        let results = loader
            .load_with_priority(entries, SizeVariant::Original)
            .await;

        let order = [
            "/api/images/file/y.png",
            "/api/images/file/n1.png",
            "/api/images/file/n2.png",
            "/api/images/file/x.png",
        ];
        assert_eq!(fetcher.started(), order);
        let urls: Vec<_> = results.iter().map(|result| result.url.as_str()).collect();
        assert_eq!(urls, order);

        assert!(
            loader
                .load_with_priority(Vec::new(), SizeVariant::Small)
                .await
                .is_empty()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default());

        assert!(loader.load("a.png", LoadOptions::default()).await.loaded);
        assert_eq!(loader.cache_stats().size, 1);

        loader.clear_cache();
        assert_eq!(loader.cache_stats(), CacheStats::default());

        assert!(loader.load("a.png", LoadOptions::default()).await.loaded);
        assert_eq!(fetcher.calls("a.png"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache_keeps_inflight_loads() {
        let (loader, fetcher) = setup(config(1), MockFetcher::default());

        let running = loader.load("a.png", LoadOptions::default());
        let queued = loader.load("b.png", LoadOptions::default());
        loader.clear_cache();

        let stats = loader.cache_stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.active_loads, 1);
        assert_eq!(stats.pending_queue, 1);

        let (running, queued) = futures::join!(running, queued);
        assert!(running.loaded);
        assert!(queued.loaded);
        assert_eq!(fetcher.started().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload() {
        let (loader, fetcher) = setup(config(20), MockFetcher::default().fail("b.png", 3));

        let preload = loader.preload(["a.png", "b.png"], LoadOptions::default());
        assert_eq!(preload.len(), 2);
        assert_eq!(preload.settled().await, 1);

        // dropping the handle does not cancel anything
        drop(loader.preload(["c.png"], LoadOptions::default()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.calls("c.png"), 1);
        assert!(loader.load("c.png", LoadOptions::default()).await.loaded);
        assert_eq!(fetcher.calls("c.png"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_fetcher() {
        let (loader, _) = setup(config(1), MockFetcher::default().panic("a.png"));

        let failed = loader.load("a.png", LoadOptions::default());
        let next = loader.load("b.png", LoadOptions::default());

        let failed = failed.await;
        assert!(!failed.loaded);
        assert!(failed.error.unwrap().ends_with("internal error"));

        // the slot of the panicked load was handed on
        assert!(next.await.loaded);
        assert_eq!(loader.cache_stats().active_loads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instances_are_independent() {
        let (first, fetcher) = setup(config(20), MockFetcher::default());
        let second = ImageLoader::new(config(20), fetcher.clone(), Handle::current());

        first.load("a.png", LoadOptions::default()).await;
        second.load("a.png", LoadOptions::default()).await;
        assert_eq!(fetcher.calls("a.png"), 2);

        // clones share everything
        let clone = first.clone();
        clone.load("a.png", LoadOptions::default()).await;
        assert_eq!(fetcher.calls("a.png"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_options() {
        let config = LoaderConfig {
            default_size: SizeVariant::Small,
            timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let (loader, _) = setup(config, MockFetcher::default());

        let options = loader.default_options();
        assert_eq!(options.size, SizeVariant::Small);
        assert_eq!(options.priority, Priority::Normal);
        assert_eq!(options.timeout, Some(Duration::from_secs(3)));

        assert_eq!(loader.priority_for_distance(100.0), Priority::High);
        assert_eq!(loader.priority_for_distance(1000.0), Priority::Normal);
        assert_eq!(loader.priority_for_distance(5000.0), Priority::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_watcher() {
        let (loader, _) = setup(config(20), MockFetcher::default());
        assert!(
            loader
                .create_visibility_watcher::<&str, _>(|_| {})
                .is_none()
        );

        loader.set_viewport(Some(Rect::new(0.0, 0.0, 1000.0, 800.0)));
        let seen: Arc<Mutex<Vec<VisibilityEntry<&str>>>> = Arc::default();
        let mut watcher = loader
            .create_visibility_watcher({
                let seen = seen.clone();
                move |entries| seen.lock().unwrap().extend(entries)
            })
            .unwrap();

        // within the 2000px look-ahead margin, but not on screen
        watcher.observe("below.png", Rect::new(0.0, 2000.0, 100.0, 100.0));
        let entries = seen.lock().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, "below.png");
        assert!(entries[0].is_intersecting);
        assert_eq!(entries[0].distance, 1200.0);
        assert_eq!(loader.priority_for_distance(entries[0].distance), Priority::Normal);
    }
}
