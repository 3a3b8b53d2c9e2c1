//! Helpers for testing the image loader against a real HTTP server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Hold the [`ImageServer`] until all loads have settled. The server stops serving when it
//!    is dropped, and pending connections to it fail. Assign it to a variable:
//!    `let server = ImageServer::new();`.
//!
//!  - The server derives its behavior from the requested file name, see [`ImageServer`].

use std::collections::BTreeMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{self, Request};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

/// The path images are served from, matching the loader's default base URL.
pub const IMAGE_PATH: &str = "/api/images/file";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `imageloader_service` crate and
///    mutes all other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("imageloader_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Encodes a black PNG image of the given dimensions.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
        .unwrap();
    data
}

/// Dimensions of the PNG served for a `size` query parameter.
pub fn dimensions(size: Option<&str>) -> (u32, u32) {
    match size {
        Some("small") => (6, 4),
        Some("medium") => (12, 8),
        Some("large") => (20, 10),
        _ => (40, 20),
    }
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

#[derive(Debug, Deserialize)]
struct ImageQuery {
    size: Option<String>,
}

/// Serves generated images under [`IMAGE_PATH`] and counts every request.
///
/// The response depends on the requested file name:
///
///  - `missing*`: `404 Not Found`
///  - `forbidden*`: `403 Forbidden`
///  - `corrupt*`: `200 OK` with a body that is not an image
///  - `flaky<n>*`: `500 Internal Server Error` for the first `n` requests of a URL, then a PNG
///  - `slow<ms>*`: a PNG, after a delay of `ms` milliseconds
///  - anything else: a PNG sized by the `size` parameter, see [`dimensions`]
pub struct ImageServer {
    server: Server,
    hits: Hits,
}

impl ImageServer {
    pub fn new() -> Self {
        let hits = Hits::default();

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri, req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(&format!("{IMAGE_PATH}/:name"), get(serve_image))
            .layer(middleware::from_fn(hitcounter))
            .with_state(hits.clone());

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Scheme, host and port of the server.
    pub fn origin(&self) -> Url {
        self.server.url("/")
    }

    /// The absolute URL images are served from.
    pub fn base_url(&self) -> String {
        self.server.url(IMAGE_PATH).to_string()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    /// Returns the total number of requests since the last call, and resets the counter.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the number of requests to the given path and query, e.g.
    /// `/api/images/file/a.png?size=small`.
    pub fn hits(&self, uri: &str) -> usize {
        self.hits.lock().unwrap().get(uri).copied().unwrap_or(0)
    }

    pub fn all_hits(&self) -> Vec<(String, usize)> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .map(|(uri, hits)| (uri.clone(), *hits))
            .collect()
    }
}

impl Default for ImageServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses the number following `prefix` in `name`, e.g. `2` in `flaky2.png`.
fn number_after(name: &str, prefix: &str) -> Option<u64> {
    let rest = name.strip_prefix(prefix)?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

async fn serve_image(
    extract::OriginalUri(uri): extract::OriginalUri,
    extract::Path(name): extract::Path<String>,
    extract::Query(query): extract::Query<ImageQuery>,
    extract::State(hits): extract::State<Hits>,
) -> Response {
    if name.starts_with("missing") {
        return StatusCode::NOT_FOUND.into_response();
    }
    if name.starts_with("forbidden") {
        return StatusCode::FORBIDDEN.into_response();
    }
    if name.starts_with("corrupt") {
        return (StatusCode::OK, "this is not an image").into_response();
    }
    if let Some(failures) = number_after(&name, "flaky") {
        let seen = hits.lock().unwrap().get(&uri.to_string()).copied();
        if seen.unwrap_or(0) as u64 <= failures {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    if let Some(delay) = number_after(&name, "slow") {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let (width, height) = dimensions(query.size.as_deref());
    (
        [(header::CONTENT_TYPE, "image/png")],
        png_bytes(width, height),
    )
        .into_response()
}
