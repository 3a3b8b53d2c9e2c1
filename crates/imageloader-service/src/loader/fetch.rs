//! Fetching and decoding of single images.

use std::fmt;
use std::io::Cursor;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::config::HttpConfig;
use crate::types::LoadedImage;
use crate::utils::http;

use super::LoadError;

/// Performs one attempt at loading an image.
///
/// The loader owns timeouts and retries, implementations only fetch and decode once.
pub trait ImageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<LoadedImage, LoadError>>;
}

/// Fetches images over HTTP and decodes their header.
pub struct HttpFetcher {
    client: Client,
    origin: Option<Url>,
}

impl HttpFetcher {
    pub fn new(client: Client, origin: Option<Url>) -> Self {
        Self { client, origin }
    }

    /// Creates a fetcher with a client built from `config`.
    pub fn from_config(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = http::create_client(config)?;
        Ok(Self::new(client, config.origin.clone()))
    }

    fn resolve(&self, url: &str) -> Result<Url, LoadError> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.origin {
                Some(origin) => origin
                    .join(url)
                    .map_err(|err| LoadError::DownloadError(err.to_string())),
                None => Err(LoadError::DownloadError(format!(
                    "relative url `{url}` without an origin"
                ))),
            },
            Err(err) => Err(LoadError::DownloadError(err.to_string())),
        }
    }

    async fn fetch_image(&self, url: &str) -> Result<LoadedImage, LoadError> {
        let url = self.resolve(url)?;
        tracing::trace!("Fetching image from `{}`", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            tracing::debug!(%status, "unexpected status code");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    LoadError::PermissionDenied(status.to_string())
                }
                status if status.is_client_error() => LoadError::NotFound,
                status => LoadError::DownloadError(status.to_string()),
            });
        }

        let data = response.bytes().await?;
        decode_header(&data)
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'_, Result<LoadedImage, LoadError>> {
        let url = url.to_owned();
        async move { self.fetch_image(&url).await }.boxed()
    }
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("origin", &self.origin.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

/// Detects the format of an encoded image and reads its dimensions.
///
/// Only the header is decoded, pixel data is never touched.
pub fn decode_header(data: &[u8]) -> Result<LoadedImage, LoadError> {
    let reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| LoadError::Malformed(err.to_string()))?;

    let format = reader
        .format()
        .ok_or_else(|| LoadError::Malformed("unrecognized image format".into()))?;
    let (width, height) = reader.into_dimensions()?;

    Ok(LoadedImage {
        format: format!("{format:?}").to_ascii_lowercase(),
        width,
        height,
        size_bytes: data.len() as u64,
    })
}
