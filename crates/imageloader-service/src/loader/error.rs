use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// Why a single load attempt failed.
///
/// Callers never see this type directly: every variant collapses into a failed
/// [`LoadResult`](crate::types::LoadResult) carrying the error message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The image was not found on the backend.
    #[error("not found")]
    NotFound,
    /// The backend refused to serve the image.
    ///
    /// The attached string contains the response status.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The attempt did not complete within its timeout.
    #[error("load timed out after {0:?}")]
    Timeout(Duration),
    /// The image could not be fetched due to another problem, like connection loss,
    /// DNS resolution, or a 5xx server response.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The image was fetched but could not be decoded.
    #[error("malformed image: {0}")]
    Malformed(String),
    /// An unexpected error in the loader itself.
    #[error("internal error")]
    InternalError,
}

impl LoadError {
    fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        Self::DownloadError(error_string)
    }

    /// A short tag describing the error, for metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::PermissionDenied(_) => "permissiondenied",
            Self::Timeout(_) => "timeout",
            Self::DownloadError(_) => "downloaderror",
            Self::Malformed(_) => "malformed",
            Self::InternalError => "internalerror",
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

impl From<image::ImageError> for LoadError {
    fn from(error: image::ImageError) -> Self {
        Self::Malformed(error.to_string())
    }
}
