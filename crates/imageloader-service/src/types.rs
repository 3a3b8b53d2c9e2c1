//! Types shared by the loader, its configuration and its callers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The resize variant of an image, as understood by the backend's `size` parameter.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SizeVariant {
    /// Thumbnails bounded by 600px.
    Small,
    /// Gallery-sized images bounded by 1200px.
    #[default]
    Medium,
    /// Large previews bounded by 2000px.
    Large,
    /// The original file, without any resizing.
    Original,
}

impl SizeVariant {
    pub const ALL: [SizeVariant; 4] = [Self::Small, Self::Medium, Self::Large, Self::Original];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Original => "original",
        }
    }

    /// The value of the `size` query parameter, or `None` when the original is requested.
    pub fn query_param(&self) -> Option<&'static str> {
        match self {
            Self::Original => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for SizeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown size variant `{0}`, expected one of small, medium, large, original")]
pub struct ParseSizeVariantError(String);

impl FromStr for SizeVariant {
    type Err = ParseSizeVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|size| size.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseSizeVariantError(s.to_owned()))
    }
}

/// How urgently an image is needed.
///
/// Priority only orders batch submissions in
/// [`load_with_priority`](crate::loader::ImageLoader::load_with_priority); admission of
/// individual loads is always first come, first served.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank, lower ranks are submitted first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Derives a priority from the distance (in px) between an element and the viewport.
    pub fn for_distance(distance: f64, priority_distance: f64, preload_distance: f64) -> Self {
        if distance <= priority_distance {
            Self::High
        } else if distance <= preload_distance {
            Self::Normal
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown priority `{0}`, expected one of high, normal, low")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(ParsePriorityError(s.to_owned())),
        }
    }
}

/// Identifies one load: the same image in different sizes are different loads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource_id: Arc<str>,
    size: SizeVariant,
}

impl CacheKey {
    pub fn new(resource_id: &str, size: SizeVariant) -> Self {
        Self {
            resource_id: resource_id.into(),
            size,
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn size(&self) -> SizeVariant {
        self.size
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.resource_id, self.size)
    }
}

/// Per-call options for [`ImageLoader::load`](crate::loader::ImageLoader::load).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub size: SizeVariant,
    pub priority: Priority,
    /// Timeout of a single attempt. `None` uses the configured default.
    pub timeout: Option<Duration>,
}

impl LoadOptions {
    pub fn with_size(mut self, size: SizeVariant) -> Self {
        self.size = size;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Header information of a successfully decoded image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoadedImage {
    /// Lowercase name of the detected format, e.g. `png`.
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Size of the response body.
    pub size_bytes: u64,
}

/// The outcome of a load.
///
/// Loads never fail in the `Result` sense; a failed load has `loaded == false` and carries
/// the error message of its last attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub url: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time between admission and successful completion, including retries.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub load_time: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<LoadedImage>,
}

impl LoadResult {
    pub fn success(url: String, load_time: Duration, image: LoadedImage) -> Self {
        Self {
            url,
            loaded: true,
            error: None,
            load_time: Some(load_time),
            image: Some(image),
        }
    }

    pub fn failure(url: String, error: &dyn std::error::Error) -> Self {
        let error = format!("failed to load `{url}`: {error}");
        Self {
            url,
            loaded: false,
            error: Some(error),
            load_time: None,
            image: None,
        }
    }
}

/// A snapshot of the loader's bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cached entries, in flight or completed.
    pub size: usize,
    /// Loads currently holding an admission slot.
    pub active_loads: usize,
    /// Loads waiting for an admission slot.
    pub pending_queue: usize,
}

/// An image to load through [`load_with_priority`](crate::loader::ImageLoader::load_with_priority).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PriorityEntry {
    pub resource_id: String,
    /// Missing priorities rank as [`Priority::Normal`].
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl PriorityEntry {
    pub fn new(resource_id: impl Into<String>, priority: Priority) -> Self {
        Self {
            resource_id: resource_id.into(),
            priority: Some(priority),
        }
    }
}
