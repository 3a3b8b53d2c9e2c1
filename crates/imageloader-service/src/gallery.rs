//! Loading patterns of the gallery views.

use futures::future::JoinAll;
use serde::Deserialize;

use crate::loader::{ImageLoader, LoadFuture, Preload};
use crate::types::{Priority, SizeVariant};

/// Number of images preloaded on each side of the image being viewed.
pub const NAVIGATION_RADIUS: usize = 5;

/// Loads the thumbnails of a gallery page.
pub fn load_gallery_images<I, S>(loader: &ImageLoader, resource_ids: I) -> JoinAll<LoadFuture>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let options = loader
        .default_options()
        .with_size(SizeVariant::Medium)
        .with_priority(Priority::High);
    loader.load_many(resource_ids, options)
}

/// Loads the original of the image opened in the detail view.
pub fn load_full_image(loader: &ImageLoader, resource_id: &str) -> LoadFuture {
    let options = loader
        .default_options()
        .with_size(SizeVariant::Original)
        .with_priority(Priority::High);
    loader.load(resource_id, options)
}

/// Warms the images the user is likely to navigate to next.
pub fn preload_next_images<I, S>(
    loader: &ImageLoader,
    resource_ids: I,
    size: SizeVariant,
) -> Preload
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    loader.preload(resource_ids, loader.default_options().with_size(size))
}

/// Indices to preload around `current` in a list of `total` images.
///
/// Yields up to `radius` following indices in ascending order, then up to `radius`
/// preceding indices, nearest first.
pub fn navigation_window(current: usize, total: usize, radius: usize) -> Vec<usize> {
    if current >= total {
        return Vec::new();
    }

    let next = radius.min(total - current - 1);
    let previous = radius.min(current);

    (1..=next)
        .map(|offset| current + offset)
        .chain((1..=previous).map(|offset| current - offset))
        .collect()
}

/// Effective network type, as reported by browsers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum EffectiveConnection {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl EffectiveConnection {
    pub fn is_slow(&self) -> bool {
        matches!(self, Self::Slow2g | Self::TwoG)
    }
}

/// Properties of the display an image is loaded for.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplayProfile {
    pub device_pixel_ratio: f64,
    /// Viewport width in css px.
    pub viewport_width: u32,
    pub connection: Option<EffectiveConnection>,
    pub save_data: bool,
}

impl Default for DisplayProfile {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
            viewport_width: 1024,
            connection: None,
            save_data: false,
        }
    }
}

impl DisplayProfile {
    /// Picks the size variant fitting this display.
    pub fn adaptive_size(&self) -> SizeVariant {
        let slow = self.save_data || self.connection.is_some_and(|c| c.is_slow());
        let high_dpi = self.device_pixel_ratio >= 2.0;

        if slow {
            SizeVariant::Small
        } else if high_dpi && self.viewport_width > 1200 {
            SizeVariant::Large
        } else if high_dpi || self.viewport_width > 768 {
            SizeVariant::Medium
        } else {
            SizeVariant::Small
        }
    }
}
