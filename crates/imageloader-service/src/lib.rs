//! Bounded-concurrency image loading for the gallery front end.
//!
//! The central type is [`ImageLoader`](loader::ImageLoader): it serves image load requests
//! against the gallery backend under a global concurrency ceiling, coalesces identical
//! requests, retries failed attempts and keeps every result until the cache is cleared.

#[macro_use]
pub mod metrics;

pub mod config;
pub mod gallery;
pub mod loader;
pub mod logging;
pub mod types;
pub mod utils;
pub mod visibility;
