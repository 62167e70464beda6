//! `EpgFetch` trait definition.
#![allow(clippy::future_not_send)]

use anyhow::Result;
use url::Url;

/// Remote EPG source.
///
/// Abstracts downloading for mock substitution in tests.
/// Uses `trait_variant::make` to generate a `Send`-bound async trait.
#[allow(clippy::module_name_repetitions)]
#[trait_variant::make(EpgFetch: Send)]
pub trait LocalEpgFetch {
    /// Downloads a feed and returns its decoded UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retries or the body
    /// cannot be decoded.
    async fn fetch(&self, url: &Url) -> Result<String>;
}
