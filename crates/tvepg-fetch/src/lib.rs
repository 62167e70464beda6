//! EPG download client for tvepg.
//!
//! Fetches XMLTV feeds over HTTP with bounded retries and capped
//! exponential backoff, and decodes gzip-compressed bodies.

mod api;
mod client;
mod decode;

#[allow(clippy::module_name_repetitions)]
pub use api::{EpgFetch, LocalEpgFetch};
#[allow(clippy::module_name_repetitions)]
pub use client::{EpgFetcher, EpgFetcherBuilder};
pub use decode::{GZIP_MAGIC, decode_body, read_local};
