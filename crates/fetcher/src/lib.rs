//! HTTP implementation of the engine's `Fetcher`.

pub mod http_client;

pub use http_client::HttpFetcher;
