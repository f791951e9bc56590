//! Cached and retrying JSON fetch controllers.
//!
//! - [`FetchController`] fetches a resource key once per process, serving
//!   repeats from a shared [`CacheStore`].
//! - [`RetryController`] skips the cache and re-issues failed requests on a
//!   fixed delay until its [`RetryConfig`] budget runs out.
//!
//! Both publish their state on a `tokio::sync::watch` channel so a UI loop
//! can render `{data, loading, error}` as it changes.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod logging;
pub mod retry;

pub use cache::{CacheStore, DataSource, MemoryCacheStore, SqliteCacheStore};
pub use error::{ErrorKind, FetchError};
pub use fetch::{FetchController, FetchPhase, FetchState, SupersedePolicy};
pub use http::{HttpTransport, Response, Transport};
pub use retry::{RetryConfig, RetryController, RetryState};
