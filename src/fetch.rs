//! Cached fetch controller.
//!
//! A [`FetchController`] owns the request state for one logical "fetch the
//! resource behind this key" operation. Each time the key changes it checks
//! the shared cache first; on a miss it issues a GET in a background task,
//! decodes the body and stores it. Every transition is published on a
//! `tokio::sync::watch` channel so a UI loop can re-render on change.
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(HttpTransport::new(&config.http)?);
//! let mut users = FetchController::<User>::new(transport);
//!
//! users.fetch_resource("https://api.example.com/user/1");
//!
//! // In event loop tick
//! let state = users.state();
//! match state.phase() {
//!     FetchPhase::Loading => render_spinner(),
//!     FetchPhase::Success => render_user(state.data.as_ref().unwrap()),
//!     FetchPhase::Error => render_error(state.error.as_ref().unwrap()),
//!     FetchPhase::Idle => {}
//! }
//! ```

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::{self, CacheLayer, CacheStore, DataSource};
use crate::error::FetchError;
use crate::http::{get_json, Transport};

/// Snapshot of a fetch controller's state.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
  /// Last successfully fetched value. Kept while a new key loads.
  pub data: Option<T>,
  pub error: Option<FetchError>,
  pub is_loading: bool,
  pub is_error: bool,
  /// Where `data` came from
  pub source: Option<DataSource>,
}

impl<T> Default for FetchState<T> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      is_loading: false,
      is_error: false,
      source: None,
    }
  }
}

/// Coarse view of a [`FetchState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
  /// Nothing fetched yet
  Idle,
  /// A request is in flight
  Loading,
  /// Data is available
  Success,
  /// The last request failed
  Error,
}

impl<T> FetchState<T> {
  pub fn phase(&self) -> FetchPhase {
    if self.is_loading {
      FetchPhase::Loading
    } else if self.is_error {
      FetchPhase::Error
    } else if self.data.is_some() {
      FetchPhase::Success
    } else {
      FetchPhase::Idle
    }
  }
}

/// What to do with a result that arrives after the controller has moved on
/// to another invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SupersedePolicy {
  /// Apply it anyway: whichever response resolves last wins.
  #[default]
  Apply,
  /// Drop it. Only the latest invocation may change the state.
  Discard,
}

/// Tracks which invocation is current so superseded tasks can tell.
#[derive(Debug, Clone, Default)]
pub(crate) struct Generation(Arc<AtomicU64>);

impl Generation {
  /// Start a new invocation and return its id.
  pub(crate) fn advance(&self) -> u64 {
    self.0.fetch_add(1, Ordering::SeqCst) + 1
  }

  pub(crate) fn is_current(&self, id: u64) -> bool {
    self.0.load(Ordering::SeqCst) == id
  }
}

/// Publishes state updates for one invocation, honoring the supersede policy.
pub(crate) struct Publisher<S> {
  state: Arc<watch::Sender<S>>,
  current: Generation,
  id: u64,
  policy: SupersedePolicy,
}

impl<S> Publisher<S> {
  pub(crate) fn new(
    state: &Arc<watch::Sender<S>>,
    current: &Generation,
    id: u64,
    policy: SupersedePolicy,
  ) -> Self {
    Self {
      state: Arc::clone(state),
      current: current.clone(),
      id,
      policy,
    }
  }

  /// Run `update` against the shared state. Subscribers are notified when it
  /// returns true. Returns false without running it if this invocation has
  /// been superseded under [`SupersedePolicy::Discard`].
  pub(crate) fn apply(&self, update: impl FnOnce(&mut S) -> bool) -> bool {
    let mut ran = false;
    let notified = self.state.send_if_modified(|s| {
      if self.policy == SupersedePolicy::Discard && !self.current.is_current(self.id) {
        return false;
      }
      ran = true;
      update(s)
    });
    notified || ran
  }
}

/// Cache-first fetch controller for one resource key at a time.
///
/// Must be driven from inside a Tokio runtime: cache misses spawn the
/// request onto it. Dropping the controller does not abort in-flight
/// requests; they still complete and populate the cache.
pub struct FetchController<T> {
  cache: CacheLayer,
  transport: Arc<dyn Transport>,
  state: Arc<watch::Sender<FetchState<T>>>,
  key: Option<String>,
  generation: Generation,
  policy: SupersedePolicy,
}

impl<T> FetchController<T>
where
  T: DeserializeOwned + Clone + Send + Sync + 'static,
{
  /// Create a controller backed by the process-wide cache.
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self::with_cache(transport, cache::global())
  }

  /// Create a controller backed by the given cache store.
  pub fn with_cache(transport: Arc<dyn Transport>, store: Arc<dyn CacheStore>) -> Self {
    let (tx, _rx) = watch::channel(FetchState::default());
    Self {
      cache: CacheLayer::new(store),
      transport,
      state: Arc::new(tx),
      key: None,
      generation: Generation::default(),
      policy: SupersedePolicy::default(),
    }
  }

  /// Set how results of superseded requests are treated.
  pub fn with_policy(mut self, policy: SupersedePolicy) -> Self {
    self.policy = policy;
    self
  }

  /// The resource key of the current invocation.
  pub fn key(&self) -> Option<&str> {
    self.key.as_deref()
  }

  /// Get the current state.
  pub fn state(&self) -> FetchState<T> {
    self.state.borrow().clone()
  }

  /// Receive every published state change.
  pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
    self.state.subscribe()
  }

  /// Wait until no request is in flight and return that state.
  pub async fn settled(&self) -> FetchState<T> {
    let mut rx = self.subscribe();
    let settled = match rx.wait_for(|s| !s.is_loading).await {
      Ok(state) => state.clone(),
      Err(_) => self.state(),
    };
    settled
  }

  /// Point the controller at `key` and return the resulting state.
  ///
  /// Calling this again with the same key is a no-op. A cache hit is applied
  /// before returning and never sets `is_loading`. A miss sets `is_loading`
  /// and fetches in the background.
  pub fn fetch_resource(&mut self, key: &str) -> FetchState<T> {
    if self.key.as_deref() == Some(key) {
      return self.state();
    }
    self.key = Some(key.to_string());
    let generation = self.generation.advance();

    if let Some(hit) = self.cache.cached::<T>(key) {
      self.state.send_modify(|s| {
        s.is_error = false;
        s.error = None;
        match hit {
          Ok(hit) => {
            s.data = Some(hit.data);
            s.source = Some(hit.source);
          }
          Err(e) => {
            s.error = Some(e);
            s.is_error = true;
          }
        }
        s.is_loading = false;
      });
      return self.state();
    }

    self.state.send_modify(|s| {
      s.is_error = false;
      s.error = None;
      s.is_loading = true;
    });
    self.spawn_request(key.to_string(), generation);

    self.state()
  }

  fn spawn_request(&self, key: String, generation: u64) {
    let cache = self.cache.clone();
    let transport = Arc::clone(&self.transport);
    let publisher = Publisher::new(&self.state, &self.generation, generation, self.policy);

    tokio::spawn(async move {
      let result = cache
        .fetch_and_store::<T, _, _>(&key, || get_json(transport.as_ref(), &key))
        .await;

      let applied = publisher.apply(|s| {
        match result {
          Ok(fetched) => {
            s.data = Some(fetched.data);
            s.source = Some(fetched.source);
          }
          Err(e) => {
            debug!(key = %key, error = %e, "request failed");
            s.error = Some(e);
            s.is_error = true;
          }
        }
        s.is_loading = false;
        true
      });

      if !applied {
        debug!(key = %key, "discarding superseded response");
      }
    });
  }
}
