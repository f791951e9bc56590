//! Fetch controller that retries failed requests on a fixed delay.
//!
//! Unlike [`FetchController`](crate::fetch::FetchController) this never
//! consults the cache: every invocation performs at least one request.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetch::{Generation, Publisher, SupersedePolicy};
use crate::http::{get_json, Transport};

/// Retry budget for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
  /// Additional attempts after the first. Total attempts are `retries + 1`.
  pub retries: u32,
  /// Constant delay between attempts.
  pub retry_delay: Duration,
}

impl RetryConfig {
  pub fn new(retries: u32, retry_delay: Duration) -> Self {
    Self {
      retries,
      retry_delay,
    }
  }
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      retries: 3,
      retry_delay: Duration::from_millis(1000),
    }
  }
}

/// Snapshot of a retry controller's state.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState<T> {
  pub data: Option<T>,
  /// True from the first attempt until success or the budget runs out
  pub loading: bool,
  /// The error of the final attempt, as returned
  pub error: Option<FetchError>,
  attempt: u32,
}

impl<T> RetryState<T> {
  fn fresh() -> Self {
    Self {
      data: None,
      loading: true,
      error: None,
      attempt: 1,
    }
  }

  /// Split into the `(data, loading, error)` triple.
  pub fn into_parts(self) -> (Option<T>, bool, Option<FetchError>) {
    (self.data, self.loading, self.error)
  }
}

/// Fetches a resource key, retrying failures up to a fixed budget.
///
/// A new invocation starts whenever the key or the [`RetryConfig`] changes.
/// Must be driven from inside a Tokio runtime.
pub struct RetryController<T> {
  transport: Arc<dyn Transport>,
  state: Arc<watch::Sender<RetryState<T>>>,
  invocation: Option<(String, RetryConfig)>,
  generation: Generation,
  policy: SupersedePolicy,
  task: Option<JoinHandle<()>>,
}

impl<T> RetryController<T>
where
  T: DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    // Reports loading before the first invocation starts
    let (tx, _rx) = watch::channel(RetryState::fresh());
    Self {
      transport,
      state: Arc::new(tx),
      invocation: None,
      generation: Generation::default(),
      policy: SupersedePolicy::default(),
      task: None,
    }
  }

  /// Set how superseded invocations are treated.
  ///
  /// With [`SupersedePolicy::Discard`] a superseded invocation is aborted,
  /// pending delay included, and can no longer change the state.
  pub fn with_policy(mut self, policy: SupersedePolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Get the current state.
  pub fn state(&self) -> RetryState<T> {
    self.state.borrow().clone()
  }

  /// Receive every published state change.
  pub fn subscribe(&self) -> watch::Receiver<RetryState<T>> {
    self.state.subscribe()
  }

  /// Wait until the current invocation reaches a terminal state.
  ///
  /// Before the first invocation there is nothing to wait for and the
  /// initial loading state is returned as is.
  pub async fn settled(&self) -> RetryState<T> {
    if self.invocation.is_none() {
      return self.state();
    }
    let mut rx = self.subscribe();
    let settled = match rx.wait_for(|s| !s.loading).await {
      Ok(state) => state.clone(),
      Err(_) => self.state(),
    };
    settled
  }

  /// Fetch `key` with the given retry budget (defaults when `None`) and
  /// return `(data, loading, error)`.
  ///
  /// Repeating the same key and config does not start a new invocation.
  pub fn fetch_with_retry(
    &mut self,
    key: &str,
    config: Option<RetryConfig>,
  ) -> (Option<T>, bool, Option<FetchError>) {
    let config = config.unwrap_or_default();
    let unchanged = self
      .invocation
      .as_ref()
      .is_some_and(|(k, c)| k == key && *c == config);
    if unchanged {
      return self.state().into_parts();
    }

    self.invocation = Some((key.to_string(), config));
    let generation = self.generation.advance();

    if self.policy == SupersedePolicy::Discard {
      if let Some(task) = self.task.take() {
        task.abort();
      }
    }

    debug!(
      key,
      previous_attempt = self.state.borrow().attempt,
      "starting retry invocation"
    );
    self.state.send_replace(RetryState::fresh());
    self.task = Some(self.spawn_attempts(key.to_string(), config, generation));

    self.state().into_parts()
  }

  fn spawn_attempts(&self, key: String, config: RetryConfig, generation: u64) -> JoinHandle<()> {
    let transport = Arc::clone(&self.transport);
    let publisher = Publisher::new(&self.state, &self.generation, generation, self.policy);

    tokio::spawn(async move {
      let mut attempt = 1;
      loop {
        // The attempt counter is internal; record it without notifying
        publisher.apply(|s| {
          s.attempt = attempt;
          false
        });

        let result = match get_json(transport.as_ref(), &key).await {
          Ok(value) => serde_json::from_value::<T>(value).map_err(FetchError::from),
          Err(e) => Err(e),
        };

        match result {
          Ok(data) => {
            debug!(key = %key, attempt, "request succeeded");
            publisher.apply(|s| {
              s.data = Some(data);
              s.loading = false;
              true
            });
            return;
          }
          Err(error) if attempt <= config.retries => {
            info!(
              key = %key,
              attempt,
              delay_ms = u64::try_from(config.retry_delay.as_millis()).unwrap_or(u64::MAX),
              error = %error,
              "retry scheduled"
            );
            tokio::time::sleep(config.retry_delay).await;
            attempt += 1;
          }
          Err(error) => {
            warn!(key = %key, attempts = attempt, error = %error, "retry budget exhausted");
            publisher.apply(|s| {
              s.error = Some(error);
              s.loading = false;
              true
            });
            return;
          }
        }
      }
    })
  }
}
