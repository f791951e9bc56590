//! Network boundary: a plain HTTP GET that yields a JSON body.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::FetchError;

/// Raw response handed back by a [`Transport`].
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  /// A 200 response with `value` serialized as the body.
  pub fn json(value: &Value) -> Self {
    Self::new(200, value.to_string())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Performs a GET for a resource key.
///
/// Implementations only report transport failures; status and body handling
/// happen in [`get_json`].
pub trait Transport: Send + Sync {
  fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Response, FetchError>>;
}

/// Transport backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(config: &HttpConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

impl Transport for HttpTransport {
  fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Response, FetchError>> {
    async move {
      let parsed = url::Url::parse(url)
        .map_err(|e| FetchError::Transport(format!("invalid url {}: {}", url, e)))?;

      let response = self.client.get(parsed).send().await?;
      let status = response.status().as_u16();
      let body = response.bytes().await?;

      Ok::<_, FetchError>(Response::new(status, body.to_vec()))
    }
    .boxed()
  }
}

/// GET `key` and decode the body as JSON.
///
/// Any non-2xx status is a [`FetchError::Status`]; the body is not inspected.
pub async fn get_json(transport: &dyn Transport, key: &str) -> Result<Value, FetchError> {
  debug!(key, "request start");
  let response = transport.get(key).await?;
  debug!(key, status = response.status, "request complete");

  if !response.is_success() {
    return Err(FetchError::Status(response.status));
  }

  Ok(serde_json::from_slice(&response.body)?)
}

#[cfg(test)]
pub(crate) mod testing {
  //! Scripted in-memory transport for driving the controllers in tests.

  use super::*;
  use std::collections::{HashMap, VecDeque};
  use std::sync::Mutex;
  use tokio::time::Instant;

  struct Step {
    delay: Duration,
    result: Result<Response, FetchError>,
  }

  /// Replays a queue of canned results per URL. The last step for a URL
  /// repeats forever once the queue is down to it.
  #[derive(Default)]
  pub struct ScriptedTransport {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    requests: Mutex<Vec<(String, Instant)>>,
  }

  impl ScriptedTransport {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn push(&self, url: &str, delay: Duration, result: Result<Response, FetchError>) {
      self
        .steps
        .lock()
        .unwrap()
        .entry(url.to_string())
        .or_default()
        .push_back(Step { delay, result });
    }

    pub fn reply(&self, url: &str, value: Value) {
      self.push(url, Duration::ZERO, Ok(Response::json(&value)));
    }

    pub fn reply_after(&self, url: &str, delay: Duration, value: Value) {
      self.push(url, delay, Ok(Response::json(&value)));
    }

    pub fn status(&self, url: &str, status: u16) {
      self.push(url, Duration::ZERO, Ok(Response::new(status, "{}")));
    }

    pub fn fail(&self, url: &str, error: FetchError) {
      self.push(url, Duration::ZERO, Err(error));
    }

    pub fn requests(&self, url: &str) -> usize {
      self.request_times(url).len()
    }

    pub fn request_times(&self, url: &str) -> Vec<Instant> {
      self
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|(u, _)| u == url)
        .map(|(_, t)| *t)
        .collect()
    }

    fn next_step(&self, url: &str) -> (Duration, Result<Response, FetchError>) {
      let mut steps = self.steps.lock().unwrap();
      let queue = match steps.get_mut(url) {
        Some(queue) if !queue.is_empty() => queue,
        _ => {
          return (
            Duration::ZERO,
            Err(FetchError::Transport(format!("no script for {}", url))),
          )
        }
      };

      if queue.len() > 1 {
        let step = queue.pop_front().unwrap();
        (step.delay, step.result)
      } else {
        let step = &queue[0];
        (step.delay, step.result.clone())
      }
    }
  }

  impl Transport for ScriptedTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Response, FetchError>> {
      async move {
        self
          .requests
          .lock()
          .unwrap()
          .push((url.to_string(), Instant::now()));
        let (delay, result) = self.next_step(url);
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
        result
      }
      .boxed()
    }
  }
}
