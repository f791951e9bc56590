//! Error type shared by the fetch and retry controllers.

use thiserror::Error;

/// Why a request for a resource key did not produce a value.
///
/// Every variant is retryable; callers that only care whether a request
/// failed can treat them uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The request could not be completed (connection refused, DNS, timeout, bad URL).
  #[error("request failed: {0}")]
  Transport(String),
  /// A response arrived but its status was not a success.
  #[error("network response was not ok (status {0})")]
  Status(u16),
  /// The response body could not be decoded into the expected structure.
  #[error("failed to decode response body: {0}")]
  Decode(String),
}

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Transport,
  Status,
  Decode,
}

impl FetchError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      FetchError::Transport(_) => ErrorKind::Transport,
      FetchError::Status(_) => ErrorKind::Status,
      FetchError::Decode(_) => ErrorKind::Decode,
    }
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(e: serde_json::Error) -> Self {
    FetchError::Decode(e.to_string())
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    FetchError::Transport(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_error_from_serde() {
    let err: FetchError = serde_json::from_str::<u32>("not json").unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::Decode);
  }

  #[test]
  fn test_status_message_is_generic() {
    let err = FetchError::Status(404);
    assert_eq!(err.kind(), ErrorKind::Status);
    assert!(err.to_string().starts_with("network response was not ok"));
  }
}
