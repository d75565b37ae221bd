use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
  #[error("unhandled indicator type {0}")]
  UnsupportedIndicatorType(String),
  #[error("invalid IPv4 indicator {indicator}: {reason}")]
  InvalidAddress { indicator: String, reason: String },
}

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("{field} not set")]
  Configuration { field: &'static str },
  #[error("token request failed")]
  Transport(#[from] reqwest::Error),
  #[error("identity authority returned HTTP {status}: {body}")]
  Status { status: u16, body: String },
  #[error("invalid token response: {0}")]
  InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("{operation} returned HTTP {status}: {body}")]
  Http {
    operation: &'static str,
    status: u16,
    body: String,
  },
  #[error("unexpected response from Security Graph API: {0}")]
  Schema(String),
  #[error("request failed")]
  Transport(#[from] reqwest::Error),
}

#[derive(Debug)]
pub enum Failure {
  /// Missing credential; the whole cycle is retried after a long pause.
  AuthConfiguration(AuthError),
  /// Malformed response envelope; the rest of the cycle is dropped.
  Schema(String),
  /// Network failure, 5xx, 429 or token authority failure.
  Transient(anyhow::Error),
  Stopped,
}

impl From<AuthError> for Failure {
  fn from(e: AuthError) -> Self {
    match e {
      AuthError::Configuration { .. } => Self::AuthConfiguration(e),
      other => Self::Transient(anyhow::Error::new(other).context("acquire token")),
    }
  }
}

#[derive(Debug)]
pub enum PhaseError {
  /// 4xx other than 429; only this phase's work is dropped.
  Rejected { status: u16, body: String },
  Cycle(Failure),
}

impl From<RemoteError> for PhaseError {
  fn from(e: RemoteError) -> Self {
    match e {
      RemoteError::Http { status, body, .. } if is_invalid_request(status) => {
        Self::Rejected { status, body }
      }
      RemoteError::Schema(reason) => Self::Cycle(Failure::Schema(reason)),
      other => Self::Cycle(Failure::Transient(anyhow::Error::new(other))),
    }
  }
}

fn is_invalid_request(status: u16) -> bool {
  (400..500).contains(&status) && status != 429
}
