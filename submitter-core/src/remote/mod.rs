use crate::error::RemoteError;
use crate::types::WireRecord;

pub mod envelope;
pub mod graph;

pub use graph::GraphClient;

/// Literal `id` the API returns for a record it could not create.
pub const SUBMIT_FAILED_ID: &str = "Failed to create, check Error element for reason";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  Created { id: String },
  Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
  pub external_id: String,
  pub outcome: SubmitOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
  pub code: String,
  pub message: String,
}

impl DeleteResult {
  pub fn is_success(&self) -> bool {
    self.code == "204"
  }

  /// The API puts the external id first in the message.
  pub fn subject(&self) -> &str {
    self.message.split(' ').next().unwrap_or_default()
  }
}

pub trait IndicatorApi: Send + Sync {
  fn submit(&self, token: &str, records: &[WireRecord]) -> Result<Vec<SubmitResult>, RemoteError>;

  fn delete(&self, token: &str, external_ids: &[String]) -> Result<Vec<DeleteResult>, RemoteError>;
}
