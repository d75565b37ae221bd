// One cycle is `AcquireToken -> DeleteIfAny -> CreateUpdateIfAny`. Deletes
// always run before creates so a withdrawn indicator never reappears as
// active within a cycle.

use crate::auth::TokenProvider;
use crate::config::{Config, MAX_BATCH_SIZE};
use crate::error::{Failure, PhaseError};
use crate::queue::SubmissionQueue;
use crate::remote::{DeleteResult, IndicatorApi, SubmitOutcome, SubmitResult};
use crate::side_config::SharedSettings;
use crate::stats::{Counter, Statistics};
use crate::stop::StopToken;
use crate::types::WireRecord;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
  pub max_batch_size: usize,
  pub auth_backoff: Duration,
  pub retry_backoff: Duration,
  pub max_retries: u32,
  pub idle_pause: Duration,
}

impl Default for DispatchPolicy {
  fn default() -> Self {
    Self {
      max_batch_size: MAX_BATCH_SIZE,
      auth_backoff: Duration::from_secs(60),
      retry_backoff: Duration::from_secs(120),
      max_retries: 5,
      idle_pause: Duration::from_millis(100),
    }
  }
}

impl DispatchPolicy {
  pub fn from_config(cfg: &Config) -> Self {
    Self {
      max_batch_size: cfg.output.effective_batch_size(),
      auth_backoff: Duration::from_secs(cfg.timing.auth_backoff_seconds),
      retry_backoff: Duration::from_secs(cfg.timing.retry_backoff_seconds),
      max_retries: cfg.timing.max_retries,
      idle_pause: Duration::from_millis(cfg.timing.idle_pause_ms),
    }
  }
}

#[derive(Debug, Default, PartialEq)]
pub struct Batch {
  /// Deduplicated external ids of withdrawn records, in arrival order.
  pub to_delete: Vec<String>,
  pub to_upsert: Vec<WireRecord>,
}

impl Batch {
  pub fn partition(records: Vec<WireRecord>) -> Self {
    let mut seen = HashSet::new();
    let mut batch = Batch::default();
    for r in records {
      if r.is_withdrawn() {
        if seen.insert(r.external_id.clone()) {
          batch.to_delete.push(r.external_id);
        }
      } else {
        batch.to_upsert.push(r);
      }
    }
    batch
  }

  pub fn is_empty(&self) -> bool {
    self.to_delete.is_empty() && self.to_upsert.is_empty()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
  Completed,
  Dropped,
  Stopped,
}

pub struct Dispatcher {
  node: String,
  queue: Arc<SubmissionQueue>,
  api: Arc<dyn IndicatorApi>,
  tokens: Arc<dyn TokenProvider>,
  settings: SharedSettings,
  stats: Arc<Statistics>,
  policy: DispatchPolicy,
}

impl Dispatcher {
  pub fn new(
    node: impl Into<String>,
    queue: Arc<SubmissionQueue>,
    api: Arc<dyn IndicatorApi>,
    tokens: Arc<dyn TokenProvider>,
    settings: SharedSettings,
    stats: Arc<Statistics>,
    policy: DispatchPolicy,
  ) -> Self {
    Self {
      node: node.into(),
      queue,
      api,
      tokens,
      settings,
      stats,
      policy,
    }
  }

  pub fn run(&self, stop: &StopToken) {
    tracing::info!(node = %self.node, batch = self.policy.max_batch_size, "dispatcher started");

    while let Some(batch) = self.next_batch(stop) {
      let cycle_id = uuid::Uuid::new_v4();
      let span = tracing::info_span!("dispatch", node = %self.node, cycle_id = %cycle_id);
      let end = span.in_scope(|| self.dispatch(batch, stop));

      if end == CycleEnd::Stopped || stop.sleep(self.policy.idle_pause) {
        break;
      }
    }

    tracing::info!(node = %self.node, "dispatcher stopped");
  }

  /// Blocks for the first record, then fills the batch without waiting.
  pub fn next_batch(&self, stop: &StopToken) -> Option<Batch> {
    let first = self.queue.take(stop)?;
    let mut records = vec![first];
    while records.len() < self.policy.max_batch_size {
      match self.queue.try_take() {
        Some(r) => records.push(r),
        None => break,
      }
    }

    let batch = Batch::partition(records);
    tracing::info!(
      node = %self.node,
      upsert = batch.to_upsert.len(),
      delete = batch.to_delete.len(),
      "indicators dequeued for push"
    );
    Some(batch)
  }

  pub fn dispatch(&self, mut batch: Batch, stop: &StopToken) -> CycleEnd {
    let mut retries = 0u32;

    loop {
      let failure = match self.attempt(&mut batch, stop) {
        Ok(()) => return CycleEnd::Completed,
        Err(f) => f,
      };

      match failure {
        Failure::Stopped => return CycleEnd::Stopped,
        Failure::AuthConfiguration(e) => {
          tracing::error!(error = %e, "credentials incomplete; pausing before next attempt");
          self.stats.incr(Counter::ErrorSubmit);
          self.stats.incr(Counter::ErrorAuthConfig);
          if stop.sleep(self.policy.auth_backoff) {
            return CycleEnd::Stopped;
          }
        }
        Failure::Schema(reason) => {
          tracing::error!(reason = %reason, "Security Graph API response rejected; dropping batch");
          self.stats.incr(Counter::ErrorSubmit);
          return CycleEnd::Dropped;
        }
        Failure::Transient(e) => {
          self.stats.incr(Counter::ErrorSubmit);
          retries += 1;
          if retries > self.policy.max_retries {
            tracing::error!(
              error = ?e,
              retries = retries - 1,
              dropped_upsert = batch.to_upsert.len(),
              dropped_delete = batch.to_delete.len(),
              "retry budget exhausted; dropping batch"
            );
            return CycleEnd::Dropped;
          }
          tracing::warn!(error = ?e, retry = retries, "error submitting indicators; will retry");
          if stop.sleep(self.policy.retry_backoff) {
            return CycleEnd::Stopped;
          }
        }
      }
    }
  }

  fn attempt(&self, batch: &mut Batch, stop: &StopToken) -> Result<(), Failure> {
    if stop.is_stopped() {
      return Err(Failure::Stopped);
    }

    let credentials = self.settings.read().credentials.clone();
    let token = self.tokens.acquire_token(&credentials)?;

    if !batch.to_delete.is_empty() {
      if stop.is_stopped() {
        return Err(Failure::Stopped);
      }
      tracing::debug!(count = batch.to_delete.len(), "deleting indicators");
      match self.api.delete(&token, &batch.to_delete) {
        Ok(results) => {
          self.record_deletes(&results);
          batch.to_delete.clear();
        }
        Err(e) => match PhaseError::from(e) {
          PhaseError::Rejected { status, body } => {
            tracing::error!(status, body = %body, "delete request rejected");
            self.stats.incr(Counter::ErrorInvalidRequest);
            batch.to_delete.clear();
          }
          PhaseError::Cycle(f) => return Err(f),
        },
      }
    }

    if !batch.to_upsert.is_empty() {
      if stop.is_stopped() {
        return Err(Failure::Stopped);
      }
      tracing::debug!(count = batch.to_upsert.len(), "creating/updating indicators");
      match self.api.submit(&token, &batch.to_upsert) {
        Ok(results) => {
          self.record_submits(&results);
          batch.to_upsert.clear();
        }
        Err(e) => match PhaseError::from(e) {
          PhaseError::Rejected { status, body } => {
            tracing::error!(status, body = %body, "create/update request rejected");
            self.stats.incr(Counter::ErrorInvalidRequest);
            batch.to_upsert.clear();
          }
          PhaseError::Cycle(f) => return Err(f),
        },
      }
    }

    Ok(())
  }

  fn record_submits(&self, results: &[SubmitResult]) {
    for r in results {
      match &r.outcome {
        SubmitOutcome::Created { id } => {
          tracing::debug!(external_id = %r.external_id, id = %id, "indicator submitted");
          self.stats.incr(Counter::IndicatorTx);
        }
        SubmitOutcome::Failed { reason } => {
          tracing::error!(external_id = %r.external_id, reason = %reason, "error creating/updating indicator");
          self.stats.incr(Counter::ErrorSubmit);
        }
      }
    }
  }

  fn record_deletes(&self, results: &[DeleteResult]) {
    for r in results {
      if r.is_success() {
        tracing::debug!(external_id = %r.subject(), "indicator deleted");
        self.stats.incr(Counter::IndicatorDelete);
      } else {
        tracing::error!(
          code = %r.code,
          external_id = %r.subject(),
          message = %r.message,
          "error deleting indicator"
        );
        self.stats.incr(Counter::ErrorSubmit);
      }
    }
  }
}
