use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
  UpdateProcessed,
  WithdrawProcessed,
  CheckpointRx,
  IndicatorTx,
  IndicatorDelete,
  ErrorSubmit,
  ErrorInvalidRequest,
  ErrorQueueFull,
  ErrorUnhandledType,
  ErrorInvalidIndicator,
  ErrorNoValue,
  ErrorAuthConfig,
}

impl Counter {
  pub const ALL: [Counter; 12] = [
    Counter::UpdateProcessed,
    Counter::WithdrawProcessed,
    Counter::CheckpointRx,
    Counter::IndicatorTx,
    Counter::IndicatorDelete,
    Counter::ErrorSubmit,
    Counter::ErrorInvalidRequest,
    Counter::ErrorQueueFull,
    Counter::ErrorUnhandledType,
    Counter::ErrorInvalidIndicator,
    Counter::ErrorNoValue,
    Counter::ErrorAuthConfig,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Counter::UpdateProcessed => "update.processed",
      Counter::WithdrawProcessed => "withdraw.processed",
      Counter::CheckpointRx => "checkpoint.rx",
      Counter::IndicatorTx => "indicator.tx",
      Counter::IndicatorDelete => "indicator.delete",
      Counter::ErrorSubmit => "error.submit",
      Counter::ErrorInvalidRequest => "error.invalid_request",
      Counter::ErrorQueueFull => "error.queue_full",
      Counter::ErrorUnhandledType => "error.unhandled_type",
      Counter::ErrorInvalidIndicator => "error.invalid_indicator",
      Counter::ErrorNoValue => "error.no_value",
      Counter::ErrorAuthConfig => "error.auth_config",
    }
  }

  fn index(&self) -> usize {
    *self as usize
  }
}

#[derive(Debug, Default)]
pub struct Statistics {
  values: [AtomicU64; Counter::ALL.len()],
}

impl Statistics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn incr(&self, counter: Counter) {
    self.add(counter, 1);
  }

  pub fn add(&self, counter: Counter, n: u64) {
    self.values[counter.index()].fetch_add(n, Ordering::Relaxed);
  }

  pub fn get(&self, counter: Counter) -> u64 {
    self.values[counter.index()].load(Ordering::Relaxed)
  }

  pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
    Counter::ALL
      .iter()
      .map(|c| (c.name(), self.get(*c)))
      .collect()
  }
}
