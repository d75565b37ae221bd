use crate::config::Config;
use crate::queue::SubmissionQueue;
use crate::stop::{StopHandle, StopToken};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
  pub deadline: Duration,
  pub poll_interval: Duration,
}

impl Default for CheckpointPolicy {
  fn default() -> Self {
    Self {
      deadline: Duration::from_secs(30),
      poll_interval: Duration::from_millis(500),
    }
  }
}

impl CheckpointPolicy {
  pub fn from_config(cfg: &Config) -> Self {
    Self {
      deadline: Duration::from_secs(cfg.timing.checkpoint_deadline_seconds),
      poll_interval: Duration::from_millis(cfg.timing.checkpoint_poll_ms.max(1)),
    }
  }
}

pub trait CheckpointSink: Send + Sync {
  fn checkpoint(&self, value: Option<String>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
  Drained { elapsed: Duration },
  DeadlineReached { remaining: usize },
  Aborted,
}

/// Waits for the queue to empty or the deadline to pass, then terminates the
/// dispatcher. `abort` cancels the wait without touching the dispatcher.
pub fn drain_and_terminate(
  queue: &SubmissionQueue,
  policy: &CheckpointPolicy,
  dispatcher: &StopHandle,
  abort: &StopToken,
) -> DrainOutcome {
  let started = Instant::now();

  while !queue.is_empty() {
    let elapsed = started.elapsed();
    if elapsed >= policy.deadline {
      break;
    }
    let wait = policy.poll_interval.min(policy.deadline - elapsed);
    if abort.sleep(wait) {
      return DrainOutcome::Aborted;
    }
  }

  dispatcher.stop();

  let remaining = queue.len();
  if remaining == 0 {
    DrainOutcome::Drained {
      elapsed: started.elapsed(),
    }
  } else {
    DrainOutcome::DeadlineReached { remaining }
  }
}
