use crate::stop::StopToken;
use crate::types::WireRecord;
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// A capacity of 0 means unbounded.
pub struct SubmissionQueue {
  tx: Sender<WireRecord>,
  rx: Receiver<WireRecord>,
}

impl SubmissionQueue {
  pub fn new(capacity: usize) -> Self {
    let (tx, rx) = if capacity == 0 {
      crossbeam_channel::unbounded()
    } else {
      crossbeam_channel::bounded(capacity)
    };
    Self { tx, rx }
  }

  pub fn offer(&self, record: WireRecord, timeout: Duration) -> Result<(), QueueFull> {
    self.tx.send_timeout(record, timeout).map_err(|_| QueueFull)
  }

  /// Blocks until a record is available. Returns `None` once `stop` fires.
  pub fn take(&self, stop: &StopToken) -> Option<WireRecord> {
    if stop.is_stopped() {
      return None;
    }
    crossbeam_channel::select! {
      recv(self.rx) -> msg => msg.ok(),
      recv(stop.receiver()) -> _ => None,
    }
  }

  pub fn try_take(&self) -> Option<WireRecord> {
    self.rx.try_recv().ok()
  }

  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }

  pub fn capacity(&self) -> Option<usize> {
    self.rx.capacity()
  }
}

#[cfg(test)]
pub(crate) fn record(external_id: &str, expiration: &str) -> WireRecord {
  use crate::types::IndicatorTarget;

  WireRecord {
    description: "domain indicator from test".to_string(),
    confidence: 50,
    external_id: external_id.to_string(),
    indicator: external_id.to_string(),
    expiration_date_time: expiration.to_string(),
    tlp_level: 0,
    threat_type: "malware".to_string(),
    action: None,
    target_product: None,
    target: IndicatorTarget::Domain {
      domain_name: external_id.to_string(),
    },
  }
}
