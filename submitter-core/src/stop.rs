use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::time::Duration;

/// Creates a linked stop handle and token. Dropping the handle's sender
/// disconnects every clone of the token at once.
pub fn stop_pair() -> (StopHandle, StopToken) {
  let (tx, rx) = crossbeam_channel::bounded::<()>(0);
  (
    StopHandle {
      tx: Mutex::new(Some(tx)),
    },
    StopToken { rx },
  )
}

#[derive(Debug)]
pub struct StopHandle {
  tx: Mutex<Option<Sender<()>>>,
}

impl StopHandle {
  pub fn stop(&self) {
    self.tx.lock().take();
  }
}

#[derive(Debug, Clone)]
pub struct StopToken {
  rx: Receiver<()>,
}

impl StopToken {
  pub fn is_stopped(&self) -> bool {
    matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
  }

  /// Sleeps for `d`, returning early with `true` once stopped.
  pub fn sleep(&self, d: Duration) -> bool {
    !matches!(self.rx.recv_timeout(d), Err(RecvTimeoutError::Timeout))
  }

  pub(crate) fn receiver(&self) -> &Receiver<()> {
    &self.rx
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Instant;

  #[test]
  fn sleep_returns_early_once_stopped() {
    let (handle, token) = stop_pair();
    let waiter = token.clone();
    let t = std::thread::spawn(move || {
      let start = Instant::now();
      let stopped = waiter.sleep(Duration::from_secs(30));
      (stopped, start.elapsed())
    });

    std::thread::sleep(Duration::from_millis(20));
    handle.stop();

    let (stopped, elapsed) = t.join().unwrap();
    assert!(stopped);
    assert!(elapsed < Duration::from_secs(5));
    assert!(token.is_stopped());
  }

  #[test]
  fn sleep_times_out_while_running() {
    let (_handle, token) = stop_pair();
    assert!(!token.sleep(Duration::from_millis(5)));
    assert!(!token.is_stopped());
  }
}
