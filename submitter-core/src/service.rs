use crate::auth::{ClientCredentialsProvider, TokenProvider};
use crate::checkpoint::{self, CheckpointPolicy, CheckpointSink, DrainOutcome};
use crate::config::Config;
use crate::dispatcher::{DispatchPolicy, Dispatcher};
use crate::encoder;
use crate::error::EncodeError;
use crate::paths;
use crate::queue::SubmissionQueue;
use crate::remote::{GraphClient, IndicatorApi};
use crate::side_config::{self, NodeSettings, SharedSettings};
use crate::stats::{Counter, Statistics};
use crate::stop::{stop_pair, StopHandle};
use crate::types::IndicatorValue;
use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub trait Lifecycle {
  fn start(&self) -> anyhow::Result<()>;
  fn stop(&self);
  fn reconfigure(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
  Configured,
  Running,
  Checkpointing,
  Stopped,
}

pub struct Collaborators {
  pub api: Arc<dyn IndicatorApi>,
  pub tokens: Arc<dyn TokenProvider>,
  pub sink: Arc<dyn CheckpointSink>,
}

struct Worker {
  stop: Arc<StopHandle>,
  _handle: JoinHandle<()>,
}

pub struct OutputService {
  name: String,
  queue: Arc<SubmissionQueue>,
  settings: SharedSettings,
  stats: Arc<Statistics>,
  collaborators: Collaborators,
  side_config_path: PathBuf,
  dispatch_policy: DispatchPolicy,
  checkpoint_policy: CheckpointPolicy,
  enqueue_timeout: Duration,
  state: Mutex<NodeState>,
  dispatcher: Mutex<Option<Worker>>,
  checkpointer: Mutex<Option<Worker>>,
}

impl OutputService {
  pub fn from_config(
    cfg: &Config,
    base: &Path,
    sink: Arc<dyn CheckpointSink>,
  ) -> anyhow::Result<Self> {
    let api = GraphClient::new(&cfg.endpoints).context("build Security Graph client")?;
    let tokens =
      ClientCredentialsProvider::new(&cfg.endpoints).context("build token provider")?;
    Ok(Self::configure(
      cfg,
      base,
      Collaborators {
        api: Arc::new(api),
        tokens: Arc::new(tokens),
        sink,
      },
    ))
  }

  pub fn configure(cfg: &Config, base: &Path, collaborators: Collaborators) -> Self {
    let name = cfg.output.name.clone();
    let side_config_path = cfg
      .output
      .side_config
      .clone()
      .unwrap_or_else(|| paths::side_config_path(base, &name));

    let svc = Self {
      queue: Arc::new(SubmissionQueue::new(cfg.output.queue_maxsize)),
      settings: Arc::new(RwLock::new(NodeSettings::from_output(&cfg.output))),
      stats: Arc::new(Statistics::new()),
      collaborators,
      side_config_path,
      dispatch_policy: DispatchPolicy::from_config(cfg),
      checkpoint_policy: CheckpointPolicy::from_config(cfg),
      enqueue_timeout: Duration::from_millis(cfg.timing.enqueue_timeout_ms),
      state: Mutex::new(NodeState::Configured),
      dispatcher: Mutex::new(None),
      checkpointer: Mutex::new(None),
      name,
    };

    tracing::info!(
      node = %svc.name,
      queue_maxsize = cfg.output.queue_maxsize,
      side_config = %svc.side_config_path.display(),
      "output node configured"
    );
    svc.load_side_config();
    svc
  }

  pub fn with_policies(mut self, dispatch: DispatchPolicy, checkpoint: CheckpointPolicy) -> Self {
    self.dispatch_policy = dispatch;
    self.checkpoint_policy = checkpoint;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn state(&self) -> NodeState {
    *self.state.lock()
  }

  pub fn settings(&self) -> NodeSettings {
    self.settings.read().clone()
  }

  pub fn length(&self) -> usize {
    self.queue.len()
  }

  pub fn statistics(&self) -> BTreeMap<&'static str, u64> {
    self.stats.snapshot()
  }

  pub fn counter(&self, counter: Counter) -> u64 {
    self.stats.get(counter)
  }

  pub fn filtered_update(&self, indicator: &str, value: &IndicatorValue) {
    self.stats.incr(Counter::UpdateProcessed);
    self.enqueue(indicator, value, false);
  }

  pub fn filtered_withdraw(&self, indicator: &str, value: Option<&IndicatorValue>) {
    self.stats.incr(Counter::WithdrawProcessed);
    let Some(value) = value else {
      self.stats.incr(Counter::ErrorNoValue);
      return;
    };
    self.enqueue(indicator, value, true);
  }

  fn enqueue(&self, indicator: &str, value: &IndicatorValue, expired: bool) {
    let settings = self.settings.read().encode_settings();
    let records = match encoder::encode(indicator, value, expired, &settings, chrono::Utc::now()) {
      Ok(r) => r,
      Err(e) => {
        let counter = match e {
          EncodeError::UnsupportedIndicatorType(_) => Counter::ErrorUnhandledType,
          EncodeError::InvalidAddress { .. } => Counter::ErrorInvalidIndicator,
        };
        tracing::warn!(node = %self.name, error = %e, "indicator dropped");
        self.stats.incr(counter);
        return;
      }
    };

    for record in records {
      if self.queue.offer(record, self.enqueue_timeout).is_err() {
        self.stats.incr(Counter::ErrorQueueFull);
        return;
      }
    }
  }

  /// Starts a bounded drain; the checkpoint is forwarded downstream once the
  /// queue empties or the deadline passes.
  pub fn checkpoint(&self, value: Option<String>) -> anyhow::Result<()> {
    self.stats.incr(Counter::CheckpointRx);
    *self.state.lock() = NodeState::Checkpointing;

    let dispatcher_stop = match self.dispatcher.lock().as_ref() {
      Some(w) => w.stop.clone(),
      None => Arc::new(stop_pair().0),
    };

    if let Some(previous) = self.checkpointer.lock().take() {
      previous.stop.stop();
    }

    let (abort, abort_token) = stop_pair();
    let queue = self.queue.clone();
    let policy = self.checkpoint_policy.clone();
    let sink = self.collaborators.sink.clone();
    let node = self.name.clone();

    let handle = std::thread::Builder::new()
      .name(format!("{}-checkpoint", self.name))
      .spawn(move || {
        let outcome = checkpoint::drain_and_terminate(&queue, &policy, &dispatcher_stop, &abort_token);
        match outcome {
          DrainOutcome::Aborted => {
            tracing::info!(node = %node, "checkpoint aborted");
            return;
          }
          DrainOutcome::Drained { elapsed } => {
            tracing::info!(node = %node, elapsed_ms = elapsed.as_millis() as u64, "queue drained for checkpoint");
          }
          DrainOutcome::DeadlineReached { remaining } => {
            tracing::warn!(node = %node, remaining, "checkpoint deadline reached; dispatcher terminated");
          }
        }
        tracing::debug!(node = %node, elements = queue.len(), "checkpoint forwarded");
        sink.checkpoint(value);
      })
      .context("spawn checkpoint thread")?;

    *self.checkpointer.lock() = Some(Worker {
      stop: Arc::new(abort),
      _handle: handle,
    });
    Ok(())
  }

  fn load_side_config(&self) {
    if !self.side_config_path.exists() {
      tracing::info!(
        node = %self.name,
        path = %self.side_config_path.display(),
        "no side config present"
      );
      return;
    }
    side_config::reload(&self.name, &self.side_config_path, &self.settings);
  }
}

impl Lifecycle for OutputService {
  fn start(&self) -> anyhow::Result<()> {
    let mut slot = self.dispatcher.lock();
    if slot.is_some() {
      tracing::warn!(node = %self.name, "dispatcher already running");
      return Ok(());
    }

    let dispatcher = Dispatcher::new(
      self.name.clone(),
      self.queue.clone(),
      self.collaborators.api.clone(),
      self.collaborators.tokens.clone(),
      self.settings.clone(),
      self.stats.clone(),
      self.dispatch_policy.clone(),
    );
    let (stop, token) = stop_pair();
    let handle = std::thread::Builder::new()
      .name(format!("{}-dispatch", self.name))
      .spawn(move || dispatcher.run(&token))
      .context("spawn dispatcher thread")?;

    *slot = Some(Worker {
      stop: Arc::new(stop),
      _handle: handle,
    });
    *self.state.lock() = NodeState::Running;
    Ok(())
  }

  /// Terminates the dispatcher and any pending checkpoint. In-flight HTTP
  /// calls are abandoned.
  fn stop(&self) {
    if let Some(w) = self.dispatcher.lock().take() {
      w.stop.stop();
    }
    if let Some(w) = self.checkpointer.lock().take() {
      w.stop.stop();
    }
    *self.state.lock() = NodeState::Stopped;
    tracing::info!(node = %self.name, queued = self.queue.len(), "output node stopped");
  }

  fn reconfigure(&self) {
    tracing::info!(node = %self.name, "hup received, reload side config");
    self.load_side_config();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dispatcher::testing::{FakeApi, FakeTokens, Reply};
  use std::fs;
  use std::time::Instant;

  #[derive(Default)]
  struct RecordingSink {
    seen: Mutex<Vec<Option<String>>>,
  }

  impl CheckpointSink for RecordingSink {
    fn checkpoint(&self, value: Option<String>) {
      self.seen.lock().push(value);
    }
  }

  struct Fixture {
    _dir: tempfile::TempDir,
    base: PathBuf,
    api: Arc<FakeApi>,
    sink: Arc<RecordingSink>,
    svc: OutputService,
  }

  fn config(queue_maxsize: usize) -> Config {
    let mut cfg = Config::default();
    cfg.output.name = "msgraph".to_string();
    cfg.output.queue_maxsize = queue_maxsize;
    cfg.output.client_id = Some("id".to_string());
    cfg.output.client_secret = Some("secret".to_string());
    cfg.output.tenant_id = Some("tenant".to_string());
    cfg
  }

  fn fixture(cfg: Config, api: FakeApi) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();
    let api = Arc::new(api);
    let sink = Arc::new(RecordingSink::default());
    let svc = OutputService::configure(
      &cfg,
      &base,
      Collaborators {
        api: api.clone(),
        tokens: Arc::new(FakeTokens::ok()),
        sink: sink.clone(),
      },
    )
    .with_policies(
      DispatchPolicy {
        auth_backoff: Duration::from_millis(10),
        retry_backoff: Duration::from_secs(120),
        idle_pause: Duration::from_millis(1),
        ..DispatchPolicy::default()
      },
      CheckpointPolicy {
        deadline: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
      },
    );
    Fixture {
      _dir: dir,
      base,
      api,
      sink,
      svc,
    }
  }

  fn value(kind: &str) -> IndicatorValue {
    IndicatorValue {
      indicator_type: kind.to_string(),
      confidence: 60,
      sources: vec!["feed".to_string()],
      share_level: Some("green".to_string()),
    }
  }

  fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
      if cond() {
        return true;
      }
      std::thread::sleep(Duration::from_millis(5));
    }
    false
  }

  #[test]
  fn full_queue_drops_and_counts() {
    let f = fixture(config(2), FakeApi::default());
    for i in 0..3 {
      f.svc.filtered_update(&format!("{i}.example"), &value("domain"));
    }
    assert_eq!(f.svc.length(), 2);
    assert_eq!(f.svc.counter(Counter::ErrorQueueFull), 1);
    assert_eq!(f.svc.counter(Counter::UpdateProcessed), 3);
  }

  #[test]
  fn invalid_events_never_enter_the_queue() {
    let f = fixture(config(10), FakeApi::default());
    f.svc.filtered_update("x", &value("IPv6"));
    f.svc.filtered_update("10.0.0.9-10.0.0.1", &value("IPv4"));
    f.svc.filtered_withdraw("evil.example", None);

    assert_eq!(f.svc.length(), 0);
    assert_eq!(f.svc.counter(Counter::ErrorUnhandledType), 1);
    assert_eq!(f.svc.counter(Counter::ErrorInvalidIndicator), 1);
    assert_eq!(f.svc.counter(Counter::ErrorNoValue), 1);
    assert_eq!(f.svc.counter(Counter::WithdrawProcessed), 1);
  }

  #[test]
  fn started_node_pushes_updates_and_withdrawals() {
    let f = fixture(config(100), FakeApi::default());
    f.svc.start().unwrap();
    assert_eq!(f.svc.state(), NodeState::Running);

    f.svc.filtered_update("10.0.0.1-10.0.0.6", &value("IPv4"));
    f.svc.filtered_withdraw("evil.example", Some(&value("domain")));

    assert!(wait_for(|| {
      f.svc.counter(Counter::IndicatorTx) == 4 && f.svc.counter(Counter::IndicatorDelete) == 1
    }));
    f.svc.stop();
    assert_eq!(f.svc.state(), NodeState::Stopped);
  }

  #[test]
  fn checkpoint_is_forwarded_after_drain() {
    let f = fixture(config(100), FakeApi::default());
    f.svc.start().unwrap();
    f.svc.filtered_update("evil.example", &value("domain"));

    f.svc.checkpoint(Some("cp-1".to_string())).unwrap();
    assert_eq!(f.svc.state(), NodeState::Checkpointing);
    assert!(wait_for(|| !f.sink.seen.lock().is_empty()));
    assert_eq!(*f.sink.seen.lock(), vec![Some("cp-1".to_string())]);
    assert_eq!(f.svc.length(), 0);
    f.svc.stop();
  }

  #[test]
  fn checkpoint_completes_when_remote_is_unreachable() {
    let replies = (0..50).map(|_| Reply::Http(503)).collect();
    let f = fixture(config(100), FakeApi::scripted(replies));
    f.svc.start().unwrap();
    for i in 0..60 {
      f.svc.filtered_update(&format!("{i}.example"), &value("domain"));
    }

    let start = Instant::now();
    f.svc.checkpoint(None).unwrap();
    assert!(wait_for(|| !f.sink.seen.lock().is_empty()));
    assert!(start.elapsed() < Duration::from_secs(3));

    let calls_at_checkpoint = f.api.calls().len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(f.api.calls().len(), calls_at_checkpoint);
    assert!(f.svc.length() > 0);
    f.svc.stop();
  }

  #[test]
  fn stop_aborts_pending_checkpoint() {
    let f = fixture(config(100), FakeApi::default());
    f.svc.filtered_update("evil.example", &value("domain"));
    f.svc.checkpoint(Some("cp".to_string())).unwrap();
    f.svc.stop();

    std::thread::sleep(Duration::from_millis(400));
    assert!(f.sink.seen.lock().is_empty());
  }

  #[test]
  fn newer_checkpoint_supersedes_pending_one() {
    let f = fixture(config(100), FakeApi::default());
    f.svc.filtered_update("evil.example", &value("domain"));

    f.svc.checkpoint(Some("a".to_string())).unwrap();
    f.svc.checkpoint(Some("b".to_string())).unwrap();

    assert!(wait_for(|| !f.sink.seen.lock().is_empty()));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(*f.sink.seen.lock(), vec![Some("b".to_string())]);
    assert_eq!(f.svc.counter(Counter::CheckpointRx), 2);
  }

  #[test]
  fn hup_reloads_credentials_from_side_config() {
    let mut cfg = config(10);
    cfg.output.client_secret = None;
    let f = fixture(cfg, FakeApi::default());
    assert_eq!(f.svc.settings().credentials.client_secret, None);

    let path = paths::side_config_path(&f.base, "msgraph");
    fs::write(&path, "client_secret: rotated\ntarget_product: Azure Sentinel\n").unwrap();
    f.svc.reconfigure();

    let s = f.svc.settings();
    assert_eq!(s.credentials.client_secret.as_deref(), Some("rotated"));
    assert_eq!(s.target_product.as_deref(), Some("Azure Sentinel"));
  }
}
