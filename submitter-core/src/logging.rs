use crate::config::LoggingConfig;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_NAME: &str = "tisubmit.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
  None,
  Stderr,
}

// stdout is never written to: the host protocol owns it.
pub fn init(log_dir: &Path, cfg: &LoggingConfig, mirror: Mirror) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir).with_context(|| format!("create {}", log_dir.display()))?;
  let removed = prune_logs(log_dir, cfg.retention_days, SystemTime::now());

  let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = FILE_GUARD.set(guard);

  let filter = tracing_subscriber::EnvFilter::try_new(&cfg.level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let stderr_layer = (mirror == Mirror::Stderr).then(|| {
    tracing_subscriber::fmt::layer()
      .with_ansi(false)
      .with_writer(std::io::stderr)
      .with_target(true)
  });

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .context("install tracing subscriber")?;

  if removed > 0 {
    tracing::info!(removed, "pruned old log files");
  }
  Ok(())
}

fn prune_logs(log_dir: &Path, retention_days: u64, now: SystemTime) -> usize {
  if retention_days == 0 {
    return 0;
  }

  let cutoff = now
    .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let Ok(entries) = fs::read_dir(log_dir) else {
    return 0;
  };

  entries
    .flatten()
    .filter(|e| is_log_file(&e.path()))
    .filter(|e| {
      e.metadata()
        .and_then(|m| m.modified())
        .map(|t| t < cutoff)
        .unwrap_or(false)
    })
    .filter(|e| fs::remove_file(e.path()).is_ok())
    .count()
}

fn is_log_file(path: &Path) -> bool {
  match path.file_name().and_then(|n| n.to_str()) {
    Some(name) => name == LOG_FILE_NAME || name.starts_with(&format!("{LOG_FILE_NAME}.")),
    None => false,
  }
}
