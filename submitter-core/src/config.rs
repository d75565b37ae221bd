use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling imposed by submitTiIndicators.
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub output: OutputConfig,
  pub endpoints: EndpointsConfig,
  pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
  #[serde(default = "default_node_name")]
  pub name: String,

  #[serde(default = "default_queue_maxsize")]
  pub queue_maxsize: usize,

  #[serde(default = "default_max_batch_size")]
  pub max_batch_size: usize,

  #[serde(default)]
  pub client_id: Option<String>,

  #[serde(default)]
  pub client_secret: Option<String>,

  #[serde(default)]
  pub tenant_id: Option<String>,

  #[serde(default = "default_recommended_action")]
  pub recommended_action: Option<i64>,

  #[serde(default = "default_target_product")]
  pub target_product: Option<String>,

  #[serde(default = "default_threat_type")]
  pub threat_type: String,

  #[serde(default)]
  pub side_config: Option<PathBuf>,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self {
      name: default_node_name(),
      queue_maxsize: default_queue_maxsize(),
      max_batch_size: default_max_batch_size(),
      client_id: None,
      client_secret: None,
      tenant_id: None,
      recommended_action: default_recommended_action(),
      target_product: default_target_product(),
      threat_type: default_threat_type(),
      side_config: None,
    }
  }
}

impl OutputConfig {
  pub fn effective_batch_size(&self) -> usize {
    self.max_batch_size.clamp(1, MAX_BATCH_SIZE)
  }
}

/// `recommended_action = 0` leaves `action` out of submitted records.
pub fn configured_action(value: Option<i64>) -> Option<i64> {
  value.filter(|a| *a != 0)
}

/// `target_product = ""` leaves `targetProduct` out of submitted records.
pub fn configured_product(value: Option<String>) -> Option<String> {
  value.filter(|p| !p.trim().is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
  #[serde(default = "default_authority_url")]
  pub authority_url: String,

  #[serde(default = "default_resource")]
  pub resource: String,

  #[serde(default = "default_graph_url")]
  pub graph_url: String,

  #[serde(default = "default_api_version")]
  pub api_version: String,

  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,
}

impl Default for EndpointsConfig {
  fn default() -> Self {
    Self {
      authority_url: default_authority_url(),
      resource: default_resource(),
      graph_url: default_graph_url(),
      api_version: default_api_version(),
      timeout_seconds: default_timeout_seconds(),
    }
  }
}

impl EndpointsConfig {
  /// Versioned Security Graph root, e.g. `https://graph.microsoft.com/beta`.
  pub fn graph_base(&self) -> String {
    format!(
      "{}/{}",
      self.graph_url.trim_end_matches('/'),
      self.api_version.trim_matches('/')
    )
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_seconds)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
  #[serde(default = "default_auth_backoff_seconds")]
  pub auth_backoff_seconds: u64,

  #[serde(default = "default_retry_backoff_seconds")]
  pub retry_backoff_seconds: u64,

  #[serde(default = "default_max_retries")]
  pub max_retries: u32,

  #[serde(default = "default_idle_pause_ms")]
  pub idle_pause_ms: u64,

  #[serde(default = "default_enqueue_timeout_ms")]
  pub enqueue_timeout_ms: u64,

  #[serde(default = "default_checkpoint_deadline_seconds")]
  pub checkpoint_deadline_seconds: u64,

  #[serde(default = "default_checkpoint_poll_ms")]
  pub checkpoint_poll_ms: u64,
}

impl Default for TimingConfig {
  fn default() -> Self {
    Self {
      auth_backoff_seconds: default_auth_backoff_seconds(),
      retry_backoff_seconds: default_retry_backoff_seconds(),
      max_retries: default_max_retries(),
      idle_pause_ms: default_idle_pause_ms(),
      enqueue_timeout_ms: default_enqueue_timeout_ms(),
      checkpoint_deadline_seconds: default_checkpoint_deadline_seconds(),
      checkpoint_poll_ms: default_checkpoint_poll_ms(),
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

fn default_node_name() -> String {
  "graph-secapi-output".to_string()
}

fn default_queue_maxsize() -> usize {
  100_000
}

fn default_max_batch_size() -> usize {
  MAX_BATCH_SIZE
}

fn default_recommended_action() -> Option<i64> {
  Some(3)
}

fn default_target_product() -> Option<String> {
  Some("minemeld".to_string())
}

fn default_threat_type() -> String {
  "malware".to_string()
}

fn default_authority_url() -> String {
  "https://login.microsoftonline.com".to_string()
}

fn default_resource() -> String {
  "https://graph.microsoft.com/".to_string()
}

fn default_graph_url() -> String {
  "https://graph.microsoft.com".to_string()
}

fn default_api_version() -> String {
  "beta".to_string()
}

fn default_timeout_seconds() -> u64 {
  30
}

fn default_auth_backoff_seconds() -> u64 {
  60
}

fn default_retry_backoff_seconds() -> u64 {
  120
}

fn default_max_retries() -> u32 {
  5
}

fn default_idle_pause_ms() -> u64 {
  100
}

fn default_enqueue_timeout_ms() -> u64 {
  1
}

fn default_checkpoint_deadline_seconds() -> u64 {
  30
}

fn default_checkpoint_poll_ms() -> u64 {
  500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub output: Option<OutputConfig>,

  #[serde(default)]
  pub endpoints: Option<EndpointsConfig>,

  #[serde(default)]
  pub timing: Option<TimingConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(o) = self.output {
      cfg.output = o;
    }
    if let Some(e) = self.endpoints {
      cfg.endpoints = e;
    }
    if let Some(t) = self.timing {
      cfg.timing = t;
    }

    if let Some(reason) = validate_endpoints(&cfg.endpoints) {
      tracing::warn!(reason = %reason, "endpoints config invalid; using defaults");
      cfg.endpoints = EndpointsConfig::default();
    }
    if cfg.output.max_batch_size != cfg.output.effective_batch_size() {
      tracing::warn!(
        requested = cfg.output.max_batch_size,
        effective = cfg.output.effective_batch_size(),
        "max_batch_size out of range; clamped"
      );
      cfg.output.max_batch_size = cfg.output.effective_batch_size();
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none()
      || self.output.is_none()
      || self.endpoints.is_none()
      || self.timing.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;

  if !path.exists() {
    let cfg = Config::default();
    write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let cfg = file.clone().normalize();
      if file.needs_upgrade() {
        let backup = parent.join(format!("config.toml.bak-{}", now_unix_s()));
        let _ = fs::copy(path, &backup);
        let _ = write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?);
        eprintln!(
          "tisubmit: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      let backup = parent.join(format!("config.toml.bad-{}", now_unix_s()));
      let _ = fs::rename(path, &backup);
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
      eprintln!(
        "tisubmit: invalid config at {} (backed up to {}): {e}",
        path.display(),
        backup.display()
      );
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    logging: Some(cfg.logging.clone()),
    output: Some(cfg.output.clone()),
    endpoints: Some(cfg.endpoints.clone()),
    timing: Some(cfg.timing.clone()),
  }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn now_unix_s() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

fn validate_endpoints(cfg: &EndpointsConfig) -> Option<String> {
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  if cfg.api_version.trim_matches('/').is_empty() {
    return Some("api_version must not be empty".to_string());
  }

  for (label, raw) in [
    ("authority_url", &cfg.authority_url),
    ("graph_url", &cfg.graph_url),
  ] {
    let Ok(url) = reqwest::Url::parse(raw) else {
      return Some(format!("invalid {label}: {raw}"));
    };
    if url.host_str().is_none() {
      return Some(format!("{label} has no host: {raw}"));
    }
  }

  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_is_created_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let cfg = load_or_create_default(&path).unwrap();
    assert!(path.exists());
    assert_eq!(cfg.output.queue_maxsize, 100_000);
    assert_eq!(cfg.output.threat_type, "malware");
    assert_eq!(cfg.output.target_product.as_deref(), Some("minemeld"));
    assert_eq!(cfg.timing.checkpoint_deadline_seconds, 30);
    assert_eq!(cfg.endpoints.graph_base(), "https://graph.microsoft.com/beta");

    let again = load_or_create_default(&path).unwrap();
    assert_eq!(again.output.name, cfg.output.name);
  }

  #[test]
  fn partial_file_keeps_values_and_fills_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
      &path,
      "[output]\nname = \"msgraph\"\nqueue_maxsize = 0\nmax_batch_size = 500\ntenant_id = \"t-1\"\n",
    )
    .unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.output.name, "msgraph");
    assert_eq!(cfg.output.queue_maxsize, 0);
    assert_eq!(cfg.output.max_batch_size, MAX_BATCH_SIZE);
    assert_eq!(cfg.output.tenant_id.as_deref(), Some("t-1"));
    assert_eq!(cfg.timing.max_retries, 5);

    let rewritten = fs::read_to_string(&path).unwrap();
    assert!(rewritten.contains("[timing]"));
  }

  #[test]
  fn zero_action_and_blank_product_are_left_out_of_records() {
    use crate::encoder;
    use crate::side_config::NodeSettings;
    use crate::types::IndicatorValue;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
      &path,
      "[output]\nname = \"n\"\nrecommended_action = 0\ntarget_product = \"\"\n",
    )
    .unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    let settings = NodeSettings::from_output(&cfg.output);
    assert_eq!(settings.recommended_action, None);
    assert_eq!(settings.target_product, None);

    let value = IndicatorValue {
      indicator_type: "domain".to_string(),
      confidence: 10,
      sources: vec!["feed".to_string()],
      share_level: None,
    };
    let records = encoder::encode(
      "evil.example",
      &value,
      false,
      &settings.encode_settings(),
      chrono::Utc::now(),
    )
    .unwrap();
    let json = serde_json::to_value(&records[0]).unwrap();
    assert!(json.get("action").is_none());
    assert!(json.get("targetProduct").is_none());
    assert_eq!(json["domainName"], "evil.example");
  }

  #[test]
  fn invalid_file_is_backed_up_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "this is = = not toml").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.output.max_batch_size, MAX_BATCH_SIZE);

    let backups = fs::read_dir(dir.path())
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().starts_with("config.toml.bad-"))
      .count();
    assert_eq!(backups, 1);
  }
}
