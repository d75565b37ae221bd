use crate::auth::Credentials;
use crate::encoder::EncodeSettings;
use crate::config::{configured_action, configured_product, OutputConfig};
use anyhow::Context;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
  pub credentials: Credentials,
  pub recommended_action: Option<i64>,
  pub target_product: Option<String>,
  pub threat_type: String,
}

pub type SharedSettings = Arc<RwLock<NodeSettings>>;

impl NodeSettings {
  pub fn from_output(cfg: &OutputConfig) -> Self {
    Self {
      credentials: Credentials {
        client_id: cfg.client_id.clone(),
        client_secret: cfg.client_secret.clone(),
        tenant_id: cfg.tenant_id.clone(),
      },
      recommended_action: configured_action(cfg.recommended_action),
      target_product: configured_product(cfg.target_product.clone()),
      threat_type: cfg.threat_type.clone(),
    }
  }

  pub fn encode_settings(&self) -> EncodeSettings {
    EncodeSettings {
      recommended_action: self.recommended_action,
      target_product: self.target_product.clone(),
      threat_type: self.threat_type.clone(),
    }
  }
}

/// `<node>_side_config.yml`, written by the web UI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SideConfig {
  #[serde(default)]
  pub client_id: Option<String>,

  #[serde(default)]
  pub client_secret: Option<String>,

  #[serde(default)]
  pub tenant_id: Option<String>,

  #[serde(default)]
  pub recommended_action: Option<i64>,

  #[serde(default)]
  pub target_product: Option<String>,
}

impl SideConfig {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if raw.trim().is_empty() {
      return Ok(Self::default());
    }
    let parsed: Option<SideConfig> =
      serde_yaml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(parsed.unwrap_or_default())
  }

  pub fn apply(self, node: &str, settings: &mut NodeSettings) {
    if let Some(v) = self.client_id {
      settings.credentials.client_id = Some(v);
      tracing::info!(node, "client_id set");
    }
    if let Some(v) = self.client_secret {
      settings.credentials.client_secret = Some(v);
      tracing::info!(node, "client_secret set");
    }
    if let Some(v) = self.tenant_id {
      settings.credentials.tenant_id = Some(v);
      tracing::info!(node, "tenant_id set");
    }
    if let Some(v) = self.recommended_action {
      settings.recommended_action = configured_action(Some(v));
      tracing::info!(node, recommended_action = v, "recommended_action set");
    }
    if let Some(v) = self.target_product {
      tracing::info!(node, target_product = %v, "target_product set");
      settings.target_product = configured_product(Some(v));
    }
  }
}

/// Re-reads the side config into `settings`. Errors are logged and the
/// previous values are kept.
pub fn reload(node: &str, path: &Path, settings: &SharedSettings) -> bool {
  match SideConfig::load(path) {
    Ok(side) => {
      let mut guard = settings.write();
      side.apply(node, &mut guard);
      true
    }
    Err(e) => {
      tracing::error!(node, error = ?e, "error loading side config");
      false
    }
  }
}
