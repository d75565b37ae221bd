use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "TISUBMIT_HOME";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  match std::env::var_os(HOME_ENV) {
    Some(v) if !v.is_empty() => Ok(PathBuf::from(v)),
    _ => Ok(PathBuf::from("/var/lib/tisubmit")),
  }
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn side_config_path(base: &Path, node: &str) -> PathBuf {
  base.join(format!("{node}_side_config.yml"))
}
