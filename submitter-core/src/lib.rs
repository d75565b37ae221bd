pub mod auth;
pub mod checkpoint;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod paths;
pub mod queue;
pub mod remote;
pub mod service;
pub mod side_config;
pub mod stats;
pub mod stop;
pub mod types;

use service::{Lifecycle, OutputService};
use std::sync::{mpsc, Arc};

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  if let console::ConsoleAction::ExitOk = console::run_console_command(args)? {
    return Ok(());
  }

  let base = paths::base_dir()?;
  let config_path = match console::config_override(args)? {
    Some(p) => p,
    None => paths::config_path(&base),
  };
  let cfg = config::load_or_create_default(&config_path)?;

  logging::init(&paths::logs_dir(&base), &cfg.logging, logging::Mirror::Stderr)?;

  tracing::info!(
    node = %cfg.output.name,
    config = %config_path.display(),
    "starting tisubmit (console mode)"
  );
  let (tx, rx) = mpsc::channel::<console::Input>();

  let ctrlc_tx = tx.clone();
  ctrlc::set_handler(move || {
    let _ = ctrlc_tx.send(console::Input::Interrupt);
  })?;
  console::spawn_stdin_reader(tx)?;

  let svc = OutputService::from_config(&cfg, &base, Arc::new(console::StdoutSink))?;
  svc.start()?;
  let result = console::run_host(&svc, &rx, &mut std::io::stdout());
  svc.stop();
  tracing::info!(stats = ?svc.statistics(), "tisubmit stopped");
  result
}
