use crate::checkpoint::CheckpointSink;
use crate::service::{Lifecycle, OutputService};
use crate::types::IndicatorValue;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;

pub enum ConsoleAction {
  RunNode,
  ExitOk,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostMessage {
  Update {
    indicator: String,
    value: IndicatorValue,
  },
  Withdraw {
    indicator: String,
    #[serde(default)]
    value: Option<IndicatorValue>,
  },
  Checkpoint {
    #[serde(default)]
    value: Option<String>,
  },
  Hup,
  Length,
  Stats,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Reply<'a> {
  Length { value: usize },
  Stats { value: serde_json::Value },
  Checkpoint { value: Option<&'a str> },
}

pub enum Input {
  Line(String),
  Eof,
  Interrupt,
}

pub fn run_console_command(args: &[String]) -> anyhow::Result<ConsoleAction> {
  if args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(ConsoleAction::ExitOk);
  }
  Ok(ConsoleAction::RunNode)
}

pub fn config_override(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
  match args.iter().position(|a| a == "--config") {
    None => Ok(None),
    Some(i) => args
      .get(i + 1)
      .map(|p| Some(PathBuf::from(p)))
      .ok_or_else(|| anyhow::anyhow!("expected: --config <path-to-config.toml>")),
  }
}

pub struct StdoutSink;

impl CheckpointSink for StdoutSink {
  fn checkpoint(&self, value: Option<String>) {
    let reply = Reply::Checkpoint {
      value: value.as_deref(),
    };
    if let Err(e) = emit(&mut std::io::stdout().lock(), &reply) {
      tracing::error!(error = ?e, "failed to forward checkpoint");
    }
  }
}

fn emit<W: Write, T: Serialize>(out: &mut W, reply: &T) -> anyhow::Result<()> {
  let mut line = serde_json::to_vec(reply)?;
  line.push(b'\n');
  out.write_all(&line)?;
  out.flush()?;
  Ok(())
}

pub fn spawn_stdin_reader(tx: mpsc::Sender<Input>) -> anyhow::Result<()> {
  std::thread::Builder::new()
    .name("stdin-reader".to_string())
    .spawn(move || {
      for line in std::io::stdin().lock().lines() {
        match line {
          Ok(l) => {
            if tx.send(Input::Line(l)).is_err() {
              return;
            }
          }
          Err(e) => {
            tracing::error!(error = %e, "stdin read failed");
            break;
          }
        }
      }
      let _ = tx.send(Input::Eof);
    })
    .context("spawn stdin reader")?;
  Ok(())
}

pub fn run_host<W: Write>(
  svc: &OutputService,
  rx: &mpsc::Receiver<Input>,
  out: &mut W,
) -> anyhow::Result<()> {
  loop {
    match rx.recv() {
      Ok(Input::Line(line)) => handle_line(svc, &line, out)?,
      Ok(Input::Eof) => {
        tracing::info!("host closed stdin");
        break;
      }
      Ok(Input::Interrupt) => {
        tracing::info!("interrupt received");
        break;
      }
      Err(_) => break,
    }
  }
  Ok(())
}

pub fn handle_line<W: Write>(svc: &OutputService, line: &str, out: &mut W) -> anyhow::Result<()> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(());
  }

  let msg: HostMessage = match serde_json::from_str(line) {
    Ok(m) => m,
    Err(e) => {
      tracing::warn!(error = %e, "ignoring malformed host message");
      return Ok(());
    }
  };

  match msg {
    HostMessage::Update { indicator, value } => svc.filtered_update(&indicator, &value),
    HostMessage::Withdraw { indicator, value } => svc.filtered_withdraw(&indicator, value.as_ref()),
    HostMessage::Checkpoint { value } => svc.checkpoint(value)?,
    HostMessage::Hup => svc.reconfigure(),
    HostMessage::Length => emit(out, &Reply::Length { value: svc.length() })?,
    HostMessage::Stats => emit(
      out,
      &Reply::Stats {
        value: json!(svc.statistics()),
      },
    )?,
  }
  Ok(())
}

fn print_help() {
  println!("tisubmit v{} (console mode)", env!("CARGO_PKG_VERSION"));
  println!("Usage: tisubmit [--config <path-to-config.toml>]");
  println!("Reads one JSON message per line on stdin:");
  println!(r#"  {{"op":"update","indicator":"evil.example","value":{{"type":"domain","confidence":80,"sources":["feed"]}}}}"#);
  println!(r#"  {{"op":"withdraw","indicator":"evil.example","value":{{"type":"domain"}}}}"#);
  println!(r#"  {{"op":"checkpoint","value":"cp-1"}}"#);
  println!(r#"  {{"op":"hup"}}  {{"op":"length"}}  {{"op":"stats"}}"#);
  println!("Set TISUBMIT_HOME to relocate config, logs and side config.");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::dispatcher::testing::{FakeApi, FakeTokens};
  use crate::service::Collaborators;
  use pretty_assertions::assert_eq;
  use std::sync::Arc;

  struct NullSink;

  impl CheckpointSink for NullSink {
    fn checkpoint(&self, _value: Option<String>) {}
  }

  fn service(dir: &tempfile::TempDir) -> OutputService {
    OutputService::configure(
      &Config::default(),
      dir.path(),
      Collaborators {
        api: Arc::new(FakeApi::default()),
        tokens: Arc::new(FakeTokens::ok()),
        sink: Arc::new(NullSink),
      },
    )
  }

  fn output(buf: Vec<u8>) -> Vec<serde_json::Value> {
    String::from_utf8(buf)
      .unwrap()
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect()
  }

  #[test]
  fn host_messages_parse_by_op() {
    let msg: HostMessage =
      serde_json::from_str(r#"{"op":"withdraw","indicator":"1.2.3.4"}"#).unwrap();
    assert_eq!(
      msg,
      HostMessage::Withdraw {
        indicator: "1.2.3.4".to_string(),
        value: None
      }
    );
    let msg: HostMessage = serde_json::from_str(r#"{"op":"checkpoint"}"#).unwrap();
    assert_eq!(msg, HostMessage::Checkpoint { value: None });
  }

  #[test]
  fn update_then_length_reports_queue_depth() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(&dir);
    let mut out = Vec::new();

    handle_line(
      &svc,
      r#"{"op":"update","indicator":"10.0.0.0-10.0.0.3","value":{"type":"IPv4","confidence":50,"sources":["a"]}}"#,
      &mut out,
    )
    .unwrap();
    handle_line(&svc, "not json", &mut out).unwrap();
    handle_line(&svc, "", &mut out).unwrap();
    handle_line(&svc, r#"{"op":"length"}"#, &mut out).unwrap();

    assert_eq!(output(out), vec![json!({"op": "length", "value": 1})]);
  }

  #[test]
  fn stats_reply_carries_counters() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(&dir);
    let mut out = Vec::new();

    handle_line(&svc, r#"{"op":"withdraw","indicator":"x"}"#, &mut out).unwrap();
    handle_line(&svc, r#"{"op":"stats"}"#, &mut out).unwrap();

    let replies = output(out);
    assert_eq!(replies[0]["op"], "stats");
    assert_eq!(replies[0]["value"]["withdraw.processed"], 1);
    assert_eq!(replies[0]["value"]["error.no_value"], 1);
  }

  #[test]
  fn host_loop_ends_on_eof() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(&dir);
    let (tx, rx) = mpsc::channel();
    tx.send(Input::Line(r#"{"op":"length"}"#.to_string())).unwrap();
    tx.send(Input::Eof).unwrap();
    tx.send(Input::Line(r#"{"op":"length"}"#.to_string())).unwrap();

    let mut out = Vec::new();
    run_host(&svc, &rx, &mut out).unwrap();
    assert_eq!(output(out).len(), 1);
  }

  #[test]
  fn config_flag_requires_path() {
    let args = vec!["tisubmit".to_string(), "--config".to_string()];
    assert!(config_override(&args).is_err());
    let args = vec!["tisubmit".to_string(), "--config".to_string(), "/tmp/c.toml".to_string()];
    assert_eq!(
      config_override(&args).unwrap(),
      Some(PathBuf::from("/tmp/c.toml"))
    );
  }
}
