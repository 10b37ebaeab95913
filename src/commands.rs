//! Shell commands
//! Parses a line typed at the prompt and runs it against the application state.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use crate::core::bluetooth::ListenerStatus;
use crate::state::AppState;

pub const HELP: &str = "\
commands:
  start            start listening for advertisements
  stop             stop listening and clear the roster
  status           show listener state and heartbeat timeout
  list [--json]    show discovered devices
  timeout [secs]   show or change the heartbeat timeout
  sweep            evict timed-out devices now
  save             write the current config to disk
  help             show this text
  quit             stop and exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    List { json: bool },
    Timeout(Option<u64>),
    Sweep,
    Save,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let arg = words.next();
        if words.next().is_some() {
            bail!("too many arguments for '{}'", name);
        }

        let command = match (name.to_ascii_lowercase().as_str(), arg) {
            ("start", None) => Self::Start,
            ("stop", None) => Self::Stop,
            ("status", None) => Self::Status,
            ("list" | "ls", None) => Self::List { json: false },
            ("list" | "ls", Some("--json")) => Self::List { json: true },
            ("timeout", None) => Self::Timeout(None),
            ("timeout", Some(secs)) => Self::Timeout(Some(
                secs.parse()
                    .map_err(|_| anyhow!("timeout expects whole seconds, got '{}'", secs))?,
            )),
            ("sweep", None) => Self::Sweep,
            ("save", None) => Self::Save,
            ("help" | "?", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            (_, Some(arg)) => bail!("unexpected argument '{}' for '{}'", arg, name),
            _ => bail!("unknown command '{}', try 'help'", name),
        };
        Ok(command)
    }
}

/// Runs `command` and returns the text to show the user.
pub async fn execute(state: &AppState, command: Command) -> Result<String> {
    match command {
        Command::Start => start_listening(state).await,
        Command::Stop | Command::Quit => stop_listening(state).await,
        Command::Status => status(state).await,
        Command::List { json } => list_devices(state, json),
        Command::Timeout(None) => Ok(format!(
            "heartbeat timeout: {}s",
            state.watcher.heartbeat_timeout().as_secs()
        )),
        Command::Timeout(Some(secs)) => set_heartbeat_timeout(state, secs).await,
        Command::Sweep => Ok(format!("evicted {} devices", state.watcher.sweep_timeouts())),
        Command::Save => save_config(state).await,
        Command::Help => Ok(HELP.to_string()),
    }
}

pub async fn start_listening(state: &AppState) -> Result<String> {
    if state.watcher.is_listening() {
        return Ok("already listening".to_string());
    }
    state.watcher.start_listening().await?;
    Ok("listening".to_string())
}

pub async fn stop_listening(state: &AppState) -> Result<String> {
    if !state.watcher.is_listening() {
        return Ok("already stopped".to_string());
    }
    state.watcher.stop_listening().await?;
    Ok("stopped".to_string())
}

pub async fn status(state: &AppState) -> Result<String> {
    let radio = match state.watcher.radio_status().await {
        ListenerStatus::Started => "started",
        ListenerStatus::Stopped => "stopped",
    };
    Ok(format!(
        "listening: {}, radio: {}, heartbeat timeout: {}s",
        state.watcher.is_listening(),
        radio,
        state.watcher.heartbeat_timeout().as_secs()
    ))
}

pub fn list_devices(state: &AppState, json: bool) -> Result<String> {
    let devices = state.watcher.discovered_devices();
    if json {
        return Ok(serde_json::to_string_pretty(&devices)?);
    }
    if devices.is_empty() {
        return Ok("no devices".to_string());
    }
    let lines: Vec<String> = devices
        .iter()
        .map(|device| {
            format!(
                "{}  seen {}",
                device,
                device.last_seen().format("%H:%M:%S")
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

pub async fn set_heartbeat_timeout(state: &AppState, secs: u64) -> Result<String> {
    state
        .watcher
        .set_heartbeat_timeout(Duration::from_secs(secs))?;
    state.config.lock().await.heartbeat_timeout_secs = secs;
    Ok(format!("heartbeat timeout set to {}s", secs))
}

pub async fn save_config(state: &AppState) -> Result<String> {
    let config = state.config.lock().await.clone();
    config.save_config(&state.config_path).await?;
    Ok(format!("config saved to {}", state.config_path.display()))
}
