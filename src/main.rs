use std::path::PathBuf;

use anyhow::Result;
use ble_roster::commands::{self, Command, HELP};
use ble_roster::config::watcher_config::CONFIG_FILE_NAME;
use ble_roster::core::{EventChannel, WatcherEvent};
use ble_roster::logging;
use ble_roster::state::AppState;
use log::{LevelFilter, error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

fn describe(event: &WatcherEvent) -> String {
    match event {
        WatcherEvent::Started => "listening started".to_string(),
        WatcherEvent::Stopped(reason) => format!("listening stopped ({:?})", reason),
        WatcherEvent::DeviceObserved(record) => format!("seen      {}", record),
        WatcherEvent::NewDevice(record) => format!("new       {}", record),
        WatcherEvent::DeviceNameChanged {
            previous_name,
            record,
        } => format!("renamed   {:?} -> {}", previous_name, record),
        WatcherEvent::DeviceTimedOut(record) => format!("timed out {}", record),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LevelFilter::Info)?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let state = AppState::new(config_path).await?;

    // Repeat sightings are only interesting at debug level.
    state.watcher.subscribe(EventChannel::DeviceObserved, |event| {
        log::debug!("{}", describe(event));
    });
    for channel in [
        EventChannel::Started,
        EventChannel::Stopped,
        EventChannel::NewDevice,
        EventChannel::DeviceNameChanged,
        EventChannel::DeviceTimedOut,
    ] {
        state.watcher.subscribe(channel, |event| println!("* {}", describe(event)));
    }

    commands::start_listening(&state).await?;
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match commands::execute(&state, command).await {
            Ok(output) => println!("{}", output),
            Err(e) => error!("'{}' failed: {}", line.trim(), e),
        }
        if command == Command::Quit {
            break;
        }
    }

    if state.watcher.is_listening() {
        state.watcher.stop_listening().await?;
    }
    info!("Bye.");
    Ok(())
}
