use chrono::Local;
use env_logger::Builder;
use log::{LevelFilter, SetLoggerError};
use std::io::Write;

/// Installs the global logger.
///
/// `level` is the default filter; `RUST_LOG` overrides it per module.
/// Lines look like `2024-05-01T12:00:00.123+02:00 [INFO] ble_roster::core: message`.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()?;
    log::info!("Logging initialized");
    Ok(())
}
