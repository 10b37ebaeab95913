pub mod watcher_config;

pub use watcher_config::WatcherConfig;
