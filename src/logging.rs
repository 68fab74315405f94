//! Logging setup: console on stdout, plus an append-only log file.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::{Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Build the subscriber for `level`.
///
/// The file layer records timestamped lines at INFO (DEBUG in verbose mode)
/// whatever the console level. When `log_file` cannot be opened the console
/// layer is used alone and the open error is returned alongside.
pub fn subscriber(level: Level, log_file: &Path) -> (impl Subscriber + Send + Sync, Option<io::Error>) {
    let console = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(io::stdout)
        .with_filter(LevelFilter::from_level(level));

    let file_level = if level == Level::DEBUG {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let (file_layer, open_error) = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::from_level(file_level));
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    let subscriber = tracing_subscriber::registry().with(console).with(file_layer);
    (subscriber, open_error)
}

/// Install the global subscriber
pub fn init(level: Level, log_file: &Path) {
    let (subscriber, open_error) = subscriber(level, log_file);
    subscriber.init();
    if let Some(e) = open_error {
        tracing::warn!(
            "Cannot open log file {:?} ({}), logging to console only",
            log_file,
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    #[test]
    fn test_config_error_reaches_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let log_file = temp_dir.path().join("chainwarden.log");
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "mode: greylist\n").unwrap();

        let err = Config::load_or_default(&config_path).unwrap_err();
        let (dispatch, open_error) = subscriber(Level::ERROR, &log_file);
        assert!(open_error.is_none());
        tracing::subscriber::with_default(dispatch, || {
            tracing::error!("{:#}", err);
            tracing::debug!("not recorded");
        });

        let logged = std::fs::read_to_string(&log_file).unwrap();
        assert!(logged.contains("ERROR"));
        assert!(logged.contains("greylist"));
        assert!(!logged.contains("not recorded"));
    }

    #[test]
    fn test_file_level_is_info_unless_verbose() {
        let temp_dir = TempDir::new().unwrap();
        let log_file = temp_dir.path().join("chainwarden.log");

        let (quiet, _) = subscriber(Level::ERROR, &log_file);
        tracing::subscriber::with_default(quiet, || tracing::info!("chain reloaded"));
        let (verbose, _) = subscriber(Level::DEBUG, &log_file);
        tracing::subscriber::with_default(verbose, || tracing::debug!("iptables -w -S WL"));

        let logged = std::fs::read_to_string(&log_file).unwrap();
        assert!(logged.contains("chain reloaded"));
        assert!(logged.contains("iptables -w -S WL"));
        assert!(!logged.contains('\x1b'));
    }

    #[test]
    fn test_unopenable_log_file_falls_back_to_console() {
        let temp_dir = TempDir::new().unwrap();
        let log_file = temp_dir.path().join("missing").join("chainwarden.log");

        let (console_only, open_error) = subscriber(Level::INFO, &log_file);
        assert!(open_error.is_some());
        tracing::subscriber::with_default(console_only, || tracing::error!("still logged"));
        assert!(!log_file.exists());
    }
}
