use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Keeps the log outputs alive. Flush it before the process exits.
pub struct Logging {
    file: Option<Arc<File>>,
}

impl Logging {
    /// Installs the global subscriber.
    ///
    /// Logs go to stderr, filtered by `RUST_LOG` (`info` when unset). With
    /// `log_file`, everything at debug level and above is appended there
    /// as well.
    pub fn init(log_file: Option<&Path>) -> io::Result<Self> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_filter(filter);

        let file = match log_file {
            Some(path) => Some(Arc::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            )),
            None => None,
        };
        let file_layer = file.clone().map(|file| {
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG)
        });

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();

        Ok(Self { file })
    }

    /// Flushes the log file, if any.
    pub fn flush(&self) {
        if let Some(file) = &self.file {
            if let Err(err) = (&**file).flush().and_then(|_| file.sync_data()) {
                eprintln!("failed to flush log file: {err}");
            }
        }
    }
}

impl Drop for Logging {
    fn drop(&mut self) {
        self.flush();
    }
}
