//! Log routing: stdout for everything, plus `collector.log` and `action.log`
//! for the daemon. The files can be reopened in place after rotation.

use gleaner_core::config::LogConfig;
use gleaner_core::paths::{ACTION_LOG, COLLECTOR_LOG};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const COLLECTOR_TARGETS: [&str; 1] = ["gleaner_core::collector"];
const ACTION_TARGETS: [&str; 2] = ["gleaner_core::action", "action_exec"];

/// Admin commands: warnings and errors on stderr, `RUST_LOG` to override.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();
}

/// Daemon logging. Returns the file handles so SIGHUP can reopen them.
pub fn init_daemon(config: &LogConfig) -> anyhow::Result<LogFiles> {
    let level: LevelFilter = config
        .level
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown log level '{}'", config.level))?;
    gleaner_core::io::ensure_dir(&config.dir)?;
    let files = LogFiles {
        collector: LogFile::open(config.dir.join(COLLECTOR_LOG))?,
        action: LogFile::open(config.dir.join(ACTION_LOG))?,
    };

    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .with_target(false)
                .with_filter(stdout_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(files.collector.clone())
                .with_ansi(false)
                .with_filter(targets(&COLLECTOR_TARGETS, level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(files.action.clone())
                .with_ansi(false)
                .with_filter(targets(&ACTION_TARGETS, level)),
        )
        .init();
    Ok(files)
}

fn targets(prefixes: &[&str], level: LevelFilter) -> Targets {
    prefixes
        .iter()
        .fold(Targets::new(), |t, prefix| t.with_target(*prefix, level))
}

// ---------------------------------------------------------------------------
// Reopenable log files
// ---------------------------------------------------------------------------

pub struct LogFiles {
    pub collector: LogFile,
    pub action: LogFile,
}

impl LogFiles {
    pub fn reopen(&self) -> io::Result<()> {
        self.collector.reopen()?;
        self.action.reopen()
    }
}

/// Append-mode file whose handle can be swapped while writers hold clones.
#[derive(Clone)]
pub struct LogFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogFile {
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Open the path again, e.g. after logrotate moved the old file away.
    pub fn reopen(&self) -> io::Result<()> {
        let fresh = open_append(&self.path)?;
        *self.lock() = fresh;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub struct LogFileWriter<'a>(MutexGuard<'a, File>);

impl Write for LogFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter(self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reopen_follows_a_rotated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("collector.log");
        let log = LogFile::open(path.clone()).unwrap();

        writeln!(log.make_writer(), "before").unwrap();
        std::fs::rename(&path, dir.path().join("collector.log.1")).unwrap();
        writeln!(log.make_writer(), "still old").unwrap();

        log.reopen().unwrap();
        writeln!(log.make_writer(), "after").unwrap();

        let rotated = std::fs::read_to_string(dir.path().join("collector.log.1")).unwrap();
        assert_eq!(rotated, "before\nstill old\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after\n");
    }

    #[test]
    fn targets_route_by_prefix() {
        let t = targets(&ACTION_TARGETS, LevelFilter::INFO);
        assert!(t.would_enable("gleaner_core::action::manager", &tracing::Level::INFO));
        assert!(t.would_enable("action_exec", &tracing::Level::WARN));
        assert!(!t.would_enable("gleaner_core::collector", &tracing::Level::ERROR));
        assert!(!t.would_enable("action_exec", &tracing::Level::DEBUG));
    }
}
