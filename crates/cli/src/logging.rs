//! Logging setup
//!
//! Events go to stderr by default. With `--syslog` they are formatted without
//! colours or timestamps and sent as datagrams to the syslog socket; when the
//! socket cannot be used the logs stay on stderr and a warning says so.

use std::io::{self, Write};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_SYSLOG_SOCKET: &str = "/dev/log";

/// LOG_USER
const SYSLOG_FACILITY: u8 = 1;
const SYSLOG_IDENT: &str = "snapvault";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub syslog: Option<PathBuf>,
}

/// Keeps the background log writer alive; drop it last
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
    syslog: bool,
}

impl LoggingGuard {
    /// Whether events are going to syslog
    pub fn is_syslog(&self) -> bool {
        self.syslog
    }
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{},reqwest=warn,hyper=warn,rustls=warn,h2=warn", level))
    })
}

/// Install the global subscriber
pub fn init(options: &LogOptions) -> LoggingGuard {
    let fallback = match &options.syslog {
        Some(socket) => match SyslogWriter::connect(socket) {
            Ok(writer) => {
                let (writer, guard) = tracing_appender::non_blocking(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter(options.verbose))
                    .with(
                        fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false)
                            .without_time()
                            .with_target(false),
                    )
                    .try_init();
                return LoggingGuard {
                    _worker: Some(guard),
                    syslog: true,
                };
            }
            Err(e) => Some((socket.clone(), e)),
        },
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter(options.verbose))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();

    if let Some((socket, e)) = fallback {
        warn!(
            "Cannot log to syslog through {}: {}; logging to stderr instead",
            socket.display(),
            e
        );
    }

    LoggingGuard {
        _worker: None,
        syslog: false,
    }
}

/// Sends each formatted event as one RFC 3164 style datagram
pub struct SyslogWriter {
    socket: UnixDatagram,
    pid: u32,
}

impl SyslogWriter {
    pub fn connect(path: &Path) -> io::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(path)?;
        Ok(Self {
            socket,
            pid: std::process::id(),
        })
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let line = text.trim();
        if line.is_empty() {
            return Ok(buf.len());
        }

        let priority = SYSLOG_FACILITY * 8 + severity(line);
        let message = format!("<{}>{}[{}]: {}", priority, SYSLOG_IDENT, self.pid, line);
        self.socket.send(message.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Syslog severity from the level word the fmt layer puts first
fn severity(line: &str) -> u8 {
    match line.split_whitespace().next() {
        Some("ERROR") => 3,
        Some("WARN") => 4,
        Some("INFO") => 6,
        Some("DEBUG") | Some("TRACE") => 7,
        _ => 5,
    }
}
