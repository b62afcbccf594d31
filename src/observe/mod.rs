//! Browser collaborator.
//!
//! The pipeline never talks to a browser engine directly. It asks a
//! [`ResourceObserver`] to render a page and hand back the raw event dump,
//! which is then parsed with [`parse_events`]. [`PhantomObserver`] runs a
//! headless PhantomJS process; [`ReplayObserver`] serves a dump recorded
//! earlier.

pub mod event;

pub use event::{parse_events, Header, ResourceEvent};

use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;

/// Error while collecting resource events
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to start collector `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to collect resource events with `{command}` ({status})")]
    Exit { command: String, status: ExitStatus },
    #[error("collector `{command}` wrote non UTF-8 output: {source}")]
    Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("failed to read recorded events from {path}: {source}")]
    Replay {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Something that can render a page and report every resource it loaded.
pub trait ResourceObserver: Send + Sync {
    /// Render `url`, keep it open for `timeout` to catch dynamic loads, and
    /// return the raw JSON event dump.
    fn observe(&self, url: &str, timeout: Duration) -> Result<String, CollectorError>;
}

/// PhantomJS script shipped with the crate, by absolute path.
pub const DEFAULT_SCRIPT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/resource-events.js");

/// Runs `<program> [args..] <script> <url> <timeout-ms>` and captures stdout.
pub struct PhantomObserver {
    program: PathBuf,
    script: PathBuf,
    args: Vec<String>,
}

impl PhantomObserver {
    pub fn new(program: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the script (e.g. `--ignore-ssl-errors=true`).
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command_line(&self, url: &str, timeout_ms: &str) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.push(self.script.display().to_string());
        parts.push(url.to_string());
        parts.push(timeout_ms.to_string());
        parts.join(" ")
    }
}

impl ResourceObserver for PhantomObserver {
    fn observe(&self, url: &str, timeout: Duration) -> Result<String, CollectorError> {
        let timeout_ms = timeout.as_millis().to_string();
        let command = self.command_line(url, &timeout_ms);
        log::info!("Collecting resource events: {}", command);

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.script)
            .arg(url)
            .arg(&timeout_ms)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CollectorError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.stderr.is_empty() {
            log::debug!("collector stderr: {}", String::from_utf8_lossy(&output.stderr).trim_end());
        }
        if !output.status.success() {
            return Err(CollectorError::Exit {
                command,
                status: output.status,
            });
        }

        String::from_utf8(output.stdout).map_err(|source| CollectorError::Output { command, source })
    }
}

/// Serves a previously recorded event dump instead of rendering the page.
pub struct ReplayObserver {
    path: PathBuf,
}

impl ReplayObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResourceObserver for ReplayObserver {
    fn observe(&self, url: &str, _timeout: Duration) -> Result<String, CollectorError> {
        log::info!("Replaying resource events for {} from {}", url, self.path.display());
        std::fs::read_to_string(&self.path).map_err(|source| CollectorError::Replay {
            path: self.path.clone(),
            source,
        })
    }
}
