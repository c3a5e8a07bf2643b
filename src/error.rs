use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by workspace tracking, file watching, task lookup, and the
/// Syskit control-service client.
///
/// Payloads are owned strings and paths so that a single failure can be
/// handed to every awaiter of a shared manifest load.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The workspace has no installation manifest.
    #[error("{}: installation manifest not found", path.display())]
    ManifestNotFound { path: PathBuf },

    /// A manifest or configuration file could not be parsed.
    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Reading or writing a file failed for a reason other than absence.
    #[error("{}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// `autoproj which` could not resolve a command.
    #[error("cannot find {command} in the workspace")]
    Resolution { command: String },

    /// A subprocess could not be started.
    #[error("failed to run {command}: {message}")]
    Spawn { command: String, message: String },

    /// `stop_watching` was called on a path that has no active watch.
    #[error("{}: not being watched", path.display())]
    NotWatched { path: PathBuf },

    /// The platform watcher refused to install a watch.
    #[error("{}: cannot watch: {message}", path.display())]
    Watch { path: PathBuf, message: String },

    /// No task of the requested kind was derived for this path.
    #[error("no {mode} task for {}", path.display())]
    NoSuchTask { mode: String, path: PathBuf },

    /// An HTTP call could not reach the control service.
    #[error("{method} {uri}: {message}")]
    Transport {
        method: String,
        uri: String,
        message: String,
    },

    /// The control service answered with an unexpected status code.
    #[error("{method} {uri} failed: {message}")]
    UnexpectedStatus {
        method: String,
        uri: String,
        status: u16,
        message: String,
    },

    /// A control-service URL could not be parsed.
    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// A cancellable operation was cancelled before it completed.
    #[error("connection attempt interrupted")]
    Interrupted,
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn spawn(command: impl Into<String>, err: &std::io::Error) -> Self {
        Error::Spawn {
            command: command.into(),
            message: err.to_string(),
        }
    }

    /// Returns `true` for the cancellation error, which callers should not
    /// report as a failure of the remote service.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}
