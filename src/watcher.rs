//! Debounced single-file change notification.
//!
//! Watches are installed on the parent directory and filtered by file name:
//! editors and tools commonly save by writing a temporary file and renaming
//! it over the original, which a watch on the file itself would lose.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Error, Result};

/// Default quiet period after a notification during which further events
/// for the same file are dropped.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

type Callback = Arc<dyn Fn(&Path) + Send + Sync>;

/// Leading-edge debounce: the first event fires, followed events are
/// suppressed until `window` has elapsed since the last accepted one.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    last_fired: Option<Instant>,
}

impl Debounce {
    /// Creates a debounce that has never fired.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: None,
        }
    }

    /// Returns `true` if an event at `now` should be delivered.
    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last_fired {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }
}

struct WatchedFile {
    path: PathBuf,
    file_name: OsString,
    debounce: Mutex<Debounce>,
    callback: Callback,
}

impl WatchedFile {
    fn handle(&self, event: &notify::Event) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        ) {
            return;
        }
        let concerns_file = event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(self.file_name.as_os_str()));
        if !concerns_file {
            return;
        }
        if self.debounce.lock().unwrap().accept(Instant::now()) {
            tracing::debug!(path = %self.path.display(), kind = ?event.kind, "watched file changed");
            (self.callback)(&self.path);
        }
    }
}

/// Watches individual files and reports changes at most once per debounce
/// window per file.
pub struct FileWatcher {
    window: Duration,
    watches: Mutex<HashMap<PathBuf, RecommendedWatcher>>,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWatcher {
    /// Creates a watcher using [`DEBOUNCE_WINDOW`].
    pub fn new() -> Self {
        Self::with_window(DEBOUNCE_WINDOW)
    }

    /// Creates a watcher with a custom debounce window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Starts watching `path`, calling `callback` with the path on change.
    ///
    /// Returns `Ok(false)` without doing anything if `path` is already
    /// watched.
    pub fn start_watching(
        &self,
        path: &Path,
        callback: impl Fn(&Path) + Send + Sync + 'static,
    ) -> Result<bool> {
        let mut watches = self.watches.lock().unwrap();
        if watches.contains_key(path) {
            return Ok(false);
        }

        let watch_error = |message: String| Error::Watch {
            path: path.to_path_buf(),
            message,
        };
        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(watch_error("not a file path".to_string()));
        };

        let watched = Arc::new(WatchedFile {
            path: path.to_path_buf(),
            file_name: file_name.to_os_string(),
            debounce: Mutex::new(Debounce::new(self.window)),
            callback: Arc::new(callback),
        });

        let handler = watched.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => handler.handle(&event),
                Err(err) => tracing::warn!(path = %handler.path.display(), "watch error: {err}"),
            }
        })
        .map_err(|e| watch_error(e.to_string()))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(e.to_string()))?;

        watches.insert(path.to_path_buf(), watcher);
        tracing::debug!(path = %path.display(), "started watching");
        Ok(true)
    }

    /// Stops watching `path`.
    pub fn stop_watching(&self, path: &Path) -> Result<()> {
        match self.watches.lock().unwrap().remove(path) {
            Some(_) => {
                tracing::debug!(path = %path.display(), "stopped watching");
                Ok(())
            }
            None => Err(Error::NotWatched {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Returns `true` if `path` has an active watch.
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watches.lock().unwrap().contains_key(path)
    }

    /// Releases every watch.
    pub fn dispose(&self) {
        self.watches.lock().unwrap().clear();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}
