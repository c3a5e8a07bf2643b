//! Keeps the registry, the manifest watches, and the task set in step with
//! the editor's folder list.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;

use crate::config::Config;
use crate::registry::{AddedFolder, Workspaces};
use crate::shell::Shell;
use crate::tasks::TaskProvider;
use crate::watcher::FileWatcher;
use crate::workspace::Workspace;

/// Reconciles editor folder events with workspace state.
///
/// New workspaces get a manifest watch (reloading the workspace on change)
/// and an initial manifest load. Failures in either are reported through
/// [`Shell::show_error`] rather than returned, since they happen in the
/// background.
pub struct WorkspaceManager {
    registry: Arc<Workspaces>,
    tasks: Mutex<TaskProvider>,
    watcher: FileWatcher,
    shell: Arc<dyn Shell>,
    start_watch: bool,
    runtime: Handle,
}

impl WorkspaceManager {
    /// Creates a manager on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(shell: Arc<dyn Shell>, config: &Config) -> Self {
        Self::with_runtime(shell, config, Handle::current())
    }

    /// Creates a manager that spawns background work on `runtime`.
    pub fn with_runtime(shell: Arc<dyn Shell>, config: &Config, runtime: Handle) -> Self {
        Self {
            registry: Arc::new(Workspaces::new(config.naming())),
            tasks: Mutex::new(TaskProvider::new()),
            watcher: FileWatcher::with_window(config.debounce()),
            shell,
            start_watch: config.start_watch,
            runtime,
        }
    }

    /// The underlying folder/workspace registry.
    pub fn registry(&self) -> &Arc<Workspaces> {
        &self.registry
    }

    /// The current task set.
    pub fn tasks(&self) -> MutexGuard<'_, TaskProvider> {
        self.tasks.lock().unwrap()
    }

    /// Registers every folder the shell currently has open.
    pub fn initialize(&self) {
        for folder in self.shell.workspace_folders() {
            self.add_folder(&folder);
        }
        self.reload_tasks();
    }

    /// Applies an editor folder change: removals first, then additions, then
    /// a single task recomputation.
    pub fn folders_changed(&self, added: &[PathBuf], removed: &[PathBuf]) {
        for folder in removed {
            self.remove_folder(folder);
        }
        for folder in added {
            self.add_folder(folder);
        }
        self.reload_tasks();
    }

    /// Recomputes the task set from the registry.
    pub fn reload_tasks(&self) {
        self.tasks.lock().unwrap().reload(&self.registry);
    }

    fn add_folder(&self, folder: &Path) -> AddedFolder {
        let added = self.registry.add_folder(folder);
        if let AddedFolder::NewWorkspace(ws) = &added {
            self.setup_workspace(ws);
        }
        added
    }

    fn remove_folder(&self, folder: &Path) {
        let Some(ws) = self.registry.delete_folder(folder) else {
            return;
        };
        if let Err(err) = self.watcher.stop_watching(&ws.installation_manifest_path()) {
            self.shell.show_error(&err.to_string());
        }
        ws.dispose();
        tracing::info!(root = %ws.root().display(), "workspace closed");
    }

    fn setup_workspace(&self, ws: &Arc<Workspace>) {
        let manifest = ws.installation_manifest_path();
        let weak = Arc::downgrade(ws);
        let shell = self.shell.clone();
        let runtime = self.runtime.clone();
        let watched = self.watcher.start_watching(&manifest, move |path| {
            let Some(ws) = weak.upgrade() else {
                return;
            };
            tracing::info!(path = %path.display(), "installation manifest changed");
            let shell = shell.clone();
            runtime.spawn(async move {
                if let Err(err) = ws.reload().await {
                    shell.show_error(&err.to_string());
                }
            });
        });
        if let Err(err) = watched {
            self.shell.show_error(&err.to_string());
        }

        let load = ws.info();
        let shell = self.shell.clone();
        self.runtime.spawn(async move {
            if let Err(err) = load.await {
                shell.show_error(&err.to_string());
            }
        });

        if self.start_watch {
            let _guard = self.runtime.enter();
            if let Err(err) = ws.start_watch() {
                self.shell.show_error(&err.to_string());
            }
        }
    }

    /// Closes every workspace and releases every watch.
    pub fn dispose(&self) {
        for (_, folder) in self.registry.folders() {
            self.remove_folder(&folder);
        }
        self.watcher.dispose();
        self.reload_tasks();
    }
}

impl Drop for WorkspaceManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
