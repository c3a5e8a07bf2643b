//! Build, update, and maintenance tasks derived from the registered folders.
//!
//! Each workspace gets a fixed battery of workspace-wide tasks, and each
//! registered package folder (other than the root and configuration folders)
//! gets its own battery targeting that folder. The whole set is recomputed on
//! every [`TaskProvider::reload`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::process::{self, LaunchedProcess};
use crate::registry::Workspaces;
use crate::workspace::Workspace;

const BUILD_PROBLEM_MATCHERS: &[&str] = &[
    "$autoproj-cmake-configure-error",
    "$autoproj-cmake-configure-warning",
    "$autoproj-gcc-compile-error",
    "$autoproj-gcc-compile-warning",
    "$autoproj-orogen-error",
];
const UPDATE_PROBLEM_MATCHERS: &[&str] = &["$autoproj"];

const UPDATE_ARGS: &[&str] = &["update", "--progress=f", "-k", "--color"];

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMode {
    Watch,
    Build,
    ForceBuild,
    Checkout,
    Update,
    UpdateConfig,
    Osdeps,
}

impl TaskMode {
    /// Short lowercase label, used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Watch => "watch",
            TaskMode::Build => "build",
            TaskMode::ForceBuild => "force-build",
            TaskMode::Checkout => "checkout",
            TaskMode::Update => "update",
            TaskMode::UpdateConfig => "update-config",
            TaskMode::Osdeps => "osdeps",
        }
    }

    fn problem_matchers(&self) -> &'static [&'static str] {
        match self {
            TaskMode::Build | TaskMode::ForceBuild => BUILD_PROBLEM_MATCHERS,
            TaskMode::Checkout | TaskMode::Update | TaskMode::UpdateConfig => {
                UPDATE_PROBLEM_MATCHERS
            }
            TaskMode::Watch | TaskMode::Osdeps => &[],
        }
    }

    fn group(&self) -> Option<TaskGroup> {
        match self {
            TaskMode::Build | TaskMode::ForceBuild => Some(TaskGroup::Build),
            _ => None,
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Editor task group a task is listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskGroup {
    Build,
}

/// A declarative task definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Display name, prefixed with the workspace name.
    pub name: String,
    pub mode: TaskMode,
    /// Root of the workspace the task runs in.
    pub workspace: PathBuf,
    /// Target package folder; `None` for workspace-wide tasks.
    pub folder: Option<PathBuf>,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub group: Option<TaskGroup>,
    pub problem_matchers: Vec<&'static str>,
}

/// Current state of a running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Finished { success: bool, duration: Duration },
}

/// Handles returned by [`Task::spawn`].
pub struct TaskRun {
    /// Process group ID of the task.
    pub pid: u32,
    /// Raw stdout/stderr lines.
    pub output_rx: mpsc::Receiver<String>,
    /// Latest status; becomes `Finished` when the process exits.
    pub status_rx: watch::Receiver<TaskStatus>,
}

impl TaskRun {
    /// Sends SIGTERM to the task's process group.
    pub fn cancel(&self) {
        process::terminate_group(self.pid);
    }

    /// Waits for the task to exit and returns whether it succeeded.
    pub async fn wait(&mut self) -> bool {
        loop {
            if let TaskStatus::Finished { success, .. } = *self.status_rx.borrow_and_update() {
                return success;
            }
            if self.status_rx.changed().await.is_err() {
                return matches!(
                    *self.status_rx.borrow(),
                    TaskStatus::Finished { success: true, .. }
                );
            }
        }
    }
}

impl Task {
    fn new(workspace: &Workspace, mode: TaskMode, name: String, args: &[&str]) -> Self {
        Self {
            name: format!("{}: {}", workspace.name(), name),
            mode,
            workspace: workspace.root().to_path_buf(),
            folder: None,
            program: workspace.autoproj_exe_path(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: workspace.root().to_path_buf(),
            group: mode.group(),
            problem_matchers: mode.problem_matchers().to_vec(),
        }
    }

    fn for_folder(
        workspace: &Workspace,
        folder: &Path,
        mode: TaskMode,
        action: &str,
        args: &[&str],
    ) -> Self {
        let relative = folder.strip_prefix(workspace.root()).unwrap_or(folder);
        let mut task = Self::new(
            workspace,
            mode,
            format!("{action} {}", relative.display()),
            args,
        );
        task.args.push(folder.to_string_lossy().into_owned());
        task.folder = Some(folder.to_path_buf());
        task
    }

    /// The path this task is looked up by.
    pub fn target(&self) -> &Path {
        self.folder.as_deref().unwrap_or(&self.workspace)
    }

    /// Returns the full command line as a display string.
    pub fn command_line(&self) -> String {
        process::command_label(&self.program, &self.args)
    }

    /// Builds the command this task runs.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.cwd);
        cmd
    }

    /// Starts the task in its own process group.
    pub fn spawn(&self) -> Result<TaskRun> {
        let label = self.command_line();
        let LaunchedProcess {
            pid,
            mut child,
            output_rx,
        } = process::spawn_piped(&label, &mut self.command())?;
        tracing::info!(task = %self.name, pid, "started task");

        let (status_tx, status_rx) = watch::channel(TaskStatus::Running);
        let start_time = Instant::now();
        let name = self.name.clone();
        tokio::spawn(async move {
            let result = child.wait().await;
            let duration = start_time.elapsed();
            let success = result.as_ref().map(|s| s.success()).unwrap_or(false);
            tracing::info!(task = %name, ?result, ?duration, "task finished");
            let _ = status_tx.send(TaskStatus::Finished { success, duration });
        });

        Ok(TaskRun {
            pid,
            output_rx,
            status_rx,
        })
    }
}

fn workspace_tasks(ws: &Workspace) -> Vec<Task> {
    let checkout: Vec<&str> = [UPDATE_ARGS, &["--checkout-only"][..]].concat();
    let config: Vec<&str> = [UPDATE_ARGS, &["--config"][..]].concat();
    vec![
        Task::new(ws, TaskMode::Watch, "Watch".into(), &["watch", "--show-events"]),
        Task::new(ws, TaskMode::Build, "Build all packages".into(), &["build", "--tool"]),
        Task::new(ws, TaskMode::Checkout, "Checkout missing packages".into(), &checkout),
        Task::new(ws, TaskMode::Osdeps, "Install OS Dependencies".into(), &["osdeps", "--color"]),
        Task::new(ws, TaskMode::UpdateConfig, "Update Configuration".into(), &config),
        Task::new(ws, TaskMode::Update, "Update all packages".into(), UPDATE_ARGS),
    ]
}

fn folder_tasks(ws: &Workspace, folder: &Path) -> Vec<Task> {
    let checkout: Vec<&str> = [UPDATE_ARGS, &["--checkout-only"][..]].concat();
    vec![
        Task::for_folder(ws, folder, TaskMode::Build, "Build", &["build", "--tool"]),
        Task::for_folder(
            ws,
            folder,
            TaskMode::ForceBuild,
            "Force Build",
            &["build", "--tool", "--force", "--deps=f", "--no-confirm"],
        ),
        Task::for_folder(ws, folder, TaskMode::Update, "Update", UPDATE_ARGS),
        Task::for_folder(ws, folder, TaskMode::Checkout, "Checkout", &checkout),
    ]
}

/// The current task set, indexed by mode and target path.
#[derive(Debug, Default)]
pub struct TaskProvider {
    tasks: Vec<Task>,
    index: HashMap<(TaskMode, PathBuf), usize>,
}

impl TaskProvider {
    /// Creates an empty task set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards every task and derives a fresh set from `registry`.
    pub fn reload(&mut self, registry: &Workspaces) {
        self.tasks.clear();
        self.index.clear();

        registry.for_each_workspace(|ws| {
            for task in workspace_tasks(ws) {
                self.insert(task);
            }
        });
        registry.for_each_folder(|ws, folder| {
            // Folders not found in the manifest yet still get their battery.
            let buildable = registry
                .package_kind(folder)
                .is_none_or(|kind| kind.is_buildable());
            if folder == ws.root() || !buildable {
                return;
            }
            for task in folder_tasks(ws, folder) {
                self.insert(task);
            }
        });
        tracing::debug!(count = self.tasks.len(), "reloaded tasks");
    }

    fn insert(&mut self, task: Task) {
        self.index
            .insert((task.mode, task.target().to_path_buf()), self.tasks.len());
        self.tasks.push(task);
    }

    /// Every task, workspace batteries first, in registration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Looks up the `mode` task for a workspace root or package folder.
    pub fn task(&self, mode: TaskMode, path: &Path) -> Result<&Task> {
        self.index
            .get(&(mode, path.to_path_buf()))
            .map(|&i| &self.tasks[i])
            .ok_or_else(|| Error::NoSuchTask {
                mode: mode.to_string(),
                path: path.to_path_buf(),
            })
    }

    /// `autoproj watch` task of a workspace.
    pub fn watch_task(&self, root: &Path) -> Result<&Task> {
        self.task(TaskMode::Watch, root)
    }

    /// Build task of a workspace root or package folder.
    pub fn build_task(&self, path: &Path) -> Result<&Task> {
        self.task(TaskMode::Build, path)
    }

    /// Forced rebuild of a package folder.
    pub fn force_build_task(&self, path: &Path) -> Result<&Task> {
        self.task(TaskMode::ForceBuild, path)
    }

    /// Update task of a workspace root or package folder.
    pub fn update_task(&self, path: &Path) -> Result<&Task> {
        self.task(TaskMode::Update, path)
    }

    /// Checkout task of a workspace root or package folder.
    pub fn checkout_task(&self, path: &Path) -> Result<&Task> {
        self.task(TaskMode::Checkout, path)
    }

    /// OS dependency installation task of a workspace.
    pub fn osdeps_task(&self, root: &Path) -> Result<&Task> {
        self.task(TaskMode::Osdeps, root)
    }

    /// Configuration update task of a workspace.
    pub fn update_config_task(&self, root: &Path) -> Result<&Task> {
        self.task(TaskMode::UpdateConfig, root)
    }
}
