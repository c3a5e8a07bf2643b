//! Rock/autoproj workspace library for editor integrations: workspace
//! discovery and manifest tracking, folder-to-workspace bookkeeping, derived
//! build/update tasks, and a client for the Syskit control service.
//!
//! Optional features: `syskit` (on by default) for the control-service client.

/// Runtime configuration loaded from JSON.
pub mod config;
pub mod error;
/// Listener lists and subscription handles.
pub mod event;
/// Editor folder reconciliation.
pub mod manager;
/// Installation manifest loading and lookup.
pub mod manifest;
pub mod package;
/// Process spawning, output streaming, and process-group termination.
pub mod process;
/// Folder-to-workspace registry with use counting.
pub mod registry;
pub mod shell;
/// Syskit control-service client (requires `syskit` feature).
#[cfg(feature = "syskit")]
pub mod syskit;
/// Build, update, and maintenance task derivation and execution.
pub mod tasks;
/// Debounced file watching.
pub mod watcher;
/// Workspace roots, cached manifest loads, and disposal.
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};
pub use event::Subscription;
pub use manager::WorkspaceManager;
pub use manifest::{ManifestEntry, Package, PackageSet, Vcs, WorkspaceInfo};
pub use package::PackageKind;
pub use registry::{AddedFolder, FolderInfo, Naming, Workspaces};
pub use shell::Shell;
#[cfg(feature = "syskit")]
pub use syskit::{AvailableDeployment, CommandLine, Connection, DeployedTask};
pub use tasks::{Task, TaskGroup, TaskMode, TaskProvider, TaskRun, TaskStatus};
pub use watcher::FileWatcher;
pub use workspace::{Workspace, find_workspace_root};
