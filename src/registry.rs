//! Reference-counted mapping of editor folders to workspaces.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::event::{Emitter, Subscription};
use crate::manifest::{ManifestEntry, WorkspaceInfo};
use crate::package::PackageKind;
use crate::workspace::{Workspace, find_workspace_root};

/// Outcome of [`Workspaces::add_folder`].
#[derive(Debug, Clone)]
pub enum AddedFolder {
    /// The folder is not inside any autoproj workspace.
    NotInWorkspace,
    /// The folder is the first one of a workspace that was just created.
    NewWorkspace(Arc<Workspace>),
    /// The folder joined an already registered workspace.
    ExistingWorkspace(Arc<Workspace>),
}

impl AddedFolder {
    /// The workspace the folder resolved to, if any.
    pub fn workspace(&self) -> Option<&Arc<Workspace>> {
        match self {
            AddedFolder::NotInWorkspace => None,
            AddedFolder::NewWorkspace(ws) | AddedFolder::ExistingWorkspace(ws) => Some(ws),
        }
    }

    /// `true` when the workspace was created by this call.
    pub fn is_new(&self) -> bool {
        matches!(self, AddedFolder::NewWorkspace(_))
    }
}

/// Manifest information about one registered folder.
#[derive(Debug, Clone)]
pub struct FolderInfo {
    pub folder: PathBuf,
    pub workspace_root: PathBuf,
    pub entry: ManifestEntry,
}

/// How registered workspaces get their display name.
#[derive(Debug, Clone, Default)]
pub struct Naming {
    /// Workspaces under this folder are named by their relative path.
    pub dev_folder: Option<PathBuf>,
    /// Explicit names by workspace root. Takes precedence over `dev_folder`.
    pub names: BTreeMap<PathBuf, String>,
}

impl Naming {
    fn name_for(&self, root: &Path) -> Option<String> {
        if let Some(name) = self.names.get(root) {
            return Some(name.clone());
        }
        let dev_folder = self.dev_folder.as_ref()?;
        let relative = root.strip_prefix(dev_folder).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(relative.to_string_lossy().into_owned())
    }
}

struct Entry {
    workspace: Arc<Workspace>,
    use_count: usize,
    _info_forwarding: Subscription,
}

#[derive(Default)]
struct State {
    workspaces: IndexMap<PathBuf, Entry>,
    folders: IndexMap<PathBuf, Arc<Workspace>>,
    folder_subscriptions: HashMap<PathBuf, Subscription>,
    folder_entries: HashMap<PathBuf, ManifestEntry>,
}

/// Registry of the workspaces backing the editor's open folders.
///
/// A workspace lives as long as at least one registered folder resolves to
/// its root. Bookkeeping is synchronous; adding and removing folders are
/// atomic with respect to each other.
pub struct Workspaces {
    naming: Naming,
    state: Arc<Mutex<State>>,
    workspace_info: Emitter<Arc<WorkspaceInfo>>,
    folder_info: Emitter<FolderInfo>,
}

impl Default for Workspaces {
    fn default() -> Self {
        Self::new(Naming::default())
    }
}

impl Workspaces {
    /// Creates an empty registry applying `naming` to new workspaces.
    pub fn new(naming: Naming) -> Self {
        Self {
            naming,
            state: Arc::new(Mutex::new(State::default())),
            workspace_info: Emitter::new(),
            folder_info: Emitter::new(),
        }
    }

    /// Registers an editor folder.
    ///
    /// Registering a folder that is already registered changes nothing and
    /// reports its workspace as existing.
    pub fn add_folder(&self, path: &Path) -> AddedFolder {
        let Some(root) = find_workspace_root(path) else {
            tracing::debug!(folder = %path.display(), "folder is not in an autoproj workspace");
            return AddedFolder::NotInWorkspace;
        };

        let mut state = self.state.lock().unwrap();
        if let Some(ws) = state.folders.get(path) {
            return AddedFolder::ExistingWorkspace(ws.clone());
        }

        let result = match state.workspaces.get_mut(&root) {
            Some(entry) => {
                entry.use_count += 1;
                AddedFolder::ExistingWorkspace(entry.workspace.clone())
            }
            None => {
                let workspace = Arc::new(Workspace::new(&root));
                if let Some(name) = self.naming.name_for(&root) {
                    workspace.set_name(name);
                }
                let emitter = self.workspace_info.clone();
                let forwarding = workspace.on_info_updated(move |info| emitter.fire(info));
                state.workspaces.insert(
                    root.clone(),
                    Entry {
                        workspace: workspace.clone(),
                        use_count: 1,
                        _info_forwarding: forwarding,
                    },
                );
                tracing::info!(root = %root.display(), name = %workspace.name(), "registered workspace");
                AddedFolder::NewWorkspace(workspace)
            }
        };

        let Some(workspace) = result.workspace().cloned() else {
            return result;
        };
        state.folders.insert(path.to_path_buf(), workspace.clone());
        let subscription = self.forward_folder_info(&workspace, path);
        state
            .folder_subscriptions
            .insert(path.to_path_buf(), subscription);
        drop(state);
        tracing::debug!(folder = %path.display(), root = %root.display(), "registered folder");

        // A manifest that already resolved will not fire again on its own.
        if let Some(info) = workspace.current_info() {
            apply_folder_info(&self.state, &self.folder_info, path, &info, true);
        }
        result
    }

    fn forward_folder_info(&self, workspace: &Workspace, folder: &Path) -> Subscription {
        let state = Arc::downgrade(&self.state);
        let emitter = self.folder_info.clone();
        let folder = folder.to_path_buf();
        workspace.on_info_updated(move |info| {
            if let Some(state) = state.upgrade() {
                apply_folder_info(&state, &emitter, &folder, info, false);
            }
        })
    }

    /// Unregisters an editor folder.
    ///
    /// Returns the owning workspace when this was its last folder; the caller
    /// is then responsible for disposing it.
    pub fn delete_folder(&self, path: &Path) -> Option<Arc<Workspace>> {
        let mut state = self.state.lock().unwrap();
        let subscription = state.folder_subscriptions.remove(path);
        state.folder_entries.remove(path);
        let workspace = state.folders.shift_remove(path)?;

        let root = workspace.root().to_path_buf();
        let removed = match state.workspaces.get_mut(&root) {
            Some(entry) if entry.use_count > 1 => {
                entry.use_count -= 1;
                None
            }
            Some(_) => state.workspaces.shift_remove(&root).map(|e| e.workspace),
            None => None,
        };
        drop(state);
        drop(subscription);

        tracing::debug!(folder = %path.display(), root = %root.display(), "unregistered folder");
        if removed.is_some() {
            tracing::info!(root = %root.display(), "workspace has no folders left");
        }
        removed
    }

    /// Number of registered folders resolving to `workspace`; 0 if it is not
    /// registered.
    pub fn use_count(&self, workspace: &Workspace) -> usize {
        self.state
            .lock()
            .unwrap()
            .workspaces
            .get(workspace.root())
            .map(|e| e.use_count)
            .unwrap_or(0)
    }

    /// Returns `true` if `path` is in the configuration tree of the workspace
    /// it is registered under.
    pub fn is_config(&self, path: &Path) -> bool {
        self.workspace_for(path)
            .is_some_and(|ws| ws.is_config(path))
    }

    /// Workspace a registered folder belongs to.
    pub fn workspace_for(&self, folder: &Path) -> Option<Arc<Workspace>> {
        self.state.lock().unwrap().folders.get(folder).cloned()
    }

    /// Registered workspace with the given root.
    pub fn workspace(&self, root: &Path) -> Option<Arc<Workspace>> {
        self.state
            .lock()
            .unwrap()
            .workspaces
            .get(root)
            .map(|e| e.workspace.clone())
    }

    /// Last known manifest entry for a registered folder.
    pub fn entry_for(&self, folder: &Path) -> Option<ManifestEntry> {
        self.state
            .lock()
            .unwrap()
            .folder_entries
            .get(folder)
            .cloned()
    }

    /// Kind of a registered folder, if known.
    pub fn package_kind(&self, folder: &Path) -> Option<PackageKind> {
        if self.is_config(folder) {
            return Some(PackageKind::Config);
        }
        self.entry_for(folder).map(|entry| PackageKind::of_entry(&entry))
    }

    /// Snapshot of the registered workspaces, in registration order.
    pub fn workspaces(&self) -> Vec<Arc<Workspace>> {
        self.state
            .lock()
            .unwrap()
            .workspaces
            .values()
            .map(|e| e.workspace.clone())
            .collect()
    }

    /// Snapshot of the registered `(workspace, folder)` pairs, in registration order.
    pub fn folders(&self) -> Vec<(Arc<Workspace>, PathBuf)> {
        self.state
            .lock()
            .unwrap()
            .folders
            .iter()
            .map(|(folder, ws)| (ws.clone(), folder.clone()))
            .collect()
    }

    /// Calls `f` on every workspace, in registration order.
    pub fn for_each_workspace(&self, mut f: impl FnMut(&Arc<Workspace>)) {
        for ws in self.workspaces() {
            f(&ws);
        }
    }

    /// Calls `f` on every registered folder, in registration order.
    pub fn for_each_folder(&self, mut f: impl FnMut(&Arc<Workspace>, &Path)) {
        for (ws, folder) in self.folders() {
            f(&ws, &folder);
        }
    }

    /// Fires whenever any registered workspace's manifest load resolves.
    pub fn on_workspace_info(
        &self,
        listener: impl Fn(&Arc<WorkspaceInfo>) + Send + Sync + 'static,
    ) -> Subscription {
        self.workspace_info.subscribe(listener)
    }

    /// Fires when a resolved manifest contains an entry for a registered folder.
    pub fn on_folder_info(
        &self,
        listener: impl Fn(&FolderInfo) + Send + Sync + 'static,
    ) -> Subscription {
        self.folder_info.subscribe(listener)
    }
}

/// Records the manifest entry of `folder` from `info` and fires `emitter` if
/// there is one. Folders that are no longer registered are left alone. With
/// `skip_known`, an entry equal to the recorded one does not fire again.
fn apply_folder_info(
    state: &Mutex<State>,
    emitter: &Emitter<FolderInfo>,
    folder: &Path,
    info: &WorkspaceInfo,
    skip_known: bool,
) {
    let entry = info.find(folder);
    {
        let mut state = state.lock().unwrap();
        if !state.folders.contains_key(folder) {
            return;
        }
        match &entry {
            Some(entry) => {
                let previous = state.folder_entries.insert(folder.to_path_buf(), entry.clone());
                if skip_known && previous.as_ref() == Some(entry) {
                    return;
                }
            }
            None => {
                state.folder_entries.remove(folder);
            }
        }
    }
    if let Some(entry) = entry {
        emitter.fire(&FolderInfo {
            folder: folder.to_path_buf(),
            workspace_root: info.path.clone(),
            entry,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::tests::{MANIFEST, workspace_dir};

    #[test]
    fn folders_outside_workspaces_are_not_added() {
        let dir = tempfile::tempdir().unwrap();
        if find_workspace_root(dir.path()).is_some() {
            return;
        }
        let registry = Workspaces::default();
        assert!(matches!(
            registry.add_folder(dir.path()),
            AddedFolder::NotInWorkspace
        ));
        assert!(registry.workspaces().is_empty());
        assert!(registry.folders().is_empty());
    }

    #[test]
    fn use_count_tracks_folders_of_one_root() {
        let dir = workspace_dir(None);
        let root = dir.path();
        let pkg = root.join("drivers").join("iodrivers_base");
        let registry = Workspaces::default();

        let first = registry.add_folder(root);
        assert!(first.is_new());
        let ws = first.workspace().unwrap().clone();

        let second = registry.add_folder(&pkg);
        assert!(!second.is_new());
        assert!(Arc::ptr_eq(second.workspace().unwrap(), &ws));
        assert_eq!(registry.use_count(&ws), 2);

        assert!(registry.delete_folder(&pkg).is_none());
        assert_eq!(registry.use_count(&ws), 1);

        let removed = registry.delete_folder(root).unwrap();
        assert!(Arc::ptr_eq(&removed, &ws));
        assert_eq!(registry.use_count(&ws), 0);

        let mut seen = 0;
        registry.for_each_workspace(|_| seen += 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn re_adding_a_folder_does_not_inflate_use_count() {
        let dir = workspace_dir(None);
        let registry = Workspaces::default();
        let ws = registry.add_folder(dir.path()).workspace().unwrap().clone();
        assert!(!registry.add_folder(dir.path()).is_new());
        assert_eq!(registry.use_count(&ws), 1);
        assert!(registry.delete_folder(dir.path()).is_some());
    }

    #[test]
    fn deleting_unknown_folder_is_a_no_op() {
        let registry = Workspaces::default();
        assert!(registry.delete_folder(Path::new("/nowhere")).is_none());
    }

    #[test]
    fn iteration_follows_registration_order() {
        let a = workspace_dir(None);
        let b = workspace_dir(None);
        let registry = Workspaces::default();
        registry.add_folder(b.path());
        registry.add_folder(a.path());
        registry.add_folder(&b.path().join("drivers").join("iodrivers_base"));

        let roots: Vec<PathBuf> = registry
            .workspaces()
            .iter()
            .map(|ws| ws.root().to_path_buf())
            .collect();
        assert_eq!(roots, vec![b.path().to_path_buf(), a.path().to_path_buf()]);

        let mut folders = Vec::new();
        registry.for_each_folder(|_, folder| folders.push(folder.to_path_buf()));
        assert_eq!(folders.len(), 3);
        assert_eq!(folders[0], b.path());
        assert_eq!(folders[1], a.path());
    }

    #[test]
    fn naming_override_applies_to_new_workspaces() {
        let dir = workspace_dir(None);
        let dev_folder = dir.path().parent().unwrap().parent().unwrap().to_path_buf();
        let expected = dir.path().strip_prefix(&dev_folder).unwrap().to_path_buf();
        let registry = Workspaces::new(Naming {
            dev_folder: Some(dev_folder),
            names: BTreeMap::new(),
        });
        let ws = registry.add_folder(dir.path()).workspace().unwrap().clone();
        assert_eq!(ws.name(), expected.to_string_lossy());

        let other = workspace_dir(None);
        let registry = Workspaces::new(Naming {
            dev_folder: None,
            names: BTreeMap::from([(other.path().to_path_buf(), "main".to_string())]),
        });
        let ws = registry.add_folder(other.path()).workspace().unwrap().clone();
        assert_eq!(ws.name(), "main");
    }

    #[test]
    fn is_config_uses_the_owning_workspace() {
        let dir = workspace_dir(None);
        let config = dir.path().join("autoproj");
        std::fs::create_dir_all(&config).unwrap();
        let registry = Workspaces::default();
        registry.add_folder(&config);

        assert!(registry.is_config(&config));
        assert!(!registry.is_config(dir.path()));
        assert_eq!(registry.package_kind(&config), Some(PackageKind::Config));
    }

    #[tokio::test]
    async fn folder_info_only_fires_for_matching_folders() {
        let dir = workspace_dir(Some(MANIFEST));
        let root = dir.path().to_path_buf();
        let pkg = root.join("drivers").join("iodrivers_base");
        let registry = Workspaces::default();

        let workspace_events = Arc::new(Mutex::new(0));
        let folder_events = Arc::new(Mutex::new(Vec::new()));
        let w = workspace_events.clone();
        let _ws_sub = registry.on_workspace_info(move |_| *w.lock().unwrap() += 1);
        let f = folder_events.clone();
        let _folder_sub =
            registry.on_folder_info(move |info| f.lock().unwrap().push(info.folder.clone()));

        let ws = registry.add_folder(&root).workspace().unwrap().clone();
        registry.add_folder(&pkg);
        ws.info().await.unwrap();

        assert_eq!(*workspace_events.lock().unwrap(), 1);
        assert_eq!(*folder_events.lock().unwrap(), vec![pkg.clone()]);
        assert_eq!(registry.package_kind(&pkg), Some(PackageKind::Cxx));
        assert_eq!(registry.entry_for(&root), None);

        registry.delete_folder(&pkg);
        ws.reload().await.unwrap();
        assert_eq!(*workspace_events.lock().unwrap(), 2);
        assert_eq!(folder_events.lock().unwrap().len(), 1);
        assert_eq!(registry.entry_for(&pkg), None);
    }

    #[tokio::test]
    async fn folder_joining_a_loaded_workspace_gets_its_entry() {
        let dir = workspace_dir(Some(MANIFEST));
        let root = dir.path().to_path_buf();
        let pkg = root.join("drivers").join("iodrivers_base");
        let registry = Workspaces::default();

        let folder_events = Arc::new(Mutex::new(Vec::new()));
        let f = folder_events.clone();
        let _sub = registry.on_folder_info(move |info| f.lock().unwrap().push(info.folder.clone()));

        let ws = registry.add_folder(&root).workspace().unwrap().clone();
        ws.info().await.unwrap();
        assert!(folder_events.lock().unwrap().is_empty());

        assert!(!registry.add_folder(&pkg).is_new());
        assert_eq!(registry.package_kind(&pkg), Some(PackageKind::Cxx));
        assert!(matches!(
            registry.entry_for(&pkg),
            Some(ManifestEntry::Package(p)) if p.name == "drivers/iodrivers_base"
        ));
        assert_eq!(*folder_events.lock().unwrap(), vec![pkg.clone()]);

        // Awaiting the cached generation again does not repeat the event.
        ws.info().await.unwrap();
        assert_eq!(folder_events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn folder_deleted_during_a_load_stays_unindexed() {
        let dir = workspace_dir(Some(MANIFEST));
        let root = dir.path().to_path_buf();
        let pkg = root.join("drivers").join("iodrivers_base");
        let registry = Workspaces::default();

        let folder_events = Arc::new(Mutex::new(0));
        let f = folder_events.clone();
        let _sub = registry.on_folder_info(move |_| *f.lock().unwrap() += 1);

        let ws = registry.add_folder(&root).workspace().unwrap().clone();
        registry.add_folder(&pkg);
        let load = ws.info();
        assert!(registry.delete_folder(&pkg).is_none());

        load.await.unwrap();
        assert_eq!(registry.entry_for(&pkg), None);
        assert_eq!(registry.package_kind(&pkg), None);
        assert_eq!(*folder_events.lock().unwrap(), 0);
    }
}
