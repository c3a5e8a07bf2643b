use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::process::{Child, Command};

use crate::error::{Error, Result};
use crate::event::{Emitter, Subscription};
use crate::manifest::{self, CONFIG_DIR, METADATA_DIR, WorkspaceInfo};
use crate::process::{self, LaunchedProcess};

/// A manifest load shared by every caller that asked for it.
///
/// Cloning yields a handle on the same load; two handles refer to the same
/// generation iff [`Shared::ptr_eq`] holds.
pub type InfoFuture = Shared<BoxFuture<'static, Result<Arc<WorkspaceInfo>>>>;

type Disposer = Box<dyn FnOnce() + Send>;

/// Walks upward from `path` and returns the first directory containing the
/// `.autoproj` metadata directory.
pub fn find_workspace_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| dir.join(METADATA_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// Returns the path of the workspace's own autoproj entry point.
pub fn autoproj_exe_path(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join("bin").join("autoproj")
}

/// An autoproj workspace rooted at the directory holding `.autoproj/`.
///
/// The installation manifest is loaded lazily and the in-flight load itself
/// is cached, so concurrent [`info`](Self::info) calls share one read.
pub struct Workspace {
    root: PathBuf,
    name: Mutex<String>,
    info: Mutex<Option<InfoFuture>>,
    info_updated: Emitter<Arc<WorkspaceInfo>>,
    disposables: Mutex<Option<Vec<Disposer>>>,
}

impl Workspace {
    /// Creates a workspace for `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(".")
            .to_string();
        Self {
            root,
            name: Mutex::new(name),
            info: Mutex::new(None),
            info_updated: Emitter::new(),
            disposables: Mutex::new(Some(Vec::new())),
        }
    }

    /// Creates the workspace owning `path`, if any.
    pub fn from_dir(path: &Path) -> Option<Self> {
        find_workspace_root(path).map(Self::new)
    }

    /// Directory holding `.autoproj/`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the display name (the root's basename unless overridden).
    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    /// Overrides the display name.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().unwrap() = name.into();
    }

    /// Path of this workspace's `autoproj` entry point.
    pub fn autoproj_exe_path(&self) -> PathBuf {
        autoproj_exe_path(&self.root)
    }

    /// Path of this workspace's installation manifest.
    pub fn installation_manifest_path(&self) -> PathBuf {
        manifest::installation_manifest_path(&self.root)
    }

    /// Returns `true` if `path` is inside the build configuration
    /// (`autoproj/`) or metadata (`.autoproj/`) trees.
    pub fn is_config(&self, path: &Path) -> bool {
        path.starts_with(self.root.join(CONFIG_DIR)) || path.starts_with(self.root.join(METADATA_DIR))
    }

    /// Returns the current manifest load, starting one if none is cached.
    ///
    /// A failed load stays cached until [`reload`](Self::reload).
    pub fn info(&self) -> InfoFuture {
        self.info
            .lock()
            .unwrap()
            .get_or_insert_with(|| self.load_info())
            .clone()
    }

    /// Snapshot of the current generation if its load already succeeded.
    ///
    /// Never starts a load.
    pub fn current_info(&self) -> Option<Arc<WorkspaceInfo>> {
        self.info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|load| load.peek())
            .and_then(|result| result.as_ref().ok())
            .cloned()
    }

    /// Starts a new manifest load and makes it the current generation.
    ///
    /// Callers already awaiting the previous generation still receive its
    /// result.
    pub fn reload(&self) -> InfoFuture {
        let load = self.load_info();
        *self.info.lock().unwrap() = Some(load.clone());
        tracing::debug!(root = %self.root.display(), "reloading installation manifest");
        load
    }

    fn load_info(&self) -> InfoFuture {
        let root = self.root.clone();
        let info_updated = self.info_updated.clone();
        async move {
            let info = Arc::new(manifest::load(&root).await?);
            info_updated.fire(&info);
            Ok(info)
        }
        .boxed()
        .shared()
    }

    /// Registers a listener fired once per successfully resolved load.
    pub fn on_info_updated(
        &self,
        listener: impl Fn(&Arc<WorkspaceInfo>) + Send + Sync + 'static,
    ) -> Subscription {
        self.info_updated.subscribe(listener)
    }

    /// Runs `autoproj envsh` to refresh the workspace environment.
    ///
    /// On success the manifest is reloaded and the new snapshot returned. If
    /// the refresh fails (nonzero exit, signal, or spawn failure) nothing is
    /// reloaded and the currently cached snapshot is returned instead.
    pub async fn envsh(&self) -> Result<Arc<WorkspaceInfo>> {
        let mut cmd = self.autoproj_command(["envsh"]);
        let status = match process::spawn_piped("autoproj envsh", &mut cmd) {
            Ok(LaunchedProcess { mut child, .. }) => child.wait().await.ok(),
            Err(err) => {
                tracing::warn!(root = %self.root.display(), "{err}");
                None
            }
        };

        match status {
            Some(status) if status.success() => self.reload().await,
            status => {
                tracing::warn!(
                    root = %self.root.display(),
                    ?status,
                    "autoproj envsh failed, keeping current workspace info"
                );
                self.info().await
            }
        }
    }

    /// Resolves `command` within the workspace environment via `autoproj which`.
    pub async fn which(&self, command: &str) -> Result<PathBuf> {
        let label = format!("autoproj which {command}");
        let output = self
            .autoproj_command(["which", command])
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| Error::spawn(&label, &e))?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::debug!(command = %label, stream = "stderr", "{line}");
        }

        if !output.status.success() {
            return Err(Error::Resolution {
                command: command.to_string(),
            });
        }
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(PathBuf::from(path))
    }

    /// Builds a command running the workspace's autoproj with `args`, in the
    /// workspace root.
    pub fn autoproj_command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(self.autoproj_exe_path());
        cmd.args(args).current_dir(&self.root);
        cmd
    }

    /// Spawns `autoproj <subcommand> <args...>` and returns the live child.
    ///
    /// Output is piped and left for the caller to consume.
    pub fn autoproj_exec(&self, subcommand: &str, args: &[&str]) -> Result<Child> {
        let mut cmd = self.autoproj_command(std::iter::once(subcommand).chain(args.iter().copied()));
        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        cmd.spawn()
            .map_err(|e| Error::spawn(format!("autoproj {subcommand}"), &e))
    }

    /// Starts `autoproj watch` in the background. The process group is
    /// terminated when the workspace is disposed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start_watch(&self) -> Result<u32> {
        let mut cmd = self.autoproj_command(["watch", "--show-events"]);
        let LaunchedProcess { pid, mut child, .. } =
            process::spawn_piped("autoproj watch", &mut cmd)?;
        tracing::info!(root = %self.root.display(), pid, "started autoproj watch");

        tokio::spawn(async move {
            let status = child.wait().await;
            tracing::debug!(pid, ?status, "autoproj watch exited");
        });
        self.subscribe(move || process::terminate_group(pid));
        Ok(pid)
    }

    /// Adds a cleanup action run once by [`dispose`](Self::dispose).
    ///
    /// On an already-disposed workspace the action runs immediately.
    pub fn subscribe(&self, cleanup: impl FnOnce() + Send + 'static) {
        let mut disposables = self.disposables.lock().unwrap();
        match disposables.as_mut() {
            Some(list) => list.push(Box::new(cleanup)),
            None => {
                drop(disposables);
                cleanup();
            }
        }
    }

    /// Keeps `subscription` alive until the workspace is disposed.
    pub fn hold(&self, subscription: Subscription) {
        self.subscribe(move || subscription.dispose());
    }

    /// Runs every registered cleanup action. Later calls do nothing.
    pub fn dispose(&self) {
        let disposables = self.disposables.lock().unwrap().take();
        for cleanup in disposables.into_iter().flatten() {
            cleanup();
        }
        tracing::debug!(root = %self.root.display(), "disposed workspace");
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposables.lock().unwrap().is_none()
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const MANIFEST: &str = "\
- name: drivers/iodrivers_base
  type: Autobuild::CMake
  vcs:
    type: local
  srcdir: drivers/iodrivers_base
  builddir:
  logdir: install/log
  prefix: install
  dependencies: []
";

    pub(crate) fn workspace_dir(manifest: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(METADATA_DIR).join("bin")).unwrap();
        std::fs::create_dir_all(dir.path().join("drivers").join("iodrivers_base")).unwrap();
        if let Some(manifest) = manifest {
            std::fs::write(manifest::installation_manifest_path(dir.path()), manifest).unwrap();
        }
        dir
    }

    #[cfg(unix)]
    pub(crate) fn fake_autoproj(root: &Path, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = autoproj_exe_path(root);
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn count_updates(ws: &Workspace) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = ws.on_info_updated(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn root_discovery_walks_upward() {
        let dir = workspace_dir(None);
        let root = dir.path().to_path_buf();
        let deep = root.join("a").join("b").join("c");
        std::fs::create_dir_all(&deep).unwrap();

        assert_eq!(find_workspace_root(&root), Some(root.clone()));
        assert_eq!(find_workspace_root(&deep), Some(root.clone()));
        assert_eq!(
            find_workspace_root(&root.join("drivers").join("iodrivers_base")),
            Some(root)
        );
    }

    #[test]
    fn root_discovery_without_marker_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("x");
        std::fs::create_dir_all(&sub).unwrap();
        // The temp directory itself must not sit inside a workspace for this to hold.
        if find_workspace_root(dir.path()).is_none() {
            assert_eq!(find_workspace_root(&sub), None);
        }
    }

    #[test]
    fn name_defaults_to_basename() {
        let ws = Workspace::new("/home/user/dev/rock");
        assert_eq!(ws.name(), "rock");
        ws.set_name("flat_fish");
        assert_eq!(ws.name(), "flat_fish");
    }

    #[test]
    fn is_config_covers_both_config_trees() {
        let ws = Workspace::new("/ws");
        assert!(ws.is_config(Path::new("/ws/autoproj")));
        assert!(ws.is_config(Path::new("/ws/autoproj/remotes/rock.core")));
        assert!(ws.is_config(Path::new("/ws/.autoproj")));
        assert!(!ws.is_config(Path::new("/ws/drivers/iodrivers_base")));
        assert!(!ws.is_config(Path::new("/ws/autoproj_extra")));
    }

    #[tokio::test]
    async fn concurrent_info_calls_share_one_load() {
        let dir = workspace_dir(Some(MANIFEST));
        let ws = Workspace::new(dir.path());
        let (count, _sub) = count_updates(&ws);

        let first = ws.info();
        let second = ws.info();
        assert!(Shared::ptr_eq(&first, &second));

        let (a, b) = tokio::join!(first, second);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        ws.info().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reload_starts_a_new_generation() {
        let dir = workspace_dir(Some(MANIFEST));
        let ws = Workspace::new(dir.path());
        let (count, _sub) = count_updates(&ws);

        let before = ws.info();
        let old = before.clone().await.unwrap();

        let reloaded = ws.reload();
        assert!(!Shared::ptr_eq(&before, &reloaded));
        assert!(Shared::ptr_eq(&reloaded, &ws.info()));

        let new = reloaded.await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(*old, *new);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // The previous generation still resolves to its own snapshot.
        assert!(Arc::ptr_eq(&before.await.unwrap(), &old));
    }

    #[tokio::test]
    async fn current_info_only_reports_resolved_generations() {
        let dir = workspace_dir(Some(MANIFEST));
        let ws = Workspace::new(dir.path());
        assert!(ws.current_info().is_none());

        let load = ws.info();
        assert!(ws.current_info().is_none());
        let info = load.await.unwrap();
        assert!(Arc::ptr_eq(&ws.current_info().unwrap(), &info));

        let _pending = ws.reload();
        assert!(ws.current_info().is_none());
    }

    #[tokio::test]
    async fn missing_manifest_is_reported() {
        let dir = workspace_dir(None);
        let ws = Workspace::new(dir.path());
        let err = ws.info().await.unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn envsh_failure_keeps_current_info() {
        let dir = workspace_dir(Some(MANIFEST));
        fake_autoproj(dir.path(), "exit 1");
        let ws = Workspace::new(dir.path());
        let (count, _sub) = count_updates(&ws);

        let snapshot = ws.info().await.unwrap();
        let after = ws.envsh().await.unwrap();
        assert!(Arc::ptr_eq(&snapshot, &after));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn envsh_success_reloads() {
        let dir = workspace_dir(Some(MANIFEST));
        fake_autoproj(dir.path(), "echo refreshed; exit 0");
        let ws = Workspace::new(dir.path());
        let (count, _sub) = count_updates(&ws);

        let snapshot = ws.info().await.unwrap();
        let after = ws.envsh().await.unwrap();
        assert!(!Arc::ptr_eq(&snapshot, &after));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn envsh_without_autoproj_keeps_current_info() {
        let dir = workspace_dir(Some(MANIFEST));
        let ws = Workspace::new(dir.path());
        let snapshot = ws.info().await.unwrap();
        let after = ws.envsh().await.unwrap();
        assert!(Arc::ptr_eq(&snapshot, &after));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn which_trims_resolved_path() {
        let dir = workspace_dir(None);
        fake_autoproj(
            dir.path(),
            r#"if [ "$2" = "ruby" ]; then printf '/usr/bin/'; printf 'ruby\n\n'; exit 0; fi; echo "not found" >&2; exit 1"#,
        );
        let ws = Workspace::new(dir.path());

        assert_eq!(ws.which("ruby").await.unwrap(), PathBuf::from("/usr/bin/ruby"));
        let err = ws.which("gdb").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.to_string().contains("gdb"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn autoproj_exec_runs_in_root() {
        let dir = workspace_dir(None);
        fake_autoproj(dir.path(), r#"pwd; echo "$@""#);
        let ws = Workspace::new(dir.path());

        let child = ws.autoproj_exec("build", &["--tool"]).unwrap();
        let output = child.wait_with_output().await.unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        assert_eq!(
            Path::new(lines.next().unwrap()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(lines.next(), Some("build --tool"));
    }

    #[test]
    fn dispose_runs_each_cleanup_once() {
        let ws = Workspace::new("/ws");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            ws.subscribe(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        ws.dispose();
        ws.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(ws.is_disposed());

        let c = count.clone();
        ws.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn held_subscriptions_end_at_dispose() {
        let ws = Workspace::new("/ws");
        let emitter = Emitter::<()>::new();
        ws.hold(emitter.subscribe(|_| {}));
        assert_eq!(emitter.len(), 1);
        ws.dispose();
        assert!(emitter.is_empty());
    }
}
