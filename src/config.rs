use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::Naming;

const DEFAULT_SYSKIT_URL: &str = "http://localhost:20202";

/// User settings, stored as JSON. Every field is optional on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// When set, workspaces below this folder are named by their relative path.
    pub dev_folder: Option<PathBuf>,
    /// Explicit names by workspace root. Wins over `dev_folder`.
    pub workspace_names: BTreeMap<PathBuf, String>,
    pub syskit_url: String,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    /// Start `autoproj watch` for every new workspace.
    pub start_watch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dev_folder: None,
            workspace_names: BTreeMap::new(),
            syskit_url: DEFAULT_SYSKIT_URL.to_string(),
            poll_interval_ms: 100,
            debounce_ms: 1000,
            start_watch: false,
        }
    }
}

impl Config {
    /// `<config dir>/rockkit/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rockkit").join("config.json"))
    }

    /// Reads the configuration at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::io(path, &e)),
        };
        let parse_error = |message: String| Error::Parse {
            path: path.to_path_buf(),
            message,
        };
        let config: Self = serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
        if config.poll_interval_ms == 0 {
            return Err(parse_error("poll_interval_ms must be positive".to_string()));
        }
        Ok(config)
    }

    /// Loads from [`default_path`](Self::default_path), then applies
    /// `ROCKKIT_SYSKIT_URL` and `ROCKKIT_DEV_FOLDER` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        if let Ok(url) = std::env::var("ROCKKIT_SYSKIT_URL")
            && !url.is_empty()
        {
            config.syskit_url = url;
        }
        if let Ok(dir) = std::env::var("ROCKKIT_DEV_FOLDER")
            && !dir.is_empty()
        {
            config.dev_folder = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    /// Workspace naming rules for the registry.
    pub fn naming(&self) -> Naming {
        Naming {
            dev_folder: self.dev_folder.clone(),
            names: self.workspace_names.clone(),
        }
    }

    /// Delay between Syskit liveness checks.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Quiet period after a manifest change notification.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Records `name` for the workspace at `root` in the file at `path`.
    ///
    /// Other keys already in the file, including unknown ones, are kept. A
    /// file that does not parse is left untouched and reported as an error.
    pub fn set_workspace_name(path: &Path, root: &Path, name: &str) -> Result<()> {
        let parse_error = |message: String| Error::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut document = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => serde_json::Value::Object(Default::default()),
            Ok(content) => {
                serde_json::from_str::<serde_json::Value>(&content).map_err(|e| parse_error(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                serde_json::Value::Object(Default::default())
            }
            Err(e) => return Err(Error::io(path, &e)),
        };

        let Some(object) = document.as_object_mut() else {
            return Err(parse_error("expected a JSON object".to_string()));
        };
        let names = object
            .entry("workspace_names")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        let Some(names) = names.as_object_mut() else {
            return Err(parse_error("workspace_names is not an object".to_string()));
        };
        names.insert(
            root.to_string_lossy().into_owned(),
            serde_json::Value::String(name.to_string()),
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, &e))?;
        }
        let content =
            serde_json::to_string_pretty(&document).map_err(|e| parse_error(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| Error::io(path, &e))?;
        tracing::info!(root = %root.display(), name, "saved workspace name");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.syskit_url, "http://localhost:20202");
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.debounce(), Duration::from_secs(1));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"dev_folder": "/home/dev", "start_watch": true, "workspace_names": {"/home/dev/rock": "rock"}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.dev_folder, Some(PathBuf::from("/home/dev")));
        assert!(config.start_watch);
        assert_eq!(config.debounce_ms, 1000);

        let naming = config.naming();
        assert_eq!(naming.names[Path::new("/home/dev/rock")], "rock");
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 0}"#).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn set_workspace_name_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rockkit").join("config.json");
        Config::set_workspace_name(&path, Path::new("/ws/a"), "a").unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        raw["editor_theme"] = serde_json::json!("dark");
        std::fs::write(&path, raw.to_string()).unwrap();

        Config::set_workspace_name(&path, Path::new("/ws/b"), "b").unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["editor_theme"], "dark");
        assert_eq!(raw["workspace_names"]["/ws/a"], "a");
        assert_eq!(raw["workspace_names"]["/ws/b"], "b");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.workspace_names.len(), 2);
    }

    #[test]
    fn set_workspace_name_refuses_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let err = Config::set_workspace_name(&path, Path::new("/ws"), "ws").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2");
    }
}
