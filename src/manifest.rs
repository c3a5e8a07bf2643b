//! Installation manifest loading.
//!
//! Autoproj writes `.autoproj/installation-manifest` after every run. It is a
//! YAML sequence mixing package-set records (carrying a `package_set` field)
//! and package records (carrying a `name` field).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the hidden metadata directory marking a workspace root.
pub const METADATA_DIR: &str = ".autoproj";
/// Name of the user-facing build configuration directory.
pub const CONFIG_DIR: &str = "autoproj";

/// Returns the installation manifest path for a workspace root.
pub fn installation_manifest_path(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join("installation-manifest")
}

/// Version-control descriptor of a package or package set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vcs {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
}

/// A package as listed in the installation manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Path-like package name, e.g. `drivers/iodrivers_base`.
    pub name: String,
    /// Autobuild handler type, e.g. `Autobuild::CMake`.
    #[serde(rename = "type")]
    pub build_type: String,
    pub vcs: Vcs,
    pub srcdir: PathBuf,
    #[serde(default)]
    pub builddir: Option<PathBuf>,
    #[serde(default)]
    pub logdir: Option<PathBuf>,
    #[serde(default)]
    pub prefix: Option<PathBuf>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub dependencies: Vec<String>,
}

/// A package set as listed in the installation manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    /// Package set name (the manifest's `package_set` field).
    pub name: String,
    pub vcs: Vcs,
    pub raw_local_dir: PathBuf,
    pub user_local_dir: PathBuf,
}

#[derive(Deserialize)]
struct RawPackageSet {
    package_set: String,
    vcs: Vcs,
    raw_local_dir: PathBuf,
    user_local_dir: PathBuf,
}

impl From<RawPackageSet> for PackageSet {
    fn from(raw: RawPackageSet) -> Self {
        PackageSet {
            name: raw.package_set,
            vcs: raw.vcs,
            raw_local_dir: raw.raw_local_dir,
            user_local_dir: raw.user_local_dir,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// What a folder resolves to inside a workspace manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    Package(Package),
    PackageSet(PackageSet),
}

impl ManifestEntry {
    /// Package or package-set name.
    pub fn name(&self) -> &str {
        match self {
            ManifestEntry::Package(pkg) => &pkg.name,
            ManifestEntry::PackageSet(set) => &set.name,
        }
    }
}

/// Snapshot of one workspace's installation manifest.
///
/// Snapshots are never mutated after loading; a reload publishes a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceInfo {
    /// Workspace root the manifest belongs to.
    pub path: PathBuf,
    /// Packages keyed by absolute source directory.
    pub packages: HashMap<PathBuf, Package>,
    /// Package sets keyed by name.
    pub package_sets: HashMap<String, PackageSet>,
}

impl WorkspaceInfo {
    /// Returns the package whose source directory is `path`.
    pub fn package(&self, path: &Path) -> Option<&Package> {
        self.packages.get(path)
    }

    /// Returns the package with the given manifest name.
    pub fn package_by_name(&self, name: &str) -> Option<&Package> {
        self.packages.values().find(|pkg| pkg.name == name)
    }

    /// Returns the package set checked out at `path`, either its user-facing
    /// or its raw directory.
    pub fn package_set(&self, path: &Path) -> Option<&PackageSet> {
        self.package_sets
            .values()
            .find(|set| set.user_local_dir == path || set.raw_local_dir == path)
    }

    /// Resolves a folder to the package or package set it contains.
    pub fn find(&self, path: &Path) -> Option<ManifestEntry> {
        if let Some(pkg) = self.package(path) {
            return Some(ManifestEntry::Package(pkg.clone()));
        }
        self.package_set(path)
            .map(|set| ManifestEntry::PackageSet(set.clone()))
    }
}

/// Reads and parses the installation manifest of the workspace at `root`.
pub async fn load(root: &Path) -> Result<WorkspaceInfo> {
    let path = installation_manifest_path(root);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ManifestNotFound { path });
        }
        Err(err) => return Err(Error::io(&path, &err)),
    };
    let info = parse(root, &content).map_err(|message| Error::Parse {
        path: path.clone(),
        message,
    })?;
    tracing::debug!(
        root = %root.display(),
        packages = info.packages.len(),
        package_sets = info.package_sets.len(),
        "loaded installation manifest"
    );
    Ok(info)
}

/// Parses manifest content for the workspace at `root`.
///
/// Relative source directories are resolved against `root` so that
/// [`WorkspaceInfo::packages`] is always keyed by absolute path.
pub fn parse(root: &Path, content: &str) -> std::result::Result<WorkspaceInfo, String> {
    let mut info = WorkspaceInfo {
        path: root.to_path_buf(),
        ..WorkspaceInfo::default()
    };
    if content.trim().is_empty() {
        return Ok(info);
    }

    let records: Option<Vec<serde_yaml::Value>> =
        serde_yaml::from_str(content).map_err(|e| e.to_string())?;

    for (index, record) in records.unwrap_or_default().into_iter().enumerate() {
        let is_package = record
            .as_mapping()
            .ok_or_else(|| format!("entry {index}: expected a mapping"))?
            .contains_key("name");

        if is_package {
            let mut pkg: Package =
                serde_yaml::from_value(record).map_err(|e| format!("entry {index}: {e}"))?;
            pkg.srcdir = root.join(&pkg.srcdir);
            info.packages.insert(pkg.srcdir.clone(), pkg);
        } else {
            let set: RawPackageSet =
                serde_yaml::from_value(record).map_err(|e| format!("entry {index}: {e}"))?;
            let set = PackageSet::from(set);
            info.package_sets.insert(set.name.clone(), set);
        }
    }

    Ok(info)
}
