use crate::manifest::ManifestEntry;

/// Behavioral category of a workspace folder.
///
/// Resolved once from the manifest's autobuild `type` string; folders in the
/// workspace configuration tree are [`PackageKind::Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// CMake-based C++ package.
    Cxx,
    /// Ruby library or tool.
    Ruby,
    /// oroGen component package.
    Orogen,
    /// Python package.
    Python,
    /// Syskit bundle.
    Bundle,
    /// The workspace's own configuration (`autoproj/`, `.autoproj/`) or a package set.
    Config,
    /// Anything autobuild knows about but this crate has no special handling for.
    Other,
}

impl PackageKind {
    /// Classifies an autobuild handler type such as `Autobuild::CMake`.
    pub fn classify(autobuild_type: &str) -> Self {
        match autobuild_type
            .trim()
            .trim_start_matches("Autobuild::")
        {
            "CMake" => PackageKind::Cxx,
            "Ruby" => PackageKind::Ruby,
            "Orogen" => PackageKind::Orogen,
            "Python" => PackageKind::Python,
            "Bundle" | "Syskit::Bundle" => PackageKind::Bundle,
            _ => PackageKind::Other,
        }
    }

    /// Classifies a resolved manifest entry. Package sets are configuration.
    pub fn of_entry(entry: &ManifestEntry) -> Self {
        match entry {
            ManifestEntry::Package(pkg) => Self::classify(&pkg.build_type),
            ManifestEntry::PackageSet(_) => PackageKind::Config,
        }
    }

    /// Short lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Cxx => "cxx",
            PackageKind::Ruby => "ruby",
            PackageKind::Orogen => "orogen",
            PackageKind::Python => "python",
            PackageKind::Bundle => "bundle",
            PackageKind::Config => "config",
            PackageKind::Other => "other",
        }
    }

    /// Whether packages of this kind get per-package build tasks.
    pub fn is_buildable(&self) -> bool {
        !matches!(self, PackageKind::Config)
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_autobuild_types() {
        assert_eq!(PackageKind::classify("Autobuild::CMake"), PackageKind::Cxx);
        assert_eq!(PackageKind::classify("CMake"), PackageKind::Cxx);
        assert_eq!(PackageKind::classify("Autobuild::Ruby"), PackageKind::Ruby);
        assert_eq!(PackageKind::classify("Autobuild::Orogen"), PackageKind::Orogen);
        assert_eq!(PackageKind::classify("Autobuild::Python"), PackageKind::Python);
        assert_eq!(PackageKind::classify("Autobuild::ImporterPackage"), PackageKind::Other);
        assert_eq!(PackageKind::classify(""), PackageKind::Other);
    }

    #[test]
    fn only_config_is_excluded_from_builds() {
        assert!(!PackageKind::Config.is_buildable());
        assert!(PackageKind::Other.is_buildable());
        assert!(PackageKind::Bundle.is_buildable());
    }
}
