//! Lock manifest describing the engine's prebuilt package index
//!
//! Shaped like a Pyodide lock file: one entry per package keyed by its
//! canonical name, listing the modules it provides and the packages it
//! depends on.

use crate::errors::GuestError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockManifest {
    #[serde(default)]
    pub info: LockInfo,
    #[serde(default)]
    pub packages: BTreeMap<String, LockedPackage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Top-level modules the package provides
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Canonical package name: lowercase with `_` and `.` folded into `-`
pub fn canonical_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' | '.' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

impl LockManifest {
    pub fn load(path: &Path) -> Result<Self, GuestError> {
        let content = fs::read_to_string(path).map_err(|e| GuestError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| GuestError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.get(&canonical_name(name))
    }

    /// The package providing top-level module `import`
    pub fn package_for_import(&self, import: &str) -> Option<&LockedPackage> {
        self.packages
            .values()
            .find(|pkg| pkg.imports.iter().any(|m| m == import))
    }

    /// `names` plus everything they depend on, sorted by canonical name
    pub fn resolve(&self, names: &[&str]) -> Result<Vec<&LockedPackage>, GuestError> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = names.iter().map(|n| canonical_name(n)).collect();

        while let Some(key) = stack.pop() {
            if seen.contains(&key) {
                continue;
            }
            let package = self
                .packages
                .get(&key)
                .ok_or_else(|| GuestError::UnknownPackage(key.clone()))?;
            stack.extend(package.depends.iter().map(|d| canonical_name(d)));
            seen.insert(key);
        }

        Ok(seen.iter().filter_map(|key| self.packages.get(key)).collect())
    }

    /// Resolve every name on its own so one broken entry only fails itself
    pub fn resolve_each<'a>(
        &self,
        names: &[&'a str],
    ) -> Vec<(&'a str, Result<Vec<&LockedPackage>, GuestError>)> {
        names.iter().map(|&name| (name, self.resolve(&[name]))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = r#"{
        "info": {"version": "0.27.0", "python": "3.12"},
        "packages": {
            "pandas": {"name": "pandas", "version": "2.2.3", "imports": ["pandas"], "depends": ["numpy", "python-dateutil"]},
            "numpy": {"name": "numpy", "version": "2.0.2", "imports": ["numpy"]},
            "python-dateutil": {"name": "python-dateutil", "version": "2.9.0", "imports": ["dateutil"], "depends": ["six"]},
            "six": {"name": "six", "version": "1.16.0", "imports": ["six"]},
            "markdown": {"name": "Markdown", "version": "3.7", "imports": ["markdown"]}
        }
    }"#;

    fn manifest() -> LockManifest {
        serde_json::from_str(LOCK).unwrap_or_default()
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("Markdown"), "markdown");
        assert_eq!(canonical_name("pymdown_extensions"), "pymdown-extensions");
        assert_eq!(canonical_name("zope.interface"), "zope-interface");
    }

    #[test]
    fn test_resolve_includes_transitive_depends() {
        let manifest = manifest();
        let resolved = manifest.resolve(&["pandas"]).unwrap_or_default();
        let names: Vec<&str> = resolved.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["numpy", "pandas", "python-dateutil", "six"]);
    }

    #[test]
    fn test_unknown_package_is_an_error() {
        let manifest = manifest();
        assert!(matches!(
            manifest.resolve(&["pandas", "not-a-package"]),
            Err(GuestError::UnknownPackage(name)) if name == "not-a-package"
        ));
    }

    #[test]
    fn test_broken_entry_does_not_fail_its_neighbours() {
        let mut manifest = manifest();
        manifest.packages.insert(
            "altair".to_string(),
            LockedPackage {
                name: "altair".to_string(),
                version: "5.4.1".to_string(),
                file_name: None,
                imports: vec!["altair".to_string()],
                depends: vec!["not-in-lock".to_string()],
            },
        );

        let results = manifest.resolve_each(&["altair", "pandas"]);
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[0],
            ("altair", Err(GuestError::UnknownPackage(name))) if name == "not-in-lock"
        ));
        assert!(matches!(&results[1], ("pandas", Ok(resolved)) if resolved.len() == 4));
    }

    #[test]
    fn test_lookup_by_import_and_display_name() {
        let manifest = manifest();
        assert_eq!(
            manifest.package_for_import("dateutil").map(|p| p.name.as_str()),
            Some("python-dateutil")
        );
        assert_eq!(manifest.get("Markdown").map(|p| p.version.as_str()), Some("3.7"));
        assert!(manifest.package_for_import("polars").is_none());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {}", e));
        let missing = dir.path().join("lock.json");
        assert!(matches!(
            LockManifest::load(&missing),
            Err(GuestError::Manifest { .. })
        ));
    }
}
