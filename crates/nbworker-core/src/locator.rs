//! Decides where each notebook dependency comes from
//!
//! Two passes, both best-effort:
//! 1. The engine's native loader resolves whatever the augmented source's
//!    imports map to. Failures are logged; some imports never resolve natively.
//! 2. Discovered packages still not loaded go to the fallback installer, minus
//!    anything already importable as a live module. The loader's package
//!    namespace and the guest's module namespace differ, hence both checks.
//!
//! A failing fallback install is logged and swallowed. The notebook still
//! becomes interactive and the user sees import errors in the affected cells.

use crate::augment::AugmentedSource;
use crate::engine::{GuestRuntime, TracingReporter};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageSource {
    /// Loaded by the native loader during this resolution
    Native,
    /// Requested from the fallback installer
    Fallback,
    /// Already present before resolution started, or importable as a module
    Satisfied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub source: PackageSource,
}

/// Outcome of resolving one session's dependencies
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub packages: Vec<PackageSpec>,
    pub native_error: Option<String>,
    /// Exactly what was handed to the fallback installer
    pub fallback_requested: Vec<String>,
    pub fallback_error: Option<String>,
    pub cancelled: bool,
}

impl Resolution {
    pub fn to_load_natively(&self) -> Vec<&str> {
        self.names_from(PackageSource::Native)
    }

    pub fn to_fallback_install(&self) -> Vec<&str> {
        self.names_from(PackageSource::Fallback)
    }

    fn names_from(&self, source: PackageSource) -> Vec<&str> {
        self.packages
            .iter()
            .filter(|spec| spec.source == source)
            .map(|spec| spec.name.as_str())
            .collect()
    }
}

/// `discovered - loaded`, sorted
pub fn missing_packages(discovered: &BTreeSet<String>, loaded: &BTreeSet<String>) -> Vec<String> {
    discovered.difference(loaded).cloned().collect()
}

pub fn resolve<R: GuestRuntime>(
    runtime: &R,
    source: &AugmentedSource,
    discovered: &BTreeSet<String>,
    cancel: &CancellationToken,
) -> Resolution {
    let mut resolution = Resolution::default();
    let loaded_before = runtime.loaded_packages();

    {
        let _span = info_span!("native_loader").entered();
        let reporter = TracingReporter {
            phase: "native-loader",
        };
        if let Err(e) = runtime.load_packages_from_imports(source.text(), &reporter) {
            warn!("Native package loader failed: {}", e);
            resolution.native_error = Some(e.to_string());
        }
    }

    if cancel.is_cancelled() {
        debug!("Resolution cancelled after native loader pass");
        resolution.cancelled = true;
        return resolution;
    }

    let loaded_after = runtime.loaded_packages();
    let missing = missing_packages(discovered, &loaded_after);

    let mut fallback = Vec::with_capacity(missing.len());
    for name in discovered {
        let source = if loaded_before.contains(name) {
            PackageSource::Satisfied
        } else if loaded_after.contains(name) {
            PackageSource::Native
        } else if runtime.has_module(name) {
            PackageSource::Satisfied
        } else {
            fallback.push(name.clone());
            PackageSource::Fallback
        };
        resolution.packages.push(PackageSpec {
            name: name.clone(),
            source,
        });
    }

    if fallback.is_empty() {
        debug!(missing = missing.len(), "No packages left for the fallback installer");
        return resolution;
    }

    let _span = info_span!("fallback_install", count = fallback.len()).entered();
    info!("Loading from fallback installer: {:?}", fallback);
    if let Err(e) = runtime.fallback_install(&fallback) {
        error!("Failed to load packages from fallback installer: {}", e);
        resolution.fallback_error = Some(e.to_string());
    }
    resolution.fallback_requested = fallback;
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::{augment, NotebookSource};
    use crate::bootstrap::BASE_PACKAGES;
    use crate::testing::{FakeBehavior, FakeRuntime};

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_packages_is_set_difference() {
        let discovered = names(&["numpy", "pandas", "scipy"]);
        let loaded = names(&["pandas", "micropip"]);
        assert_eq!(
            missing_packages(&discovered, &loaded),
            vec!["numpy".to_string(), "scipy".to_string()]
        );
    }

    #[test]
    fn test_base_packages_never_reach_fallback() {
        let runtime = FakeRuntime::new(FakeBehavior::default());
        runtime.mark_loaded(BASE_PACKAGES);

        let mut discovered = names(BASE_PACKAGES);
        discovered.insert("altair".to_string());
        let source = augment(&NotebookSource::new("import altair\n", None));

        let resolution = resolve(&runtime, &source, &discovered, &CancellationToken::new());
        assert_eq!(resolution.fallback_requested, vec!["altair".to_string()]);
        for base in BASE_PACKAGES {
            assert!(!resolution.fallback_requested.iter().any(|p| p == base));
        }
        assert_eq!(runtime.fallback_calls(), vec![vec!["altair".to_string()]]);
    }

    #[test]
    fn test_native_loaded_and_live_modules_are_excluded() {
        let behavior = FakeBehavior {
            native_packages: vec![("numpy".to_string(), "numpy".to_string())],
            modules: vec!["json".to_string()],
            ..FakeBehavior::default()
        };
        let runtime = FakeRuntime::new(behavior);
        let discovered = names(&["json", "numpy", "vega_datasets"]);
        let source = augment(&NotebookSource::new("import numpy\nimport json\n", None));

        let resolution = resolve(&runtime, &source, &discovered, &CancellationToken::new());
        assert_eq!(resolution.to_load_natively(), vec!["numpy"]);
        assert_eq!(resolution.to_fallback_install(), vec!["vega_datasets"]);
        assert!(resolution
            .packages
            .iter()
            .any(|p| p.name == "json" && p.source == PackageSource::Satisfied));
    }

    #[test]
    fn test_loader_failures_are_recorded_not_raised() {
        let behavior = FakeBehavior {
            native_fails: true,
            fallback_fails: true,
            ..FakeBehavior::default()
        };
        let runtime = FakeRuntime::new(behavior);
        let discovered = names(&["requests_cache"]);
        let source = augment(&NotebookSource::new("import requests_cache\n", None));

        let resolution = resolve(&runtime, &source, &discovered, &CancellationToken::new());
        assert!(resolution.native_error.is_some());
        assert!(resolution.fallback_error.is_some());
        assert_eq!(resolution.fallback_requested, vec!["requests_cache".to_string()]);
    }

    #[test]
    fn test_nothing_missing_skips_fallback() {
        let runtime = FakeRuntime::new(FakeBehavior::default());
        runtime.mark_loaded(&["pandas"]);
        let source = augment(&NotebookSource::new("import pandas\n", None));

        let resolution = resolve(&runtime, &source, &names(&["pandas"]), &CancellationToken::new());
        assert!(resolution.fallback_requested.is_empty());
        assert!(runtime.fallback_calls().is_empty());
    }

    #[test]
    fn test_cancelled_resolution_stops_before_fallback() {
        let runtime = FakeRuntime::new(FakeBehavior::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = augment(&NotebookSource::new("import altair\n", None));

        let resolution = resolve(&runtime, &source, &names(&["altair"]), &cancel);
        assert!(resolution.cancelled);
        assert!(runtime.fallback_calls().is_empty());
    }

    #[test]
    fn test_native_pass_sees_implicit_imports() {
        let runtime = FakeRuntime::new(FakeBehavior::default());
        let source = augment(&NotebookSource::new("mo.sql('select 1')\n", None));
        let _ = resolve(&runtime, &source, &BTreeSet::new(), &CancellationToken::new());

        let scanned = runtime.native_scans();
        assert_eq!(scanned.len(), 1);
        assert!(scanned[0].contains(&"duckdb".to_string()));
        assert!(scanned[0].contains(&"pyodide_http".to_string()));
    }
}
