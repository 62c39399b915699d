//! Implicit-import injection ahead of dependency resolution
//!
//! Some notebook features pull in packages the source never imports by name.
//! Plain-text markers decide which imports to prepend; the result feeds both
//! the native loader and the fallback installer's candidate scan.
//!
//! Rules, applied in order, each additive:
//! 1. `mo.sql` present: `pandas`, `duckdb`, `sqlglot`.
//! 2. `mo.sql` and `polars` present: `pyarrow` as well. The query engine needs
//!    it for polars interop and it cannot be installed after the notebook loads.
//! 3. Always: `docutils`, `pygments`, `jedi`, `pyodide_http`. They ship with
//!    the engine but load lazily, and must be imported before scanning so they
//!    never count as missing.

use std::collections::HashSet;

pub const SQL_MARKER: &str = "mo.sql";
pub const POLARS_MARKER: &str = "polars";

const SQL_IMPORTS: [&str; 3] = ["pandas", "duckdb", "sqlglot"];
const ARROW_IMPORT: &str = "pyarrow";
const SUPPORT_IMPORTS: [&str; 4] = ["docutils", "pygments", "jedi", "pyodide_http"];

/// Raw notebook code as handed over by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookSource {
    pub code: String,
    pub filename: Option<String>,
}

impl NotebookSource {
    pub fn new(code: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            code: code.into(),
            filename,
        }
    }
}

/// Notebook code with implicit imports prepended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentedSource {
    text: String,
    implicit_imports: Vec<&'static str>,
    prepended: Vec<&'static str>,
}

impl AugmentedSource {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Every implicit import the markers call for, in application order
    pub fn implicit_imports(&self) -> &[&'static str] {
        &self.implicit_imports
    }

    /// Imports this pass actually added; already-present lines are skipped
    pub fn prepended(&self) -> &[&'static str] {
        &self.prepended
    }

    /// The subset of implicit imports triggered by embedded SQL
    pub fn sql_imports(&self) -> Vec<&'static str> {
        self.implicit_imports
            .iter()
            .copied()
            .filter(|module| SQL_IMPORTS.contains(module) || *module == ARROW_IMPORT)
            .collect()
    }
}

pub fn augment(source: &NotebookSource) -> AugmentedSource {
    let code = source.code.as_str();

    let mut implicit_imports: Vec<&'static str> = Vec::with_capacity(8);
    if code.contains(SQL_MARKER) {
        implicit_imports.extend(SQL_IMPORTS);
        if code.contains(POLARS_MARKER) {
            implicit_imports.push(ARROW_IMPORT);
        }
    }
    implicit_imports.extend(SUPPORT_IMPORTS);

    let existing: HashSet<&str> = code.lines().map(str::trim_end).collect();
    let prepended: Vec<&'static str> = implicit_imports
        .iter()
        .copied()
        .filter(|module| !existing.contains(import_line(module).as_str()))
        .collect();

    // Each import goes on top of the previous one, so the last applied is first.
    let mut text = String::with_capacity(code.len() + prepended.len() * 24);
    for module in prepended.iter().rev() {
        text.push_str(&import_line(module));
        text.push('\n');
    }
    text.push_str(code);

    tracing::debug!(
        implicit = ?implicit_imports,
        added = prepended.len(),
        "augmented notebook source"
    );

    AugmentedSource {
        text,
        implicit_imports,
        prepended,
    }
}

fn import_line(module: &str) -> String {
    format!("import {}", module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(augmented: &AugmentedSource) -> Vec<&str> {
        augmented
            .text()
            .lines()
            .take(augmented.prepended().len())
            .collect()
    }

    #[test]
    fn test_sql_with_polars_yields_four_sql_imports_in_order() {
        let source = NotebookSource::new(
            "import marimo as mo\nimport polars as pl\ndf = mo.sql(\"SELECT 1\")\n",
            None,
        );
        let augmented = augment(&source);

        assert_eq!(
            augmented.sql_imports(),
            vec!["pandas", "duckdb", "sqlglot", "pyarrow"]
        );
        assert_eq!(
            header(&augmented),
            vec![
                "import pyodide_http",
                "import jedi",
                "import pygments",
                "import docutils",
                "import pyarrow",
                "import sqlglot",
                "import duckdb",
                "import pandas",
            ]
        );
        assert!(augmented.text().ends_with(&source.code));
    }

    #[test]
    fn test_no_markers_yields_only_support_imports() {
        let source = NotebookSource::new("import marimo as mo\nx = 1\n", Some("nb.py".into()));
        let augmented = augment(&source);

        assert!(augmented.sql_imports().is_empty());
        assert_eq!(
            augmented.implicit_imports(),
            &["docutils", "pygments", "jedi", "pyodide_http"]
        );
        assert_eq!(
            header(&augmented),
            vec![
                "import pyodide_http",
                "import jedi",
                "import pygments",
                "import docutils"
            ]
        );
    }

    #[test]
    fn test_polars_without_sql_does_not_add_pyarrow() {
        let augmented = augment(&NotebookSource::new("import polars as pl\n", None));
        assert!(!augmented.implicit_imports().contains(&"pyarrow"));
    }

    #[test]
    fn test_augmenting_twice_is_stable() {
        let source = NotebookSource::new("import polars\nmo.sql(\"select 1\")", None);
        let once = augment(&source);
        let twice = augment(&NotebookSource::new(once.text(), None));

        assert_eq!(once.implicit_imports(), twice.implicit_imports());
        assert!(twice.prepended().is_empty());
        assert_eq!(once.text(), twice.text());
    }

    #[test]
    fn test_existing_import_line_is_not_duplicated() {
        let source = NotebookSource::new("import pandas\nmo.sql(\"select 1\")\n", None);
        let augmented = augment(&source);

        assert!(augmented.implicit_imports().contains(&"pandas"));
        assert!(!augmented.prepended().contains(&"pandas"));
        let count = augmented
            .text()
            .lines()
            .filter(|line| *line == "import pandas")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_source_is_left_untouched() {
        let source = NotebookSource::new("mo.sql('x')", None);
        let before = source.clone();
        let _ = augment(&source);
        assert_eq!(source, before);
    }
}
