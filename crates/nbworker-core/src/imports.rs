//! Textual import scan over notebook code
//!
//! Notebook cells are function bodies, so imports are usually indented. Only
//! absolute imports are reported, by their top-level module name.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static IMPORT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*import\s+(?P<names>.+)$").ok());

static FROM_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*from\s+(?P<module>[A-Za-z_][\w.]*)\s+import\b").ok());

/// Top-level module names imported by `code`, first-seen order, no duplicates
pub fn find_imports(code: &str) -> Vec<String> {
    let (Some(import_re), Some(from_re)) = (IMPORT_RE.as_ref(), FROM_RE.as_ref()) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut record = |module: &str| {
        let top = module.split('.').next().unwrap_or(module).trim();
        if is_identifier(top) && seen.insert(top.to_string()) {
            found.push(top.to_string());
        }
    };

    for line in code.lines() {
        let line = line.split('#').next().unwrap_or(line);
        for statement in line.split(';') {
            if let Some(caps) = from_re.captures(statement) {
                record(&caps["module"]);
            } else if let Some(caps) = import_re.captures(statement) {
                for name in caps["names"].split(',') {
                    let module = name.split_whitespace().next().unwrap_or_default();
                    record(module.trim_matches(|c| c == '(' || c == ')'));
                }
            }
        }
    }

    found
}

/// A single guest identifier such as a class or module name
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// A dotted module path like `marimo._pyodide.bootstrap`
pub fn is_module_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_identifier)
}
