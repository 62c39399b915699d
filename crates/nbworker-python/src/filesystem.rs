//! Directory-backed notebook home
//!
//! The guest's working directory. Files written here persist between runs,
//! so a notebook saved under its own name is reopened as-is.

use nbworker_core::NOTEBOOK_FILENAME;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookWorkspace {
    home: PathBuf,
}

impl NotebookWorkspace {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.home.join(filename)
    }

    pub fn create_home_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.home)
    }

    /// Regular files currently in the home directory, sorted
    pub fn files(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.home)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write the notebook and return the filename the session should open.
    ///
    /// A named notebook that already exists with content is left untouched.
    /// Anything else is written to the default notebook file.
    pub fn init_notebook_code(&self, code: &str, filename: Option<&str>) -> io::Result<String> {
        if let Some(name) = filename.filter(|name| *name != NOTEBOOK_FILENAME) {
            let existing = fs::read_to_string(self.path_of(name)).unwrap_or_default();
            if !existing.is_empty() {
                return Ok(name.to_string());
            }
        }
        fs::write(self.path_of(NOTEBOOK_FILENAME), code)?;
        Ok(NOTEBOOK_FILENAME.to_string())
    }
}
