//! Interpreter initialization and virtual environment setup
//!
//! The embedded interpreter is process-wide and can only be initialized once.
//! `PYTHONHOME` is resolved from the venv's `pyvenv.cfg` so the interpreter
//! linked at build time finds a compatible standard library.

use crate::errors::GuestError;
use crate::installer::create_venv;
use nbworker_config::GuestEnvLayout;
use nbworker_logger as logger;
use once_cell::sync::OnceCell;
use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyModule, PyTuple};
use std::env;
use std::path::{Path, PathBuf};

/// Site-packages directory the interpreter was initialized with
static INTERPRETER: OnceCell<PathBuf> = OnceCell::new();

const GUEST_STREAMS: &std::ffi::CStr = cr#"
import sys


class HostStream:
    def __init__(self, sink, name):
        self._sink = sink
        self._buffer = ""
        self.name = name

    def write(self, text):
        self._buffer += text
        while "\n" in self._buffer:
            line, self._buffer = self._buffer.split("\n", 1)
            self._sink(line)
        return len(text)

    def flush(self):
        if self._buffer:
            self._sink(self._buffer)
            self._buffer = ""

    def isatty(self):
        return False


def install(sink):
    sys.stdout = HostStream(sink, "<stdout>")
    sys.stderr = HostStream(sink, "<stderr>")
"#;

/// Create the venv at `layout` if it does not exist yet
pub fn ensure_venv(uv: &Path, layout: &GuestEnvLayout, python_version: &str) -> Result<(), GuestError> {
    if layout.is_initialized() {
        return Ok(());
    }
    create_venv(uv, layout.root(), python_version)
}

/// Initialize the interpreter against `layout`, once per process.
///
/// Returns the site-packages directory in use. A second call with a different
/// venv keeps the first one and logs a warning.
pub fn initialize_interpreter(layout: &GuestEnvLayout) -> Result<PathBuf, GuestError> {
    let site_packages = INTERPRETER.get_or_try_init(|| start_interpreter(layout))?;
    if !site_packages.starts_with(layout.root()) {
        logger::warn(&format!(
            "Interpreter already initialized with {}; ignoring {}",
            site_packages.display(),
            layout.root().display()
        ));
    }
    Ok(site_packages.clone())
}

fn start_interpreter(layout: &GuestEnvLayout) -> Result<PathBuf, GuestError> {
    let start_time = std::time::Instant::now();

    let python_home = layout.python_home()?;
    env::set_var("PYTHONHOME", &python_home);
    logger::debug(&format!("Set PYTHONHOME={}", python_home.display()));

    let site_packages = layout.site_packages()?;

    logger::debug("Initializing PyO3...");
    pyo3::Python::initialize();

    pyo3::Python::attach(|py| {
        let sys = PyModule::import(py, "sys")
            .map_err(|e| GuestError::Import("sys".to_string(), format!("{}", e)))?;
        sys.setattr("dont_write_bytecode", false)?;

        let site = PyModule::import(py, "site")
            .map_err(|e| GuestError::Import("site".to_string(), format!("{}", e)))?;
        site.call_method1("addsitedir", (&*site_packages.to_string_lossy(),))
            .map_err(|e| GuestError::Python(format!("Failed to add site directory: {}", e)))?;

        install_guest_streams(py)?;
        Ok::<(), GuestError>(())
    })?;

    logger::debug(&format!(
        "Interpreter initialization took: {:?}",
        start_time.elapsed()
    ));
    Ok(site_packages)
}

/// Route guest stdout/stderr through the host logger, one line at a time
fn install_guest_streams(py: Python<'_>) -> Result<(), GuestError> {
    let sink = PyCFunction::new_closure(
        py,
        Some(c"guest_line"),
        None,
        |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<()> {
            let line: String = args.get_item(0)?.extract()?;
            logger::guest(&line);
            Ok(())
        },
    )?;
    let module = PyModule::from_code(py, GUEST_STREAMS, c"nbworker_streams.py", c"nbworker_streams")?;
    module.getattr("install")?.call1((sink,))?;
    Ok(())
}

/// Make packages installed after startup importable
pub fn invalidate_import_caches() -> Result<(), GuestError> {
    pyo3::Python::attach(|py| {
        PyModule::import(py, "importlib")?.call_method0("invalidate_caches")?;
        Ok(())
    })
}
