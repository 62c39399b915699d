//! Guest-side session construction
//!
//! The guest's session module provides `create_session` and `instantiate`.
//! A small glue module wraps them so one call returns the bridge, a deferred
//! `init`, and the packages the notebook references. `init` starts the
//! session's event loop on a daemon thread of the guest.

use crate::errors::GuestError;
use nbworker_core::{
    is_module_path, ChannelHandle, EngineError, GuestSession, GuestSessionSpec, OperationMessage,
    SessionId,
};
use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyModule, PyTuple};
use std::ffi::CString;
use std::path::Path;

const SESSION_GLUE: &str = r#"
import asyncio
import threading

from {module} import create_session, instantiate


def build(filename, query_params, user_config, message_callback, code):
    session, bridge = create_session(
        filename=filename,
        query_params=query_params,
        message_callback=message_callback,
        user_config=user_config,
    )

    def init(auto_instantiate=True):
        instantiate(session, auto_instantiate)
        threading.Thread(
            target=lambda: asyncio.run(session.start()),
            name="nbworker-session",
            daemon=True,
        ).start()

    try:
        with open(filename, "r") as f:
            source = f.read()
    except OSError:
        source = code
    packages = sorted(set(session.find_packages(source)))
    return bridge, init, packages
"#;

/// Guest handle for one live notebook session
pub struct PythonBridge {
    session: SessionId,
    bridge: Py<PyAny>,
}

impl PythonBridge {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Call a bridge method with a JSON payload; returns its result as text
    pub fn call(&self, method: &str, payload: &str) -> Result<Option<String>, GuestError> {
        Python::attach(|py| {
            let result = self
                .bridge
                .call_method1(py, method, (payload,))
                .map_err(|e| GuestError::Python(describe_py_error(py, &e)))?;
            if result.is_none(py) {
                return Ok(None);
            }
            Ok(Some(result.bind(py).str()?.to_string()))
        })
    }
}

/// Error text including the guest traceback when there is one
pub fn describe_py_error(py: Python<'_>, err: &PyErr) -> String {
    match err.traceback(py).and_then(|tb| tb.format().ok()) {
        Some(traceback) => format!("{}{}", traceback, err),
        None => err.to_string(),
    }
}

/// `module` is spliced into guest source, so it must be a dotted identifier
pub fn glue_source(module: &str) -> Result<CString, GuestError> {
    if !is_module_path(module) {
        return Err(GuestError::Initialization(format!(
            "invalid session module '{}'",
            module
        )));
    }
    CString::new(SESSION_GLUE.replace("{module}", module))
        .map_err(|e| GuestError::Python(format!("Failed to prepare session glue: {}", e)))
}

fn messenger_callback<'py>(
    py: Python<'py>,
    channel: ChannelHandle,
) -> PyResult<Bound<'py, PyCFunction>> {
    PyCFunction::new_closure(
        py,
        Some(c"send"),
        Some(c"Deliver a serialized operation to the host"),
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<bool> {
            let message: String = args.get_item(0)?.extract()?;
            Ok(channel.send(OperationMessage::from_raw(message)))
        },
    )
}

pub(crate) fn create_session(
    module: &str,
    notebook: &Path,
    spec: GuestSessionSpec<'_>,
) -> Result<GuestSession<PythonBridge>, GuestError> {
    if !spec.channel.is_bound() {
        return Err(GuestError::Python("messenger is not defined".to_string()));
    }
    let glue = glue_source(module)?;
    let query_json = serde_json::to_string(spec.query_params)?;
    let config_json = spec.user_config.to_json_string()?;
    let filename = notebook.to_string_lossy().into_owned();

    let (bridge, init, packages) = Python::attach(|py| {
        let glue = PyModule::from_code(py, &glue, c"nbworker_session.py", c"nbworker_session")
            .map_err(|e| GuestError::Import(module.to_string(), describe_py_error(py, &e)))?;
        let json = PyModule::import(py, "json")?;
        let query = json.call_method1("loads", (query_json,))?;
        let config = json.call_method1("loads", (config_json,))?;
        let callback = messenger_callback(py, spec.channel.clone())?;

        let built = glue
            .getattr("build")?
            .call1((filename, query, config, callback, spec.code))
            .map_err(|e| GuestError::Python(describe_py_error(py, &e)))?;
        let parts: (Py<PyAny>, Py<PyAny>, Vec<String>) = built.extract()?;
        Ok::<_, GuestError>(parts)
    })?;

    let init = move |auto_instantiate: bool| -> Result<(), EngineError> {
        Python::attach(|py| {
            init.call1(py, (auto_instantiate,))
                .map(|_| ())
                .map_err(|e| EngineError::Guest(describe_py_error(py, &e)))
        })
    };

    Ok(GuestSession {
        bridge: PythonBridge {
            session: spec.id,
            bridge,
        },
        init: Box::new(init),
        packages,
    })
}
