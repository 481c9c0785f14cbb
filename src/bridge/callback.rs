//! Host callbacks exposed to the guest as callables.
//!
//! The guest lock is released while the host function runs, so it may call
//! back into the bridge. Callbacks do not nest: a callback invoked from guest
//! code that is itself running inside a callback on the same thread fails with
//! a `RuntimeError`.

use super::conversion;
use super::diag::diag;
use super::host_value::{HostCallback, HostValue};
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyTuple};
use std::cell::Cell;

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

struct ActiveGuard;

impl ActiveGuard {
    fn enter(name: &str) -> PyResult<Self> {
        if ACTIVE.with(|active| active.replace(true)) {
            return Err(PyRuntimeError::new_err(format!(
                "host callback '{}' invoked from within another host callback; \
                 only single-level callbacks are supported",
                name
            )));
        }
        Ok(ActiveGuard)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(false));
    }
}

fn invoke(callback: &HostCallback, args: &Bound<'_, PyTuple>) -> PyResult<Py<PyAny>> {
    let py = args.py();
    let _active = ActiveGuard::enter(callback.name())?;

    let host_args = args
        .iter()
        .map(conversion::infer)
        .collect::<PyResult<Vec<HostValue>>>()?;
    diag!(CALL, callback = callback.name(), argc = host_args.len(), "host callback");

    let result = py
        .detach(|| callback.call(host_args))
        .map_err(|msg| {
            PyRuntimeError::new_err(format!("host callback '{}' failed: {}", callback.name(), msg))
        })?;
    Ok(conversion::to_guest(py, &result, None)?.unbind())
}

/// Build the guest callable for `callback`.
pub(crate) fn to_guest<'py>(
    py: Python<'py>,
    callback: &HostCallback,
) -> PyResult<Bound<'py, PyAny>> {
    let callback = callback.clone();
    let function = PyCFunction::new_closure(
        py,
        Some(c"host_callback"),
        None,
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| {
            invoke(&callback, args)
        },
    )?;
    Ok(function.into_any())
}
