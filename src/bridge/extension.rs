//! The bridge's own guest module.
//!
//! Built by hand and registered in `sys.modules` rather than declared as an
//! extension module, so that it can be rebuilt after the interpreter has been
//! finalized and started again.

use super::diag::diag;
use super::wrapper;
use pyo3::prelude::*;
use pyo3::types::PyModule;

pub const MODULE_NAME: &str = "pybridge";

/// True if `obj` wraps a host object.
#[pyfunction]
fn is_host_object(obj: &Bound<'_, PyAny>) -> bool {
    wrapper::is_wrapper(obj)
}

/// Class name of the host object behind a wrapper, or `None`.
#[pyfunction]
fn host_class_name(obj: &Bound<'_, PyAny>) -> Option<String> {
    wrapper::class_name(obj)
}

fn build(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let module = PyModule::new(py, MODULE_NAME)?;
    module.add("__version__", env!("CARGO_PKG_VERSION"))?;
    module.add("HOST_OBJECT_TAG", wrapper::TAG_NAME.to_string_lossy().as_ref())?;
    module.add_function(wrap_pyfunction!(is_host_object, &module)?)?;
    module.add_function(wrap_pyfunction!(host_class_name, &module)?)?;
    Ok(module)
}

/// Register the module if needed and import it.
pub(crate) fn bootstrap(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let modules = py.import("sys")?.getattr("modules")?;
    if !modules.contains(MODULE_NAME)? {
        modules.set_item(MODULE_NAME, build(py)?)?;
        diag!(EXEC, module = MODULE_NAME, "registered bridge module");
    }
    let module = py.import(MODULE_NAME)?;
    diag!(EXEC, module = MODULE_NAME, "imported bridge module");
    Ok(module)
}
