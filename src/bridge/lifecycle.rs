//! Starting and stopping the embedded guest runtime.

use super::config::BridgeConfig;
use super::context::{context, BridgeContext};
use super::diag::{diag, set_diag_flags, DiagFlags};
use super::error::{BridgeError, BridgeResult};
use super::exception;
use super::extension;
use super::handle;
use super::lock;
use super::output;
use pyo3::ffi;
use pyo3::prelude::*;

/// Start the guest runtime and bootstrap the bridge module.
///
/// Idempotent: when the bridge is already running this returns `Ok(())` and
/// the search paths in `config` are ignored. If a previous start initialized
/// the guest but failed to bootstrap, only the bootstrap is retried.
pub fn start(config: &BridgeConfig) -> BridgeResult<()> {
    let _guard = context().lifecycle();

    if config.diag_flags != DiagFlags::OFF {
        set_diag_flags(config.diag_flags);
    }

    if context().is_running() {
        if !config.search_paths.is_empty() {
            tracing::debug!(
                target: "pybridge",
                paths = ?config.search_paths,
                "bridge already running; search paths ignored"
            );
        }
        return Ok(());
    }

    let fresh = !BridgeContext::guest_initialized();
    if fresh {
        diag!(EXEC, "initializing guest runtime");
        unsafe { ffi::Py_InitializeEx(0) };
        if !BridgeContext::guest_initialized() {
            tracing::error!(target: "pybridge", "guest runtime failed to initialize");
            return Err(BridgeError::Initialization(
                "Py_InitializeEx did not initialize the interpreter".to_string(),
            ));
        }
    }

    let result = Python::attach(|py| {
        bootstrap(py, config, fresh).map_err(|err| exception::translate(py, err))
    });

    if fresh {
        // Drop the implicit hold left by initialization, even if bootstrap
        // failed, so a retry from any thread can acquire the lock.
        lock::release_startup_lock();
    }

    match result {
        Ok(module) => {
            context().install_module(module);
            tracing::debug!(target: "pybridge", "bridge started");
            Ok(())
        }
        Err(err) => {
            tracing::error!(target: "pybridge", "bridge bootstrap failed: {}", err);
            Err(err)
        }
    }
}

fn bootstrap(
    py: Python<'_>,
    config: &BridgeConfig,
    fresh: bool,
) -> PyResult<Py<pyo3::types::PyModule>> {
    if fresh && config.redirect_output {
        output::install(py)?;
    }

    let path = py.import("sys")?.getattr("path")?;
    for (index, entry) in config.search_paths.iter().enumerate() {
        path.call_method1("insert", (index, entry))?;
        diag!(EXEC, entry = entry.as_str(), "search path prepended");
    }

    Ok(extension::bootstrap(py)?.unbind())
}

/// Finalize the guest runtime.
///
/// A no-op when the guest is not initialized. Every handle the host still
/// holds is invalidated. Must not be called while other threads are inside
/// bridge calls; the caller is responsible for quiescing them first.
pub fn stop() {
    let _guard = context().lifecycle();

    if !BridgeContext::guest_initialized() {
        return;
    }

    let leaked = handle::forget_all();
    if leaked > 0 {
        tracing::warn!(target: "pybridge", leaked, "stopping with host-owned handles outstanding");
    }

    if let Some(module) = context().take_module() {
        Python::attach(|_py| drop(module));
    }

    if !lock::reclaim_startup_lock() {
        // The guest was initialized by someone else, or the startup hold was
        // never released; either way take the lock for finalization.
        let _ = unsafe { ffi::PyGILState_Ensure() };
    }

    diag!(EXEC, "finalizing guest runtime");
    if unsafe { ffi::Py_FinalizeEx() } < 0 {
        tracing::warn!(target: "pybridge", "guest finalization reported an error");
    }
    tracing::debug!(target: "pybridge", "bridge stopped");
}

/// True only when the guest is initialized and the bridge module is loaded.
pub fn is_running() -> bool {
    context().is_running()
}

/// The guest version string (`sys.version`), or `None` when not running.
pub fn version() -> Option<String> {
    lock::with_guest("version", |py| {
        let version = py.version().to_string();
        Ok(version)
    })
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing;

    #[test]
    fn test_redundant_start_is_ok() {
        testing::guest();
        let config = BridgeConfig::new().with_search_path("/nonexistent/ignored");
        start(&config).unwrap();
        assert!(is_running());

        let in_path = Python::attach(|py| {
            py.import("sys")
                .and_then(|sys| sys.getattr("path"))
                .and_then(|path| path.contains("/nonexistent/ignored"))
                .unwrap()
        });
        assert!(!in_path);
    }

    #[test]
    fn test_version_while_running() {
        testing::guest();
        let version = version().unwrap();
        assert!(version.starts_with('3'));
    }
}
