//! Process-wide bridge state.
//!
//! There is exactly one guest runtime per process, so the bridge keeps a
//! single [`BridgeContext`] holding the bootstrapped module reference. The
//! context is only reachable through [`context`], and every accessor checks
//! that the guest is initialized before handing anything out.

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use pyo3::prelude::*;
use pyo3::{ffi, types::PyModule};
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct BridgeContext {
    /// Serializes `start` and `stop`. Never held by ordinary entry points.
    lifecycle: Mutex<()>,
    module: Mutex<Option<Py<PyModule>>>,
    bootstrapped: AtomicBool,
}

static CONTEXT: Lazy<BridgeContext> = Lazy::new(|| BridgeContext {
    lifecycle: Mutex::new(()),
    module: Mutex::new(None),
    bootstrapped: AtomicBool::new(false),
});

pub(crate) fn context() -> &'static BridgeContext {
    &CONTEXT
}

impl BridgeContext {
    /// Whether the guest interpreter itself reports initialized.
    pub(crate) fn guest_initialized() -> bool {
        // Safe to call without holding the guest lock.
        unsafe { ffi::Py_IsInitialized() != 0 }
    }

    /// Initialized and bootstrapped; either alone is not enough.
    pub(crate) fn is_running(&self) -> bool {
        Self::guest_initialized() && self.bootstrapped.load(Ordering::Acquire)
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock()
    }

    /// The bridge module, if bootstrapped.
    pub(crate) fn module<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyModule>> {
        if !self.is_running() {
            return None;
        }
        self.module
            .lock()
            .as_ref()
            .map(|module| module.bind(py).clone())
    }

    pub(crate) fn install_module(&self, module: Py<PyModule>) {
        *self.module.lock() = Some(module);
        self.bootstrapped.store(true, Ordering::Release);
    }

    /// Detach the module reference. The caller must drop it while holding the
    /// guest lock and before the interpreter is finalized.
    pub(crate) fn take_module(&self) -> Option<Py<PyModule>> {
        self.bootstrapped.store(false, Ordering::Release);
        self.module.lock().take()
    }
}
