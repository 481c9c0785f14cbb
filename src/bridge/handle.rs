//! Foreign handles and the host-owned reference table.
//!
//! A [`ForeignHandle`] is the address of a guest object. Operations that
//! return a new reference hand the host one unit of ownership on that
//! address; [`incref`] adds a unit and [`decref`] gives one back. The bridge
//! counts the units the host holds per address so that a release the host
//! does not own is reported instead of corrupting the guest heap.

use super::context::context;
use super::diag::diag;
use super::error::{BridgeResult, ProtocolViolation};
use super::exception;
use super::lock;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::ffi;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;

/// Opaque identifier for a guest value; its bits are the object's address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ForeignHandle(NonZeroUsize);

impl ForeignHandle {
    /// Rebuild a handle from its raw form. Zero is not a handle.
    pub fn from_raw(raw: i64) -> Option<Self> {
        NonZeroUsize::new(raw as usize).map(Self)
    }

    /// Raw form, for hosts that store addresses as signed 64-bit integers.
    pub fn as_raw(self) -> i64 {
        self.0.get() as i64
    }

    pub fn address(self) -> usize {
        self.0.get()
    }

    pub(crate) fn as_ptr(self) -> *mut ffi::PyObject {
        self.0.get() as *mut ffi::PyObject
    }

    fn of(obj: &Bound<'_, PyAny>) -> Self {
        // SAFETY: a bound object pointer is never null.
        Self(unsafe { NonZeroUsize::new_unchecked(obj.as_ptr() as usize) })
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignHandle({:#x})", self.0)
    }
}

impl fmt::Display for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Units of ownership the host holds, per address.
static OWNED: Lazy<Mutex<HashMap<usize, usize>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Transfer ownership of `obj` to the host.
pub(crate) fn new_reference(obj: Bound<'_, PyAny>) -> ForeignHandle {
    let handle = ForeignHandle::of(&obj);
    let units = {
        let mut owned = OWNED.lock();
        let units = owned.entry(handle.address()).or_insert(0);
        *units += 1;
        *units
    };
    // The strong reference held by `obj` now belongs to the host.
    let _ = obj.into_ptr();
    diag!(MEM, handle = %handle, units, "new reference");
    handle
}

fn ensure_owned(handle: ForeignHandle) -> PyResult<()> {
    if OWNED.lock().contains_key(&handle.address()) {
        return Ok(());
    }
    tracing::warn!(target: "pybridge", handle = %handle, "use of a handle the host does not own");
    Err(PyValueError::new_err(format!(
        "handle {} is not held by the host (released or never issued)",
        handle
    )))
}

/// Borrow the guest object behind a host-owned handle.
pub(crate) fn borrow<'py>(py: Python<'py>, handle: ForeignHandle) -> PyResult<Bound<'py, PyAny>> {
    ensure_owned(handle)?;
    // SAFETY: the host holds at least one unit, so the object is alive, and
    // the guest lock is held for 'py.
    Ok(unsafe { Bound::from_borrowed_ptr(py, handle.as_ptr()) })
}

fn violation(violation: ProtocolViolation) -> ProtocolViolation {
    tracing::warn!(target: "pybridge", "protocol violation: {}", violation);
    violation
}

/// Add one unit of host ownership to `handle`.
///
/// Only handles the host already holds can be incremented.
pub fn incref(handle: ForeignHandle) -> Result<(), ProtocolViolation> {
    if !context().is_running() {
        return Err(violation(ProtocolViolation::NotRunning {
            op: "incref",
            handle,
        }));
    }

    let units = match OWNED.lock().get_mut(&handle.address()) {
        Some(units) => {
            *units += 1;
            *units
        }
        None => return Err(violation(ProtocolViolation::UnknownHandle(handle))),
    };

    let result = lock::with_guest("incref", |_py| {
        unsafe { ffi::Py_IncRef(handle.as_ptr()) };
        Ok(())
    });
    if result.is_err() {
        release_unit(handle);
        return Err(violation(ProtocolViolation::NotRunning {
            op: "incref",
            handle,
        }));
    }
    diag!(MEM, handle = %handle, units, "incref");
    Ok(())
}

/// Give back one unit of host ownership on `handle`.
///
/// Releasing a handle the host holds no unit of, or one whose guest count is
/// already exhausted, is a protocol violation: it is logged and returned, and
/// neither count is decremented.
pub fn decref(handle: ForeignHandle) -> Result<(), ProtocolViolation> {
    if !context().is_running() {
        return Err(violation(ProtocolViolation::NotRunning {
            op: "decref",
            handle,
        }));
    }

    // Ownership and the guest count are both checked before the unit is
    // taken, so a rejected release leaves the table untouched. The table lock
    // is never held across `Py_DecRef`: dropping the last guest reference may
    // run arbitrary guest code.
    let result = lock::with_guest("decref", |_py| {
        if !OWNED.lock().contains_key(&handle.address()) {
            return Ok(None);
        }
        // SAFETY: the host holds a unit, so the object has not been freed.
        if unsafe { ffi::Py_REFCNT(handle.as_ptr()) } <= 0 {
            return Ok(None);
        }
        let Some(remaining) = release_unit(handle) else {
            return Ok(None);
        };
        unsafe { ffi::Py_DecRef(handle.as_ptr()) };
        Ok(Some(remaining))
    });

    match result {
        Ok(Some(remaining)) => {
            diag!(MEM, handle = %handle, units = remaining, "decref");
            Ok(())
        }
        Ok(None) => Err(violation(ProtocolViolation::Underflow(handle))),
        Err(_) => Err(violation(ProtocolViolation::NotRunning {
            op: "decref",
            handle,
        })),
    }
}

/// Drop one unit from the table, returning the units left, or `None` if the
/// host held none.
fn release_unit(handle: ForeignHandle) -> Option<usize> {
    let mut owned = OWNED.lock();
    let units = owned.get_mut(&handle.address())?;
    *units -= 1;
    let remaining = *units;
    if remaining == 0 {
        owned.remove(&handle.address());
    }
    Some(remaining)
}

/// Guest-side strong reference count of a host-owned handle.
pub fn ref_count(handle: ForeignHandle) -> BridgeResult<isize> {
    lock::with_guest("ref_count", |py| {
        ensure_owned(handle).map_err(|err| exception::translate(py, err))?;
        Ok(unsafe { ffi::Py_REFCNT(handle.as_ptr()) })
    })
}

/// Number of distinct guest objects the host currently holds.
pub fn live_handles() -> usize {
    OWNED.lock().len()
}

/// Forget every host-owned unit. Used at shutdown, where the interpreter
/// reclaims the objects itself; returns the number of leaked units.
pub(crate) fn forget_all() -> usize {
    let mut owned = OWNED.lock();
    let leaked = owned.values().sum();
    owned.clear();
    leaked
}

/// A foreign handle owning exactly one unit; dropping it releases the unit.
#[derive(PartialEq, Eq, Hash)]
pub struct OwnedHandle(ForeignHandle);

impl OwnedHandle {
    /// Take ownership of a handle returned as a new reference.
    pub fn from_new_reference(handle: ForeignHandle) -> Self {
        Self(handle)
    }

    pub(crate) fn from_bound(obj: Bound<'_, PyAny>) -> Self {
        Self(new_reference(obj))
    }

    pub fn handle(&self) -> ForeignHandle {
        self.0
    }

    /// Give up ownership without releasing; the caller must `decref` later.
    pub fn into_raw(self) -> ForeignHandle {
        let handle = self.0;
        std::mem::forget(self);
        handle
    }

    pub(crate) fn bind<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        borrow(py, self.0)
    }
}

impl Clone for OwnedHandle {
    fn clone(&self) -> Self {
        // A failed increment is already reported as a violation; the clone
        // then releases nothing it does not own.
        let _ = incref(self.0);
        Self(self.0)
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        let _ = decref(self.0);
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedHandle({:#x})", self.0 .0)
    }
}
