//! Opaque guest wrappers for host objects.
//!
//! A wrapper is a capsule tagged [`TAG_NAME`] owning a weak back-reference to
//! the host object. Recognizing a wrapper is a single tag test, and unwrapping
//! yields the identical host object, never a copy.

use super::diag::diag;
use super::host_value::{HostObject, WeakHostObject};
use pyo3::exceptions::PyReferenceError;
use pyo3::ffi;
use pyo3::prelude::*;
use std::ffi::{c_void, CStr};

/// Capsule name of host-object wrappers.
pub const TAG_NAME: &CStr = c"pybridge.HostObject";

struct Wrapped {
    object: WeakHostObject,
}

unsafe extern "C" fn destroy(capsule: *mut ffi::PyObject) {
    let pointer = ffi::PyCapsule_GetPointer(capsule, TAG_NAME.as_ptr());
    if pointer.is_null() {
        ffi::PyErr_Clear();
        return;
    }
    // SAFETY: the pointer was produced by `Box::into_raw` in `wrap` and the
    // destructor runs exactly once.
    drop(Box::from_raw(pointer as *mut Wrapped));
}

/// Wrap `object` for the guest. The wrapper does not keep it alive.
pub(crate) fn wrap<'py>(py: Python<'py>, object: &HostObject) -> PyResult<Bound<'py, PyAny>> {
    let wrapped = Box::into_raw(Box::new(Wrapped {
        object: object.downgrade(),
    }));
    let capsule =
        unsafe { ffi::PyCapsule_New(wrapped as *mut c_void, TAG_NAME.as_ptr(), Some(destroy)) };
    if capsule.is_null() {
        // SAFETY: the capsule was not created, so ownership never left us.
        drop(unsafe { Box::from_raw(wrapped) });
        return Err(PyErr::fetch(py));
    }
    diag!(TYPE, class = object.class_name(), "wrapped host object");
    // SAFETY: PyCapsule_New returned a new, non-null reference.
    Ok(unsafe { Bound::from_owned_ptr(py, capsule) })
}

/// Whether `obj` is a host-object wrapper.
pub fn is_wrapper(obj: &Bound<'_, PyAny>) -> bool {
    unsafe { ffi::PyCapsule_IsValid(obj.as_ptr(), TAG_NAME.as_ptr()) != 0 }
}

fn wrapped<'a>(obj: &'a Bound<'_, PyAny>) -> Option<&'a Wrapped> {
    if !is_wrapper(obj) {
        return None;
    }
    let pointer = unsafe { ffi::PyCapsule_GetPointer(obj.as_ptr(), TAG_NAME.as_ptr()) };
    // SAFETY: a valid tagged capsule always carries a live `Wrapped`, owned by
    // the capsule, which `obj` keeps alive for 'a.
    unsafe { (pointer as *const Wrapped).as_ref() }
}

/// Result of the wrapper check on a guest value.
pub(crate) enum Unwrapped<'py> {
    Host(HostObject),
    Native(Bound<'py, PyAny>),
}

/// Recover the host object behind `obj`, or hand the value back untouched.
pub(crate) fn classify(obj: Bound<'_, PyAny>) -> PyResult<Unwrapped<'_>> {
    let Some(wrapped) = wrapped(&obj) else {
        return Ok(Unwrapped::Native(obj));
    };
    match wrapped.object.upgrade() {
        Some(object) => Ok(Unwrapped::Host(object)),
        None => Err(PyReferenceError::new_err(format!(
            "host object of class '{}' has been released",
            wrapped.object.class_name()
        ))),
    }
}

/// Class name of the host object behind a wrapper, live or released.
pub(crate) fn class_name(obj: &Bound<'_, PyAny>) -> Option<String> {
    wrapped(obj).map(|wrapped| wrapped.object.class_name().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing;

    #[test]
    fn test_wrap_round_trip_preserves_identity() {
        testing::guest();
        let object = HostObject::with_class("geo.Point", (3_i32, 4_i32));
        Python::attach(|py| {
            let wrapper = wrap(py, &object).unwrap();
            assert!(is_wrapper(&wrapper));
            assert_eq!(class_name(&wrapper).as_deref(), Some("geo.Point"));
            match classify(wrapper).unwrap() {
                Unwrapped::Host(back) => assert!(back.same_object(&object)),
                Unwrapped::Native(_) => panic!("wrapper not recognized"),
            }
        });
    }

    #[test]
    fn test_native_values_pass_through() {
        testing::guest();
        Python::attach(|py| {
            let value = py.eval(c"'not a wrapper'", None, None).unwrap();
            assert!(!is_wrapper(&value));
            assert!(class_name(&value).is_none());
            assert!(matches!(classify(value).unwrap(), Unwrapped::Native(_)));
        });
    }

    #[test]
    fn test_released_host_object_is_reference_error() {
        testing::guest();
        let object = HostObject::with_class("geo.Point", 0_u8);
        Python::attach(|py| {
            let wrapper = wrap(py, &object).unwrap();
            drop(object);
            let err = classify(wrapper).err().unwrap();
            assert!(err.is_instance_of::<PyReferenceError>(py));
            assert!(err.to_string().contains("geo.Point"));
        });
    }
}
