//! Conversion between host values and guest objects.
//!
//! Host to guest is driven by the value, optionally constrained by a type
//! descriptor. Guest to host is driven by the descriptor of the class the host
//! asked for; `Object` falls back to inference.

use super::callback;
use super::descriptor::{self, PrimitiveKind, TypeCategory, TypeDescriptor};
use super::diag::diag;
use super::handle::OwnedHandle;
use super::host_value::{HostValue, MAX_CONVERSION_DEPTH};
use super::wrapper::{self, Unwrapped};
use indexmap::IndexMap;
use pyo3::exceptions::{PyOverflowError, PyRuntimeError, PyTypeError};
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use std::collections::HashSet;

/// Convert a host value for the guest, honoring `descriptor` when given.
pub(crate) fn to_guest<'py>(
    py: Python<'py>,
    value: &HostValue,
    descriptor: Option<&TypeDescriptor>,
) -> PyResult<Bound<'py, PyAny>> {
    match descriptor {
        None => to_guest_inferred(py, value),
        Some(descriptor) => to_guest_typed(py, value, descriptor),
    }
}

fn to_guest_inferred<'py>(py: Python<'py>, value: &HostValue) -> PyResult<Bound<'py, PyAny>> {
    match value {
        HostValue::Null => Ok(py.None().into_bound(py)),
        HostValue::Boolean(b) => Ok(PyBool::new(py, *b).to_owned().into_any()),
        HostValue::Int(i) => Ok(PyInt::new(py, *i).into_any()),
        HostValue::Long(i) => Ok(PyInt::new(py, *i).into_any()),
        HostValue::Double(f) => Ok(PyFloat::new(py, *f).into_any()),
        HostValue::String(s) => Ok(PyString::new(py, s).into_any()),
        HostValue::Array(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(to_guest_inferred(py, item)?)?;
            }
            Ok(list.into_any())
        }
        HostValue::Map(map) => {
            let dict = PyDict::new(py);
            for (key, item) in map {
                dict.set_item(key, to_guest_inferred(py, item)?)?;
            }
            Ok(dict.into_any())
        }
        HostValue::Object(object) => wrapper::wrap(py, object),
        HostValue::Callback(cb) => callback::to_guest(py, cb),
        HostValue::Guest(handle) => handle.bind(py),
    }
}

fn mismatch(value: &HostValue, descriptor: &TypeDescriptor) -> PyErr {
    PyTypeError::new_err(format!(
        "cannot convert host {} to {}",
        value.kind_name(),
        descriptor.class()
    ))
}

fn to_guest_typed<'py>(
    py: Python<'py>,
    value: &HostValue,
    descriptor: &TypeDescriptor,
) -> PyResult<Bound<'py, PyAny>> {
    match descriptor.category() {
        TypeCategory::Primitive(kind) => to_guest_primitive(py, value, *kind, descriptor),
        TypeCategory::String => match value {
            HostValue::String(_) | HostValue::Null => to_guest_inferred(py, value),
            _ => Err(mismatch(value, descriptor)),
        },
        TypeCategory::Object => to_guest_inferred(py, value),
        TypeCategory::Named(class) => match value {
            HostValue::Object(object) if object.class_name() == class.as_str() => {
                wrapper::wrap(py, object)
            }
            HostValue::Null | HostValue::Guest(_) => to_guest_inferred(py, value),
            _ => Err(mismatch(value, descriptor)),
        },
        TypeCategory::Array(element) => match value {
            HostValue::Array(items) => {
                let list = PyList::empty(py);
                for item in items {
                    list.append(to_guest_typed(py, item, element)?)?;
                }
                Ok(list.into_any())
            }
            HostValue::Null => Ok(py.None().into_bound(py)),
            _ => Err(mismatch(value, descriptor)),
        },
    }
}

fn to_guest_primitive<'py>(
    py: Python<'py>,
    value: &HostValue,
    kind: PrimitiveKind,
    descriptor: &TypeDescriptor,
) -> PyResult<Bound<'py, PyAny>> {
    match (kind, value) {
        (PrimitiveKind::Boolean, HostValue::Boolean(b)) => {
            Ok(PyBool::new(py, *b).to_owned().into_any())
        }
        (PrimitiveKind::Int, HostValue::Int(i)) => Ok(PyInt::new(py, *i).into_any()),
        (PrimitiveKind::Int, HostValue::Long(i)) => {
            let narrowed = i32::try_from(*i).map_err(|_| {
                PyOverflowError::new_err(format!("host long {} does not fit in int", i))
            })?;
            Ok(PyInt::new(py, narrowed).into_any())
        }
        (PrimitiveKind::Long, HostValue::Int(i)) => Ok(PyInt::new(py, *i).into_any()),
        (PrimitiveKind::Long, HostValue::Long(i)) => Ok(PyInt::new(py, *i).into_any()),
        (PrimitiveKind::Double, HostValue::Int(_))
        | (PrimitiveKind::Double, HostValue::Long(_))
        | (PrimitiveKind::Double, HostValue::Double(_)) => {
            let widened = value.as_f64().unwrap_or_default();
            Ok(PyFloat::new(py, widened).into_any())
        }
        _ => Err(mismatch(value, descriptor)),
    }
}

/// Convert a guest object to the host class described by `descriptor`.
pub(crate) fn to_host(obj: Bound<'_, PyAny>, descriptor: &TypeDescriptor) -> PyResult<HostValue> {
    match descriptor.category() {
        TypeCategory::Primitive(PrimitiveKind::Boolean) => Ok(HostValue::Boolean(obj.is_truthy()?)),
        TypeCategory::Primitive(PrimitiveKind::Int) => Ok(HostValue::Int(obj.extract::<i32>()?)),
        TypeCategory::Primitive(PrimitiveKind::Long) => Ok(HostValue::Long(obj.extract::<i64>()?)),
        TypeCategory::Primitive(PrimitiveKind::Double) => {
            Ok(HostValue::Double(obj.extract::<f64>()?))
        }
        TypeCategory::String => to_host_string(&obj),
        TypeCategory::Object => infer(obj),
        TypeCategory::Named(class) => to_host_named(obj, class),
        TypeCategory::Array(element) => {
            Ok(to_host_array(obj, element)?.map_or(HostValue::Null, HostValue::Array))
        }
    }
}

/// `None` maps to `Null`; strings are encoded as UTF-8; anything else goes
/// through `str()`.
pub(crate) fn to_host_string(obj: &Bound<'_, PyAny>) -> PyResult<HostValue> {
    if obj.is_none() {
        return Ok(HostValue::Null);
    }
    let text = match obj.cast::<PyString>() {
        Ok(s) => s.to_str()?.to_owned(),
        Err(_) => obj.str()?.to_str()?.to_owned(),
    };
    Ok(HostValue::String(text))
}

fn to_host_named(obj: Bound<'_, PyAny>, class: &str) -> PyResult<HostValue> {
    match wrapper::classify(obj)? {
        Unwrapped::Host(object) if object.class_name() == class => Ok(HostValue::Object(object)),
        Unwrapped::Host(object) => Err(PyTypeError::new_err(format!(
            "host object of class '{}' is not a '{}'",
            object.class_name(),
            class
        ))),
        Unwrapped::Native(native) if native.is_none() => Ok(HostValue::Null),
        Unwrapped::Native(native) => {
            let decode = descriptor::decoder(class).ok_or_else(|| {
                PyTypeError::new_err(format!("no decoder registered for host class '{}'", class))
            })?;
            let value = infer(native)?;
            let object = decode(value).map_err(|msg| {
                PyTypeError::new_err(format!("cannot build host '{}': {}", class, msg))
            })?;
            diag!(TYPE, class = class, "decoded guest value into host object");
            Ok(HostValue::Object(object))
        }
    }
}

/// Convert a guest sequence element by element. `None` is a null array.
pub(crate) fn to_host_array(
    obj: Bound<'_, PyAny>,
    element: &TypeDescriptor,
) -> PyResult<Option<Vec<HostValue>>> {
    if obj.is_none() {
        return Ok(None);
    }
    if unsafe { ffi::PySequence_Check(obj.as_ptr()) } == 0 {
        let type_name = obj.get_type().name()?.to_string();
        return Err(PyTypeError::new_err(format!(
            "guest value of type '{}' cannot be converted to array",
            type_name
        )));
    }

    // The length comes from guest code and is not trusted for allocation; a
    // sequence shorter than it claims fails on `get_item`. On failure the
    // partial vector drops here, releasing any handles in it.
    let len = obj.len()?;
    let mut items = Vec::new();
    for index in 0..len {
        items.push(to_host(obj.get_item(index)?, element)?);
    }
    Ok(Some(items))
}

/// Infer the host representation of a guest value.
///
/// Values with no host shape come back as an owned guest handle.
pub(crate) fn infer(obj: Bound<'_, PyAny>) -> PyResult<HostValue> {
    let mut seen: HashSet<usize> = HashSet::new();
    infer_internal(obj, 0, &mut seen)
}

fn infer_internal(
    obj: Bound<'_, PyAny>,
    depth: usize,
    seen: &mut HashSet<usize>,
) -> PyResult<HostValue> {
    if depth > MAX_CONVERSION_DEPTH {
        return Err(PyRuntimeError::new_err(format!(
            "Depth limit exceeded: {} > {}",
            depth, MAX_CONVERSION_DEPTH
        )));
    }

    let obj = match wrapper::classify(obj)? {
        Unwrapped::Host(object) => return Ok(HostValue::Object(object)),
        Unwrapped::Native(obj) => obj,
    };

    if obj.is_none() {
        Ok(HostValue::Null)
    } else if obj.is_instance_of::<PyBool>() {
        Ok(HostValue::Boolean(obj.is_truthy()?))
    } else if obj.is_instance_of::<PyInt>() {
        if let Ok(i) = obj.extract::<i32>() {
            Ok(HostValue::Int(i))
        } else if let Ok(i) = obj.extract::<i64>() {
            Ok(HostValue::Long(i))
        } else {
            Ok(HostValue::Guest(OwnedHandle::from_bound(obj)))
        }
    } else if obj.is_instance_of::<PyFloat>() {
        Ok(HostValue::Double(obj.extract::<f64>()?))
    } else if let Ok(s) = obj.cast::<PyString>() {
        Ok(HostValue::String(s.to_str()?.to_owned()))
    } else if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
        let ptr = obj.as_ptr() as usize;
        if !seen.insert(ptr) {
            return Err(PyRuntimeError::new_err(
                "Circular reference detected while converting guest list",
            ));
        }
        let mut items = Vec::new();
        for item in obj.try_iter()? {
            items.push(infer_internal(item?, depth + 1, seen)?);
        }
        seen.remove(&ptr);
        Ok(HostValue::Array(items))
    } else if let Some(dict) = string_keyed_dict(&obj) {
        let ptr = dict.as_ptr() as usize;
        if !seen.insert(ptr) {
            return Err(PyRuntimeError::new_err(
                "Circular reference detected while converting guest dict",
            ));
        }
        let mut map = IndexMap::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let key = key.cast::<PyString>()?.to_str()?.to_owned();
            map.insert(key, infer_internal(value, depth + 1, seen)?);
        }
        seen.remove(&ptr);
        Ok(HostValue::Map(map))
    } else {
        Ok(HostValue::Guest(OwnedHandle::from_bound(obj)))
    }
}

fn string_keyed_dict<'a, 'py>(obj: &'a Bound<'py, PyAny>) -> Option<&'a Bound<'py, PyDict>> {
    let dict = obj.cast::<PyDict>().ok()?;
    dict.keys()
        .iter()
        .all(|key| key.is_instance_of::<PyString>())
        .then_some(dict)
}
