//! Boundary operations.
//!
//! Every fallible operation acquires the guest lock, resolves its handles,
//! does its work, and translates any guest error before returning. Handles
//! returned from operations documented as returning a new reference belong to
//! the caller and must be released with [`decref`](super::handle::decref)
//! (or held in an [`OwnedHandle`]).

use super::context::context;
use super::conversion;
use super::descriptor::{HostClass, TypeDescriptor};
use super::diag::diag;
use super::dispatch::CallFrame;
use super::error::{BridgeError, BridgeResult};
use super::exception;
use super::handle::{self, ForeignHandle, OwnedHandle};
use super::host_value::HostValue;
use super::lock;
use pyo3::exceptions::{PyRuntimeError, PyTypeError};
use pyo3::ffi;
use pyo3::prelude::*;
use std::ffi::CString;

/// How [`evaluate`] compiles its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// A single interactive statement; expression values are echoed.
    Statement,
    /// A sequence of statements. The result is `None`.
    Script,
    /// A single expression.
    Expression,
}

impl InputMode {
    fn compile_mode(self) -> &'static str {
        match self {
            InputMode::Statement => "single",
            InputMode::Script => "exec",
            InputMode::Expression => "eval",
        }
    }
}

fn guarded<R, F>(op: &'static str, f: F) -> BridgeResult<R>
where
    F: for<'py> FnOnce(Python<'py>) -> PyResult<R>,
{
    lock::with_guest(op, |py| f(py).map_err(|err| exception::translate(py, err)))
}

fn descriptor_for(class: &HostClass) -> PyResult<&'static TypeDescriptor> {
    TypeDescriptor::lookup(class).ok_or_else(|| {
        PyTypeError::new_err(format!(
            "no type descriptor registered for host class '{}'",
            class
        ))
    })
}

/// Run `source` as a script in `__main__`.
///
/// Returns 0 on success and -1 on any failure. The guest prints the error to
/// its own stderr; it cannot be retrieved from here. Use [`evaluate`] when the
/// error matters.
pub fn exec_source(source: &str) -> i32 {
    let Ok(code) = CString::new(source) else {
        tracing::warn!(target: "pybridge", "exec_source: source contains a NUL byte");
        return -1;
    };
    lock::with_guest("exec_source", |_py| {
        diag!(EXEC, bytes = source.len(), "exec_source");
        Ok(unsafe { ffi::PyRun_SimpleString(code.as_ptr()) })
    })
    .unwrap_or(-1)
}

/// Compile and evaluate `source`, returning a new reference to the result.
///
/// `globals` defaults to `__main__.__dict__` and `locals` to `globals`.
pub fn evaluate(
    source: &str,
    mode: InputMode,
    globals: Option<ForeignHandle>,
    locals: Option<ForeignHandle>,
) -> BridgeResult<ForeignHandle> {
    if source.contains('\0') {
        return Err(BridgeError::InvalidArgument(
            "source contains a NUL byte".to_string(),
        ));
    }
    guarded("evaluate", |py| {
        diag!(EXEC, mode = mode.compile_mode(), bytes = source.len(), "evaluate");
        let builtins = py.import("builtins")?;
        let globals = match globals {
            Some(h) => handle::borrow(py, h)?,
            None => py.import("__main__")?.getattr("__dict__")?,
        };
        let locals = match locals {
            Some(h) => handle::borrow(py, h)?,
            None => globals.clone(),
        };
        let code = builtins
            .getattr("compile")?
            .call1((source, "<string>", mode.compile_mode()))?;
        let result = builtins.getattr("eval")?.call1((code, globals, locals))?;
        Ok(handle::new_reference(result))
    })
}

/// Import a module by dotted name. Returns a new reference.
pub fn import_module(name: &str) -> BridgeResult<ForeignHandle> {
    guarded("import_module", |py| {
        diag!(EXEC, module = name, "import");
        Ok(handle::new_reference(py.import(name)?.into_any()))
    })
}

/// Look up an attribute. Returns a new reference.
pub fn get_attribute(target: ForeignHandle, name: &str) -> BridgeResult<ForeignHandle> {
    guarded("get_attribute", |py| {
        let value = handle::borrow(py, target)?.getattr(name)?;
        Ok(handle::new_reference(value))
    })
}

/// Look up an attribute and convert it to `class`.
pub fn get_attribute_value(
    target: ForeignHandle,
    name: &str,
    class: &HostClass,
) -> BridgeResult<HostValue> {
    guarded("get_attribute_value", |py| {
        let descriptor = descriptor_for(class)?;
        let value = handle::borrow(py, target)?.getattr(name)?;
        conversion::to_host(value, descriptor)
    })
}

/// Assign an attribute, converting `value` as `class` when given.
pub fn set_attribute(
    target: ForeignHandle,
    name: &str,
    value: &HostValue,
    class: Option<&HostClass>,
) -> BridgeResult<()> {
    guarded("set_attribute", |py| {
        let descriptor = class.map(descriptor_for).transpose()?;
        let target = handle::borrow(py, target)?;
        let value = conversion::to_guest(py, value, descriptor)?;
        target.setattr(name, value)
    })
}

/// Call the attribute `name` of `target`. Returns a new reference to the
/// result.
///
/// `hints`, when given, must have one entry per argument.
pub fn invoke(
    target: ForeignHandle,
    name: &str,
    args: &[HostValue],
    hints: Option<&[Option<HostClass>]>,
) -> BridgeResult<ForeignHandle> {
    guarded("invoke", |py| {
        let frame = CallFrame {
            target: handle::borrow(py, target)?,
            name,
            args,
            hints,
        };
        Ok(handle::new_reference(frame.invoke()?))
    })
}

/// Like [`invoke`], converting the result to `result`.
pub fn invoke_typed(
    target: ForeignHandle,
    name: &str,
    args: &[HostValue],
    hints: Option<&[Option<HostClass>]>,
    result: &HostClass,
) -> BridgeResult<HostValue> {
    guarded("invoke_typed", |py| {
        let descriptor = descriptor_for(result)?;
        let frame = CallFrame {
            target: handle::borrow(py, target)?,
            name,
            args,
            hints,
        };
        conversion::to_host(frame.invoke()?, descriptor)
    })
}

/// Convert the value behind `h` to `class`. Never consumes `h`.
pub fn get_value(h: ForeignHandle, class: &HostClass) -> BridgeResult<HostValue> {
    guarded("get_value", |py| {
        let descriptor = descriptor_for(class)?;
        conversion::to_host(handle::borrow(py, h)?, descriptor)
    })
}

fn scalar<T>(
    h: ForeignHandle,
    class: HostClass,
    extract: impl FnOnce(HostValue) -> Option<T>,
) -> BridgeResult<T> {
    let value = get_value(h, &class)?;
    let kind = value.kind_name();
    extract(value).ok_or_else(|| {
        BridgeError::InvalidArgument(format!("expected {}, conversion produced {}", class, kind))
    })
}

pub fn get_int(h: ForeignHandle) -> BridgeResult<i32> {
    scalar(h, HostClass::Int, |value| match value {
        HostValue::Int(i) => Some(i),
        _ => None,
    })
}

pub fn get_long(h: ForeignHandle) -> BridgeResult<i64> {
    scalar(h, HostClass::Long, |value| value.as_i64())
}

pub fn get_double(h: ForeignHandle) -> BridgeResult<f64> {
    scalar(h, HostClass::Double, |value| value.as_f64())
}

pub fn get_bool(h: ForeignHandle) -> BridgeResult<bool> {
    scalar(h, HostClass::Boolean, |value| value.as_bool())
}

/// `None` for a guest `None`.
pub fn get_string(h: ForeignHandle) -> BridgeResult<Option<String>> {
    match get_value(h, &HostClass::String)? {
        HostValue::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// Infer the host representation of the value behind `h`.
pub fn get_object(h: ForeignHandle) -> BridgeResult<HostValue> {
    get_value(h, &HostClass::Object)
}

/// Convert a guest sequence, element by element, to `element`. `None` for a
/// guest `None`.
pub fn get_object_array(
    h: ForeignHandle,
    element: &HostClass,
) -> BridgeResult<Option<Vec<HostValue>>> {
    guarded("get_object_array", |py| {
        let descriptor = descriptor_for(element)?;
        conversion::to_host_array(handle::borrow(py, h)?, descriptor)
    })
}

/// The bridge's own guest module. Returns a new reference.
pub fn bridge_module() -> BridgeResult<ForeignHandle> {
    guarded("bridge_module", |py| {
        let module = context()
            .module(py)
            .ok_or_else(|| PyRuntimeError::new_err("bridge module is not loaded"))?;
        Ok(handle::new_reference(module.into_any()))
    })
}

impl OwnedHandle {
    /// Import a module.
    pub fn import(name: &str) -> BridgeResult<OwnedHandle> {
        import_module(name).map(OwnedHandle::from_new_reference)
    }

    /// Evaluate an expression in `__main__`.
    pub fn eval(source: &str) -> BridgeResult<OwnedHandle> {
        evaluate(source, InputMode::Expression, None, None).map(OwnedHandle::from_new_reference)
    }

    pub fn getattr(&self, name: &str) -> BridgeResult<OwnedHandle> {
        get_attribute(self.handle(), name).map(OwnedHandle::from_new_reference)
    }

    pub fn getattr_value(&self, name: &str, class: &HostClass) -> BridgeResult<HostValue> {
        get_attribute_value(self.handle(), name, class)
    }

    pub fn setattr(&self, name: &str, value: impl Into<HostValue>) -> BridgeResult<()> {
        set_attribute(self.handle(), name, &value.into(), None)
    }

    pub fn call(
        &self,
        name: &str,
        args: &[HostValue],
        hints: Option<&[Option<HostClass>]>,
    ) -> BridgeResult<OwnedHandle> {
        invoke(self.handle(), name, args, hints).map(OwnedHandle::from_new_reference)
    }

    pub fn call_typed(
        &self,
        name: &str,
        args: &[HostValue],
        hints: Option<&[Option<HostClass>]>,
        result: &HostClass,
    ) -> BridgeResult<HostValue> {
        invoke_typed(self.handle(), name, args, hints, result)
    }

    pub fn to_value(&self, class: &HostClass) -> BridgeResult<HostValue> {
        get_value(self.handle(), class)
    }
}
