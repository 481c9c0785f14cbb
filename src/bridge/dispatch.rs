//! Name-based call dispatch.

use super::conversion;
use super::descriptor::{HostClass, TypeDescriptor};
use super::diag::diag;
use super::host_value::HostValue;
use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;
use pyo3::types::PyTuple;

/// One dispatched call. Lives on the stack for the duration of the call.
pub(crate) struct CallFrame<'a, 'py> {
    pub target: Bound<'py, PyAny>,
    pub name: &'a str,
    pub args: &'a [HostValue],
    /// Per-argument host class hints; `None` entries use inference.
    pub hints: Option<&'a [Option<HostClass>]>,
}

impl<'py> CallFrame<'_, 'py> {
    /// Resolve, check, marshal and invoke. The result is a new reference.
    pub(crate) fn invoke(self) -> PyResult<Bound<'py, PyAny>> {
        let py = self.target.py();
        let callable = self.target.getattr(self.name)?;
        if !callable.is_callable() {
            return Err(PyTypeError::new_err(format!("'{}' is not callable", self.name)));
        }

        diag!(CALL, name = self.name, argc = self.args.len(), "dispatch");
        if self.args.is_empty() {
            return callable.call0();
        }

        let args = self.marshal(py)?;
        callable.call1(PyTuple::new(py, args)?)
    }

    fn marshal(&self, py: Python<'py>) -> PyResult<Vec<Bound<'py, PyAny>>> {
        if let Some(hints) = self.hints {
            if hints.len() != self.args.len() {
                return Err(PyTypeError::new_err(format!(
                    "callable '{}': {} type hints for {} arguments",
                    self.name,
                    hints.len(),
                    self.args.len()
                )));
            }
        }

        let mut converted = Vec::with_capacity(self.args.len());
        for (index, arg) in self.args.iter().enumerate() {
            let hint = self.hints.and_then(|hints| hints[index].as_ref());
            let descriptor = match hint {
                Some(class) => Some(TypeDescriptor::lookup(class).ok_or_else(|| {
                    PyTypeError::new_err(format!(
                        "callable '{}': argument {}: no type descriptor for host class '{}'",
                        self.name, index, class
                    ))
                })?),
                None => None,
            };
            converted.push(conversion::to_guest(py, arg, descriptor)?);
        }
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::handle::OwnedHandle;
    use crate::bridge::testing;

    fn call<'py>(
        target: Bound<'py, PyAny>,
        name: &str,
        args: &[HostValue],
        hints: Option<&[Option<HostClass>]>,
    ) -> PyResult<Bound<'py, PyAny>> {
        CallFrame {
            target,
            name,
            args,
            hints,
        }
        .invoke()
    }

    #[test]
    fn test_nullary_and_positional_calls() {
        testing::guest();
        Python::attach(|py| {
            let items = py.eval(c"[3, 1, 2]", None, None).unwrap();
            let count = call(items.clone(), "__len__", &[], None).unwrap();
            assert_eq!(count.extract::<usize>().unwrap(), 3);

            let found = call(items, "index", &[HostValue::Int(2)], None).unwrap();
            assert_eq!(found.extract::<usize>().unwrap(), 2);
        });
    }

    #[test]
    fn test_not_callable_checked_before_conversion() {
        testing::guest();
        Python::attach(|py| {
            let target = py
                .eval(c"__import__('types').SimpleNamespace(value=1)", None, None)
                .unwrap();
            let hints = [Some(HostClass::named("dispatch.test.Unregistered"))];
            let err = call(target, "value", &[HostValue::Int(1)], Some(&hints)).unwrap_err();
            assert!(err.is_instance_of::<PyTypeError>(py));
            assert!(err.to_string().contains("'value' is not callable"));
        });
    }

    #[test]
    fn test_hint_errors() {
        testing::guest();
        Python::attach(|py| {
            let target = py.eval(c"[]", None, None).unwrap();
            let hints = [Some(HostClass::named("dispatch.test.Unregistered"))];
            let err =
                call(target.clone(), "append", &[HostValue::Int(1)], Some(&hints)).unwrap_err();
            assert!(err.to_string().contains("no type descriptor"));

            let err = call(target.clone(), "append", &[HostValue::Int(1)], Some(&[])).unwrap_err();
            assert!(err.is_instance_of::<PyTypeError>(py));

            let hints = [Some(HostClass::Double)];
            call(target.clone(), "append", &[HostValue::Int(1)], Some(&hints)).unwrap();
            assert_eq!(target.get_item(0).unwrap().extract::<f64>().unwrap(), 1.0);
        });
    }

    #[test]
    fn test_failed_marshalling_releases_converted_arguments() {
        testing::guest();
        Python::attach(|py| {
            let target = py.eval(c"[]", None, None).unwrap();
            let guest = py.eval(c"object()", None, None).unwrap();
            let args = [
                HostValue::Guest(OwnedHandle::from_bound(guest.clone())),
                HostValue::Int(1),
            ];
            let hints = [None, Some(HostClass::named("dispatch.test.Unregistered"))];
            let guest_before = guest.get_refcnt();
            let target_before = target.get_refcnt();

            let err = call(target.clone(), "insert", &args, Some(&hints)).unwrap_err();
            assert!(err.to_string().contains("argument 1"));
            assert_eq!(guest.get_refcnt(), guest_before);
            assert_eq!(target.get_refcnt(), target_before);
            assert_eq!(target.len().unwrap(), 0);
        });
    }

    #[test]
    fn test_missing_attribute() {
        testing::guest();
        Python::attach(|py| {
            let target = py.eval(c"object()", None, None).unwrap();
            let err = call(target, "nope", &[], None).unwrap_err();
            assert!(err.is_instance_of::<pyo3::exceptions::PyAttributeError>(py));
        });
    }
}
