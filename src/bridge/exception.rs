//! Guest exception translation.
//!
//! Every guest failure crosses the boundary through [`translate`], which
//! captures what can be recovered of the guest error, formats it, and leaves
//! the guest with no error pending.

use super::diag::diag;
use super::error::BridgeError;
use pyo3::exceptions::PyStopIteration;
use pyo3::prelude::*;
use std::fmt;

const UNAVAILABLE: &str = "<unavailable>";

/// A guest error as seen by the host.
///
/// Each field is `None` when the corresponding piece could not be recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestException {
    /// `str()` of the exception type, e.g. `<class 'KeyError'>`.
    pub type_name: Option<String>,
    pub value: Option<String>,
    /// Line of the innermost traceback entry.
    pub line: Option<u32>,
    /// Function name of the innermost traceback entry.
    pub namespace: Option<String>,
    pub file: Option<String>,
    pub is_stop_iteration: bool,
}

impl GuestException {
    fn is_empty(&self) -> bool {
        self.type_name.is_none()
            && self.value.is_none()
            && self.line.is_none()
            && self.namespace.is_none()
            && self.file.is_none()
    }

    /// The formatted diagnostic message.
    pub fn message(&self) -> String {
        if self.is_empty() {
            return "No information available about the guest error".to_string();
        }
        let line = self.line.map(|line| line.to_string());
        format!(
            "Error in guest runtime:\nType: {}\nValue: {}\nLine: {}\nNamespace: {}\nFile: {}",
            self.type_name.as_deref().unwrap_or(UNAVAILABLE),
            self.value.as_deref().unwrap_or(UNAVAILABLE),
            line.as_deref().unwrap_or(UNAVAILABLE),
            self.namespace.as_deref().unwrap_or(UNAVAILABLE),
            self.file.as_deref().unwrap_or(UNAVAILABLE),
        )
    }
}

impl fmt::Display for GuestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

fn stringify(obj: &Bound<'_, PyAny>) -> Option<String> {
    obj.str().ok().map(|s| s.to_string_lossy().into_owned())
}

/// Innermost traceback entry: (line, function name, file name).
fn innermost_location(
    tb: Bound<'_, PyAny>,
) -> (Option<u32>, Option<String>, Option<String>) {
    let mut entry = tb;
    loop {
        match entry.getattr("tb_next") {
            Ok(next) if !next.is_none() => entry = next,
            _ => break,
        }
    }

    let line = entry
        .getattr("tb_lineno")
        .and_then(|line| line.extract::<u32>())
        .ok();
    let code = entry
        .getattr("tb_frame")
        .and_then(|frame| frame.getattr("f_code"))
        .ok();
    let namespace = code
        .as_ref()
        .and_then(|code| code.getattr("co_name").ok())
        .and_then(|name| stringify(&name));
    let file = code
        .as_ref()
        .and_then(|code| code.getattr("co_filename").ok())
        .and_then(|name| stringify(&name));
    (line, namespace, file)
}

fn capture(py: Python<'_>, err: &PyErr) -> GuestException {
    let type_name = stringify(err.get_type(py).as_any());
    let value = stringify(err.value(py).as_any());
    let (line, namespace, file) = match err.traceback(py) {
        Some(tb) => innermost_location(tb.into_any()),
        None => (None, None, None),
    };
    GuestException {
        type_name,
        value,
        line,
        namespace,
        file,
        is_stop_iteration: err.is_instance_of::<PyStopIteration>(py),
    }
}

/// Turn a guest error into the host error type.
///
/// Any error raised while inspecting `err` is drained, so the guest is left
/// clear on return.
pub(crate) fn translate(py: Python<'_>, err: PyErr) -> BridgeError {
    let record = capture(py, &err);
    drop(err);
    while let Some(stray) = PyErr::take(py) {
        diag!(ERR, "discarded error raised during translation: {}", stray);
    }
    diag!(
        ERR,
        type_name = record.type_name.as_deref().unwrap_or(UNAVAILABLE),
        line = record.line,
        "translated guest error"
    );
    BridgeError::Guest(Box::new(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing;
    use pyo3::types::PyDict;

    #[test]
    fn test_missing_attribute_without_traceback() {
        testing::guest();
        Python::attach(|py| {
            let obj = py.eval(c"object()", None, None).unwrap();
            let err = obj.getattr("missing").unwrap_err();
            let translated = translate(py, err);
            let record = translated.guest().unwrap();
            assert!(record.type_name.as_deref().unwrap().contains("AttributeError"));
            assert!(record.value.as_deref().unwrap().contains("missing"));
            let message = translated.to_string();
            assert!(message.starts_with("Error in guest runtime:"));
            assert!(message.contains("Line: <unavailable>"));
            assert!(PyErr::take(py).is_none());
        });
    }

    #[test]
    fn test_location_from_innermost_frame() {
        testing::guest();
        Python::attach(|py| {
            let globals = PyDict::new(py);
            py.run(
                c"def outer():\n    return inner()\n\ndef inner():\n    raise ValueError('boom')\n",
                Some(&globals),
                None,
            )
            .unwrap();
            let err = py
                .eval(c"outer()", Some(&globals), None)
                .unwrap_err();
            let record = translate(py, err).guest().cloned().unwrap();
            assert_eq!(record.line, Some(5));
            assert_eq!(record.namespace.as_deref(), Some("inner"));
            assert_eq!(record.value.as_deref(), Some("boom"));
            assert!(record.file.is_some());
            assert!(!record.is_stop_iteration);
        });
    }

    #[test]
    fn test_stop_iteration_flag() {
        testing::guest();
        Python::attach(|py| {
            let err = py.eval(c"next(iter([]))", None, None).unwrap_err();
            assert!(translate(py, err).is_stop_iteration());
        });
    }

    #[test]
    fn test_empty_record_message() {
        assert_eq!(
            GuestException::default().message(),
            "No information available about the guest error"
        );
        let partial = GuestException {
            value: Some("x".into()),
            ..GuestException::default()
        };
        assert!(partial.message().contains("Type: <unavailable>"));
        assert!(partial.message().contains("Value: x"));
    }
}
