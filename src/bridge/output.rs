//! Guest stdout/stderr sink.
//!
//! Replaces `sys.stdout` and `sys.stderr` with minimal file-like objects that
//! write straight to the host process streams.

use super::diag::diag;
use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyTuple};
use std::ffi::CStr;
use std::io::{self, Write};

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn write(self, text: &str) -> io::Result<()> {
        match self {
            Stream::Stdout => io::stdout().lock().write_all(text.as_bytes()),
            Stream::Stderr => io::stderr().lock().write_all(text.as_bytes()),
        }
    }

    fn flush(self) -> io::Result<()> {
        match self {
            Stream::Stdout => io::stdout().lock().flush(),
            Stream::Stderr => io::stderr().lock().flush(),
        }
    }

    fn attr(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

fn sink<'py>(py: Python<'py>, stream: Stream) -> PyResult<Bound<'py, PyAny>> {
    const WRITE: &CStr = c"write";
    const FLUSH: &CStr = c"flush";

    let write = PyCFunction::new_closure(
        py,
        Some(WRITE),
        None,
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<usize> {
            let text: String = args.get_item(0)?.extract()?;
            stream.write(&text)?;
            Ok(text.chars().count())
        },
    )?;
    let flush = PyCFunction::new_closure(
        py,
        Some(FLUSH),
        None,
        move |_args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<()> {
            Ok(stream.flush()?)
        },
    )?;

    let kwargs = PyDict::new(py);
    kwargs.set_item("write", write)?;
    kwargs.set_item("flush", flush)?;
    kwargs.set_item("encoding", "utf-8")?;
    py.import("types")?
        .getattr("SimpleNamespace")?
        .call((), Some(&kwargs))
}

/// Route guest `sys.stdout` and `sys.stderr` to the host streams.
pub(crate) fn install(py: Python<'_>) -> PyResult<()> {
    let sys = py.import("sys")?;
    for stream in [Stream::Stdout, Stream::Stderr] {
        sys.setattr(stream.attr(), sink(py, stream)?)?;
    }
    diag!(EXEC, "guest output redirected to host streams");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing;

    #[test]
    fn test_sink_accepts_writes() {
        testing::guest();
        Python::attach(|py| {
            let out = sink(py, Stream::Stdout).unwrap();
            let written: usize = out
                .call_method1("write", ("héllo\n",))
                .unwrap()
                .extract()
                .unwrap();
            assert_eq!(written, 6);
            out.call_method0("flush").unwrap();
            assert_eq!(
                out.getattr("encoding").unwrap().extract::<String>().unwrap(),
                "utf-8"
            );
            assert!(out.call_method1("write", (42,)).is_err());
        });
    }
}
