//! Guest lock coordination.
//!
//! Every guest operation runs under the interpreter's global lock. Entry
//! points go through [`with_guest`], which acquires the lock for the duration
//! of a closure and releases it on every exit path, including unwinding.
//! Acquisition is re-entrant, so nested bridge calls on one thread are fine.
//!
//! Initializing the interpreter leaves the initializing thread holding the
//! lock implicitly. [`release_startup_lock`] drops that hold exactly once per
//! initialization, guarded by its own done-flag, so other host threads can
//! enter. [`reclaim_startup_lock`] takes it back for finalization.

use super::context::context;
use super::diag::diag;
use super::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use pyo3::{ffi, Python};
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

struct SavedThread(NonNull<ffi::PyThreadState>);

// The saved state is only handed back to the interpreter while no other
// thread can hold the lock, under the lifecycle mutex.
unsafe impl Send for SavedThread {}

static STARTUP_THREAD: Mutex<Option<SavedThread>> = Mutex::new(None);
static STARTUP_RELEASED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Drop the implicit lock hold left by interpreter initialization.
///
/// Must run on the thread that initialized the interpreter, after it has
/// finished its own setup work. Later calls are no-ops until the next
/// [`reclaim_startup_lock`].
pub(crate) fn release_startup_lock() {
    if STARTUP_RELEASED.swap(true, Ordering::AcqRel) {
        return;
    }
    let state = unsafe { ffi::PyEval_SaveThread() };
    *STARTUP_THREAD.lock() = NonNull::new(state).map(SavedThread);
    diag!(EXEC, "startup thread released the guest lock");
}

/// Re-acquire the lock using the saved startup thread state.
///
/// Returns false if there was nothing to reclaim; the caller must then obtain
/// the lock some other way. The lock is left held on return.
pub(crate) fn reclaim_startup_lock() -> bool {
    if !STARTUP_RELEASED.swap(false, Ordering::AcqRel) {
        return false;
    }
    match STARTUP_THREAD.lock().take() {
        Some(saved) => {
            unsafe { ffi::PyEval_RestoreThread(saved.0.as_ptr()) };
            diag!(EXEC, "startup thread state reclaimed the guest lock");
            true
        }
        None => false,
    }
}

/// Nesting level of guest lock scopes on the current thread.
pub(crate) fn depth() -> usize {
    DEPTH.with(Cell::get)
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f` with the guest lock held.
///
/// Fails with [`BridgeError::NotRunning`] without touching the guest if the
/// bridge is not running.
pub(crate) fn with_guest<R, F>(op: &'static str, f: F) -> BridgeResult<R>
where
    F: for<'py> FnOnce(Python<'py>) -> BridgeResult<R>,
{
    if !context().is_running() {
        diag!(EXEC, "{}: guest runtime is not running", op);
        return Err(BridgeError::NotRunning);
    }

    let _depth = DepthGuard::enter();
    tracing::trace!(target: "pybridge", op, depth = depth(), "entering guest");
    Python::attach(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing;
    use pyo3::prelude::*;

    #[test]
    fn test_reentrant_acquisition() {
        testing::guest();
        let nested = with_guest("outer", |_py| {
            assert_eq!(depth(), 1);
            with_guest("inner", |py| {
                assert_eq!(depth(), 2);
                Ok(py.eval(c"21 * 2", None, None).and_then(|v| v.extract::<i64>()).ok())
            })
        })
        .unwrap();
        assert_eq!(nested, Some(42));
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_concurrent_threads_serialize() {
        testing::guest();
        let threads: Vec<_> = (0..4)
            .map(|i| {
                std::thread::spawn(move || {
                    with_guest("thread", move |py| {
                        let code = std::ffi::CString::new(format!("{} + 100", i)).unwrap();
                        Ok(py
                            .eval(&code, None, None)
                            .and_then(|v| v.extract::<i64>())
                            .unwrap())
                    })
                    .unwrap()
                })
            })
            .collect();

        for (i, t) in threads.into_iter().enumerate() {
            assert_eq!(t.join().unwrap(), i as i64 + 100);
        }
    }

    #[test]
    fn test_startup_release_is_idempotent() {
        testing::guest();
        // The shared test interpreter already released its startup hold.
        release_startup_lock();
        assert!(STARTUP_RELEASED.load(Ordering::Acquire));
    }
}
