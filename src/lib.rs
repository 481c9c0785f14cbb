//! Embed CPython and drive it from Rust.
//!
//! ```no_run
//! use pybridge::{start, BridgeConfig, HostClass, HostValue, OwnedHandle};
//!
//! start(&BridgeConfig::from_env())?;
//! let math = OwnedHandle::import("math")?;
//! let root = math.call_typed("sqrt", &[HostValue::Int(16)], None, &HostClass::Double)?;
//! assert_eq!(root, HostValue::Double(4.0));
//! # Ok::<(), pybridge::BridgeError>(())
//! ```

pub mod bridge;

pub use bridge::*;
