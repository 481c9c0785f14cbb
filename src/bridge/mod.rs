//! Cross-runtime object bridge.
//!
//! The host drives an embedded CPython interpreter through opaque
//! [`ForeignHandle`]s. All guest work happens under the interpreter lock,
//! values cross through the conversion engine, and guest failures come back
//! as [`BridgeError`].

pub mod api;
mod callback;
pub mod config;
mod context;
mod conversion;
pub mod descriptor;
pub mod diag;
mod dispatch;
pub mod error;
pub mod exception;
mod extension;
pub mod handle;
pub mod host_value;
pub mod lifecycle;
mod lock;
mod output;
pub mod wrapper;

pub use api::{
    bridge_module, evaluate, exec_source, get_attribute, get_attribute_value, get_bool,
    get_double, get_int, get_long, get_object, get_object_array, get_string, get_value,
    import_module, invoke, invoke_typed, set_attribute, InputMode,
};
pub use config::BridgeConfig;
pub use descriptor::{register_class, HostClass, TypeDescriptor};
pub use diag::{diag_flags, set_diag_flags, DiagFlags};
pub use error::{BridgeError, BridgeResult, ProtocolViolation};
pub use exception::GuestException;
pub use extension::MODULE_NAME;
pub use handle::{decref, incref, live_handles, ref_count, ForeignHandle, OwnedHandle};
pub use host_value::{HostCallback, HostObject, HostValue, MAX_CONVERSION_DEPTH};
pub use lifecycle::{is_running, start, stop, version};
