//! Host-side value model.
//!
//! [`HostValue`] is what the host hands to the bridge and what it gets back
//! from typed conversions. Guest values the bridge cannot map to a host shape
//! come back as [`HostValue::Guest`], an owned handle.

use super::handle::OwnedHandle;
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Maximum container nesting followed when inferring a host value from a
/// guest value.
pub const MAX_CONVERSION_DEPTH: usize = 100;

/// An opaque host object shared with the guest by identity.
///
/// The guest only ever sees a wrapper holding a weak reference, so wrapping
/// never keeps the object alive on its own.
#[derive(Clone)]
pub struct HostObject {
    class: Arc<str>,
    inner: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    /// Wrap `value`, using its Rust type name as the host class name.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::with_class(std::any::type_name::<T>(), value)
    }

    pub fn with_class<T: Any + Send + Sync>(class: impl Into<Arc<str>>, value: T) -> Self {
        Self {
            class: class.into(),
            inner: Arc::new(value),
        }
    }

    /// Share an object the host already holds behind an `Arc`.
    pub fn from_arc(class: impl Into<Arc<str>>, inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            class: class.into(),
            inner,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_ref().downcast_ref::<T>()
    }

    /// Identity comparison.
    pub fn same_object(&self, other: &HostObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakHostObject {
        WeakHostObject {
            class: self.class.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostObject({} @ {:p})",
            self.class,
            Arc::as_ptr(&self.inner) as *const ()
        )
    }
}

/// Non-owning back-reference stored inside guest wrappers.
pub(crate) struct WeakHostObject {
    class: Arc<str>,
    inner: Weak<dyn Any + Send + Sync>,
}

impl WeakHostObject {
    pub(crate) fn upgrade(&self) -> Option<HostObject> {
        self.inner.upgrade().map(|inner| HostObject {
            class: self.class.clone(),
            inner,
        })
    }

    pub(crate) fn class_name(&self) -> &str {
        &self.class
    }
}

/// Host function callable from guest code.
///
/// Arguments arrive inferred as host values; an `Err` surfaces in the guest as
/// a `RuntimeError`.
pub type CallbackFn = dyn Fn(Vec<HostValue>) -> Result<HostValue, String> + Send + Sync;

#[derive(Clone)]
pub struct HostCallback {
    name: Arc<str>,
    func: Arc<CallbackFn>,
}

impl HostCallback {
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, args: Vec<HostValue>) -> Result<HostValue, String> {
        (self.func)(args)
    }
}

impl PartialEq for HostCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostCallback({})", self.name)
    }
}

/// A value on the host side of the bridge.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    /// Ordered sequence; converted to a guest list.
    Array(Vec<HostValue>),
    /// String-keyed mapping; insertion order is preserved.
    Map(IndexMap<String, HostValue>),
    /// Opaque host object, passed to the guest by identity.
    Object(HostObject),
    /// Host function exposed to the guest as a callable.
    Callback(HostCallback),
    /// A guest value held by the host.
    Guest(OwnedHandle),
}

impl HostValue {
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(i64::from(*i)),
            HostValue::Long(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Int(i) => Some(f64::from(*i)),
            HostValue::Long(i) => Some(*i as f64),
            HostValue::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the variant, used in conversion error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Boolean(_) => "boolean",
            HostValue::Int(_) => "int",
            HostValue::Long(_) => "long",
            HostValue::Double(_) => "double",
            HostValue::String(_) => "String",
            HostValue::Array(_) => "array",
            HostValue::Map(_) => "map",
            HostValue::Object(_) => "object",
            HostValue::Callback(_) => "callback",
            HostValue::Guest(_) => "guest value",
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Boolean(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Int(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Long(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Double(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<HostObject> for HostValue {
    fn from(value: HostObject) -> Self {
        HostValue::Object(value)
    }
}

impl From<HostCallback> for HostValue {
    fn from(value: HostCallback) -> Self {
        HostValue::Callback(value)
    }
}

impl From<OwnedHandle> for HostValue {
    fn from(value: OwnedHandle) -> Self {
        HostValue::Guest(value)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(value: Vec<HostValue>) -> Self {
        HostValue::Array(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}
