//! Host type descriptors.
//!
//! A [`TypeDescriptor`] describes the shape of a host class and selects the
//! conversion strategy used for it. Descriptors are created on first lookup,
//! cached by class identity and never freed.

use super::diag::diag;
use super::host_value::{HostObject, HostValue};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A host class, as named by the caller of a typed operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostClass {
    Boolean,
    Int,
    Long,
    Double,
    String,
    /// Any host value; the guest value decides the representation.
    Object,
    /// A host object class registered with [`register_class`].
    Named(String),
    Array(Box<HostClass>),
}

impl HostClass {
    pub fn named(name: impl Into<String>) -> Self {
        HostClass::Named(name.into())
    }

    pub fn array_of(element: HostClass) -> Self {
        HostClass::Array(Box::new(element))
    }
}

impl fmt::Display for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostClass::Boolean => f.write_str("boolean"),
            HostClass::Int => f.write_str("int"),
            HostClass::Long => f.write_str("long"),
            HostClass::Double => f.write_str("double"),
            HostClass::String => f.write_str("String"),
            HostClass::Object => f.write_str("Object"),
            HostClass::Named(name) => f.write_str(name),
            HostClass::Array(element) => write!(f, "{}[]", element),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Boolean,
    Int,
    Long,
    Double,
}

#[derive(Debug)]
pub enum TypeCategory {
    Primitive(PrimitiveKind),
    String,
    Object,
    /// Registered host class; the decoder is resolved at conversion time.
    Named(String),
    Array(&'static TypeDescriptor),
}

#[derive(Debug)]
pub struct TypeDescriptor {
    class: HostClass,
    category: TypeCategory,
}

/// Builds a host object of a registered class from a guest value that is not
/// already a wrapped host object. The value arrives inferred as a host value.
pub type Decoder = Arc<dyn Fn(HostValue) -> Result<HostObject, String> + Send + Sync>;

static DESCRIPTORS: Lazy<RwLock<HashMap<HostClass, &'static TypeDescriptor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static DECODERS: Lazy<RwLock<HashMap<String, Decoder>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl TypeDescriptor {
    pub fn class(&self) -> &HostClass {
        &self.class
    }

    pub fn category(&self) -> &TypeCategory {
        &self.category
    }

    /// Look up (or create and cache) the descriptor for `class`.
    ///
    /// Returns `None` for a named class with no registered decoder, or an
    /// array whose element class has none.
    pub fn lookup(class: &HostClass) -> Option<&'static TypeDescriptor> {
        if let Some(descriptor) = DESCRIPTORS.read().get(class) {
            return Some(*descriptor);
        }

        let category = match class {
            HostClass::Boolean => TypeCategory::Primitive(PrimitiveKind::Boolean),
            HostClass::Int => TypeCategory::Primitive(PrimitiveKind::Int),
            HostClass::Long => TypeCategory::Primitive(PrimitiveKind::Long),
            HostClass::Double => TypeCategory::Primitive(PrimitiveKind::Double),
            HostClass::String => TypeCategory::String,
            HostClass::Object => TypeCategory::Object,
            HostClass::Named(name) => {
                if !DECODERS.read().contains_key(name) {
                    diag!(TYPE, "no descriptor for unregistered host class '{}'", name);
                    return None;
                }
                TypeCategory::Named(name.clone())
            }
            HostClass::Array(element) => TypeCategory::Array(Self::lookup(element)?),
        };

        let mut descriptors = DESCRIPTORS.write();
        let descriptor = *descriptors.entry(class.clone()).or_insert_with(|| {
            diag!(TYPE, "created descriptor for host class '{}'", class);
            Box::leak(Box::new(TypeDescriptor {
                class: class.clone(),
                category,
            }))
        });
        Some(descriptor)
    }
}

/// Register the decoder for a named host class.
///
/// Registering the same name again replaces the decoder; descriptors already
/// handed out stay valid because they resolve the decoder on every use.
pub fn register_class<F>(name: impl Into<String>, decoder: F)
where
    F: Fn(HostValue) -> Result<HostObject, String> + Send + Sync + 'static,
{
    let name = name.into();
    diag!(TYPE, "registered host class '{}'", name);
    DECODERS.write().insert(name, Arc::new(decoder));
}

pub(crate) fn decoder(name: &str) -> Option<Decoder> {
    DECODERS.read().get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_descriptors_are_cached() {
        let first = TypeDescriptor::lookup(&HostClass::Int).unwrap();
        let second = TypeDescriptor::lookup(&HostClass::Int).unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(matches!(
            first.category(),
            TypeCategory::Primitive(PrimitiveKind::Int)
        ));
        assert_eq!(first.class(), &HostClass::Int);
    }

    #[test]
    fn test_array_descriptor_links_element() {
        let array = TypeDescriptor::lookup(&HostClass::array_of(HostClass::Double)).unwrap();
        let element = TypeDescriptor::lookup(&HostClass::Double).unwrap();
        match array.category() {
            TypeCategory::Array(inner) => assert!(std::ptr::eq(*inner, element)),
            other => panic!("unexpected category {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_named_class_fails_lookup() {
        assert!(TypeDescriptor::lookup(&HostClass::named("descriptor.test.Missing")).is_none());
        assert!(TypeDescriptor::lookup(&HostClass::array_of(HostClass::named(
            "descriptor.test.Missing"
        )))
        .is_none());
    }

    #[test]
    fn test_registered_named_class() {
        register_class("descriptor.test.Token", |value| match value {
            HostValue::String(s) => Ok(HostObject::with_class("descriptor.test.Token", s)),
            other => Err(format!("cannot build a token from {}", other.kind_name())),
        });

        let token = HostClass::named("descriptor.test.Token");
        let descriptor = TypeDescriptor::lookup(&token).unwrap();
        assert!(matches!(
            descriptor.category(),
            TypeCategory::Named(name) if name == "descriptor.test.Token"
        ));

        let decode = decoder("descriptor.test.Token").unwrap();
        let token = decode(HostValue::String("abc".into())).unwrap();
        assert_eq!(token.downcast_ref::<String>().map(String::as_str), Some("abc"));
        assert!(decode(HostValue::Int(1)).is_err());
    }

    #[test]
    fn test_class_display() {
        assert_eq!(HostClass::array_of(HostClass::Int).to_string(), "int[]");
        assert_eq!(HostClass::named("geo.Point").to_string(), "geo.Point");
        assert_eq!(HostClass::Object.to_string(), "Object");
    }
}
