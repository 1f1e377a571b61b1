//! Host value representation.
//!
//! The handle table stores a tagged variant over the minimal capability set
//! the bridge needs: the absent value, null, booleans, opaque host objects,
//! and guest callables. Richer host types (strings, captured errors,
//! promises, elements) all travel through the `Object` arm as opaque
//! reference-counted payloads; the bridge never inspects them beyond the
//! downcasts its own primitives require.

use crate::closure::ClosureWrapper;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque reference to a host-owned object
pub type HostObject = Arc<dyn Any + Send + Sync>;

/// A value addressable through the handle table
#[derive(Clone)]
pub enum HostValue {
    /// The absent value
    Undefined,
    /// The null value
    Null,
    /// A boolean
    Bool(bool),
    /// An opaque host object reference
    Object(HostObject),
    /// A guest callable exposed to host APIs
    Callable(Arc<ClosureWrapper>),
}

impl HostValue {
    /// Wrap an arbitrary host object
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        HostValue::Object(Arc::new(value))
    }

    /// Wrap a host string
    pub fn string(value: impl Into<String>) -> Self {
        Self::object(value.into())
    }

    /// Check if this is the absent value
    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    /// Check if this is null
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the opaque object reference
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Downcast the object payload to a concrete host type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            HostValue::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Get as a host string
    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    /// Get the closure wrapper, if this value is callable
    pub fn as_callable(&self) -> Option<&Arc<ClosureWrapper>> {
        match self {
            HostValue::Callable(wrapper) => Some(wrapper),
            _ => None,
        }
    }

    /// Project this value onto the JSON data model.
    ///
    /// Strings, booleans, and stored JSON documents map directly; captured
    /// errors serialize through their wire form; everything without a JSON
    /// counterpart (callables, opaque objects) maps to null, the same way
    /// a host stringifier treats non-data values.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            HostValue::Undefined | HostValue::Null => serde_json::Value::Null,
            HostValue::Bool(b) => serde_json::Value::Bool(*b),
            HostValue::Object(_) => {
                if let Some(json) = self.downcast_ref::<serde_json::Value>() {
                    json.clone()
                } else if let Some(text) = self.as_str() {
                    serde_json::Value::String(text.to_owned())
                } else if let Some(err) = self.downcast_ref::<crate::error::HostError>() {
                    serde_json::to_value(err).unwrap_or(serde_json::Value::Null)
                } else {
                    serde_json::Value::Null
                }
            }
            HostValue::Callable(_) => serde_json::Value::Null,
        }
    }
}

impl Default for HostValue {
    fn default() -> Self {
        HostValue::Undefined
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => write!(f, "Undefined"),
            HostValue::Null => write!(f, "Null"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Object(_) => match self.as_str() {
                Some(s) => write!(f, "Object({:?})", s),
                None => write!(f, "Object(<opaque>)"),
            },
            HostValue::Callable(w) => {
                write!(f, "Callable(invoke={}, destroy={})", w.invoke_slot(), w.destroy_slot())
            }
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::string(s)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::string(s)
    }
}

impl From<crate::error::HostError> for HostValue {
    fn from(err: crate::error::HostError) -> Self {
        HostValue::object(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;

    #[test]
    fn test_value_predicates() {
        assert!(HostValue::Undefined.is_undefined());
        assert!(HostValue::Null.is_null());
        assert_eq!(HostValue::Bool(true).as_bool(), Some(true));
        assert_eq!(HostValue::Null.as_bool(), None);
    }

    #[test]
    fn test_string_round_trip() {
        let v = HostValue::string("hello");
        assert_eq!(v.as_str(), Some("hello"));
        assert!(v.as_object().is_some());
    }

    #[test]
    fn test_downcast() {
        let v = HostValue::from(HostError::network("offline"));
        let err = v.downcast_ref::<HostError>().unwrap();
        assert!(err.message.contains("offline"));
        assert!(v.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_conversions() {
        let v: HostValue = true.into();
        assert_eq!(v.as_bool(), Some(true));

        let v: HostValue = "text".into();
        assert_eq!(v.as_str(), Some("text"));
    }

    #[test]
    fn test_to_json_projection() {
        assert_eq!(HostValue::Undefined.to_json(), serde_json::Value::Null);
        assert_eq!(HostValue::Bool(true).to_json(), serde_json::json!(true));
        assert_eq!(HostValue::string("hi").to_json(), serde_json::json!("hi"));

        let doc = serde_json::json!({ "items": [1, 2, 3] });
        assert_eq!(HostValue::object(doc.clone()).to_json(), doc);

        let err = HostValue::from(HostError::network("offline")).to_json();
        assert_eq!(err["kind"], serde_json::json!("NETWORK"));

        // Opaque payloads have no JSON counterpart.
        assert_eq!(HostValue::object(3.5f64).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_debug_formatting() {
        assert_eq!(format!("{:?}", HostValue::Undefined), "Undefined");
        assert_eq!(format!("{:?}", HostValue::string("x")), "Object(\"x\")");
    }
}
