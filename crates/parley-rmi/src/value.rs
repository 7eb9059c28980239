//! Dynamic values carried by remote calls.

use crate::remotable::Remotable;
use parley_types::Fault;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A live object that can be hosted or proxied.
pub type ObjectRef = Arc<dyn Remotable>;

/// True when both handles point at the same object.
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    object_address(a) == object_address(b)
}

pub(crate) fn object_address(obj: &ObjectRef) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

/// Declared type of a parameter or result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Unit,
    Bool,
    Int,
    Float,
    /// String, or null.
    Text,
    /// Any JSON-representable value.
    Any,
    /// A reference to an object implementing the named capability.
    Object(String),
}

impl ValueType {
    pub fn object(capability: impl Into<String>) -> Self {
        ValueType::Object(capability.into())
    }

    /// The zero/default value returned when no real result exists.
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Unit | ValueType::Text | ValueType::Any => Value::null(),
            ValueType::Bool => Value::Data(serde_json::Value::Bool(false)),
            ValueType::Int => Value::from(0i64),
            ValueType::Float => Value::from(0.0f64),
            ValueType::Object(_) => Value::none(),
        }
    }

    /// Check a data value against this type.
    pub fn check(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value as J;
        match (self, value) {
            (ValueType::Unit, J::Null) => true,
            (ValueType::Bool, J::Bool(_)) => true,
            (ValueType::Int, J::Number(n)) => n.is_i64() || n.is_u64(),
            (ValueType::Float, J::Number(_)) => true,
            (ValueType::Text, J::String(_) | J::Null) => true,
            (ValueType::Any, _) => true,
            _ => false,
        }
    }

    /// The capability name for object types.
    pub fn capability(&self) -> Option<&str> {
        match self {
            ValueType::Object(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Unit => f.write_str("unit"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::Int => f.write_str("int"),
            ValueType::Float => f.write_str("float"),
            ValueType::Text => f.write_str("text"),
            ValueType::Any => f.write_str("any"),
            ValueType::Object(name) => write!(f, "object<{name}>"),
        }
    }
}

/// An argument or result value.
#[derive(Clone)]
pub enum Value {
    /// Plain data, passed by value through the codec.
    Data(serde_json::Value),
    /// An object passed by reference; `None` is the absent object.
    Object(Option<ObjectRef>),
}

impl Value {
    pub fn null() -> Self {
        Value::Data(serde_json::Value::Null)
    }

    pub fn none() -> Self {
        Value::Object(None)
    }

    pub fn object(object: ObjectRef) -> Self {
        Value::Object(Some(object))
    }

    /// Serialize any value into a data value.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Value::Data(serde_json::to_value(value)?))
    }

    /// Deserialize a data value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Fault> {
        match self {
            Value::Data(v) => Ok(serde_json::from_value(v.clone())?),
            Value::Object(_) => Err(Fault::with_kind(
                "InvalidArgument",
                "expected data, found an object reference",
            )),
        }
    }

    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Data(v) => Some(v),
            Value::Object(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(|v| v.as_i64())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_data().and_then(|v| v.as_u64())
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_data().and_then(|v| v.as_f64())
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_data().and_then(|v| v.as_bool())
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(|v| v.as_str())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(Some(obj)) => Some(obj),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => obj,
            Value::Data(_) => None,
        }
    }

    /// Null data or the absent object.
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Value::Data(serde_json::Value::Null) | Value::Object(None)
        )
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(v) => write!(f, "Data({v})"),
            Value::Object(Some(obj)) => write!(f, "Object({})", obj.describe()),
            Value::Object(None) => f.write_str("Object(None)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Object(Some(a)), Value::Object(Some(b))) => same_object(a, b),
            (Value::Object(None), Value::Object(None)) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Data(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::null()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Data(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Data(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Data(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Data(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Data(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Data(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Data(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Data(v.into())
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::object(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_values() {
        assert_eq!(ValueType::Int.default_value(), Value::from(0i64));
        assert_eq!(ValueType::Float.default_value().as_f64(), Some(0.0));
        assert_eq!(ValueType::Bool.default_value().as_bool(), Some(false));
        assert!(ValueType::Text.default_value().is_null());
        assert!(ValueType::object("Callback").default_value().is_null());
        assert!(ValueType::object("Callback")
            .default_value()
            .as_object()
            .is_none());
    }

    #[test]
    fn test_accepts() {
        assert!(ValueType::Int.check(&json!(-3)));
        assert!(ValueType::Int.check(&json!(u64::MAX)));
        assert!(!ValueType::Int.check(&json!(1.5)));
        assert!(ValueType::Float.check(&json!(2)));
        assert!(ValueType::Text.check(&json!(null)));
        assert!(!ValueType::Text.check(&json!(1)));
        assert!(!ValueType::Bool.check(&json!(null)));
        assert!(ValueType::Any.check(&json!({"a": [1, 2]})));
        assert!(ValueType::Unit.check(&json!(null)));
    }

    #[test]
    fn test_encode_decode_struct() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Holder {
            value: i64,
        }
        let v = Value::encode(&Holder {
            value: 1_234_567_890_987_654_321,
        })
        .unwrap();
        let back: Holder = v.decode().unwrap();
        assert_eq!(back.value, 1_234_567_890_987_654_321);
    }

    #[test]
    fn test_decode_object_is_fault() {
        let fault = Value::none().decode::<i64>().unwrap_err();
        assert_eq!(fault.kind, "InvalidArgument");
    }

    #[test]
    fn test_display_types() {
        assert_eq!(ValueType::object("IntConsumer").to_string(), "object<IntConsumer>");
        assert_eq!(ValueType::Text.to_string(), "text");
    }
}
