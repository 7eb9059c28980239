//! Closure and reference resolution.
//!
//! Object references travel as a single signed slot:
//!
//! * `null`: no object
//! * `n >= 0`: an object hosted by the sender under id `n`
//! * `n < 0`: an object hosted by the receiver under id `!n`
//!
//! Outbound, a proxy bound to the same connection is sent back as a
//! receiver-hosted id and any other object is exported. Inbound, a
//! receiver-hosted id resolves to the original local object and a
//! sender-hosted id becomes a (cached) proxy.

use crate::error::{RmiError, RmiResult};
use crate::registry::RemoteMethod;
use crate::space::SpaceShared;
use crate::value::{ObjectRef, Value, ValueType};
use parley_types::ObjectId;
use parley_wire::Connection;
use std::sync::Arc;

/// A decoded reference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireRef {
    /// Hosted by whoever sent the frame.
    Sender(ObjectId),
    /// Hosted by whoever receives the frame.
    Receiver(ObjectId),
}

impl WireRef {
    pub fn to_json(slot: Option<WireRef>) -> serde_json::Value {
        match slot {
            None => serde_json::Value::Null,
            Some(WireRef::Sender(id)) => i64::from(id.0).into(),
            Some(WireRef::Receiver(id)) => (!i64::from(id.0)).into(),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> RmiResult<Option<WireRef>> {
        let raw = match value {
            serde_json::Value::Null => return Ok(None),
            other => other
                .as_i64()
                .ok_or_else(|| RmiError::Encoding(format!("invalid object reference {other}")))?,
        };
        let (hosted_by_sender, id) = if raw >= 0 { (true, raw) } else { (false, !raw) };
        let id = u32::try_from(id)
            .map_err(|_| RmiError::Encoding(format!("object reference {raw} out of range")))?;
        Ok(Some(if hosted_by_sender {
            WireRef::Sender(ObjectId(id))
        } else {
            WireRef::Receiver(ObjectId(id))
        }))
    }
}

fn by_value(what: &str, ty: &ValueType, value: Value) -> RmiResult<serde_json::Value> {
    match value {
        // Unit results carry nothing, whatever the handler returned.
        Value::Data(_) if *ty == ValueType::Unit => Ok(serde_json::Value::Null),
        Value::Object(None) if *ty == ValueType::Unit => Ok(serde_json::Value::Null),
        Value::Data(v) if ty.check(&v) => Ok(v),
        Value::Data(v) => Err(RmiError::Encoding(format!("{what} expects {ty}, got {v}"))),
        Value::Object(_) => Err(RmiError::Encoding(format!(
            "{what} is passed by value and cannot carry an object reference"
        ))),
    }
}

fn checked(what: &str, ty: &ValueType, value: serde_json::Value) -> RmiResult<Value> {
    if ty.check(&value) {
        Ok(Value::Data(value))
    } else {
        Err(RmiError::Encoding(format!("{what} expects {ty}, got {value}")))
    }
}

impl SpaceShared {
    /// Turn an outbound object into a reference slot for `conn`.
    pub(crate) fn export_ref(
        &self,
        conn: &Arc<dyn Connection>,
        what: &str,
        value: Value,
    ) -> RmiResult<Option<WireRef>> {
        match value {
            Value::Object(None) | Value::Data(serde_json::Value::Null) => Ok(None),
            Value::Object(Some(object)) => match object.binding() {
                Some(binding) if binding.connection == conn.id() => {
                    Ok(Some(WireRef::Receiver(binding.object)))
                }
                _ => Ok(Some(WireRef::Sender(self.objects.export(conn.id(), &object)))),
            },
            Value::Data(other) => Err(RmiError::Encoding(format!(
                "{what} expects an object reference, got {other}"
            ))),
        }
    }

    /// Turn an inbound reference slot from `conn` into an object.
    pub(crate) fn import_ref(
        self: &Arc<Self>,
        conn: &Arc<dyn Connection>,
        slot: Option<WireRef>,
        capability: &str,
    ) -> RmiResult<Option<ObjectRef>> {
        match slot {
            None => Ok(None),
            Some(WireRef::Receiver(id)) => self
                .objects
                .resolve(id)
                .map(Some)
                .ok_or(RmiError::NoSuchObject(id)),
            Some(WireRef::Sender(id)) => {
                let proxy = self.cached_proxy(conn, id, capability)?;
                Ok(Some(proxy as ObjectRef))
            }
        }
    }

    pub(crate) fn encode_args(
        &self,
        conn: &Arc<dyn Connection>,
        method: &RemoteMethod,
        args: Vec<Value>,
    ) -> RmiResult<Vec<serde_json::Value>> {
        if args.len() != method.params.len() {
            return Err(RmiError::Encoding(format!(
                "{} takes {} arguments, got {}",
                method.name,
                method.params.len(),
                args.len()
            )));
        }
        args.into_iter()
            .zip(&method.params)
            .map(|(value, param)| {
                let what = format!("parameter `{}` of {}", param.name, method.name);
                if param.callback {
                    Ok(WireRef::to_json(self.export_ref(conn, &what, value)?))
                } else {
                    by_value(&what, &param.ty, value)
                }
            })
            .collect()
    }

    pub(crate) fn decode_args(
        self: &Arc<Self>,
        conn: &Arc<dyn Connection>,
        method: &RemoteMethod,
        args: Vec<serde_json::Value>,
    ) -> RmiResult<Vec<Value>> {
        if args.len() != method.params.len() {
            return Err(RmiError::Encoding(format!(
                "{} takes {} arguments, got {}",
                method.name,
                method.params.len(),
                args.len()
            )));
        }
        args.into_iter()
            .zip(&method.params)
            .map(|(raw, param)| {
                let what = format!("parameter `{}` of {}", param.name, method.name);
                match param.ty.capability() {
                    Some(capability) if param.callback => {
                        let slot = WireRef::from_json(&raw)?;
                        Ok(Value::Object(self.import_ref(conn, slot, capability)?))
                    }
                    _ => checked(&what, &param.ty, raw),
                }
            })
            .collect()
    }

    pub(crate) fn encode_result(
        &self,
        conn: &Arc<dyn Connection>,
        method: &RemoteMethod,
        value: Value,
    ) -> RmiResult<serde_json::Value> {
        let what = format!("result of {}", method.name);
        if method.result.remote {
            Ok(WireRef::to_json(self.export_ref(conn, &what, value)?))
        } else {
            by_value(&what, &method.result.ty, value)
        }
    }

    pub(crate) fn decode_result(
        self: &Arc<Self>,
        conn: &Arc<dyn Connection>,
        method: &RemoteMethod,
        payload: serde_json::Value,
    ) -> RmiResult<Value> {
        match method.result.ty.capability() {
            Some(capability) if method.result.remote => {
                let slot = WireRef::from_json(&payload)?;
                Ok(Value::Object(self.import_ref(conn, slot, capability)?))
            }
            _ => checked(&format!("result of {}", method.name), &method.result.ty, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slot_encoding() {
        assert_eq!(WireRef::to_json(None), json!(null));
        assert_eq!(WireRef::to_json(Some(WireRef::Sender(ObjectId(0)))), json!(0));
        assert_eq!(WireRef::to_json(Some(WireRef::Receiver(ObjectId(0)))), json!(-1));
        assert_eq!(WireRef::to_json(Some(WireRef::Receiver(ObjectId(4)))), json!(-5));
    }

    #[test]
    fn test_slot_decoding() {
        assert_eq!(WireRef::from_json(&json!(null)).unwrap(), None);
        assert_eq!(
            WireRef::from_json(&json!(7)).unwrap(),
            Some(WireRef::Sender(ObjectId(7)))
        );
        assert_eq!(
            WireRef::from_json(&json!(-1)).unwrap(),
            Some(WireRef::Receiver(ObjectId(0)))
        );
        assert!(WireRef::from_json(&json!("7")).is_err());
        assert!(WireRef::from_json(&json!(1.5)).is_err());
        assert!(WireRef::from_json(&json!(i64::from(u32::MAX) + 1)).is_err());
    }

    #[test]
    fn test_by_value_checks_types() {
        assert_eq!(by_value("x", &ValueType::Int, Value::from(3)).unwrap(), json!(3));
        assert!(by_value("x", &ValueType::Int, Value::from("3")).is_err());
        assert!(by_value("x", &ValueType::Any, Value::none()).is_err());
        assert_eq!(by_value("x", &ValueType::Unit, Value::from(9)).unwrap(), json!(null));
    }
}
