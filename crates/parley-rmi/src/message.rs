//! Invocation and result frames.
//!
//! Frames are MessagePack-encoded. Argument and result payloads are
//! carried as dynamic values; object references inside them use the
//! signed slot encoding from [`crate::resolver`].

use crate::error::RmiResult;
use parley_types::{ExceptionTransmission, MethodId, ObjectId, TransactionId};
use serde::{Deserialize, Serialize};

/// A request to run a method on a hosted object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub transaction: TransactionId,
    pub object: ObjectId,
    pub method: MethodId,
    /// False when the caller will not read a result.
    pub expects_reply: bool,
    /// Caller-side override of how a fault is reported back.
    pub exceptions: Option<ExceptionTransmission>,
    pub args: Vec<serde_json::Value>,
}

/// The outcome of an invocation.
///
/// `object` is the target id on success and its bitwise complement when
/// the payload is a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub transaction: TransactionId,
    pub object: i64,
    pub method: MethodId,
    pub payload: serde_json::Value,
}

impl InvocationResult {
    pub fn success(
        transaction: TransactionId,
        object: ObjectId,
        method: MethodId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            transaction,
            object: i64::from(object.0),
            method,
            payload,
        }
    }

    pub fn failure(
        transaction: TransactionId,
        object: ObjectId,
        method: MethodId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            transaction,
            object: !i64::from(object.0),
            method,
            payload,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.object < 0
    }

    /// The object the call targeted.
    pub fn target(&self) -> ObjectId {
        let raw = if self.object < 0 { !self.object } else { self.object };
        ObjectId(raw as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Invoke(InvocationRequest),
    Result(InvocationResult),
}

pub fn encode(frame: &Frame) -> RmiResult<Vec<u8>> {
    Ok(rmp_serde::to_vec(frame)?)
}

pub fn decode(bytes: &[u8]) -> RmiResult<Frame> {
    Ok(rmp_serde::from_slice(bytes)?)
}
