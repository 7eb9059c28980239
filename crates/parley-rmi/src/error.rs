//! Error types for remote invocation.

use parley_types::{ConnectionId, Fault, ObjectId, TransactionId};
use parley_wire::WireError;
use std::fmt;
use thiserror::Error;

/// A fault reported by the peer that executed a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// Text payload: the fault's message or its formatted stack trace,
    /// depending on the method's exception transmission.
    Text(String),
    /// The structured fault itself.
    Fault(Fault),
}

impl RemoteFailure {
    /// The human-readable part of the failure.
    pub fn message(&self) -> &str {
        match self {
            RemoteFailure::Text(text) => text,
            RemoteFailure::Fault(fault) => &fault.message,
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFailure::Text(text) => f.write_str(text),
            RemoteFailure::Fault(fault) => write!(f, "{fault}"),
        }
    }
}

/// Errors from the invocation core.
#[derive(Debug, Error)]
pub enum RmiError {
    /// Invalid capability declaration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    #[error("Object id {0} is already bound")]
    DuplicateObjectId(ObjectId),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Capability {capability} has no remote method `{method}`")]
    UnknownMethod { capability: String, method: String },

    #[error("Method `{0}` is local-only and has no remote counterpart")]
    LocalOnly(String),

    /// Arguments or results did not fit the declared types, or a frame
    /// could not be (de)serialized.
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Transaction {transaction} timed out after {timeout_ms} ms")]
    Timeout {
        transaction: TransactionId,
        timeout_ms: u64,
    },

    /// The callee raised a fault.
    #[error("{0}")]
    Remote(RemoteFailure),

    /// A local delegate installed on a proxy raised a fault.
    #[error("Local delegate failed: {0}")]
    Delegate(Fault),

    #[error("Transport error: {0}")]
    Transport(#[from] WireError),

    #[error("Connection {0} was lost before the result arrived")]
    Disconnected(ConnectionId),

    #[error("No pending asynchronous call for transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("No call has been made yet")]
    NoTransaction,

    #[error("Transaction {0} is already being awaited")]
    AlreadyAwaited(TransactionId),

    #[error("Object {0} is not hosted")]
    NoSuchObject(ObjectId),

    #[error("Invocation space has shut down")]
    SpaceClosed,
}

/// Alias for Result with RmiError.
pub type RmiResult<T> = Result<T, RmiError>;

impl RmiError {
    /// True for setup-time errors raised by registration or hosting.
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            RmiError::Config(_)
                | RmiError::DuplicateCapability(_)
                | RmiError::DuplicateObjectId(_)
                | RmiError::UnknownCapability(_)
        )
    }
}

impl From<rmp_serde::encode::Error> for RmiError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RmiError::Encoding(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RmiError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RmiError::Encoding(err.to_string())
    }
}

impl From<RmiError> for Fault {
    fn from(err: RmiError) -> Self {
        match err {
            RmiError::Remote(RemoteFailure::Fault(fault)) => fault,
            RmiError::Remote(RemoteFailure::Text(text)) => Fault::with_kind("RemoteFault", text),
            RmiError::Delegate(fault) => fault,
            RmiError::Encoding(message) => Fault::with_kind("EncodingError", message),
            RmiError::NoSuchObject(id) => {
                Fault::with_kind("NoSuchObject", format!("No object hosted with id {id}"))
            }
            other => Fault::with_kind("InvocationFailed", other.to_string()),
        }
    }
}
