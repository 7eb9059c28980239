//! Calling-convention policies.
//!
//! A [`Policy`] is resolved once per remote method at registration time by
//! layering [`PolicyOverride`]s on top of a global default, in increasing
//! precedence: global default, capability-level default, method-level
//! override. Proxies may apply one more override layer at runtime.

use serde::{Deserialize, Serialize};

/// Default response timeout for blocking calls, in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 3000;

/// Which delivery channel a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Ordered, guaranteed delivery.
    #[default]
    Reliable,
    /// Best-effort delivery; messages may be dropped.
    Unreliable,
}

/// How a fault raised by a hosted method travels back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionTransmission {
    /// Never sent; only observable on the executing side.
    LocalOnly,
    /// The formatted stack trace as text.
    ToString,
    /// Only the fault's message as text.
    #[default]
    MessageOnly,
    /// The fault itself, encoded structurally.
    Whole,
}

/// Fully resolved calling convention of one remote method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// The method is never forwarded; it gets no remote id.
    pub call_local_only: bool,
    pub transport: TransportKind,
    /// Return the default value immediately; the result is fetched later.
    pub non_blocking: bool,
    /// Fire-and-forget: no result is ever produced.
    pub no_return: bool,
    pub response_timeout_ms: u64,
    pub exception_transmission: ExceptionTransmission,
    /// Forward proxy string conversion to the hosted object.
    pub delegate_to_string: bool,
    /// Forward proxy identity hashing to the hosted object.
    pub delegate_hash_code: bool,
    /// Calls return the default value without sending anything.
    pub closed: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            call_local_only: false,
            transport: TransportKind::Reliable,
            non_blocking: false,
            no_return: false,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            exception_transmission: ExceptionTransmission::default(),
            delegate_to_string: false,
            delegate_hash_code: false,
            closed: false,
        }
    }
}

/// A partial policy: only the `Some` fields take effect when layered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    pub call_local_only: Option<bool>,
    pub transport: Option<TransportKind>,
    pub non_blocking: Option<bool>,
    pub no_return: Option<bool>,
    pub response_timeout_ms: Option<u64>,
    pub exception_transmission: Option<ExceptionTransmission>,
    pub delegate_to_string: Option<bool>,
    pub delegate_hash_code: Option<bool>,
    pub closed: Option<bool>,
}

impl Policy {
    /// Resolve a method's policy: `global`, then `capability`, then `method`.
    pub fn resolve(global: &Policy, capability: &PolicyOverride, method: &PolicyOverride) -> Policy {
        global.with(capability).with(method)
    }

    /// Return a copy of this policy with `layer` applied on top.
    pub fn with(&self, layer: &PolicyOverride) -> Policy {
        Policy {
            call_local_only: layer.call_local_only.unwrap_or(self.call_local_only),
            transport: layer.transport.unwrap_or(self.transport),
            non_blocking: layer.non_blocking.unwrap_or(self.non_blocking),
            no_return: layer.no_return.unwrap_or(self.no_return),
            response_timeout_ms: layer.response_timeout_ms.unwrap_or(self.response_timeout_ms),
            exception_transmission: layer
                .exception_transmission
                .unwrap_or(self.exception_transmission),
            delegate_to_string: layer.delegate_to_string.unwrap_or(self.delegate_to_string),
            delegate_hash_code: layer.delegate_hash_code.unwrap_or(self.delegate_hash_code),
            closed: layer.closed.unwrap_or(self.closed),
        }
    }
}

impl PolicyOverride {
    /// An override that changes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn local_only(mut self) -> Self {
        self.call_local_only = Some(true);
        self
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    pub fn unreliable(self) -> Self {
        self.transport(TransportKind::Unreliable)
    }

    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = Some(true);
        self
    }

    pub fn no_return(mut self) -> Self {
        self.no_return = Some(true);
        self
    }

    pub fn response_timeout_ms(mut self, millis: u64) -> Self {
        self.response_timeout_ms = Some(millis);
        self
    }

    pub fn exceptions(mut self, mode: ExceptionTransmission) -> Self {
        self.exception_transmission = Some(mode);
        self
    }

    pub fn delegate_to_string(mut self) -> Self {
        self.delegate_to_string = Some(true);
        self
    }

    pub fn delegate_hash_code(mut self) -> Self {
        self.delegate_hash_code = Some(true);
        self
    }

    pub fn closed(mut self) -> Self {
        self.closed = Some(true);
        self
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
