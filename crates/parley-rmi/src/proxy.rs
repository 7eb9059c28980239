//! Proxies: local stand-ins for objects hosted by a peer.

use crate::error::{RmiError, RmiResult};
use crate::message::{self, Frame, InvocationRequest};
use crate::registry::{CapabilityInfo, RemoteMethod};
use crate::remotable::{Binding, Call, Remotable};
use crate::space::{AsyncCall, SpaceShared};
use crate::value::{ObjectRef, Value};
use async_trait::async_trait;
use parley_types::{
    ExceptionTransmission, Fault, ObjectId, Policy, PolicyOverride, TransactionId, TransportKind,
};
use parley_wire::Connection;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tracing::debug;

/// A local object that answers some methods instead of the remote one.
pub(crate) struct Delegate {
    pub(crate) object: ObjectRef,
    pub(crate) capability: Arc<CapabilityInfo>,
}

/// A typed handle on a remote object.
///
/// Calls are serialized into invocation frames and sent on the proxy's
/// connection. The effective policy of each call is the method's policy
/// with this proxy's runtime overrides applied.
pub struct Proxy {
    space: Weak<SpaceShared>,
    connection: Arc<dyn Connection>,
    object: ObjectId,
    capability: Arc<CapabilityInfo>,
    delegate: Option<Delegate>,
    overrides: RwLock<PolicyOverride>,
    last_transaction: Mutex<Option<TransactionId>>,
}

impl Proxy {
    pub(crate) fn new(
        space: Weak<SpaceShared>,
        connection: Arc<dyn Connection>,
        object: ObjectId,
        capability: Arc<CapabilityInfo>,
        delegate: Option<Delegate>,
    ) -> Self {
        Self {
            space,
            connection,
            object,
            capability,
            delegate,
            overrides: RwLock::new(PolicyOverride::none()),
            last_transaction: Mutex::new(None),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn capability(&self) -> &CapabilityInfo {
        &self.capability
    }

    pub fn has_delegate(&self) -> bool {
        self.delegate.is_some()
    }

    fn space(&self) -> RmiResult<Arc<SpaceShared>> {
        self.space
            .upgrade()
            .filter(|space| !space.is_closed())
            .ok_or(RmiError::SpaceClosed)
    }

    /// Call a method by name.
    ///
    /// Methods declared by the delegate's capability run on the delegate;
    /// everything else is forwarded.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> RmiResult<Value> {
        if let Some(delegate) = &self.delegate {
            if let Some(method) = delegate.capability.method(name) {
                let registry = Arc::clone(&self.space()?.registry);
                let call = Call::new(Arc::clone(method), args, registry);
                return delegate
                    .object
                    .invoke(call)
                    .await
                    .map_err(RmiError::Delegate);
            }
        }
        match self.capability.method(name) {
            Some(method) => {
                let method = Arc::clone(method);
                self.call_method(&method, args).await
            }
            None if self.capability.is_local_only(name) => Err(RmiError::LocalOnly(name.to_string())),
            None => Err(RmiError::UnknownMethod {
                capability: self.capability.name().to_string(),
                method: name.to_string(),
            }),
        }
    }

    /// Forward a resolved method to the remote object.
    pub async fn call_method(&self, method: &Arc<RemoteMethod>, args: Vec<Value>) -> RmiResult<Value> {
        let policy = self.effective_policy(method);
        if policy.closed {
            debug!(proxy = %self.object, method = %method.name, "Proxy closed, not forwarding");
            return Ok(method.default_result());
        }
        let space = self.space()?;
        let args = space.encode_args(&self.connection, method, args)?;
        let transaction = space.next_transaction();
        *self
            .last_transaction
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(transaction);
        space.remember_transaction(transaction);

        let expects_reply = !policy.no_return;
        let exceptions = self
            .overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .exception_transmission;
        let frame = message::encode(&Frame::Invoke(InvocationRequest {
            transaction,
            object: self.object,
            method: method.id,
            expects_reply,
            exceptions,
            args,
        }))?;

        let non_blocking = expects_reply && policy.non_blocking;
        if non_blocking {
            space.async_calls.insert(
                transaction,
                AsyncCall {
                    connection: Arc::clone(&self.connection),
                    timeout_ms: policy.response_timeout_ms,
                },
            );
        }

        debug!(
            %transaction,
            object = %self.object,
            method = %method.name,
            connection = %self.connection.id(),
            "Sending invocation"
        );
        if let Err(e) = self.connection.send(frame, policy.transport).await {
            space.async_calls.remove(&transaction);
            return Err(e.into());
        }

        if !expects_reply || non_blocking {
            return Ok(method.default_result());
        }
        space
            .results
            .read(
                transaction,
                Some(self.connection.id()),
                Duration::from_millis(policy.response_timeout_ms),
            )
            .await
    }

    /// The method's policy with this proxy's overrides applied.
    pub fn effective_policy(&self, method: &RemoteMethod) -> Policy {
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        let mut policy = method.policy.with(&overrides);
        if method.is_builtin() {
            policy.non_blocking = false;
            policy.no_return = false;
        }
        policy
    }

    fn adjust(&self, f: impl FnOnce(&mut PolicyOverride)) {
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        f(&mut overrides);
    }

    pub fn set_non_blocking(&self, non_blocking: bool) {
        self.adjust(|o| o.non_blocking = Some(non_blocking));
    }

    pub fn set_response_timeout(&self, millis: u64) {
        self.adjust(|o| o.response_timeout_ms = Some(millis));
    }

    /// When false, calls are sent without asking for a result.
    pub fn set_transmit_return_value(&self, transmit: bool) {
        self.adjust(|o| o.no_return = Some(!transmit));
    }

    pub fn set_transport(&self, transport: TransportKind) {
        self.adjust(|o| o.transport = Some(transport));
    }

    /// Ask the callee to report faults from this proxy's calls in the
    /// given mode instead of the method's own.
    pub fn set_exception_transmission(&self, mode: ExceptionTransmission) {
        self.adjust(|o| o.exception_transmission = Some(mode));
    }

    /// Stop forwarding; calls return default values.
    pub fn close(&self) {
        self.adjust(|o| o.closed = Some(true));
    }

    pub fn open(&self) {
        self.adjust(|o| o.closed = Some(false));
    }

    pub fn is_closed(&self) -> bool {
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        overrides.closed.unwrap_or(self.capability.policy().closed)
    }

    /// Id of the last call this proxy sent.
    pub fn last_response_id(&self) -> Option<TransactionId> {
        *self
            .last_transaction
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn has_last_response(&self) -> bool {
        match (self.last_response_id(), self.space.upgrade()) {
            (Some(transaction), Some(space)) => space.results.has_value(transaction),
            _ => false,
        }
    }

    /// Wait for the result of this proxy's last non-blocking call.
    pub async fn wait_for_last_response(&self) -> RmiResult<Value> {
        let transaction = self
            .last_response_id()
            .ok_or(RmiError::NoTransaction)?;
        self.wait_for_response(transaction).await
    }

    pub async fn wait_for_response(&self, transaction: TransactionId) -> RmiResult<Value> {
        self.space()?.take_async_result(transaction, None).await
    }

    /// Text form of the remote object.
    ///
    /// Asks the peer only when the capability delegates `describe`;
    /// otherwise describes the proxy itself.
    pub async fn remote_describe(&self) -> RmiResult<String> {
        if let Some(delegate) = &self.delegate {
            return Ok(delegate.object.describe());
        }
        let policy = self.capability.policy();
        if !policy.delegate_to_string || self.is_closed() {
            return Ok(self.describe());
        }
        let method = Arc::clone(self.space()?.registry.describe_method());
        let value = self.call_method(&method, Vec::new()).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RmiError::Encoding("describe returned non-text".to_string()))
    }

    /// Identity hash of the remote object, when the capability delegates
    /// it; otherwise the proxy's own.
    pub async fn remote_hash(&self) -> RmiResult<u64> {
        if let Some(delegate) = &self.delegate {
            return Ok(delegate.object.identity_hash());
        }
        let policy = self.capability.policy();
        if !policy.delegate_hash_code || self.is_closed() {
            return Ok(self.identity_hash());
        }
        let method = Arc::clone(self.space()?.registry.identity_hash_method());
        let value = self.call_method(&method, Vec::new()).await?;
        value
            .as_u64()
            .ok_or_else(|| RmiError::Encoding("identity hash was not an integer".to_string()))
    }
}

#[async_trait]
impl Remotable for Proxy {
    async fn invoke(&self, call: Call) -> Result<Value, Fault> {
        let name = call.method_name().to_string();
        let delegated = self
            .delegate
            .as_ref()
            .is_some_and(|d| d.capability.method(&name).is_some());
        let result = if delegated || call.method().id == crate::registry::LOCAL_METHOD {
            self.call(&name, call.into_args()).await
        } else {
            let method = Arc::clone(call.method());
            self.call_method(&method, call.into_args()).await
        };
        result.map_err(Fault::from)
    }

    fn describe(&self) -> String {
        format!(
            "{}{} via {}",
            self.capability.name(),
            self.object,
            self.connection.peer()
        )
    }

    fn identity_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.connection.id().hash(&mut hasher);
        self.object.hash(&mut hasher);
        hasher.finish()
    }

    fn binding(&self) -> Option<Binding> {
        Some(Binding {
            connection: self.connection.id(),
            object: self.object,
        })
    }
}
