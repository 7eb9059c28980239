//! The invocation space: one registry, one object table, one result store
//! and one serialized worker shared by every connection attached to it.

use crate::capability::Capability;
use crate::error::{RmiError, RmiResult};
use crate::object_table::ObjectTable;
use crate::proxy::{Delegate, Proxy};
use crate::registry::{CapabilityInfo, CapabilityRegistry};
use crate::remotable::Callback;
use crate::transaction::{OnTimeout, TransactionStore};
use crate::value::{ObjectRef, Value};
use crate::worker::Worker;
use dashmap::DashMap;
use parley_types::{ConnectionId, ObjectId, SpaceConfig, TransactionId};
use parley_wire::{Connection, FrameHandler};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// A call sent non-blocking whose result has not been collected.
pub(crate) struct AsyncCall {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) timeout_ms: u64,
}

pub(crate) struct SpaceShared {
    pub(crate) config: SpaceConfig,
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) objects: ObjectTable,
    /// One proxy per (connection, remote id), whether created explicitly or
    /// for an inbound reference.
    pub(crate) proxies: DashMap<(ConnectionId, ObjectId), Arc<Proxy>>,
    pub(crate) results: TransactionStore<Value>,
    pub(crate) async_calls: DashMap<TransactionId, AsyncCall>,
    pub(crate) connections: DashMap<ConnectionId, Arc<dyn Connection>>,
    pub(crate) worker: Worker,
    next_transaction: AtomicU32,
    next_proxy_id: AtomicU32,
    last_transaction: Mutex<Option<TransactionId>>,
    closed: AtomicBool,
}

impl SpaceShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn next_transaction(&self) -> TransactionId {
        TransactionId(self.next_transaction.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn remember_transaction(&self, transaction: TransactionId) {
        *self
            .last_transaction
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(transaction);
    }

    pub(crate) fn last_transaction(&self) -> Option<TransactionId> {
        *self
            .last_transaction
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// The proxy for a remote object, created on first use.
    pub(crate) fn cached_proxy(
        self: &Arc<Self>,
        conn: &Arc<dyn Connection>,
        id: ObjectId,
        capability: &str,
    ) -> RmiResult<Arc<Proxy>> {
        self.cached_proxy_with(conn, id, capability, || Ok(None))
    }

    /// Like [`cached_proxy`](Self::cached_proxy), building the delegate only
    /// when the proxy is created. An existing proxy is returned as is.
    pub(crate) fn cached_proxy_with(
        self: &Arc<Self>,
        conn: &Arc<dyn Connection>,
        id: ObjectId,
        capability: &str,
        delegate: impl FnOnce() -> RmiResult<Option<Delegate>>,
    ) -> RmiResult<Arc<Proxy>> {
        if let Some(proxy) = self.proxies.get(&(conn.id(), id)) {
            return Ok(Arc::clone(proxy.value()));
        }
        let info = self.capability(capability)?;
        let delegate = delegate()?;
        let entry = self.proxies.entry((conn.id(), id)).or_insert_with(|| {
            debug!(connection = %conn.id(), object = %id, capability, "Created proxy");
            Arc::new(Proxy::new(
                Arc::downgrade(self),
                Arc::clone(conn),
                id,
                info,
                delegate,
            ))
        });
        Ok(Arc::clone(entry.value()))
    }

    pub(crate) fn capability(&self, name: &str) -> RmiResult<Arc<CapabilityInfo>> {
        self.registry
            .capability(name)
            .ok_or_else(|| RmiError::UnknownCapability(name.to_string()))
    }

    /// Collect the result of a non-blocking call, waiting the longer of
    /// `timeout_ms` and the call's own response timeout. On timeout the
    /// call stays collectable.
    pub(crate) async fn take_async_result(
        &self,
        transaction: TransactionId,
        timeout_ms: Option<u64>,
    ) -> RmiResult<Value> {
        let (_, call) = self
            .async_calls
            .remove(&transaction)
            .ok_or(RmiError::UnknownTransaction(transaction))?;
        let timeout_ms = timeout_ms.map_or(call.timeout_ms, |t| t.max(call.timeout_ms));
        let connection = call.connection.id();
        match self
            .results
            .read_with(
                transaction,
                Some(connection),
                Duration::from_millis(timeout_ms),
                OnTimeout::Keep,
            )
            .await
        {
            Err(e @ RmiError::Timeout { .. }) => {
                if !self.is_closed() {
                    self.async_calls.insert(transaction, call);
                }
                Err(e)
            }
            outcome => outcome,
        }
    }

    /// Forget non-blocking results nobody collected in time.
    pub(crate) fn expire_uncollected(&self) {
        for transaction in self.results.expire() {
            if self.async_calls.remove(&transaction).is_some() {
                debug!(%transaction, "Dropped uncollected non-blocking result");
            }
        }
    }
}

/// Handle on an invocation space. Cheap to clone.
///
/// The space is also the [`FrameHandler`] for every connection that
/// should be able to reach its hosted objects: hand a clone to
/// [`parley_wire::PeerNode::start`] or [`parley_wire::memory::pair`].
#[derive(Clone)]
pub struct InvocationSpace {
    shared: Arc<SpaceShared>,
}

impl InvocationSpace {
    /// Create a space. Must be called inside a Tokio runtime.
    pub fn new(config: SpaceConfig) -> Self {
        let registry = Arc::new(CapabilityRegistry::new(config.default_policy.clone()));
        let shared = Arc::new(SpaceShared {
            registry,
            objects: ObjectTable::new(config.first_object_id),
            proxies: DashMap::new(),
            results: TransactionStore::with_retention(Duration::from_secs(config.result_retention_secs)),
            async_calls: DashMap::new(),
            connections: DashMap::new(),
            worker: Worker::spawn("invocation-space"),
            next_transaction: AtomicU32::new(0),
            next_proxy_id: AtomicU32::new(config.first_proxy_id),
            last_transaction: Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        });
        Self { shared }
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.shared.registry
    }

    /// Register a capability. Both peers must register the same
    /// capabilities in the same order.
    pub fn register(&self, capability: &Capability) -> RmiResult<Arc<CapabilityInfo>> {
        self.shared.registry.register(capability)
    }

    /// Registration fingerprint, for [`parley_wire::PeerConfig::fingerprint`].
    pub fn fingerprint(&self) -> String {
        self.shared.registry.fingerprint()
    }

    /// Host an object for every attached connection, under the next free id.
    pub fn host(&self, object: ObjectRef) -> ObjectId {
        self.shared.objects.host(object)
    }

    pub fn host_with_id(&self, id: ObjectId, object: ObjectRef) -> RmiResult<ObjectId> {
        self.shared.objects.host_with_id(id, object)
    }

    pub fn unhost(&self, id: ObjectId) -> Option<ObjectRef> {
        self.shared.objects.unhost(id)
    }

    pub fn hosted(&self, id: ObjectId) -> Option<ObjectRef> {
        self.shared.objects.resolve(id)
    }

    pub fn hosted_count(&self) -> usize {
        self.shared.objects.len()
    }

    /// Proxy for a remote object under the next proxy id.
    ///
    /// There is at most one proxy per connection and remote id: asking again
    /// for the same pair, or receiving a reference to it, yields the same
    /// handle.
    pub fn create_remote(&self, conn: &Arc<dyn Connection>, capability: &str) -> RmiResult<Arc<Proxy>> {
        let id = ObjectId(self.shared.next_proxy_id.fetch_add(1, Ordering::Relaxed));
        self.create_remote_with_id(conn, id, capability)
    }

    pub fn create_remote_with_id(
        &self,
        conn: &Arc<dyn Connection>,
        id: ObjectId,
        capability: &str,
    ) -> RmiResult<Arc<Proxy>> {
        self.shared.cached_proxy(conn, id, capability)
    }

    /// Proxy whose methods from `delegate_capability` run on `delegate`
    /// locally; the rest are forwarded.
    ///
    /// The delegate only applies when this creates the proxy. If the pair
    /// already has a proxy, that proxy is returned unchanged.
    pub fn create_remote_delegated(
        &self,
        conn: &Arc<dyn Connection>,
        id: ObjectId,
        capability: &str,
        delegate: ObjectRef,
        delegate_capability: &Capability,
    ) -> RmiResult<Arc<Proxy>> {
        let registry = &self.shared.registry;
        self.shared.cached_proxy_with(conn, id, capability, || {
            Ok(Some(Delegate {
                object: delegate,
                capability: registry.describe_local(delegate_capability)?,
            }))
        })
    }

    /// A callable handle for an object received as a value, such as a
    /// remote result.
    pub fn callback(&self, object: ObjectRef, capability: &str) -> RmiResult<Callback> {
        let info = self.shared.capability(capability)?;
        Ok(Callback::new(object, info, Arc::clone(&self.shared.registry)))
    }

    /// Set the id the next [`create_remote`](Self::create_remote) uses.
    pub fn set_next_proxy_id(&self, id: u32) {
        self.shared.next_proxy_id.store(id, Ordering::Relaxed);
    }

    /// Id of the last call sent by any proxy of this space.
    pub fn last_transaction_id(&self) -> Option<TransactionId> {
        self.shared.last_transaction()
    }

    /// Collect the result of the last non-blocking call.
    pub async fn get_last_result(&self) -> RmiResult<Value> {
        let transaction = self.shared.last_transaction().ok_or(RmiError::NoTransaction)?;
        self.get_result(transaction, None).await
    }

    /// Collect the result of a non-blocking call, waiting up to the longer
    /// of `timeout_ms` and the call's own response timeout. A timed-out
    /// call can be collected again later.
    pub async fn get_result(&self, transaction: TransactionId, timeout_ms: Option<u64>) -> RmiResult<Value> {
        self.shared.take_async_result(transaction, timeout_ms).await
    }

    /// True when the result (or fault) of `transaction` has arrived.
    pub fn has_result(&self, transaction: TransactionId) -> bool {
        self.shared.results.has_value(transaction)
    }

    pub fn has_last_result(&self) -> bool {
        self.shared
            .last_transaction()
            .is_some_and(|t| self.shared.results.has_value(t))
    }

    /// True while a transaction is known: awaited, arrived or pending
    /// collection.
    pub fn has_transaction(&self, transaction: TransactionId) -> bool {
        self.shared.async_calls.contains_key(&transaction) || self.shared.results.contains(transaction)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Close every attached connection and wake all waiters.
    ///
    /// Proxies of a shut-down space fail with [`RmiError::SpaceClosed`].
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let connections: Vec<Arc<dyn Connection>> = self
            .shared
            .connections
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect();
        for conn in &connections {
            conn.close();
        }
        self.shared.results.clear();
        self.shared.async_calls.clear();
        self.shared.proxies.clear();
        info!(connections = connections.len(), "Invocation space shut down");
    }
}

impl FrameHandler for InvocationSpace {
    fn connected(&self, conn: &Arc<dyn Connection>) {
        if self.shared.is_closed() {
            conn.close();
            return;
        }
        info!(connection = %conn.id(), peer = %conn.peer(), "Connection attached");
        self.shared.connections.insert(conn.id(), Arc::clone(conn));
    }

    fn frame_received(&self, conn: &Arc<dyn Connection>, frame: Vec<u8>) {
        self.shared.handle_frame(conn, frame);
    }

    fn disconnected(&self, conn: &Arc<dyn Connection>) {
        self.shared.connection_lost(conn);
    }
}
