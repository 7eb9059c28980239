//! The object model: anything that can receive a remote call.
//!
//! Hosted objects implement [`Remotable`]. [`Service`] is a name-keyed
//! handler table for multi-method capabilities, [`Closure`] wraps a single
//! function for functional capabilities, and a proxy is itself a
//! `Remotable`, so proxies and local objects are interchangeable wherever
//! an object reference is expected.

use crate::registry::{CapabilityInfo, CapabilityRegistry, RemoteMethod};
use crate::value::{ObjectRef, Value};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parley_types::{ConnectionId, Fault, ObjectId};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Where a proxy's real object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub connection: ConnectionId,
    pub object: ObjectId,
}

#[async_trait]
pub trait Remotable: Send + Sync + 'static {
    /// Execute one method call.
    async fn invoke(&self, call: Call) -> Result<Value, Fault>;

    /// Text form of the object.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Identity hash; defaults to the object's address.
    fn identity_hash(&self) -> u64 {
        self as *const Self as *const () as usize as u64
    }

    /// For proxies: the connection and remote id they forward to.
    fn binding(&self) -> Option<Binding> {
        None
    }
}

/// One method call delivered to a [`Remotable`].
pub struct Call {
    method: Arc<RemoteMethod>,
    args: Vec<Value>,
    registry: Arc<CapabilityRegistry>,
}

impl Call {
    pub fn new(method: Arc<RemoteMethod>, args: Vec<Value>, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            method,
            args,
            registry,
        }
    }

    pub fn method(&self) -> &Arc<RemoteMethod> {
        &self.method
    }

    pub fn method_name(&self) -> &str {
        &self.method.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    pub fn arg(&self, index: usize) -> Result<&Value, Fault> {
        self.args.get(index).ok_or_else(|| {
            Fault::with_kind(
                "InvalidArgument",
                format!("{} has no argument {index}", self.method.name),
            )
        })
    }

    pub fn i64(&self, index: usize) -> Result<i64, Fault> {
        let value = self.arg(index)?;
        value
            .as_i64()
            .ok_or_else(|| self.mismatch(index, "an integer"))
    }

    pub fn f64(&self, index: usize) -> Result<f64, Fault> {
        let value = self.arg(index)?;
        value.as_f64().ok_or_else(|| self.mismatch(index, "a number"))
    }

    pub fn bool(&self, index: usize) -> Result<bool, Fault> {
        let value = self.arg(index)?;
        value.as_bool().ok_or_else(|| self.mismatch(index, "a boolean"))
    }

    pub fn str(&self, index: usize) -> Result<&str, Fault> {
        let value = self.arg(index)?;
        value.as_str().ok_or_else(|| self.mismatch(index, "a string"))
    }

    pub fn decode<T: DeserializeOwned>(&self, index: usize) -> Result<T, Fault> {
        self.arg(index)?.decode()
    }

    /// The object passed at `index`, if any.
    pub fn object(&self, index: usize) -> Result<Option<ObjectRef>, Fault> {
        match self.arg(index)? {
            Value::Object(obj) => Ok(obj.clone()),
            Value::Data(serde_json::Value::Null) => Ok(None),
            Value::Data(_) => Err(self.mismatch(index, "an object reference")),
        }
    }

    /// A callable handle for the object passed at `index`.
    ///
    /// The parameter must be declared with an object type. The object may
    /// be a local one (the round-trip case) or a proxy; either way calling
    /// it goes through [`Remotable::invoke`].
    pub fn callback(&self, index: usize) -> Result<Callback, Fault> {
        let capability = self
            .method
            .params
            .get(index)
            .and_then(|p| p.ty.capability())
            .ok_or_else(|| self.mismatch(index, "an object parameter"))?;
        let info = self.registry.capability(capability).ok_or_else(|| {
            Fault::with_kind(
                "InvalidArgument",
                format!("capability {capability} is not registered"),
            )
        })?;
        let object = self.object(index)?.ok_or_else(|| {
            Fault::with_kind(
                "InvalidArgument",
                format!("{} argument {index} is null", self.method.name),
            )
        })?;
        Ok(Callback::new(object, info, Arc::clone(&self.registry)))
    }

    fn mismatch(&self, index: usize, expected: &str) -> Fault {
        Fault::with_kind(
            "InvalidArgument",
            format!("{} argument {index} is not {expected}", self.method.name),
        )
    }
}

/// An object received as a callback-style argument, ready to call.
#[derive(Clone)]
pub struct Callback {
    object: ObjectRef,
    capability: Arc<CapabilityInfo>,
    registry: Arc<CapabilityRegistry>,
}

impl Callback {
    pub fn new(object: ObjectRef, capability: Arc<CapabilityInfo>, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            object,
            capability,
            registry,
        }
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn capability(&self) -> &CapabilityInfo {
        &self.capability
    }

    /// Call the single method of a functional capability.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, Fault> {
        let method = self.capability.methods().first().cloned().ok_or_else(|| {
            Fault::with_kind(
                "InvalidArgument",
                format!("{} has no remote methods", self.capability.name()),
            )
        })?;
        self.invoke(method, args).await
    }

    pub async fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
        let method = self.capability.method(name).cloned().ok_or_else(|| {
            Fault::with_kind(
                "NoSuchMethod",
                format!("{} has no remote method {name}", self.capability.name()),
            )
        })?;
        self.invoke(method, args).await
    }

    async fn invoke(&self, method: Arc<RemoteMethod>, args: Vec<Value>) -> Result<Value, Fault> {
        let call = Call::new(method, args, Arc::clone(&self.registry));
        self.object.invoke(call).await
    }
}

type Handler<S> = Arc<dyn Fn(Arc<S>, Call) -> BoxFuture<'static, Result<Value, Fault>> + Send + Sync>;

/// A hosted object built from per-method handlers over shared state.
pub struct Service<S> {
    name: String,
    state: Arc<S>,
    handlers: HashMap<String, Handler<S>>,
}

impl<S: Send + Sync + 'static> Service<S> {
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(state),
            handlers: HashMap::new(),
        }
    }

    /// Add an async handler.
    pub fn on<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Arc<S>, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        let boxed: Handler<S> = Arc::new(
            move |state: Arc<S>, call: Call| -> BoxFuture<'static, Result<Value, Fault>> {
                Box::pin(handler(state, call))
            },
        );
        self.handlers.insert(method.to_string(), boxed);
        self
    }

    /// Add a synchronous handler.
    pub fn on_sync<F>(self, method: &str, handler: F) -> Self
    where
        F: Fn(&S, Call) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.on(method, move |state, call| {
            futures::future::ready(handler(&state, call))
        })
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    pub fn into_ref(self) -> ObjectRef {
        Arc::new(self)
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Remotable for Service<S> {
    async fn invoke(&self, call: Call) -> Result<Value, Fault> {
        let handler = self.handlers.get(call.method_name()).cloned().ok_or_else(|| {
            Fault::with_kind(
                "NoSuchMethod",
                format!("{} does not implement {}", self.name, call.method_name()),
            )
        })?;
        handler(Arc::clone(&self.state), call).await
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

type ClosureFn = Arc<dyn Fn(Call) -> BoxFuture<'static, Result<Value, Fault>> + Send + Sync>;

/// A single function standing in for a functional capability.
pub struct Closure {
    label: String,
    body: ClosureFn,
}

impl Closure {
    pub fn new<F, Fut>(body: F) -> ObjectRef
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        Arc::new(Closure {
            label: "closure".to_string(),
            body: Arc::new(
                move |call: Call| -> BoxFuture<'static, Result<Value, Fault>> {
                    Box::pin(body(call))
                },
            ),
        })
    }

    pub fn sync<F>(body: F) -> ObjectRef
    where
        F: Fn(Call) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        Self::new(move |call| futures::future::ready(body(call)))
    }

    /// Same as [`Closure::sync`] with a label shown by `describe`.
    pub fn named<F>(label: impl Into<String>, body: F) -> ObjectRef
    where
        F: Fn(Call) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        Arc::new(Closure {
            label: label.into(),
            body: Arc::new(
                move |call: Call| -> BoxFuture<'static, Result<Value, Fault>> {
                    Box::pin(futures::future::ready(body(call)))
                },
            ),
        })
    }
}

#[async_trait]
impl Remotable for Closure {
    async fn invoke(&self, call: Call) -> Result<Value, Fault> {
        (self.body)(call).await
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
