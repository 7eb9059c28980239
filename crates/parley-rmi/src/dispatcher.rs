//! Inbound path: decoding frames, running hosted calls and accepting
//! results.
//!
//! Everything here runs on the transport's receive task except the hosted
//! call itself, which is queued on the space's worker. Results are written
//! straight into the transaction store so a hosted call that is waiting
//! on a callback can be woken while the worker is busy with it.

use crate::error::{RemoteFailure, RmiError};
use crate::message::{self, Frame, InvocationRequest, InvocationResult};
use crate::registry::{RemoteMethod, DESCRIBE_METHOD, IDENTITY_HASH_METHOD};
use crate::remotable::Call;
use crate::space::SpaceShared;
use crate::value::{ObjectRef, Value};
use parley_types::{ExceptionTransmission, Fault, ObjectId, TransactionId, TransportKind};
use parley_wire::Connection;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a fault is put on the wire, or `None` to keep it local.
pub(crate) fn fault_payload(mode: ExceptionTransmission, fault: &Fault) -> Option<serde_json::Value> {
    match mode {
        ExceptionTransmission::LocalOnly => None,
        ExceptionTransmission::ToString => Some(serde_json::Value::String(fault.render())),
        ExceptionTransmission::MessageOnly => Some(serde_json::Value::String(fault.message.clone())),
        ExceptionTransmission::Whole => serde_json::to_value(fault).ok(),
    }
}

/// Text payloads stay text; structured ones are read back as faults.
pub(crate) fn remote_failure(payload: serde_json::Value) -> RemoteFailure {
    match payload {
        serde_json::Value::String(text) => RemoteFailure::Text(text),
        other => match serde_json::from_value::<Fault>(other.clone()) {
            Ok(fault) => RemoteFailure::Fault(fault),
            Err(_) => RemoteFailure::Text(other.to_string()),
        },
    }
}

/// Where and how to answer one invocation.
struct ReplyTo {
    conn: Arc<dyn Connection>,
    transaction: TransactionId,
    object: ObjectId,
    expects_reply: bool,
    exceptions: Option<ExceptionTransmission>,
}

impl SpaceShared {
    pub(crate) fn handle_frame(self: &Arc<Self>, conn: &Arc<dyn Connection>, bytes: Vec<u8>) {
        match message::decode(&bytes) {
            Ok(Frame::Invoke(request)) => self.accept_invocation(conn, request),
            Ok(Frame::Result(result)) => self.accept_result(conn, result),
            Err(e) => {
                warn!(connection = %conn.id(), error = %e, "Dropping undecodable frame");
            }
        }
    }

    fn accept_invocation(self: &Arc<Self>, conn: &Arc<dyn Connection>, request: InvocationRequest) {
        let InvocationRequest {
            transaction,
            object,
            method,
            expects_reply,
            exceptions,
            args,
        } = request;

        let Some(method) = self.registry.method(method) else {
            warn!(connection = %conn.id(), %transaction, method = %method, "Invocation of unknown method");
            if expects_reply {
                let fault = Fault::with_kind("NoSuchMethod", format!("No method registered with id {method}"));
                let mode = exceptions.unwrap_or(self.registry.global_policy().exception_transmission);
                if let Some(payload) = fault_payload(mode, &fault) {
                    let reply = InvocationResult::failure(transaction, object, method, payload);
                    let conn = Arc::clone(conn);
                    self.worker.submit(async move {
                        send_result(&conn, reply, TransportKind::Reliable).await;
                    });
                }
            }
            return;
        };

        // Arguments are resolved here, in arrival order, so proxies for
        // inbound references exist before any later frame is handled.
        let prepared = self
            .objects
            .resolve(object)
            .ok_or(RmiError::NoSuchObject(object))
            .and_then(|target| Ok((target, self.decode_args(conn, &method, args)?)))
            .map_err(Fault::from);

        let shared = Arc::clone(self);
        let reply_to = ReplyTo {
            conn: Arc::clone(conn),
            transaction,
            object,
            expects_reply,
            exceptions,
        };
        let queued = self.worker.submit(async move {
            shared.execute(reply_to, method, prepared).await;
        });
        if !queued {
            error!(%transaction, "Worker stopped; invocation dropped");
        }
    }

    async fn execute(
        self: Arc<Self>,
        reply_to: ReplyTo,
        method: Arc<RemoteMethod>,
        prepared: Result<(ObjectRef, Vec<Value>), Fault>,
    ) {
        let ReplyTo {
            conn,
            transaction,
            object,
            expects_reply,
            exceptions,
        } = reply_to;
        debug!(%transaction, %object, method = %method.name, "Executing hosted call");
        let outcome = match prepared {
            Ok((target, args)) => self.run(target, &method, args).await,
            Err(fault) => Err(fault),
        };

        let policy = &method.policy;
        if !expects_reply || policy.no_return {
            if let Err(fault) = outcome {
                warn!(%transaction, method = %method.name, fault = %fault, "Hosted call failed; no result requested");
            }
            return;
        }

        let failed = |fault: Fault| -> Option<InvocationResult> {
            let mode = exceptions.unwrap_or(policy.exception_transmission);
            match fault_payload(mode, &fault) {
                Some(payload) => {
                    debug!(%transaction, method = %method.name, fault = %fault, "Returning fault to caller");
                    Some(InvocationResult::failure(transaction, object, method.id, payload))
                }
                None => {
                    error!(%transaction, method = %method.name, "Hosted call failed:\n{}", fault.render());
                    None
                }
            }
        };
        let reply = match outcome {
            Ok(value) => match self.encode_result(&conn, &method, value) {
                Ok(payload) => Some(InvocationResult::success(transaction, object, method.id, payload)),
                Err(e) => failed(Fault::from(e)),
            },
            Err(fault) => failed(fault),
        };
        if let Some(reply) = reply {
            send_result(&conn, reply, policy.transport).await;
        }
    }

    async fn run(&self, target: ObjectRef, method: &Arc<RemoteMethod>, args: Vec<Value>) -> Result<Value, Fault> {
        match method.id {
            DESCRIBE_METHOD => Ok(Value::from(target.describe())),
            IDENTITY_HASH_METHOD => Ok(Value::from(target.identity_hash())),
            _ => {
                let call = Call::new(Arc::clone(method), args, Arc::clone(&self.registry));
                target.invoke(call).await
            }
        }
    }

    fn accept_result(self: &Arc<Self>, conn: &Arc<dyn Connection>, result: InvocationResult) {
        self.expire_uncollected();
        let transaction = result.transaction;
        let Some(method) = self.registry.method(result.method) else {
            self.results.fail(
                transaction,
                Some(conn.id()),
                RmiError::Encoding(format!("result names unknown method {}", result.method)),
            );
            return;
        };
        debug!(%transaction, method = %method.name, failed = result.is_failure(), "Result received");
        if result.is_failure() {
            let failure = remote_failure(result.payload);
            self.results
                .fail(transaction, Some(conn.id()), RmiError::Remote(failure));
            return;
        }
        match self.decode_result(conn, &method, result.payload) {
            Ok(value) => self.results.write(transaction, Some(conn.id()), value),
            Err(e) => self.results.fail(transaction, Some(conn.id()), e),
        }
    }

    pub(crate) fn connection_lost(&self, conn: &Arc<dyn Connection>) {
        let id = conn.id();
        let failed = self.results.fail_connection(id);
        // Uncollected non-blocking calls keep a Disconnected outcome of their own.
        for call in self.async_calls.iter().filter(|c| c.connection.id() == id) {
            if !self.results.contains(*call.key()) {
                self.results.fail(*call.key(), Some(id), RmiError::Disconnected(id));
            }
        }
        self.proxies.retain(|(connection, _), _| *connection != id);
        let retired = self.objects.retire_connection(id);
        self.connections.remove(&id);
        info!(connection = %id, failed_calls = failed, retired_objects = retired, "Connection detached");
    }
}

async fn send_result(conn: &Arc<dyn Connection>, result: InvocationResult, transport: TransportKind) {
    let transaction = result.transaction;
    let frame = match message::encode(&Frame::Result(result)) {
        Ok(frame) => frame,
        Err(e) => {
            error!(%transaction, error = %e, "Could not encode result");
            return;
        }
    };
    if let Err(e) = conn.send(frame, transport).await {
        warn!(%transaction, connection = %conn.id(), error = %e, "Could not send result");
    }
}
