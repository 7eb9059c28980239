//! The calculator served by `parley serve` and called by `parley call`.
//!
//! Both ends register [`capabilities`] in the same order so their method
//! ids and fingerprints agree.

use parley_rmi::{Callback, Capability, MethodSpec, ObjectRef, Remotable, Service, Value, ValueType};
use parley_types::{Fault, ObjectId};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Well-known id of the calculator on a serving node.
pub const CALCULATOR_ID: ObjectId = ObjectId(1);

pub fn result_listener() -> Capability {
    Capability::new("ResultListener")
        .functional()
        .method(
            MethodSpec::new("on_result")
                .param("operation", ValueType::Text)
                .param("value", ValueType::Int),
        )
}

pub fn calculator() -> Capability {
    let binary = |name: &str| {
        MethodSpec::new(name)
            .param("a", ValueType::Int)
            .param("b", ValueType::Int)
            .returns(ValueType::Int)
    };
    Capability::new("Calculator")
        .method(binary("add"))
        .method(binary("subtract"))
        .method(binary("multiply"))
        .method(binary("divide"))
        .method(MethodSpec::new("subscribe").closure("listener", &result_listener()))
        .method(MethodSpec::new("listeners").returns(ValueType::Int))
}

pub fn capabilities() -> Vec<Capability> {
    vec![calculator(), result_listener()]
}

#[derive(Default)]
struct Calculator {
    listeners: Mutex<Vec<Callback>>,
}

impl Calculator {
    fn apply(operation: &str, a: i64, b: i64) -> Result<i64, Fault> {
        let overflow = || Fault::with_kind("ArithmeticError", format!("{operation} overflowed"));
        match operation {
            "add" => a.checked_add(b).ok_or_else(overflow),
            "subtract" => a.checked_sub(b).ok_or_else(overflow),
            "multiply" => a.checked_mul(b).ok_or_else(overflow),
            "divide" if b == 0 => Err(Fault::with_kind("ArithmeticError", "division by zero")
                .at("Calculator::divide")),
            "divide" => a.checked_div(b).ok_or_else(overflow),
            other => Err(Fault::with_kind("NoSuchMethod", format!("unknown operation {other}"))),
        }
    }

    /// Tell every listener about a result, dropping the ones that fail.
    async fn notify(&self, operation: &str, value: i64) {
        let listeners: Vec<Callback> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut dead = Vec::new();
        for (index, listener) in listeners.iter().enumerate() {
            if let Err(fault) = listener
                .call(vec![Value::from(operation), Value::from(value)])
                .await
            {
                warn!(listener = %listener.object().describe(), fault = %fault, "Dropping listener");
                dead.push(index);
            }
        }
        if !dead.is_empty() {
            let mut current = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            current.retain(|l| {
                !dead
                    .iter()
                    .any(|&i| parley_rmi::same_object(l.object(), listeners[i].object()))
            });
        }
    }
}

/// The hosted calculator.
pub fn calculator_service() -> ObjectRef {
    let mut service = Service::new("Calculator", Calculator::default())
        .on_sync("subscribe", |calc, call| {
            let listener = call.callback(0)?;
            debug!(listener = %listener.object().describe(), "Listener subscribed");
            calc.listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(listener);
            Ok(Value::null())
        })
        .on_sync("listeners", |calc, _| {
            let count = calc.listeners.lock().unwrap_or_else(|e| e.into_inner()).len();
            Ok(Value::from(count as u64))
        });
    for operation in ["add", "subtract", "multiply", "divide"] {
        service = service.on(operation, move |calc, call| async move {
            let value = Calculator::apply(operation, call.i64(0)?, call.i64(1)?)?;
            calc.notify(operation, value).await;
            Ok(Value::from(value))
        });
    }
    service.into_ref()
}
