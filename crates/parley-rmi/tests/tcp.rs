//! Invocation over real sockets, through the handshaking peer node.

use parley_rmi::{Capability, Closure, InvocationSpace, MethodSpec, Service, Value, ValueType};
use parley_types::{ObjectId, SpaceConfig};
use parley_wire::{PeerConfig, PeerNode};
use std::sync::{Arc, Mutex};

fn int_consumer() -> Capability {
    Capability::new("IntConsumer")
        .functional()
        .method(MethodSpec::new("accept").param("value", ValueType::Int))
}

fn adder() -> Capability {
    Capability::new("Adder")
        .method(
            MethodSpec::new("add")
                .param("a", ValueType::Int)
                .param("b", ValueType::Int)
                .returns(ValueType::Int),
        )
        .method(
            MethodSpec::new("add_into")
                .param("a", ValueType::Int)
                .param("b", ValueType::Int)
                .closure("sink", &int_consumer()),
        )
}

fn space_with(capabilities: &[Capability]) -> InvocationSpace {
    let space = InvocationSpace::new(SpaceConfig::default());
    for capability in capabilities {
        space.register(capability).unwrap();
    }
    space
}

async fn node(space: &InvocationSpace) -> Arc<PeerNode> {
    let config = PeerConfig {
        fingerprint: space.fingerprint(),
        ..PeerConfig::default()
    };
    let (node, _accept) = PeerNode::start(config, Arc::new(space.clone())).await.unwrap();
    node
}

#[tokio::test]
async fn test_calls_and_callbacks_over_tcp() {
    let server = space_with(&[adder()]);
    server
        .host_with_id(
            ObjectId(1),
            Service::new("Adder", ())
                .on_sync("add", |_, call| Ok(Value::from(call.i64(0)? + call.i64(1)?)))
                .on("add_into", |_, call| async move {
                    let sum = call.i64(0)? + call.i64(1)?;
                    call.callback(2)?.call(vec![sum.into()]).await?;
                    Ok(Value::null())
                })
                .into_ref(),
        )
        .unwrap();
    let server_node = node(&server).await;

    let client = space_with(&[adder()]);
    let client_node = node(&client).await;
    let conn = client_node.connect(server_node.local_addr()).await.unwrap();
    assert_eq!(client.connection_count(), 1);

    let adder = client.create_remote_with_id(&conn, ObjectId(1), "Adder").unwrap();
    let sum = adder.call("add", vec![40.into(), 2.into()]).await.unwrap();
    assert_eq!(sum.as_i64(), Some(42));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        Closure::sync(move |call| {
            seen.lock().unwrap().push(call.i64(0)?);
            Ok(Value::null())
        })
    };
    adder
        .call("add_into", vec![11000.into(), 141.into(), Value::object(sink)])
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![11141]);
}

#[tokio::test]
async fn test_mismatched_registrations_are_refused() {
    let server = space_with(&[adder()]);
    let server_node = node(&server).await;

    // Same capabilities, different order: method ids would disagree.
    let client = space_with(&[int_consumer(), adder()]);
    assert_ne!(client.fingerprint(), server.fingerprint());
    let client_node = node(&client).await;

    assert!(client_node.connect(server_node.local_addr()).await.is_err());
    assert_eq!(client.connection_count(), 0);
}
