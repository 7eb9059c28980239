mod common;

use common::{eventually, link, settle};
use parley_rmi::{Capability, MethodSpec, Remotable, RmiError, Service, Value, ValueType};
use parley_types::{ObjectId, PolicyOverride};
use parley_wire::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn counter() -> Capability {
    Capability::new("Counter")
        .method(
            MethodSpec::new("add")
                .param("amount", ValueType::Int)
                .returns(ValueType::Int),
        )
        .method(
            MethodSpec::new("stall")
                .param("millis", ValueType::Int)
                .returns(ValueType::Int),
        )
        .method(MethodSpec::new("label").returns(ValueType::Text))
}

fn mirrored_counter() -> Capability {
    Capability::new("MirroredCounter")
        .extends(&counter())
        .policy(PolicyOverride::none().delegate_to_string().delegate_hash_code())
}

fn labelled() -> Capability {
    Capability::new("Labelled").method(MethodSpec::new("label").returns(ValueType::Text))
}

fn counter_service(total: Arc<AtomicUsize>) -> Service<Arc<AtomicUsize>> {
    Service::new("Counter", total)
        .on_sync("add", |total, call| {
            let amount = call.i64(0)? as usize;
            Ok(Value::from((total.fetch_add(amount, Ordering::SeqCst) + amount) as u64))
        })
        .on("stall", |_, call| async move {
            let millis = call.i64(0)?;
            tokio::time::sleep(Duration::from_millis(millis as u64)).await;
            Ok(Value::from(millis))
        })
        .on_sync("label", |_, _| Ok(Value::from("remote")))
}

fn register_all(space: &parley_rmi::InvocationSpace) {
    space.register(&counter()).unwrap();
    space.register(&mirrored_counter()).unwrap();
    space.register(&labelled()).unwrap();
}

#[tokio::test]
async fn test_delegate_answers_its_own_methods() {
    let link = link(register_all);
    let total = Arc::new(AtomicUsize::new(0));
    link.server
        .host_with_id(ObjectId(1), counter_service(total.clone()).into_ref())
        .unwrap();

    let delegate = Service::new("LocalLabel", ())
        .on_sync("label", |_, _| Ok(Value::from("local")))
        .into_ref();
    let proxy = link
        .client
        .create_remote_delegated(&link.client_conn, ObjectId(1), "Counter", delegate, &labelled())
        .unwrap();
    assert!(proxy.has_delegate());

    let label = proxy.call("label", vec![]).await.unwrap();
    assert_eq!(label.as_str(), Some("local"));
    settle().await;
    assert!(link.server_tap.invocations().is_empty());

    let sum = proxy.call("add", vec![3.into()]).await.unwrap();
    assert_eq!(sum.as_u64(), Some(3));
    assert_eq!(link.server_tap.invocations().len(), 1);
    assert_eq!(proxy.remote_describe().await.unwrap(), "LocalLabel");
}

#[tokio::test]
async fn test_identity_stays_local_unless_delegated() {
    let link = link(register_all);
    let total = Arc::new(AtomicUsize::new(0));
    link.server
        .host_with_id(ObjectId(1), counter_service(total).into_ref())
        .unwrap();
    let proxy = link
        .client
        .create_remote_with_id(&link.client_conn, ObjectId(1), "Counter")
        .unwrap();

    let described = proxy.remote_describe().await.unwrap();
    assert!(described.starts_with("Counter#1 via"));
    let first = proxy.remote_hash().await.unwrap();
    assert_eq!(first, proxy.remote_hash().await.unwrap());
    settle().await;
    assert!(link.server_tap.invocations().is_empty());
}

#[tokio::test]
async fn test_delegated_identity_asks_the_peer() {
    let link = link(register_all);
    let total = Arc::new(AtomicUsize::new(0));
    link.server
        .host_with_id(ObjectId(1), counter_service(total).into_ref())
        .unwrap();
    let proxy = link
        .client
        .create_remote_with_id(&link.client_conn, ObjectId(1), "MirroredCounter")
        .unwrap();

    assert_eq!(proxy.remote_describe().await.unwrap(), "Counter");
    let hosted = link.server.hosted(ObjectId(1)).unwrap();
    assert_eq!(proxy.remote_hash().await.unwrap(), hosted.identity_hash());
    assert_eq!(link.server_tap.invocations().len(), 2);

    // Inherited methods keep working through the derived capability.
    let sum = proxy.call("add", vec![2.into()]).await.unwrap();
    assert_eq!(sum.as_u64(), Some(2));

    // A closed proxy never asks.
    proxy.close();
    assert!(proxy.remote_describe().await.unwrap().contains("via"));
}

#[tokio::test]
async fn test_jumbled_ids_reach_the_right_objects() {
    let link = link(register_all);
    let server_totals: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let client_totals: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (i, total) in server_totals.iter().enumerate() {
        link.server
            .host_with_id(ObjectId(i as u32 + 1), counter_service(total.clone()).into_ref())
            .unwrap();
    }
    for (i, total) in client_totals.iter().enumerate() {
        link.client
            .host_with_id(ObjectId(i as u32 + 10), counter_service(total.clone()).into_ref())
            .unwrap();
    }

    let mut to_server = Vec::new();
    for i in 1..=4 {
        to_server.push(
            link.client
                .create_remote_with_id(&link.client_conn, ObjectId(i), "Counter")
                .unwrap(),
        );
    }
    link.server.set_next_proxy_id(10);
    let mut to_client = Vec::new();
    for _ in 0..4 {
        to_client.push(link.server.create_remote(&link.server_conn, "Counter").unwrap());
    }
    assert_eq!(to_client[3].object_id(), ObjectId(13));

    for &i in &[2usize, 0, 3, 1] {
        to_server[i].call("add", vec![(i as i64 + 1).into()]).await.unwrap();
        to_client[i].call("add", vec![(i as i64 + 100).into()]).await.unwrap();
    }
    for i in 0..4 {
        assert_eq!(server_totals[i].load(Ordering::SeqCst), i + 1);
        assert_eq!(client_totals[i].load(Ordering::SeqCst), i + 100);
    }
}

#[tokio::test]
async fn test_disconnect_fails_pending_calls_fast() {
    let link = link(register_all);
    let total = Arc::new(AtomicUsize::new(0));
    link.server
        .host_with_id(ObjectId(1), counter_service(total).into_ref())
        .unwrap();
    let proxy = link
        .client
        .create_remote_with_id(&link.client_conn, ObjectId(1), "Counter")
        .unwrap();
    proxy.set_response_timeout(5_000);

    let pending = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.call("stall", vec![1_000.into()]).await })
    };
    settle().await;
    let started = Instant::now();
    link.client_end.close();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, RmiError::Disconnected(_)));
    assert!(started.elapsed() < Duration::from_millis(900));

    let err = proxy.call("add", vec![1.into()]).await.unwrap_err();
    assert!(matches!(err, RmiError::Transport(_)));
}

#[tokio::test]
async fn test_non_blocking_call_resolves_to_disconnected() {
    let link = link(register_all);
    let total = Arc::new(AtomicUsize::new(0));
    link.server
        .host_with_id(ObjectId(1), counter_service(total).into_ref())
        .unwrap();
    let proxy = link
        .client
        .create_remote_with_id(&link.client_conn, ObjectId(1), "Counter")
        .unwrap();
    proxy.set_non_blocking(true);

    proxy.call("stall", vec![1_000.into()]).await.unwrap();
    link.client_end.close();
    assert!(eventually(|| link.client.connection_count() == 0).await);

    let err = proxy.wait_for_last_response().await.unwrap_err();
    assert!(matches!(err, RmiError::Disconnected(_)));
}

#[tokio::test]
async fn test_shutdown_wakes_waiters_and_refuses_calls() {
    let link = link(register_all);
    let total = Arc::new(AtomicUsize::new(0));
    link.server
        .host_with_id(ObjectId(1), counter_service(total).into_ref())
        .unwrap();
    let proxy = link
        .client
        .create_remote_with_id(&link.client_conn, ObjectId(1), "Counter")
        .unwrap();
    proxy.set_response_timeout(5_000);

    let pending = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.call("stall", vec![1_000.into()]).await })
    };
    settle().await;
    link.client.shutdown();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        RmiError::SpaceClosed | RmiError::Disconnected(_)
    ));
    let err = proxy.call("add", vec![1.into()]).await.unwrap_err();
    assert!(matches!(err, RmiError::SpaceClosed));
    assert!(eventually(|| link.server.connection_count() == 0).await);
}

#[tokio::test]
async fn test_one_proxy_per_remote_object() {
    let link = link(register_all);
    let total = Arc::new(AtomicUsize::new(0));
    link.server
        .host_with_id(ObjectId(1), counter_service(total.clone()).into_ref())
        .unwrap();

    let first = link
        .client
        .create_remote_with_id(&link.client_conn, ObjectId(1), "Counter")
        .unwrap();
    let second = link
        .client
        .create_remote_with_id(&link.client_conn, ObjectId(1), "Counter")
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // An existing proxy wins over a later delegated request for the pair.
    let delegated = link
        .client
        .create_remote_delegated(
            &link.client_conn,
            ObjectId(1),
            "Counter",
            Service::new("Labelled", ())
                .on_sync("label", |_, _| Ok(Value::from("local")))
                .into_ref(),
            &labelled(),
        )
        .unwrap();
    assert!(Arc::ptr_eq(&first, &delegated));

    // Controls set through one handle apply to every holder.
    first.close();
    assert!(second.is_closed());
    let value = second.call("add", vec![5.into()]).await.unwrap();
    assert_eq!(value.as_i64(), Some(0));
    settle().await;
    assert_eq!(total.load(Ordering::SeqCst), 0);

    second.open();
    assert_eq!(first.call("add", vec![5.into()]).await.unwrap().as_i64(), Some(5));

    let other = link.client.create_remote(&link.client_conn, "Counter").unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
}
