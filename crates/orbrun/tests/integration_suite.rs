mod common;

use std::sync::Arc;
use std::time::Duration;

use orbrun::ArgumentError;
use orbrun::CallFailure;
use orbrun::ChannelEvent;
use orbrun::Client;
use orbrun::Config;
use orbrun::Error;
use orbrun::InstanceId;
use orbrun::ObjectContract;
use orbrun::RemoteObject;
use orbrun::Server;
use orbrun::Value;
use orbrun::transport::tcp::TcpConnector;
use orbrun::transport::tcp::TcpListener;

use common::*;

fn remote_id<T: ?Sized + ObjectContract>(proxy: &Arc<T>) -> InstanceId {
    T::upcast(proxy.clone()).as_proxy().unwrap().remote_id()
}

// --- Test 1: Basic calls ---

#[tokio::test]
async fn test_call_singleton() -> anyhow::Result<()> {
    init_logging();
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));

    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;
    assert_eq!(calc.add(2, 3).await?, 5);
    assert_eq!(calc.divide(9, 3).await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_missing_server_object() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    let client = harness.client().await;

    let err = client.get_server_object::<dyn Unregistered>().await.err().expect("expected lookup to fail");
    assert!(matches!(err, Error::CallFailed(CallFailure::ObjectNotFound(ref t)) if t == "Demo.IUnregistered"));
    Ok(())
}

#[tokio::test]
async fn test_lookup_by_base_contract() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Tally::new("base")));

    let client = harness.client().await;
    let named = client.get_server_object::<dyn Named>().await?;
    assert_eq!(named.name().await?, "base");

    let counter = client.get_server_object::<dyn Counter>().await?;
    assert_eq!(counter.increment().await?, 1);
    assert_eq!(counter.name().await?, "base");
    Ok(())
}

#[tokio::test]
async fn test_inherited_members_reach_servant() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Odometer::new()));
    let client = harness.client().await;

    let counter = client.get_server_object::<dyn Counter>().await?;
    assert_eq!(counter.increment().await?, 1);
    assert_eq!(counter.name().await?, "odometer");

    let named = client.get_server_object::<dyn Named>().await?;
    assert_eq!(named.name().await?, "odometer");
    assert_eq!(<dyn Named>::identity_of(&named), <dyn Counter>::identity_of(&counter));

    let qualified = client.channel().call_rpc_method(remote_id(&counter), "Demo.INamed.name", vec![]).await?;
    assert_eq!(qualified, orbrun::Argument::Value(Value::Str("odometer".into())));
    Ok(())
}

// --- Test 2: Correlation under concurrency ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_are_correlated() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;

    let mut calls = Vec::new();
    for _ in 0..64 {
        let calc = calc.clone();
        let (a, b) = (rand::random::<i32>() as i64, rand::random::<i32>() as i64);
        calls.push(tokio::spawn(async move { (a + b, calc.add(a, b).await) }));
    }
    for call in calls {
        let (expected, got) = call.await?;
        assert_eq!(got?, expected);
    }
    assert_eq!(client.channel().in_flight(), 0);
    Ok(())
}

// --- Test 3: Exceptions ---

#[tokio::test]
async fn test_typed_exception_round_trip() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;

    let err = calc.divide(1, 0).await.unwrap_err();
    assert!(!err.is_call_failure());
    let typed = err.downcast::<ArgumentError>().unwrap();
    assert_eq!(typed.param.as_deref(), Some("b"));
    assert_eq!(typed.message, "division by zero");

    // The channel stays usable after an exception.
    assert_eq!(calc.add(1, 1).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_servant_panic_is_generic_exception() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Glass));
    let client = harness.client().await;
    let glass = client.get_server_object::<dyn Fragile>().await?;

    let err = glass.shatter().await.unwrap_err();
    assert!(!err.is_call_failure());
    let remote = err.remote().unwrap();
    assert_eq!(remote.kind, "orb.Exception");
    assert_eq!(remote.message, "glass shattered");

    assert!(client.is_connected());
    assert_eq!(glass.hold().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_protocol_rejections_are_call_failures() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;
    let channel = client.channel();

    let err = channel.call_rpc_method(remote_id(&calc), "subtract", vec![]).await.unwrap_err();
    assert!(matches!(err.call_failure(), Some(CallFailure::Rejected(e)) if e.kind == "orb.MethodNotFound"));

    let err = channel.call_rpc_method(InstanceId(u64::MAX), "add", vec![]).await.unwrap_err();
    assert!(matches!(err.call_failure(), Some(CallFailure::Rejected(e)) if e.kind == "orb.InstanceNotFound"));

    let args = vec![orbrun::Argument::Value(Value::Str("two".into())), orbrun::Argument::Value(Value::S64(2))];
    let err = channel.call_rpc_method(remote_id(&calc), "add", args).await.unwrap_err();
    assert!(matches!(err.call_failure(), Some(CallFailure::Rejected(e)) if e.kind == "orb.BadArguments"));

    let err = channel.call_rpc_method(remote_id(&calc), "add", vec![]).await.unwrap_err();
    assert!(matches!(err.call_failure(), Some(CallFailure::Rejected(e)) if e.kind == "orb.BadArguments"));
    Ok(())
}

// --- Test 4: Object references in both directions ---

#[tokio::test]
async fn test_returned_objects_are_proxies() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Workshop));
    let client = harness.client().await;
    let factory = client.get_server_object::<dyn Factory>().await?;

    let first = factory.create_counter("a".into()).await?;
    let second = factory.create_counter("b".into()).await?;
    assert_eq!(first.increment().await?, 1);
    assert_eq!(first.increment().await?, 2);
    assert_eq!(second.get_value().await?, 0);
    assert_eq!(second.name().await?, "b");
    assert_ne!(remote_id(&first), remote_id(&second));
    Ok(())
}

#[tokio::test]
async fn test_callback_argument_reaches_client_object() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Workshop));
    let client = harness.client().await;
    let factory = client.get_server_object::<dyn Factory>().await?;

    let label: Arc<dyn Named> = Arc::new(Label("from client".into()));
    assert_eq!(factory.describe(label.clone()).await?, "<from client>");
    Ok(())
}

#[tokio::test]
async fn test_round_trip_preserves_identity() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Workshop));
    let client = harness.client().await;
    let factory = client.get_server_object::<dyn Factory>().await?;

    let label: Arc<dyn Named> = Arc::new(Label("mine".into()));
    let back = factory.echo(label.clone()).await?;
    assert!(back.as_proxy().is_none());
    assert_eq!(<dyn Named>::identity_of(&back), <dyn Named>::identity_of(&label));

    // And the other way round: a server object handed back stays one proxy.
    let counter = factory.create_counter("shared".into()).await?;
    let named: Arc<dyn Named> = <dyn Named>::downcast(<dyn Counter>::upcast(counter.clone())).unwrap();
    let again = factory.echo(named.clone()).await?;
    assert_eq!(<dyn Named>::identity_of(&again), <dyn Named>::identity_of(&named));
    assert_eq!(<dyn Counter>::identity_of(&counter), <dyn Named>::identity_of(&again));
    Ok(())
}

#[tokio::test]
async fn test_proxy_relayed_to_another_channel() -> anyhow::Result<()> {
    let origin = Harness::new(Config::default());
    origin.server.register_singleton(Arc::new(Workshop));
    let relay = Harness::new(Config::default());
    relay.server.register_singleton(Arc::new(Workshop));

    let to_origin = origin.client().await;
    let to_relay = relay.client().await;
    let made = to_origin.get_server_object::<dyn Factory>().await?.create_counter("relayed".into()).await?;
    let named: Arc<dyn Named> = <dyn Named>::downcast(<dyn Counter>::upcast(made.clone())).unwrap();

    // The relay calls back through this process into the origin server.
    let far = to_relay.get_server_object::<dyn Factory>().await?;
    assert_eq!(far.describe(named.clone()).await?, "<relayed>");

    // Handed back over the relay channel, it is the same proxy for the origin.
    let back = far.echo(named.clone()).await?;
    assert_eq!(<dyn Named>::identity_of(&back), <dyn Named>::identity_of(&named));
    assert!(Arc::ptr_eq(back.as_proxy().unwrap().channel(), to_origin.channel()));
    Ok(())
}

#[tokio::test]
async fn test_repeated_lookup_returns_same_proxy() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;

    let first = client.get_server_object::<dyn Calculator>().await?;
    let second = client.get_server_object::<dyn Calculator>().await?;
    assert!(Arc::ptr_eq(&first, &second));
    Ok(())
}

// --- Test 5: Events ---

#[tokio::test]
async fn test_events_prune_disconnected_handlers() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Metronome::default()));
    let mut events = harness.server.events();

    let staying = harness.client().await;
    let leaving = harness.client().await;
    let kept = Arc::new(Recorder::default());
    let gone = Arc::new(Recorder::default());

    let ticker = staying.get_server_object::<dyn Ticker>().await?;
    ticker.add_tick(kept.clone()).await?;
    let other = leaving.get_server_object::<dyn Ticker>().await?;
    other.add_tick(gone.clone()).await?;

    assert_eq!(ticker.fire(1).await?, 2);
    assert_eq!(*kept.seen.lock().unwrap(), vec![1]);
    assert_eq!(*gone.seen.lock().unwrap(), vec![1]);

    leaving.close().await;
    disconnected(&mut events).await;

    assert_eq!(ticker.fire(2).await?, 1);
    assert_eq!(*kept.seen.lock().unwrap(), vec![1, 2]);

    ticker.remove_tick(kept.clone()).await?;
    assert_eq!(ticker.fire(3).await?, 0);
    Ok(())
}

// --- Test 6: Call context ---

#[tokio::test]
async fn test_context_bound_for_context_aware_servants() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Whoami));
    let client = harness.client().await;

    let whoami = client.get_server_object::<dyn Identity>().await?;
    let peer = whoami.peer().await?.unwrap();
    let connections = harness.server.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(&peer, &connections[0].peer().to_string());
    assert!(orbrun::context::current().is_none());
    Ok(())
}

#[tokio::test]
async fn test_context_absent_otherwise() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Anonymous));
    let client = harness.client().await;

    let anonymous = client.get_server_object::<dyn Identity>().await?;
    assert_eq!(anonymous.peer().await?, None);
    Ok(())
}

// --- Test 7: Connection notifications ---

#[tokio::test]
async fn test_connection_events_carry_peer() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    let mut events = harness.server.events();
    let client = harness.client().await;

    let connected = tokio::time::timeout(Duration::from_secs(5), events.recv()).await??;
    let peer = match connected {
        ChannelEvent::Connected { peer, .. } => peer,
        other => panic!("expected a connect notification, got {:?}", other),
    };
    assert!(peer.0.starts_with("memory:suite-"));

    client.close().await;
    let ChannelEvent::Disconnected { peer: gone, .. } = disconnected(&mut events).await else {
        unreachable!();
    };
    assert_eq!(gone, peer);
    assert!(eventually(|| harness.server.connections().is_empty()).await);
    Ok(())
}

// --- Test 8: Other transports ---

#[tokio::test]
async fn test_tcp_transport() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.socket_addr();
    let server = Server::listen(listener, Config::default());
    server.register_singleton(Arc::new(Workshop));

    let client = Client::connect(&TcpConnector::new(addr), Config::default()).await?;
    let factory = client.get_server_object::<dyn Factory>().await?;
    let counter = factory.create_counter("tcp".into()).await?;
    assert_eq!(counter.increment().await?, 1);

    let label: Arc<dyn Named> = Arc::new(Label("over tcp".into()));
    assert_eq!(factory.describe(label).await?, "<over tcp>");

    client.close().await;
    server.close().await;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_socket_transport() -> anyhow::Result<()> {
    use orbrun::transport::local::LocalConnector;
    use orbrun::transport::local::LocalListener;

    let path = std::env::temp_dir().join(format!("orbrun-{}.sock", rand::random::<u32>()));
    let server = Server::listen(LocalListener::bind(&path)?, Config::default());
    server.register_singleton(Arc::new(Calc));

    let client = Client::connect(&LocalConnector::new(&path), Config::default()).await?;
    let calc = client.get_server_object::<dyn Calculator>().await?;
    assert_eq!(calc.add(40, 2).await?, 42);

    client.close().await;
    server.close().await;
    Ok(())
}
