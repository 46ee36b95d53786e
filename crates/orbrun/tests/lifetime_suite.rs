mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use orbrun::CallFailure;
use orbrun::ChannelState;
use orbrun::Config;
use orbrun::Error;
use orbrun::InstanceId;
use orbrun::ObjectContract;
use orbrun::RemoteObject;

use common::*;

fn remote_id<T: ?Sized + ObjectContract>(proxy: &Arc<T>) -> InstanceId {
    T::upcast(proxy.clone()).as_proxy().unwrap().remote_id()
}

// --- Singletons ---

#[tokio::test]
async fn test_singleton_survives_proxy_release() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default().with_removal_grace(Duration::ZERO));
    let id = harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;

    let calc = client.get_server_object::<dyn Calculator>().await?;
    assert_eq!(remote_id(&calc), id);
    drop(calc);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(harness.server.repository().contains(id));
    let calc = client.get_server_object::<dyn Calculator>().await?;
    assert_eq!(calc.add(1, 2).await?, 3);

    client.close().await;
    assert!(harness.server.repository().is_pinned(id));
    Ok(())
}

#[tokio::test]
async fn test_singleton_type_is_lazy() -> anyhow::Result<()> {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();

    let harness = Harness::new(Config::default());
    harness.server.register_singleton_type::<dyn Calculator, _>(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(Calc) as Arc<dyn Calculator>
    });
    let client = harness.client().await;
    assert_eq!(built.load(Ordering::SeqCst), 0);

    let calc = client.get_server_object::<dyn Calculator>().await?;
    assert_eq!(calc.add(2, 2).await?, 4);
    let second = harness.client().await;
    let again = second.get_server_object::<dyn Calculator>().await?;
    assert_eq!(again.add(3, 3).await?, 6);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_client_singleton_visible_to_server() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    let client = harness.client().await;
    client.register_singleton(Arc::new(Label("client side".into())));

    assert!(eventually(|| !harness.server.connections().is_empty()).await);
    let channel = harness.server.connections().pop().unwrap();
    let obj = channel.get_server_object("Demo.INamed").await?;
    let named = channel.marshal().import_as::<dyn Named>(obj)?;
    assert_eq!(named.name().await?, "client side");
    Ok(())
}

// --- Removal grace ---

#[tokio::test]
async fn test_released_instance_lingers_for_grace() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default().with_removal_grace(Duration::from_millis(300)));
    harness.server.register_singleton(Arc::new(Workshop));
    let client = harness.client().await;
    let factory = client.get_server_object::<dyn Factory>().await?;

    let counter = factory.create_counter("brief".into()).await?;
    let id = remote_id(&counter);
    assert_eq!(counter.increment().await?, 1);
    drop(counter);

    // A call already on its way after the release still lands.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.server.repository().contains(id));
    client.channel().call_rpc_method(id, "increment", vec![]).await?;

    let repository = harness.server.repository().clone();
    assert!(eventually(|| !repository.contains(id)).await);

    let err = client.channel().call_rpc_method(id, "increment", vec![]).await.unwrap_err();
    assert!(matches!(err.call_failure(), Some(CallFailure::Rejected(e)) if e.kind == "orb.InstanceNotFound"));
    Ok(())
}

#[tokio::test]
async fn test_live_proxy_keeps_instance() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default().with_removal_grace(Duration::ZERO));
    harness.server.register_singleton(Arc::new(Workshop));
    let client = harness.client().await;
    let factory = client.get_server_object::<dyn Factory>().await?;

    let counter = factory.create_counter("kept".into()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.server.repository().purge();
    assert!(harness.server.repository().contains(remote_id(&counter)));
    assert_eq!(counter.increment().await?, 1);
    Ok(())
}

// --- Disconnect ---

#[tokio::test]
async fn test_disconnect_releases_channel_instances() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    let singleton = harness.server.register_singleton(Arc::new(Workshop));
    let mut events = harness.server.events();
    let client = harness.client().await;
    let factory = client.get_server_object::<dyn Factory>().await?;

    let counter = factory.create_counter("orphan".into()).await?;
    let id = remote_id(&counter);
    assert!(harness.server.repository().contains(id));

    client.close().await;
    disconnected(&mut events).await;

    assert!(!harness.server.repository().contains(id));
    assert!(harness.server.repository().contains(singleton));

    let err = counter.increment().await.unwrap_err();
    assert!(matches!(err, Error::CallFailed(CallFailure::Disconnected)));
    assert!(counter.is_severed());
    Ok(())
}

#[tokio::test]
async fn test_dropping_client_closes_its_channel() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Workshop));
    let mut events = harness.server.events();
    let client = harness.client().await;
    let factory = client.get_server_object::<dyn Factory>().await?;
    let counter = factory.create_counter("abandoned".into()).await?;
    let id = remote_id(&counter);

    drop(client);
    disconnected(&mut events).await;
    assert!(eventually(|| harness.server.connections().is_empty()).await);
    assert!(!harness.server.repository().contains(id));
    assert!(counter.is_severed());
    Ok(())
}

#[tokio::test]
async fn test_dropping_server_closes_connections() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;
    let mut events = client.events();

    drop(harness);
    disconnected(&mut events).await;
    assert!(!client.is_connected());
    let err = calc.add(1, 1).await.unwrap_err();
    assert!(matches!(err, Error::CallFailed(CallFailure::Disconnected)));
    Ok(())
}

#[tokio::test]
async fn test_pending_call_fails_on_disconnect() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;

    let pending = tokio::spawn({
        let calc = calc.clone();
        async move { calc.block().await }
    });
    assert!(eventually(|| client.channel().in_flight() == 1).await);

    harness.server.close().await;
    let err = pending.await?.unwrap_err();
    assert!(matches!(err, Error::CallFailed(CallFailure::Disconnected)));

    client.channel().closed().await;
    assert_eq!(client.channel().state(), ChannelState::Closed);
    assert_eq!(client.channel().in_flight(), 0);
    assert!(!client.is_connected());
    Ok(())
}

#[tokio::test]
async fn test_call_timeout() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default().with_call_timeout(Duration::from_millis(100)));
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;

    let err = calc.block().await.unwrap_err();
    assert!(matches!(err, Error::CallFailed(CallFailure::Timeout)));
    assert_eq!(client.channel().in_flight(), 0);
    assert_eq!(calc.add(1, 1).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_calls_after_close_fail_fast() -> anyhow::Result<()> {
    let harness = Harness::new(Config::default());
    harness.server.register_singleton(Arc::new(Calc));
    let client = harness.client().await;
    let calc = client.get_server_object::<dyn Calculator>().await?;

    client.close().await;
    client.close().await;
    let err = calc.add(1, 1).await.unwrap_err();
    assert!(matches!(err, Error::CallFailed(CallFailure::Disconnected)));
    Ok(())
}
