#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use orbrun::ArgumentError;
use orbrun::ChannelEvent;
use orbrun::Client;
use orbrun::Config;
use orbrun::Event;
use orbrun::Server;
use orbrun::transport::memory;
use orbrun::transport::memory::MemoryConnector;
use tokio::sync::broadcast;

// --- Contracts ---

orbrun::contract! {
    pub trait Named = "Demo.INamed" {
        fn name(&self) -> String;
    }
}

orbrun::contract! {
    pub trait Calculator = "Demo.ICalculator" {
        fn add(&self, a: i64, b: i64) -> i64;
        fn divide(&self, a: i64, b: i64) -> i64;
        fn block(&self);
    }
}

orbrun::contract! {
    pub trait Counter: Named = "Demo.ICounter" {
        fn increment(&self) -> u64;
        fn get_value(&self) -> u64;
    }
}

orbrun::contract! {
    pub trait Factory = "Demo.IFactory" {
        fn create_counter(&self, label: String) -> Arc<dyn Counter>;
        fn echo(&self, object: Arc<dyn Named>) -> Arc<dyn Named>;
        fn describe(&self, object: Arc<dyn Named>) -> String;
    }
}

orbrun::contract! {
    pub trait TickHandler = "Demo.ITickHandler" {
        fn tick(&self, value: u32);
    }
}

orbrun::contract! {
    pub trait Ticker = "Demo.ITicker" {
        fn add_tick(&self, handler: Arc<dyn TickHandler>);
        fn remove_tick(&self, handler: Arc<dyn TickHandler>);
        fn fire(&self, value: u32) -> u32;
    }
}

orbrun::contract! {
    pub trait Identity = "Demo.IIdentity" {
        fn peer(&self) -> Option<String>;
    }
}

orbrun::contract! {
    pub trait Fragile = "Demo.IFragile" {
        fn shatter(&self);
        fn hold(&self) -> u32;
    }
}

orbrun::contract! {
    pub trait Unregistered = "Demo.IUnregistered" {}
}

// --- Servants ---

#[derive(Default)]
pub struct Calc;

#[orbrun::async_trait]
impl Calculator for Calc {
    async fn add(&self, a: i64, b: i64) -> orbrun::Result<i64> {
        Ok(a + b)
    }

    async fn divide(&self, a: i64, b: i64) -> orbrun::Result<i64> {
        if b == 0 {
            return Err(ArgumentError::for_param("b", "division by zero").into());
        }
        Ok(a / b)
    }

    async fn block(&self) -> orbrun::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

orbrun::serve!(Calc: Calculator);

pub struct Tally {
    label: String,
    value: AtomicU64,
}

impl Tally {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), value: AtomicU64::new(0) }
    }
}

#[orbrun::async_trait]
impl Named for Tally {
    async fn name(&self) -> orbrun::Result<String> {
        Ok(self.label.clone())
    }
}

#[orbrun::async_trait]
impl Counter for Tally {
    async fn increment(&self) -> orbrun::Result<u64> {
        Ok(self.value.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn get_value(&self) -> orbrun::Result<u64> {
        Ok(self.value.load(Ordering::SeqCst))
    }
}

orbrun::serve!(Tally: Counter, Named);

/// A counter served under its derived contract only.
pub struct Odometer(AtomicU64);

impl Odometer {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }
}

#[orbrun::async_trait]
impl Named for Odometer {
    async fn name(&self) -> orbrun::Result<String> {
        Ok("odometer".into())
    }
}

#[orbrun::async_trait]
impl Counter for Odometer {
    async fn increment(&self) -> orbrun::Result<u64> {
        Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn get_value(&self) -> orbrun::Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

orbrun::serve!(Odometer: Counter);

#[derive(Default)]
pub struct Workshop;

#[orbrun::async_trait]
impl Factory for Workshop {
    async fn create_counter(&self, label: String) -> orbrun::Result<Arc<dyn Counter>> {
        let counter: Arc<dyn Counter> = Arc::new(Tally::new(label));
        Ok(counter)
    }

    async fn echo(&self, object: Arc<dyn Named>) -> orbrun::Result<Arc<dyn Named>> {
        Ok(object)
    }

    async fn describe(&self, object: Arc<dyn Named>) -> orbrun::Result<String> {
        Ok(format!("<{}>", object.name().await?))
    }
}

orbrun::serve!(Workshop: Factory);

pub struct Label(pub String);

#[orbrun::async_trait]
impl Named for Label {
    async fn name(&self) -> orbrun::Result<String> {
        Ok(self.0.clone())
    }
}

orbrun::serve!(Label: Named);

#[derive(Default)]
pub struct Metronome {
    ticks: Event<dyn TickHandler>,
}

#[orbrun::async_trait]
impl Ticker for Metronome {
    async fn add_tick(&self, handler: Arc<dyn TickHandler>) -> orbrun::Result<()> {
        self.ticks.subscribe(handler);
        Ok(())
    }

    async fn remove_tick(&self, handler: Arc<dyn TickHandler>) -> orbrun::Result<()> {
        self.ticks.unsubscribe(&handler);
        Ok(())
    }

    async fn fire(&self, value: u32) -> orbrun::Result<u32> {
        let handlers = self.ticks.handlers();
        for handler in &handlers {
            handler.tick(value).await?;
        }
        Ok(handlers.len() as u32)
    }
}

orbrun::serve!(Metronome: Ticker);

/// Records every tick it receives.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<u32>>,
}

#[orbrun::async_trait]
impl TickHandler for Recorder {
    async fn tick(&self, value: u32) -> orbrun::Result<()> {
        self.seen.lock().unwrap().push(value);
        Ok(())
    }
}

orbrun::serve!(Recorder: TickHandler);

#[derive(Default)]
pub struct Whoami;

#[orbrun::async_trait]
impl Identity for Whoami {
    async fn peer(&self) -> orbrun::Result<Option<String>> {
        Ok(orbrun::context::current().map(|ctx| ctx.peer.to_string()))
    }
}

orbrun::serve!(context Whoami: Identity);

/// Same contract as `Whoami`, without asking for the call context.
#[derive(Default)]
pub struct Anonymous;

#[orbrun::async_trait]
impl Identity for Anonymous {
    async fn peer(&self) -> orbrun::Result<Option<String>> {
        Ok(orbrun::context::current().map(|ctx| ctx.peer.to_string()))
    }
}

orbrun::serve!(Anonymous: Identity);

#[derive(Default)]
pub struct Glass;

#[orbrun::async_trait]
impl Fragile for Glass {
    async fn shatter(&self) -> orbrun::Result<()> {
        panic!("glass shattered");
    }

    async fn hold(&self) -> orbrun::Result<u32> {
        Ok(1)
    }
}

orbrun::serve!(Glass: Fragile);

// --- Harness ---

pub struct Harness {
    pub server: Server,
    connector: MemoryConnector,
    config: Config,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let name = format!("suite-{}", rand::random::<u32>());
        let (listener, connector) = memory::endpoint(&name);
        let server = Server::listen(listener, config.clone());
        Self { server, connector, config }
    }

    pub async fn client(&self) -> Client {
        Client::connect(&self.connector, self.config.clone()).await.unwrap()
    }
}

pub fn init_logging() {
    orbrun::logging::init();
}

/// Waits for the next `Disconnected` notification.
pub async fn disconnected(events: &mut broadcast::Receiver<ChannelEvent>) -> ChannelEvent {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(event @ ChannelEvent::Disconnected { .. })) => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => panic!("event stream failed: {}", e),
            Err(_) => panic!("no disconnect observed"),
        }
    }
}

/// Polls `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
