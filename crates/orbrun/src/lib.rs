//! # Orbrun
//!
//! A bidirectional object RPC runtime. A process exposes interface-typed
//! objects to a peer; the peer calls them through generated proxies, and
//! object references (not only values) cross the wire in both directions.
//!
//! ## Layers
//!
//! - `codec` and `correlator`: frames on a byte stream, and call ids matched to waiters.
//! - `repository`: the per-endpoint table of exposed instances and their lifetimes.
//! - `contract!`, `proxy` and `dispatch`: interface metadata, forwarding stand-ins,
//!   and the turning of an incoming call into a local invocation.
//! - `channel`, `client` and `server`: one logical connection and its two endpoints.

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod contract;
pub mod correlator;
mod dispatch;
pub mod error;
pub mod event;
pub mod logging;
mod macros;
pub mod marshal;
pub mod object;
pub mod proxy;
pub mod repository;
pub mod server;
pub mod transport;

pub use channel::Channel;
pub use channel::ChannelEvent;
pub use channel::ChannelId;
pub use channel::ChannelState;
pub use client::Client;
pub use config::Config;
pub use context::CallContext;
pub use contract::Contract;
pub use contract::Member;
pub use error::ArgumentError;
pub use error::CallFailure;
pub use error::Error;
pub use error::Result;
pub use error::Throwable;
pub use event::Event;
pub use marshal::Marshal;
pub use marshal::Wire;
pub use object::Invocation;
pub use object::ObjectContract;
pub use object::RemoteObject;
pub use proxy::ProxyCore;
pub use proxy::Remote;
pub use repository::Repository;
pub use server::Server;

pub use orbpack::Value;
pub use orbrpc::Argument;
pub use orbrpc::InstanceId;
pub use orbrpc::RemoteError;

#[doc(hidden)]
pub use async_trait::async_trait;
