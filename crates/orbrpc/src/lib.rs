//! # OrbRPC
//!
//! The wire protocol spoken between two orb peers.
//!
//! ## Layers
//!
//! - `frame`: the bit-exact length prefix that delimits payloads on a byte stream.
//! - `message`: the six request/response kinds and the tagged arguments they carry.
//! - `serializer`: the pluggable contract that turns a `Message` into a payload,
//!   with `PackSerializer` as the default implementation over `orbpack`.

pub mod error;
pub mod frame;
pub mod message;
pub mod serializer;

pub use error::Error;
pub use error::Result;
pub use message::Argument;
pub use message::Home;
pub use message::InstanceId;
pub use message::Message;
pub use message::MessageKind;
pub use message::ObjectRef;
pub use message::RemoteError;
pub use serializer::PackSerializer;
pub use serializer::Serializer;

pub use orbpack::Value;

#[cfg(test)]
mod tests;
