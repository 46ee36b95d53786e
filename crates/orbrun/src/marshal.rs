//! # Marshalling
//!
//! Converts typed arguments and results to tagged `Argument`s and back.
//! Plain values travel as `Argument::Value`. Objects are registered in the
//! local repository before their reference goes on the wire, and incoming
//! references resolve to the local object they name or to a proxy.

use std::sync::Arc;

use orbpack::Pack;
use orbpack::Value;
use orbrpc::Argument;
use orbrpc::Home;
use orbrpc::ObjectRef;
use orbrpc::RemoteError;

use crate::channel::Channel;
use crate::error::Error;
use crate::error::Result;
use crate::object::ObjectContract;
use crate::object::RemoteObject;

/// The channel-bound context for converting arguments.
#[derive(Clone)]
pub struct Marshal {
    channel: Arc<Channel>,
}

impl Marshal {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Produces a reference to `object` for the peer.
    ///
    /// A proxy for one of the peer's own objects goes back as a
    /// receiver-side reference; anything else is registered here first.
    pub fn export(&self, object: Arc<dyn RemoteObject>) -> Result<ObjectRef> {
        if let Some(core) = object.as_proxy() {
            if Arc::ptr_eq(core.channel(), &self.channel) {
                return Ok(ObjectRef { id: core.remote_id(), home: Home::Receiver, contracts: Vec::new() });
            }
        }

        let type_ids = object.type_ids();
        let id = self.channel.repository().add_instance(object, Some(self.channel.id()))?;
        Ok(ObjectRef { id, home: Home::Sender, contracts: type_ids })
    }

    /// Resolves a reference received from the peer.
    pub fn import(&self, obj: ObjectRef) -> Result<Arc<dyn RemoteObject>> {
        match obj.home {
            Home::Receiver => self.local(&obj),
            Home::Sender => Ok(self.channel.proxy_for(&obj)),
        }
    }

    /// Resolves a reference received from the peer as contract `T`.
    ///
    /// A proxy is only produced for a contract the remote object advertises.
    pub fn import_as<T: ?Sized + ObjectContract>(&self, obj: ObjectRef) -> Result<Arc<T>> {
        let contract = T::contract();
        match obj.home {
            Home::Receiver => {
                let object = self.local(&obj)?;
                T::downcast(object).ok_or_else(|| {
                    Error::bad_arguments(format!("{} does not serve '{}'", obj.id, contract.name))
                })
            }
            Home::Sender => {
                if !contract.is_root() && !obj.contracts.iter().any(|c| c == contract.name) {
                    return Err(Error::unresolvable(format!(
                        "contract '{}' on remote {}",
                        contract.name, obj.id
                    )));
                }
                Ok(self.channel.proxy_for(&obj).view::<T>())
            }
        }
    }

    fn local(&self, obj: &ObjectRef) -> Result<Arc<dyn RemoteObject>> {
        self.channel
            .repository()
            .get_instance(obj.id)
            .ok_or_else(|| Error::bad_arguments(format!("{} is not a live local object", obj.id)))
    }
}

/// Moves an argument from one channel's terms to another's.
///
/// Values and exceptions pass through; object references are imported from
/// `from` and exported again on `to`.
pub fn remarshal(arg: Argument, from: &Marshal, to: &Marshal) -> Result<Argument> {
    match arg {
        Argument::Object(obj) if obj.id.is_none() => Ok(Argument::Object(obj)),
        Argument::Object(obj) => {
            let object = from.import(obj)?;
            Ok(Argument::Object(to.export(object)?))
        }
        other => Ok(other),
    }
}

/// A type that can cross the wire as an argument or result.
pub trait Wire: Sized + Send + 'static {
    fn into_arg(self, marshal: &Marshal) -> Result<Argument>;

    fn from_arg(arg: Argument, marshal: &Marshal) -> Result<Self>;
}

fn expect_value(arg: Argument) -> Result<Value> {
    match arg {
        Argument::Value(value) => Ok(value),
        other => Err(Error::bad_arguments(format!("expected a value, got {}", other.tag()))),
    }
}

fn from_value<T: Pack>(arg: Argument) -> Result<T> {
    T::from_value(expect_value(arg)?).map_err(|e| Error::bad_arguments(e.to_string()))
}

macro_rules! wire_value {
    ($($ty:ty),* $(,)?) => { $(
        impl Wire for $ty {
            fn into_arg(self, _marshal: &Marshal) -> Result<Argument> {
                Ok(Argument::Value(self.to_value()))
            }

            fn from_arg(arg: Argument, _marshal: &Marshal) -> Result<Self> {
                from_value(arg)
            }
        }
    )* };
}

wire_value!((), bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, char, String, Value);

impl<T: Pack + Send + 'static> Wire for Vec<T> {
    fn into_arg(self, _marshal: &Marshal) -> Result<Argument> {
        Ok(Argument::Value(self.to_value()))
    }

    fn from_arg(arg: Argument, _marshal: &Marshal) -> Result<Self> {
        from_value(arg)
    }
}

impl<T: Pack + Send + 'static> Wire for Option<T> {
    fn into_arg(self, _marshal: &Marshal) -> Result<Argument> {
        Ok(Argument::Value(self.to_value()))
    }

    fn from_arg(arg: Argument, _marshal: &Marshal) -> Result<Self> {
        from_value(arg)
    }
}

impl Wire for RemoteError {
    fn into_arg(self, _marshal: &Marshal) -> Result<Argument> {
        Ok(Argument::Exception(self))
    }

    fn from_arg(arg: Argument, _marshal: &Marshal) -> Result<Self> {
        match arg {
            Argument::Exception(err) => Ok(err),
            other => Err(Error::bad_arguments(format!("expected an exception, got {}", other.tag()))),
        }
    }
}

impl<T: ?Sized + ObjectContract> Wire for Arc<T> {
    fn into_arg(self, marshal: &Marshal) -> Result<Argument> {
        Ok(Argument::Object(marshal.export(T::upcast(self))?))
    }

    fn from_arg(arg: Argument, marshal: &Marshal) -> Result<Self> {
        match arg {
            Argument::Object(obj) if obj.id.is_none() => {
                Err(Error::bad_arguments(format!("null reference where '{}' was expected", T::contract().name)))
            }
            Argument::Object(obj) => marshal.import_as::<T>(obj),
            other => Err(Error::bad_arguments(format!("expected an object, got {}", other.tag()))),
        }
    }
}

/// Takes the next positional argument for parameter `param`.
#[doc(hidden)]
pub fn take_arg<T: Wire>(
    args: &mut impl Iterator<Item = Argument>,
    marshal: &Marshal,
    param: &str,
) -> Result<T> {
    let arg = args
        .next()
        .ok_or_else(|| Error::bad_arguments(format!("missing argument '{}'", param)))?;
    T::from_arg(arg, marshal).map_err(|e| match e {
        Error::CallFailed(crate::error::CallFailure::BadArguments(msg)) => {
            Error::bad_arguments(format!("argument '{}': {}", param, msg))
        }
        other => other,
    })
}
