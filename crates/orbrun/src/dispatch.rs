//! Turns incoming requests into local invocations and their replies.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use orbrpc::Argument;
use orbrpc::Home;
use orbrpc::InstanceId;
use orbrpc::Message;
use orbrpc::ObjectRef;
use orbrpc::RemoteError;
use orbrpc::message::kinds;
use tracing::debug;
use tracing::warn;

use crate::channel::Channel;
use crate::context;
use crate::context::CallContext;
use crate::error::Error;
use crate::object::Invocation;

pub(crate) enum Outcome {
    /// Send this message back to the peer.
    Reply(Message),
    /// Not a request; the correlator owns it.
    Unhandled(Message),
}

pub(crate) async fn handle(channel: &Arc<Channel>, message: Message) -> Outcome {
    match message {
        Message::GetServerObject { call_id, type_id } => Outcome::Reply(get_server_object(channel, call_id, &type_id)),
        Message::CallMethod { call_id, instance, member, args } => {
            Outcome::Reply(call_method(channel, call_id, instance, member, args).await)
        }
        Message::RemoveInstance { call_id, instance } => {
            channel.repository().remove_instance(instance, channel.config().removal_grace, Some(channel.id()));
            Outcome::Reply(Message::Ok { call_id })
        }
        other => Outcome::Unhandled(other),
    }
}

fn get_server_object(channel: &Arc<Channel>, call_id: u64, type_id: &str) -> Message {
    let Some((id, object)) = channel.repository().get_by_type_id(type_id) else {
        debug!(type_id, "no server object");
        return Message::CallMethodResult { call_id, result: Argument::Object(ObjectRef::empty()) };
    };

    let contracts = channel.repository().type_ids(id).unwrap_or_else(|| object.type_ids());
    let obj = ObjectRef { id, home: Home::Sender, contracts };
    Message::CallMethodResult { call_id, result: Argument::Object(obj) }
}

async fn call_method(
    channel: &Arc<Channel>,
    call_id: u64,
    instance: InstanceId,
    member: String,
    args: Vec<Argument>,
) -> Message {
    let Some(target) = channel.repository().get_instance(instance) else {
        let error = RemoteError::new(kinds::INSTANCE_NOT_FOUND, format!("{} is not registered", instance));
        return Message::Exception { call_id, error };
    };

    let context = CallContext { channel: channel.id(), peer: channel.peer().clone(), call_id };
    let call = Invocation { member: member.clone(), args, marshal: channel.marshal(), context: context.clone() };

    let invoke = AssertUnwindSafe(async {
        if target.context_aware() {
            context::scope(context, target.invoke(call)).await
        } else {
            target.invoke(call).await
        }
    });

    let outcome = match invoke.catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "servant panicked".to_string());
            warn!(call_id, %member, %reason, "servant panicked");
            Err(Error::Application(anyhow::anyhow!(reason)))
        }
    };

    match outcome {
        Ok(result) => Message::CallMethodResult { call_id, result },
        Err(e) => {
            if let Error::Application(inner) = &e {
                warn!(call_id, %member, error = %inner, "application error sent as generic exception");
            } else {
                debug!(call_id, %member, error = %e, "call raised");
            }
            Message::Exception { call_id, error: e.to_remote() }
        }
    }
}
