//! # Serializer
//!
//! The pluggable contract between `Message` and frame payloads.
//!
//! `PackSerializer` writes every message as an orbpack map:
//!
//! ```text
//! { kind: u64, call: u64, ...kind-specific fields }
//! ```
//!
//! Unknown keys are skipped on decode, so peers may add fields.

use crate::error::Error;
use crate::error::Result;
use crate::message::Argument;
use crate::message::Home;
use crate::message::InstanceId;
use crate::message::Message;
use crate::message::MessageKind;
use crate::message::ObjectRef;
use crate::message::RemoteError;

use orbpack::Decoder;
use orbpack::Encoder;
use orbpack::decode_value;
use orbpack::encode_value;

/// The kind byte and call id of a payload, recovered without a full decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub kind: u64,
    pub call_id: u64,
}

pub trait Serializer: Send + Sync + 'static {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Message>;

    /// Best-effort recovery of the envelope when `deserialize` fails, so the
    /// receiver can still answer or fail the call it belongs to.
    fn peek(&self, _bytes: &[u8]) -> Option<Envelope> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PackSerializer;

impl Serializer for PackSerializer {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        encode_message(&mut enc, message)?;
        Ok(enc.into_bytes()?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        let mut dec = Decoder::new(bytes);
        let message = decode_message(&mut dec)?;
        if dec.remaining() != 0 {
            return Err(Error::ProtocolViolation("Trailing bytes after message".into()));
        }
        Ok(message)
    }

    fn peek(&self, bytes: &[u8]) -> Option<Envelope> {
        let mut dec = Decoder::new(bytes);
        let mut map = dec.map().ok()?;
        let mut kind = None;
        let mut call_id = None;
        while let Ok(Some((key, mut val))) = map.next() {
            match key {
                "kind" => kind = val.u64().ok(),
                "call" => call_id = val.u64().ok(),
                _ => {}
            }
            if kind.is_some() && call_id.is_some() {
                break;
            }
        }
        Some(Envelope { kind: kind?, call_id: call_id? })
    }
}

// ============================================================================
//  ENCODE
// ============================================================================

fn encode_message(enc: &mut Encoder, message: &Message) -> Result<()> {
    enc.map_begin()?;
    enc.entry_u64("kind", message.kind() as u64)?;
    enc.entry_u64("call", message.call_id())?;

    match message {
        Message::Ok { .. } => {}
        Message::GetServerObject { type_id, .. } => {
            enc.entry_str("type", type_id)?;
        }
        Message::CallMethod { instance, member, args, .. } => {
            enc.entry_u64("instance", instance.0)?;
            enc.entry_str("member", member)?;
            enc.entry_begin("args")?;
            enc.list_begin()?;
            for arg in args {
                encode_argument(enc, arg)?;
            }
            enc.list_end()?;
            enc.entry_end()?;
        }
        Message::RemoveInstance { instance, .. } => {
            enc.entry_u64("instance", instance.0)?;
        }
        Message::CallMethodResult { result, .. } => {
            enc.entry_begin("result")?;
            encode_argument(enc, result)?;
            enc.entry_end()?;
        }
        Message::Exception { error, .. } => {
            enc.entry_begin("error")?;
            encode_error(enc, error)?;
            enc.entry_end()?;
        }
    }

    enc.map_end()?;
    Ok(())
}

/// An argument is a single-entry map whose key is the tag.
fn encode_argument(enc: &mut Encoder, arg: &Argument) -> Result<()> {
    enc.map_begin()?;
    enc.entry_begin(arg.tag())?;
    match arg {
        Argument::Value(value) => encode_value(enc, value)?,
        Argument::Object(obj) => encode_object(enc, obj)?,
        Argument::Exception(err) => encode_error(enc, err)?,
    }
    enc.entry_end()?;
    enc.map_end()?;
    Ok(())
}

fn encode_object(enc: &mut Encoder, obj: &ObjectRef) -> Result<()> {
    enc.map_begin()?;
    enc.entry_u64("id", obj.id.0)?;
    enc.entry_str("home", match obj.home {
        Home::Sender => "sender",
        Home::Receiver => "receiver",
    })?;
    enc.entry_begin("contracts")?;
    enc.list_begin()?;
    for name in &obj.contracts {
        enc.str(name)?;
    }
    enc.list_end()?;
    enc.entry_end()?;
    enc.map_end()?;
    Ok(())
}

fn encode_error(enc: &mut Encoder, err: &RemoteError) -> Result<()> {
    enc.map_begin()?;
    enc.entry_str("kind", &err.kind)?;
    enc.entry_str("message", &err.message)?;
    if let Some(param) = &err.param {
        enc.entry_str("param", param)?;
    }
    if let Some(detail) = &err.detail {
        enc.entry_begin("detail")?;
        encode_value(enc, detail)?;
        enc.entry_end()?;
    }
    enc.map_end()?;
    Ok(())
}

// ============================================================================
//  DECODE
// ============================================================================

fn missing(field: &str) -> Error {
    Error::ProtocolViolation(format!("Missing {}", field))
}

fn decode_message(dec: &mut Decoder<'_>) -> Result<Message> {
    let mut map = dec.map()?;
    let mut kind = None;
    let mut call_id = None;
    let mut type_id = None;
    let mut instance = None;
    let mut member = None;
    let mut args = None;
    let mut result = None;
    let mut error = None;

    while let Some((key, mut val)) = map.next()? {
        match key {
            "kind" => kind = Some(val.u64()?),
            "call" => call_id = Some(val.u64()?),
            "type" => type_id = Some(val.str()?.to_owned()),
            "instance" => instance = Some(InstanceId(val.u64()?)),
            "member" => member = Some(val.str()?.to_owned()),
            "args" => {
                let mut list = val.list()?;
                let mut items = Vec::new();
                while let Some(mut item) = list.next()? {
                    items.push(decode_argument(&mut item)?);
                }
                args = Some(items);
            }
            "result" => result = Some(decode_argument(&mut val)?),
            "error" => error = Some(decode_error(&mut val)?),
            _ => val.skip()?,
        }
    }

    let kind = kind.ok_or_else(|| missing("kind"))?;
    let call_id = call_id.ok_or_else(|| missing("call"))?;
    let message = match MessageKind::from_u64(kind).ok_or(Error::UnknownKind(kind))? {
        MessageKind::Ok => Message::Ok { call_id },
        MessageKind::GetServerObject => Message::GetServerObject {
            call_id,
            type_id: type_id.ok_or_else(|| missing("type"))?,
        },
        MessageKind::CallMethod => Message::CallMethod {
            call_id,
            instance: instance.ok_or_else(|| missing("instance"))?,
            member: member.ok_or_else(|| missing("member"))?,
            args: args.unwrap_or_default(),
        },
        MessageKind::RemoveInstance => Message::RemoveInstance {
            call_id,
            instance: instance.ok_or_else(|| missing("instance"))?,
        },
        MessageKind::CallMethodResult => Message::CallMethodResult {
            call_id,
            result: result.ok_or_else(|| missing("result"))?,
        },
        MessageKind::Exception => Message::Exception {
            call_id,
            error: error.ok_or_else(|| missing("error"))?,
        },
    };
    Ok(message)
}

fn decode_argument(dec: &mut Decoder<'_>) -> Result<Argument> {
    let mut map = dec.map()?;
    let (tag, mut val) = map.next()?.ok_or_else(|| missing("argument tag"))?;
    let arg = match tag {
        "value" => Argument::Value(decode_value(&mut val)?),
        "object" => Argument::Object(decode_object(&mut val)?),
        "exception" => Argument::Exception(decode_error(&mut val)?),
        other => return Err(Error::ProtocolViolation(format!("Unknown argument tag '{}'", other))),
    };
    Ok(arg)
}

fn decode_object(dec: &mut Decoder<'_>) -> Result<ObjectRef> {
    let mut map = dec.map()?;
    let mut id = None;
    let mut home = None;
    let mut contracts = Vec::new();

    while let Some((key, mut val)) = map.next()? {
        match key {
            "id" => id = Some(InstanceId(val.u64()?)),
            "home" => {
                home = Some(match val.str()? {
                    "sender" => Home::Sender,
                    "receiver" => Home::Receiver,
                    other => {
                        return Err(Error::ProtocolViolation(format!("Unknown home '{}'", other)));
                    }
                })
            }
            "contracts" => {
                let mut list = val.list()?;
                while let Some(mut item) = list.next()? {
                    contracts.push(item.str()?.to_owned());
                }
            }
            _ => val.skip()?,
        }
    }

    Ok(ObjectRef {
        id: id.ok_or_else(|| missing("object id"))?,
        home: home.ok_or_else(|| missing("object home"))?,
        contracts,
    })
}

fn decode_error(dec: &mut Decoder<'_>) -> Result<RemoteError> {
    let mut map = dec.map()?;
    let mut kind = None;
    let mut message = None;
    let mut param = None;
    let mut detail = None;

    while let Some((key, mut val)) = map.next()? {
        match key {
            "kind" => kind = Some(val.str()?.to_owned()),
            "message" => message = Some(val.str()?.to_owned()),
            "param" => param = Some(val.str()?.to_owned()),
            "detail" => detail = Some(decode_value(&mut val)?),
            _ => val.skip()?,
        }
    }

    Ok(RemoteError {
        kind: kind.ok_or_else(|| missing("error kind"))?,
        message: message.unwrap_or_default(),
        param,
        detail,
    })
}
