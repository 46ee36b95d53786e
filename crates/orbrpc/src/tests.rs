use crate::*;
use crate::frame::FrameTag;
use crate::serializer::Envelope;

use orbpack::Encoder;

// ============================================================================
//  FRAMES
// ============================================================================

#[test]
fn test_small_frame_boundary() -> Result<()> {
    let payload = vec![0xAB; 65535];
    let bytes = frame::encode(&payload)?;

    assert_eq!(bytes[0], FrameTag::Small as u8);
    assert_eq!(&bytes[1..3], &[0xFF, 0xFF]);
    assert_eq!(bytes.len(), 3 + 65535);

    let (decoded, used) = frame::decode(&bytes)?.unwrap();
    assert_eq!(decoded, &payload[..]);
    assert_eq!(used, bytes.len());
    Ok(())
}

#[test]
fn test_large_frame_boundary() -> Result<()> {
    let payload = vec![0xCD; 65536];
    let bytes = frame::encode(&payload)?;

    assert_eq!(bytes[0], FrameTag::Large as u8);
    assert_eq!(&bytes[1..5], &65536u32.to_le_bytes());
    assert_eq!(bytes.len(), 5 + 65536);

    let (decoded, _) = frame::decode(&bytes)?.unwrap();
    assert_eq!(decoded, &payload[..]);
    Ok(())
}

#[test]
fn test_empty_payload_frame() -> Result<()> {
    let bytes = frame::encode(&[])?;
    assert_eq!(bytes, vec![0x01, 0x00, 0x00]);
    let (decoded, used) = frame::decode(&bytes)?.unwrap();
    assert!(decoded.is_empty());
    assert_eq!(used, 3);
    Ok(())
}

#[test]
fn test_consecutive_frames() -> Result<()> {
    let mut stream = frame::encode(b"one")?;
    stream.extend(frame::encode(b"two")?);

    let (first, used) = frame::decode(&stream)?.unwrap();
    assert_eq!(first, b"one");
    let (second, _) = frame::decode(&stream[used..])?.unwrap();
    assert_eq!(second, b"two");
    Ok(())
}

#[test]
fn test_frame_errors() {
    assert_eq!(frame::decode(&[]), Ok(None));
    assert_eq!(frame::decode(&[0x03, 0, 0]), Err(Error::UnknownFrameTag(0x03)));
    assert_eq!(frame::decode(&[0x01, 0x05]), Err(Error::Truncated));
    assert_eq!(frame::decode(&[0x01, 0x05, 0x00, 1, 2]), Err(Error::Truncated));
}

// ============================================================================
//  MESSAGES
// ============================================================================

fn roundtrip(message: Message) -> Result<()> {
    let bytes = PackSerializer.serialize(&message)?;
    assert_eq!(PackSerializer.deserialize(&bytes)?, message);
    assert_eq!(
        PackSerializer.peek(&bytes),
        Some(Envelope { kind: message.kind() as u64, call_id: message.call_id() })
    );
    Ok(())
}

#[test]
fn test_every_kind_survives_serialization() -> Result<()> {
    roundtrip(Message::Ok { call_id: 1 })?;
    roundtrip(Message::GetServerObject { call_id: 2, type_id: "Demo.ICalculator".into() })?;
    roundtrip(Message::CallMethod {
        call_id: 3,
        instance: InstanceId(42),
        member: "add".into(),
        args: vec![
            Argument::Value(Value::S64(-1)),
            Argument::Object(ObjectRef {
                id: InstanceId(7),
                home: Home::Receiver,
                contracts: vec!["Demo.IListener".into()],
            }),
            Argument::Exception(RemoteError::new("Demo.Oops", "nested")),
        ],
    })?;
    roundtrip(Message::RemoveInstance { call_id: 4, instance: InstanceId(9) })?;
    roundtrip(Message::CallMethodResult {
        call_id: 5,
        result: Argument::Value(Value::List(vec![Value::from("x"), Value::Option(None)])),
    })?;
    roundtrip(Message::Exception {
        call_id: u64::MAX,
        error: RemoteError::new(message::kinds::ARGUMENT, "must be positive")
            .with_param("amount")
            .with_detail(Value::S64(-3)),
    })?;
    Ok(())
}

#[test]
fn test_kind_integers_are_stable() {
    assert_eq!(MessageKind::Ok as u8, 1);
    assert_eq!(MessageKind::GetServerObject as u8, 2);
    assert_eq!(MessageKind::CallMethod as u8, 3);
    assert_eq!(MessageKind::RemoveInstance as u8, 4);
    assert_eq!(MessageKind::CallMethodResult as u8, 5);
    assert_eq!(MessageKind::Exception as u8, 6);
    assert!(MessageKind::CallMethod.is_request());
    assert!(!MessageKind::Exception.is_request());
}

#[test]
fn test_unknown_fields_are_skipped() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.entry_str("future", "ignored")?;
    enc.entry_u64("kind", 4)?;
    enc.entry_u64("call", 11)?;
    enc.entry_u64("instance", 3)?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    assert_eq!(
        PackSerializer.deserialize(&bytes)?,
        Message::RemoveInstance { call_id: 11, instance: InstanceId(3) }
    );
    Ok(())
}

#[test]
fn test_unknown_kind_still_peekable() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.entry_u64("kind", 77)?;
    enc.entry_u64("call", 5)?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    assert_eq!(PackSerializer.deserialize(&bytes), Err(Error::UnknownKind(77)));
    assert_eq!(PackSerializer.peek(&bytes), Some(Envelope { kind: 77, call_id: 5 }));
    Ok(())
}

#[test]
fn test_malformed_args_still_peekable() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.entry_u64("kind", 3)?;
    enc.entry_u64("call", 8)?;
    enc.entry_u64("instance", 1)?;
    enc.entry_str("member", "add")?;
    enc.entry_begin("args")?;
    enc.str("not a list")?;
    enc.entry_end()?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    assert!(PackSerializer.deserialize(&bytes).is_err());
    assert_eq!(PackSerializer.peek(&bytes), Some(Envelope { kind: 3, call_id: 8 }));
    Ok(())
}

#[test]
fn test_deeply_nested_args_still_peekable() -> Result<()> {
    let mut value = Value::Unit;
    for _ in 0..=orbpack::MAX_DEPTH {
        value = Value::Option(Some(Box::new(value)));
    }
    let message = Message::CallMethod {
        call_id: 9,
        instance: InstanceId(1),
        member: "add".into(),
        args: vec![Argument::Value(value)],
    };
    let bytes = PackSerializer.serialize(&message)?;

    assert_eq!(
        PackSerializer.deserialize(&bytes),
        Err(Error::Pack(orbpack::Error::TooDeep(orbpack::MAX_DEPTH)))
    );
    assert_eq!(PackSerializer.peek(&bytes), Some(Envelope { kind: 3, call_id: 9 }));
    Ok(())
}

#[test]
fn test_missing_call_id_rejected() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.entry_u64("kind", 1)?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    match PackSerializer.deserialize(&bytes) {
        Err(Error::ProtocolViolation(msg)) => assert!(msg.contains("call")),
        other => panic!("expected protocol violation, got {:?}", other),
    }
    assert_eq!(PackSerializer.peek(&bytes), None);
    Ok(())
}

#[test]
fn test_remote_error_display_and_classification() {
    let err = RemoteError::new(message::kinds::METHOD_NOT_FOUND, "no member 'sub'");
    assert!(err.is_infrastructure());
    assert_eq!(err.to_string(), "orb.MethodNotFound: no member 'sub'");

    let err = RemoteError::new("Demo.Overdrawn", "balance too low").with_param("amount");
    assert!(!err.is_infrastructure());
    assert_eq!(err.to_string(), "Demo.Overdrawn: balance too low (parameter 'amount')");
    assert!(!RemoteError::generic("boom").is_infrastructure());
}

#[test]
fn test_instance_id_display() {
    assert_eq!(InstanceId(12).to_string(), "instance-12");
    assert!(InstanceId::NONE.is_none());
}
