//! Wire codec
//!
//! Encodes frames into socket messages and decodes socket messages back
//! into frames. Decoding is incremental: a binary packet is held until all
//! of its attachments have arrived, and `decode` returns `Ok(None)` until
//! then.

use bytes::Bytes;
use serde_json::Value;

use crate::constants::DEFAULT_MAX_ATTACHMENTS;
use crate::error::DecodeError;
use crate::protocol::packet::{
    EngineKind, Frame, OpenHandshake, Packet, PacketKind, Payload, WireMessage, ROOT_NAMESPACE,
};

/// Encode a frame into one text message followed by any binary attachments.
pub fn encode(frame: &Frame) -> Vec<WireMessage> {
    let mut out = String::from(frame.kind().digit());
    match frame {
        Frame::Open(handshake) => {
            out.push_str(&serde_json::to_string(handshake).unwrap_or_default());
            vec![WireMessage::Text(out)]
        }
        Frame::Message(packet) => {
            let attachments = encode_packet(packet, &mut out);
            let mut messages = Vec::with_capacity(1 + attachments.len());
            messages.push(WireMessage::Text(out));
            messages.extend(attachments.into_iter().map(WireMessage::Binary));
            messages
        }
        _ => vec![WireMessage::Text(out)],
    }
}

/// Append the textual form of `packet` to `dst`, returning its attachments.
fn encode_packet(packet: &Packet, dst: &mut String) -> Vec<Bytes> {
    let mut attachments = Vec::new();
    let json = packet
        .data
        .as_ref()
        .map(|data| data.deconstruct(&mut attachments));

    let kind = match (packet.kind, attachments.is_empty()) {
        (PacketKind::Event, false) => PacketKind::BinaryEvent,
        (PacketKind::Ack, false) => PacketKind::BinaryAck,
        (PacketKind::BinaryEvent, true) => PacketKind::Event,
        (PacketKind::BinaryAck, true) => PacketKind::Ack,
        (kind, _) => kind,
    };

    dst.push(kind.digit());
    if kind.is_binary() {
        dst.push_str(&attachments.len().to_string());
        dst.push('-');
    }
    if packet.namespace != ROOT_NAMESPACE {
        dst.push_str(&packet.namespace);
        dst.push(',');
    }
    if let Some(id) = packet.id {
        dst.push_str(&id.to_string());
    }
    if let Some(json) = json {
        dst.push_str(&json.to_string());
    }
    attachments
}

/// A binary packet waiting for its attachments
#[derive(Debug)]
struct PartialPacket {
    packet: Packet,
    data: Option<Value>,
    expected: usize,
    attachments: Vec<Bytes>,
}

/// Incremental frame decoder for one connection
#[derive(Debug)]
pub struct Decoder {
    max_attachments: usize,
    partial: Option<PartialPacket>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTACHMENTS)
    }
}

impl Decoder {
    pub fn new(max_attachments: usize) -> Self {
        Self {
            max_attachments,
            partial: None,
        }
    }

    /// Whether a binary packet is waiting for attachments
    pub fn is_reassembling(&self) -> bool {
        self.partial.is_some()
    }

    /// Drop any packet under reassembly
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Decode one socket message.
    ///
    /// Returns `Ok(None)` while a binary packet is still missing attachments.
    pub fn decode(&mut self, message: WireMessage) -> Result<Option<Frame>, DecodeError> {
        match message {
            WireMessage::Text(text) => {
                if let Some(partial) = self.partial.take() {
                    tracing::warn!(
                        "Discarding {} packet with {}/{} attachments: text frame arrived first",
                        partial.packet.kind.name(),
                        partial.attachments.len(),
                        partial.expected
                    );
                }
                self.decode_text(&text)
            }
            WireMessage::Binary(bytes) => {
                let Some(partial) = self.partial.as_mut() else {
                    return Err(DecodeError::UnexpectedBinary);
                };
                partial.attachments.push(bytes);
                if partial.attachments.len() < partial.expected {
                    return Ok(None);
                }
                let Some(partial) = self.partial.take() else {
                    return Ok(None);
                };
                finish_packet(partial.packet, partial.data, &partial.attachments)
                    .map(|p| Some(Frame::Message(p)))
            }
        }
    }

    fn decode_text(&mut self, text: &str) -> Result<Option<Frame>, DecodeError> {
        let first = text.chars().next().ok_or(DecodeError::Empty)?;
        let kind = EngineKind::from_digit(first).ok_or(DecodeError::UnknownEngineType(first))?;
        let body = &text[1..];

        let frame = match kind {
            EngineKind::Open => {
                let handshake: OpenHandshake = serde_json::from_str(body)
                    .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
                Frame::Open(handshake)
            }
            EngineKind::Close => Frame::Close,
            // Ping/pong bodies are only used for transport upgrade probes
            EngineKind::Ping => Frame::Ping,
            EngineKind::Pong => Frame::Pong,
            EngineKind::Upgrade => Frame::Upgrade,
            EngineKind::Noop => Frame::Noop,
            EngineKind::Message => {
                let header = parse_packet(body, self.max_attachments)?;
                if header.attachments > 0 {
                    self.partial = Some(PartialPacket {
                        packet: header.packet,
                        data: header.data,
                        expected: header.attachments,
                        attachments: Vec::with_capacity(header.attachments),
                    });
                    return Ok(None);
                }
                Frame::Message(finish_packet(header.packet, header.data, &[])?)
            }
        };
        Ok(Some(frame))
    }
}

struct ParsedPacket {
    packet: Packet,
    data: Option<Value>,
    attachments: usize,
}

fn parse_packet(body: &str, max_attachments: usize) -> Result<ParsedPacket, DecodeError> {
    let bytes = body.as_bytes();
    let first = body
        .chars()
        .next()
        .ok_or_else(|| DecodeError::MalformedHeader("missing packet type".into()))?;
    let kind = PacketKind::from_digit(first).ok_or(DecodeError::UnknownPacketType(first))?;
    let mut i = 1;

    let mut attachments = 0;
    if kind.is_binary() {
        let start = i;
        while i < bytes.len() && bytes[i] != b'-' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(DecodeError::MalformedHeader(
                "missing attachment count separator".into(),
            ));
        }
        attachments = body[start..i].parse::<usize>().map_err(|_| {
            DecodeError::MalformedHeader(format!("invalid attachment count {:?}", &body[start..i]))
        })?;
        if attachments > max_attachments {
            return Err(DecodeError::TooManyAttachments {
                count: attachments,
                max: max_attachments,
            });
        }
        i += 1;
    }

    let namespace = if bytes.get(i) == Some(&b'/') {
        let start = i;
        while i < bytes.len() && bytes[i] != b',' {
            i += 1;
        }
        let namespace = body[start..i].to_string();
        if i < bytes.len() {
            i += 1;
        }
        namespace
    } else {
        ROOT_NAMESPACE.to_string()
    };

    let start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let id = if i > start {
        Some(body[start..i].parse::<u64>().map_err(|_| {
            DecodeError::MalformedHeader(format!("invalid ack id {:?}", &body[start..i]))
        })?)
    } else {
        None
    };

    let data = if i < bytes.len() {
        Some(
            serde_json::from_str::<Value>(&body[i..])
                .map_err(|e| DecodeError::InvalidJson(e.to_string()))?,
        )
    } else {
        None
    };

    validate_payload(kind, id, data.as_ref())?;

    Ok(ParsedPacket {
        packet: Packet {
            kind,
            namespace,
            id,
            data: None,
        },
        data,
        attachments,
    })
}

fn validate_payload(kind: PacketKind, id: Option<u64>, data: Option<&Value>) -> Result<(), DecodeError> {
    let valid = match kind {
        PacketKind::Connect => matches!(data, None | Some(Value::Object(_))),
        PacketKind::Disconnect => data.is_none(),
        PacketKind::ConnectError => matches!(data, Some(Value::Object(_) | Value::String(_))),
        PacketKind::Event | PacketKind::BinaryEvent => match data {
            Some(Value::Array(items)) => matches!(items.first(), Some(Value::String(_))),
            _ => false,
        },
        PacketKind::Ack | PacketKind::BinaryAck => {
            id.is_some() && matches!(data, Some(Value::Array(_)))
        }
    };
    if valid {
        Ok(())
    } else {
        Err(DecodeError::InvalidPayload { kind: kind.name() })
    }
}

fn finish_packet(
    mut packet: Packet,
    data: Option<Value>,
    attachments: &[Bytes],
) -> Result<Packet, DecodeError> {
    packet.data = data
        .map(|value| Payload::reconstruct(value, attachments))
        .transpose()
        .map_err(|num| DecodeError::InvalidPlaceholder { num })?;
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn text(s: &str) -> WireMessage {
        WireMessage::Text(s.to_string())
    }

    fn decode_one(s: &str) -> Result<Option<Frame>, DecodeError> {
        Decoder::default().decode(text(s))
    }

    fn roundtrip(frame: &Frame) -> Frame {
        let mut decoder = Decoder::default();
        let mut result = None;
        for message in encode(frame) {
            result = decoder.decode(message).unwrap();
        }
        result.unwrap()
    }

    #[test]
    fn test_heartbeat_frames() {
        assert_eq!(encode(&Frame::Ping), vec![text("2")]);
        assert_eq!(encode(&Frame::Pong), vec![text("3")]);
        assert_eq!(decode_one("2").unwrap(), Some(Frame::Ping));
        assert_eq!(decode_one("2probe").unwrap(), Some(Frame::Ping));
        assert_eq!(decode_one("1").unwrap(), Some(Frame::Close));
        assert_eq!(decode_one("6").unwrap(), Some(Frame::Noop));
    }

    #[test]
    fn test_decode_open() {
        let frame = decode_one(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap()
        .unwrap();
        let Frame::Open(handshake) = frame else {
            panic!("expected open frame");
        };
        assert_eq!(handshake.sid, "abc");
        assert_eq!(handshake.ping_interval, 25000);
        assert_eq!(handshake.ping_timeout, 20000);
        assert_eq!(handshake.max_payload, Some(1_000_000));
    }

    #[test]
    fn test_encode_event_layout() {
        let packet = Packet::event("/", "user_text", vec![json!({"text": "hi"}).into()]).with_id(12);
        assert_eq!(
            encode(&Frame::Message(packet)),
            vec![text(r#"4212["user_text",{"text":"hi"}]"#)]
        );

        let packet = Packet::connect("/admin", Some(json!({"token": "t"})));
        assert_eq!(
            encode(&Frame::Message(packet)),
            vec![text(r#"40/admin,{"token":"t"}"#)]
        );

        assert_eq!(
            encode(&Frame::Message(Packet::disconnect("/"))),
            vec![text("41")]
        );
    }

    #[test]
    fn test_decode_event_with_namespace_and_id() {
        let frame = decode_one(r#"42/chat,7["bot_response",{"text":"yo"}]"#).unwrap().unwrap();
        let Frame::Message(packet) = frame else {
            panic!("expected message");
        };
        assert_eq!(packet.kind, PacketKind::Event);
        assert_eq!(packet.namespace, "/chat");
        assert_eq!(packet.id, Some(7));
        assert_eq!(packet.event_name(), Some("bot_response"));
    }

    #[test]
    fn test_decode_ack() {
        let frame = decode_one(r#"433["ok"]"#).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Message(Packet::ack("/", 3, vec![json!("ok")]))
        );
    }

    #[test]
    fn test_binary_event_reassembly() {
        let audio = Bytes::from_static(&[0x10, 0x20, 0x30]);
        let packet = Packet::event("/", "audio_response", vec![
            json!({"sequence": 0}).into(),
            Payload::Binary(audio.clone()),
        ]);

        let messages = encode(&Frame::Message(packet.clone()));
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            text(r#"451-["audio_response",{"sequence":0},{"_placeholder":true,"num":0}]"#)
        );
        assert_eq!(messages[1], WireMessage::Binary(audio));

        let mut decoder = Decoder::default();
        assert_eq!(decoder.decode(messages[0].clone()).unwrap(), None);
        assert!(decoder.is_reassembling());
        let frame = decoder.decode(messages[1].clone()).unwrap();
        assert_eq!(frame, Some(Frame::Message(packet)));
        assert!(!decoder.is_reassembling());
    }

    #[test]
    fn test_text_during_reassembly_discards_partial() {
        let mut decoder = Decoder::default();
        assert_eq!(
            decoder
                .decode(text(r#"452-["a",{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#))
                .unwrap(),
            None
        );
        decoder.decode(WireMessage::Binary(Bytes::from_static(b"x"))).unwrap();
        assert_eq!(decoder.decode(text("2")).unwrap(), Some(Frame::Ping));
        assert!(!decoder.is_reassembling());
        assert_eq!(
            decoder.decode(WireMessage::Binary(Bytes::from_static(b"y"))),
            Err(DecodeError::UnexpectedBinary)
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_one(""), Err(DecodeError::Empty));
        assert_eq!(decode_one("9"), Err(DecodeError::UnknownEngineType('9')));
        assert_eq!(decode_one("x"), Err(DecodeError::UnknownEngineType('x')));
        assert_eq!(decode_one("49"), Err(DecodeError::UnknownPacketType('9')));
        assert!(matches!(decode_one("4"), Err(DecodeError::MalformedHeader(_))));
        assert!(matches!(decode_one("452[\"a\"]"), Err(DecodeError::MalformedHeader(_))));
        assert!(matches!(decode_one("42[\"a\""), Err(DecodeError::InvalidJson(_))));
        assert!(matches!(decode_one("0{}"), Err(DecodeError::InvalidJson(_))));
        assert_eq!(
            decode_one("42{\"a\":1}"),
            Err(DecodeError::InvalidPayload { kind: "event" })
        );
        assert_eq!(
            decode_one("43[1]"),
            Err(DecodeError::InvalidPayload { kind: "ack" })
        );
        assert_eq!(
            decode_one("41{}"),
            Err(DecodeError::InvalidPayload { kind: "disconnect" })
        );
        assert_eq!(
            decode_one(r#"450-["a",{"_placeholder":true,"num":0}]"#),
            Err(DecodeError::InvalidPlaceholder { num: 0 })
        );
        assert_eq!(
            Decoder::new(2).decode(text(r#"453-["a"]"#)),
            Err(DecodeError::TooManyAttachments { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_open_roundtrip() {
        let frame = Frame::Open(OpenHandshake {
            sid: "s1".into(),
            upgrades: vec![],
            ping_interval: 100,
            ping_timeout: 50,
            max_payload: None,
        });
        assert_eq!(roundtrip(&frame), frame);
    }

    fn arg_strategy() -> impl Strategy<Value = Payload> {
        prop_oneof![
            any::<i64>().prop_map(|n| Payload::Json(json!(n))),
            "[a-zA-Z0-9 ,/\\-]{0,12}".prop_map(|s| Payload::Json(json!(s))),
            proptest::collection::vec(any::<u8>(), 0..32)
                .prop_map(|b| Payload::Binary(Bytes::from(b))),
        ]
    }

    proptest! {
        #[test]
        fn prop_event_roundtrip(
            namespace in prop_oneof![Just("/".to_string()), "/[a-z]{1,8}"],
            name in "[a-z_]{1,16}",
            id in proptest::option::of(any::<u64>()),
            args in proptest::collection::vec(arg_strategy(), 0..5),
        ) {
            let mut packet = Packet::event(namespace, &name, args);
            packet.id = id;
            let frame = Frame::Message(packet);
            prop_assert_eq!(roundtrip(&frame), frame);
        }

        #[test]
        fn prop_ack_roundtrip(
            id in any::<u64>(),
            values in proptest::collection::vec(any::<i32>(), 0..4),
        ) {
            let args = values.into_iter().map(|v| json!(v)).collect();
            let frame = Frame::Message(Packet::ack("/", id, args));
            prop_assert_eq!(roundtrip(&frame), frame);
        }
    }
}
