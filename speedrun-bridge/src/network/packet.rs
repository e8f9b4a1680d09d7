//! Socket.IO Packet Codec
//!
//! Engine.IO v4 framing and Socket.IO v4 packets carried over a single
//! WebSocket text stream. Binary attachments are not supported.
//!
//! Frame layout: `<engine type>[<socket type>[<namespace>,][<ack id>][<json>]]`.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Path of the Engine.IO endpoint.
pub const ENGINE_PATH: &str = "/socket.io/";

/// Packet decoding errors.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Zero-length frame.
    #[error("empty packet")]
    Empty,
    /// Unknown Engine.IO packet type.
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),
    /// Unknown or unsupported Socket.IO packet type.
    #[error("unsupported socket packet type {0:?}")]
    UnsupportedSocketType(char),
    /// Ack id too large.
    #[error("invalid ack id")]
    InvalidAckId,
    /// Payload is not valid JSON.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    /// Event payload was not `[name, ...args]`.
    #[error("malformed event payload")]
    MalformedEvent,
    /// Open packet without the expected handshake fields.
    #[error("malformed open packet")]
    MalformedOpen,
}

/// Handshake data from the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    /// Engine session id.
    pub sid: String,
    /// Server ping period in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed ping in milliseconds.
    pub ping_timeout: u64,
}

// =============================================================================
// ENGINE.IO
// =============================================================================

/// Engine.IO transport packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Handshake.
    Open(OpenInfo),
    /// Transport closing.
    Close,
    /// Server heartbeat.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Carries a Socket.IO packet.
    Message(String),
    /// Transport upgrade (unused over a direct WebSocket).
    Upgrade,
    /// No-op.
    Noop,
}

impl EnginePacket {
    /// Decode one WebSocket text frame.
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let (kind, rest) = split_type(frame)?;
        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|_| PacketError::MalformedOpen),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Ok(Self::Message(rest.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(PacketError::UnknownEngineType(other)),
        }
    }

    /// Encode as a WebSocket text frame. Only client-sent packets are encodable.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Message(body) => format!("4{body}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

// =============================================================================
// SOCKET.IO
// =============================================================================

/// Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect request (client) or confirmation (server).
    Connect {
        /// Namespace.
        namespace: String,
        /// Auth payload or handshake data.
        data: Option<Value>,
    },
    /// Namespace disconnect.
    Disconnect {
        /// Namespace.
        namespace: String,
    },
    /// Named event with a single payload argument.
    Event {
        /// Namespace.
        namespace: String,
        /// Set when the sender wants an ack.
        ack_id: Option<u64>,
        /// Event name.
        name: String,
        /// First argument, `Null` when absent.
        data: Value,
    },
    /// Acknowledgment of an event.
    Ack {
        /// Namespace.
        namespace: String,
        /// Id from the acknowledged event.
        ack_id: u64,
        /// Ack arguments.
        args: Vec<Value>,
    },
    /// Namespace connect refused.
    ConnectError {
        /// Namespace.
        namespace: String,
        /// Server reason.
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Namespace this packet belongs to.
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Decode the body of an Engine.IO `message` packet.
    pub fn decode(body: &str) -> Result<Self, PacketError> {
        let (kind, rest) = split_type(body)?;
        if !matches!(kind, '0'..='4') {
            return Err(PacketError::UnsupportedSocketType(kind));
        }

        let (namespace, rest) = match rest.strip_prefix('/') {
            Some(_) => match rest.find(',') {
                Some(i) => (rest[..i].to_string(), &rest[i + 1..]),
                None => (rest.to_string(), ""),
            },
            None => ("/".to_string(), rest),
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            Some(rest[..digits].parse::<u64>().map_err(|_| PacketError::InvalidAckId)?)
        } else {
            None
        };
        let json = &rest[digits..];
        let payload: Option<Value> = if json.is_empty() {
            None
        } else {
            Some(serde_json::from_str(json)?)
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data: payload }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let Some(Value::Array(mut args)) = payload else {
                    return Err(PacketError::MalformedEvent);
                };
                if args.is_empty() {
                    return Err(PacketError::MalformedEvent);
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(PacketError::MalformedEvent),
                };
                let data = args.into_iter().next().unwrap_or(Value::Null);
                Ok(Self::Event { namespace, ack_id, name, data })
            }
            '3' => {
                let ack_id = ack_id.ok_or(PacketError::InvalidAckId)?;
                let args = match payload {
                    Some(Value::Array(args)) => args,
                    _ => Vec::new(),
                };
                Ok(Self::Ack { namespace, ack_id, args })
            }
            '4' => Ok(Self::ConnectError { namespace, data: payload }),
            other => Err(PacketError::UnsupportedSocketType(other)),
        }
    }

    /// Encode as the body of an Engine.IO `message` packet.
    pub fn encode(&self) -> String {
        let (kind, namespace) = match self {
            Self::Connect { namespace, .. } => ('0', namespace),
            Self::Disconnect { namespace } => ('1', namespace),
            Self::Event { namespace, .. } => ('2', namespace),
            Self::Ack { namespace, .. } => ('3', namespace),
            Self::ConnectError { namespace, .. } => ('4', namespace),
        };

        let mut out = String::new();
        out.push(kind);
        if namespace != "/" {
            out.push_str(namespace);
            out.push(',');
        }

        match self {
            Self::Connect { data: Some(data), .. } | Self::ConnectError { data: Some(data), .. } => {
                out.push_str(&data.to_string());
            }
            Self::Event { ack_id, name, data, .. } => {
                if let Some(id) = ack_id {
                    out.push_str(&id.to_string());
                }
                let args = if data.is_null() {
                    Value::Array(vec![Value::String(name.clone())])
                } else {
                    Value::Array(vec![Value::String(name.clone()), data.clone()])
                };
                out.push_str(&args.to_string());
            }
            Self::Ack { ack_id, args, .. } => {
                out.push_str(&ack_id.to_string());
                out.push_str(&Value::Array(args.clone()).to_string());
            }
            _ => {}
        }

        out
    }

    /// Encode wrapped in an Engine.IO `message` frame.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn split_type(raw: &str) -> Result<(char, &str), PacketError> {
    let mut chars = raw.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    Ok((kind, chars.as_str()))
}

/// WebSocket URL of the Engine.IO endpoint for a service base URL.
pub fn channel_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}{ENGINE_PATH}?EIO=4&transport=websocket")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        assert_eq!(
            packet,
            EnginePacket::Open(OpenInfo {
                sid: "abc".to_string(),
                ping_interval: 25000,
                ping_timeout: 20000,
            })
        );
    }

    #[test]
    fn test_engine_heartbeat() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::Pong.encode(), "3");
        assert!(matches!(EnginePacket::decode(""), Err(PacketError::Empty)));
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(PacketError::UnknownEngineType('9'))
        ));
    }

    #[test]
    fn test_encode_namespace_connect_with_auth() {
        let packet = SocketPacket::Connect {
            namespace: "/ws/match".to_string(),
            data: Some(json!({"steam_id": "7656"})),
        };
        assert_eq!(packet.to_frame(), r#"40/ws/match,{"steam_id":"7656"}"#);
    }

    #[test]
    fn test_decode_connect_ack() {
        let packet = SocketPacket::decode(r#"0/ws/match,{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Connect {
                namespace: "/ws/match".to_string(),
                data: Some(json!({"sid": "xyz"})),
            }
        );
    }

    #[test]
    fn test_decode_event() {
        let packet =
            SocketPacket::decode(r#"2/ws/match,["paired",{"opponent_elo":1500}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/ws/match".to_string(),
                ack_id: None,
                name: "paired".to_string(),
                data: json!({"opponent_elo": 1500}),
            }
        );
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let packet = SocketPacket::decode(r#"2/ws/match,17["match_scrapped"]"#).unwrap();
        match packet {
            SocketPacket::Event { ack_id, name, data, .. } => {
                assert_eq!(ack_id, Some(17));
                assert_eq!(name, "match_scrapped");
                assert!(data.is_null());
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn test_encode_event_and_ack() {
        let event = SocketPacket::Event {
            namespace: "/ws/match".to_string(),
            ack_id: None,
            name: "ban".to_string(),
            data: json!({"category": "Any%"}),
        };
        assert_eq!(event.to_frame(), r#"42/ws/match,["ban",{"category":"Any%"}]"#);

        let ack = SocketPacket::Ack {
            namespace: "/ws/match".to_string(),
            ack_id: 17,
            args: vec![],
        };
        assert_eq!(ack.to_frame(), "43/ws/match,17[]");
    }

    #[test]
    fn test_root_namespace_is_implicit() {
        let packet = SocketPacket::decode(r#"2["hello",1]"#).unwrap();
        assert_eq!(packet.namespace(), "/");
        let event = SocketPacket::Event {
            namespace: "/".to_string(),
            ack_id: None,
            name: "hello".to_string(),
            data: json!(1),
        };
        assert_eq!(event.encode(), r#"2["hello",1]"#);
    }

    #[test]
    fn test_malformed_event_payloads() {
        assert!(matches!(
            SocketPacket::decode("2/ws/match,{}"),
            Err(PacketError::MalformedEvent)
        ));
        assert!(matches!(
            SocketPacket::decode("2/ws/match,[]"),
            Err(PacketError::MalformedEvent)
        ));
        assert!(matches!(
            SocketPacket::decode("2/ws/match,[5]"),
            Err(PacketError::MalformedEvent)
        ));
        assert!(matches!(
            SocketPacket::decode("5/ws/match,1-[]"),
            Err(PacketError::UnsupportedSocketType('5'))
        ));
    }

    #[test]
    fn test_connect_error() {
        let packet = SocketPacket::decode(r#"4/ws/match,{"message":"unauthorized"}"#).unwrap();
        assert!(matches!(packet, SocketPacket::ConnectError { .. }));
    }

    #[test]
    fn test_channel_url() {
        assert_eq!(
            channel_url("http://140.82.40.6:5000"),
            "ws://140.82.40.6:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            channel_url("https://match.example/"),
            "wss://match.example/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            channel_url("ws://127.0.0.1:9000"),
            "ws://127.0.0.1:9000/socket.io/?EIO=4&transport=websocket"
        );
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(frame in ".*") {
            let _ = EnginePacket::decode(&frame);
            let _ = SocketPacket::decode(&frame);
        }

        #[test]
        fn prop_event_name_survives_encoding(name in "[a-z_]{1,24}", elo in any::<i64>()) {
            let packet = SocketPacket::Event {
                namespace: "/ws/match".to_string(),
                ack_id: None,
                name: name.clone(),
                data: json!({"opponent_elo": elo}),
            };
            let decoded = SocketPacket::decode(&packet.encode()).unwrap();
            prop_assert_eq!(decoded, packet);
        }
    }
}
