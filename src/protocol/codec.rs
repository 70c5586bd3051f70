//! Codec bridging typed messages and wire frames
//!
//! Encoding is deterministic: one message becomes exactly one
//! newline-terminated JSON object, and decoding the same bytes yields an
//! equal message.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::frame;
use crate::error::{ChatError, Result};

/// Encode a message as one complete frame
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes> {
    let payload = serde_json::to_vec(msg)
        .map_err(|e| ChatError::serialization(format!("Failed to encode message: {}", e)))?;
    Ok(frame::encode_to_bytes(&payload))
}

/// Decode a frame payload into a typed message
///
/// Fails with an invalid-message error on unknown kinds or missing fields.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| ChatError::invalid_message(format!("Failed to decode message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::FrameCodec;
    use crate::protocol::messages::{ClientMessage, ErrorReason, ServerMessage};

    fn roundtrip_client(msg: ClientMessage) {
        let encoded = encode(&msg).unwrap();
        // Strip the frame delimiter the way the session read loop does
        let mut codec = FrameCodec::new();
        codec.feed(&encoded);
        let payload = codec.decode_next().unwrap().unwrap();
        let decoded: ClientMessage = decode(&payload).unwrap();
        assert_eq!(msg, decoded);
    }

    fn roundtrip_server(msg: ServerMessage) {
        let encoded = encode(&msg).unwrap();
        let mut codec = FrameCodec::new();
        codec.feed(&encoded);
        let payload = codec.decode_next().unwrap().unwrap();
        let decoded: ServerMessage = decode(&payload).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_client_message_roundtrip() {
        roundtrip_client(ClientMessage::Register {
            nickname: "alice".into(),
        });
        roundtrip_client(ClientMessage::Join {
            channel: "general".into(),
        });
        roundtrip_client(ClientMessage::Direct {
            to: "bob".into(),
            body: "hey there".into(),
        });
        roundtrip_client(ClientMessage::Broadcast {
            channel: "general".into(),
            body: "unicode: héllo ☃".into(),
        });
        roundtrip_client(ClientMessage::ListChannels);
        roundtrip_client(ClientMessage::Quit);
    }

    #[test]
    fn test_server_message_roundtrip() {
        roundtrip_server(ServerMessage::welcome("alice"));
        roundtrip_server(ServerMessage::notice("bob has joined general"));
        roundtrip_server(ServerMessage::Broadcast {
            channel: "general".into(),
            from: "alice".into(),
            body: "hi".into(),
        });
        roundtrip_server(ServerMessage::Direct {
            from: "carol".into(),
            body: "hey".into(),
        });
        roundtrip_server(ServerMessage::error(ErrorReason::UnknownRecipient, "dave"));
        roundtrip_server(ServerMessage::UserList {
            channel: "general".into(),
            users: vec!["alice".into(), "bob".into()],
        });
    }

    #[test]
    fn test_encoded_frame_is_single_line() {
        let msg = ClientMessage::Broadcast {
            channel: "general".into(),
            body: "no newlines in the json itself".into(),
        };
        let encoded = encode(&msg).unwrap();
        let newlines = encoded.iter().filter(|&&b| b == b'\n').count();
        assert_eq!(newlines, 1);
        assert_eq!(encoded.last(), Some(&b'\n'));
    }

    #[test]
    fn test_body_with_embedded_newline_stays_framed() {
        // serde_json escapes the newline, so the frame stays one line
        let msg = ClientMessage::Broadcast {
            channel: "general".into(),
            body: "line one\nline two".into(),
        };
        roundtrip_client(msg);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<ClientMessage> = decode(b"not json at all");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_wrong_shape_fails() {
        let result: Result<ClientMessage> = decode(br#"{"nickname":"alice"}"#);
        assert!(result.is_err());
    }
}
