//! Codec for encoding and decoding wire events.
//!
//! Events travel as JSON text frames over the transport. Inbound text is
//! decoded into [`ClientEvent`]; outbound [`ServerEvent`]s are encoded to
//! text. Size limits are enforced here so oversized frames are rejected
//! before any state is touched.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum inbound event size (16 MiB, bounded by encoded attachments).
pub const MAX_EVENT_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Event exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(serde_json::Error),
}

/// Encode a server event to a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(CodecError::Encode)
}

/// Decode a client event from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is oversized or not a known event.
pub fn decode(text: &str) -> Result<ClientEvent, CodecError> {
    if text.len() > MAX_EVENT_SIZE {
        return Err(CodecError::EventTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;

    #[test]
    fn test_decode_known_events() {
        let cases = [
            (r#"{"event":"room:leave","data":{"roomId":"random"}}"#, "room:leave"),
            (r#"{"event":"typing:start","data":{"roomId":"general"}}"#, "typing:start"),
            (r#"{"event":"room:search","data":{"query":"gen"}}"#, "room:search"),
            (r#"{"event":"user:status","data":{"status":"offline"}}"#, "user:status"),
        ];

        for (text, name) in cases {
            assert!(decode(text).is_ok(), "failed to decode {name}");
        }
    }

    #[test]
    fn test_decode_file_share() {
        let text = r#"{"event":"file:share","data":{"roomId":"general","fileData":"data:text/plain;base64,aGk=","fileName":"hi.txt","fileType":"text/plain","fileSize":2}}"#;
        match decode(text).unwrap() {
            ClientEvent::ShareFile {
                file_name,
                file_size,
                ..
            } => {
                assert_eq!(file_name, "hi.txt");
                assert_eq!(file_size, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let inbound = ClientEvent::PrivateMessage {
            recipient_id: "u2".into(),
            content: "psst".into(),
            kind: MessageKind::Text,
            attachment: None,
        };
        let text = serde_json::to_string(&inbound).unwrap();
        assert_eq!(decode(&text).unwrap(), inbound);
    }

    #[test]
    fn test_decode_oversized() {
        let padding = "x".repeat(MAX_EVENT_SIZE + 1);
        match decode(&padding) {
            Err(CodecError::EventTooLarge(_)) => {}
            other => panic!("Expected EventTooLarge error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode("not json"), Err(CodecError::Decode(_))));
    }
}
