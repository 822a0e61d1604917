//! Outbound documents and inbound message decoding
//!
//! Outbound documents are JSON objects that always carry a `measurement` field
//! naming the final segment of the topic they are published on. Serialization
//! goes through a bounded buffer; a document that does not fit is rejected
//! whole, so nothing partial ever reaches the wire.

use super::topics::measurement_of;
use crate::error::{ModuleError, ModuleResult};
use serde_json::{Map, Value};
use std::io;
use thiserror::Error;

/// Ordered mapping of string keys to JSON values
pub type Document = Map<String, Value>;

/// Key injected into every outbound document
pub const MEASUREMENT_KEY: &str = "measurement";

/// Key of the single field in a redirected log document
pub const LOG_MESSAGE_KEY: &str = "message";

/// Add the `measurement` field for `topic`, replacing any existing value
pub fn inject_measurement(topic: &str, document: &mut Document) {
    document.insert(
        MEASUREMENT_KEY.to_string(),
        Value::String(measurement_of(topic).to_string()),
    );
}

/// Serialize `document` for `topic` into at most `capacity` bytes
pub fn encode_document(
    topic: &str,
    mut document: Document,
    capacity: usize,
) -> ModuleResult<Vec<u8>> {
    inject_measurement(topic, &mut document);

    let mut buffer = BoundedBuffer::with_capacity(capacity);
    serde_json::to_writer(&mut buffer, &document)?;

    if buffer.overflowed() {
        return Err(ModuleError::payload_too_large(buffer.required(), capacity));
    }
    Ok(buffer.into_inner())
}

/// Single-field document used for redirected log lines
pub fn log_document(line: &str) -> Document {
    let mut document = Document::new();
    document.insert(LOG_MESSAGE_KEY.to_string(), Value::String(line.to_string()));
    document
}

/// Write sink that refuses to grow past a fixed capacity
///
/// Once a write would exceed the capacity the buffer stops accepting data but
/// keeps counting, so the caller can report the size that was needed.
#[derive(Debug)]
pub struct BoundedBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    required: usize,
}

impl BoundedBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            required: 0,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.required > self.capacity
    }

    /// Total bytes the writer attempted to store
    pub fn required(&self) -> usize {
        self.required
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

impl io::Write for BoundedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.required += buf.len();
        if self.overflowed() {
            // Keep counting the rest of the document without storing it
            return Ok(buf.len());
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.overflowed() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "bounded buffer capacity exceeded",
            ));
        }
        Ok(())
    }
}

/// Inbound message after bounds checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("Inbound topic of {size} bytes exceeds limit of {limit} bytes")]
    TopicTooLong { size: usize, limit: usize },
    #[error("Inbound payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl InboundMessage {
    /// Decode raw topic and payload bytes, rejecting anything over the limits
    ///
    /// Buffers are sized to the actual data; invalid UTF-8 is replaced rather
    /// than rejected.
    pub fn decode(
        topic: &[u8],
        payload: &[u8],
        topic_limit: usize,
        payload_limit: usize,
    ) -> Result<Self, InboundError> {
        if topic.len() > topic_limit {
            return Err(InboundError::TopicTooLong {
                size: topic.len(),
                limit: topic_limit,
            });
        }
        if payload.len() > payload_limit {
            return Err(InboundError::PayloadTooLarge {
                size: payload.len(),
                limit: payload_limit,
            });
        }

        Ok(Self {
            topic: String::from_utf8_lossy(topic).into_owned(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_counter_document_wire_format() {
        let bytes = encode_document("sensor/counter0", document(json!({"count": 5})), 512).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"count":5,"measurement":"counter0"}"#
        );
    }

    #[test]
    fn test_existing_measurement_is_replaced() {
        let bytes = encode_document(
            "sensor/wind",
            document(json!({"measurement": "stale", "speed": 12.5})),
            512,
        )
        .unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded["measurement"], "wind");
        assert_eq!(decoded["speed"], 12.5);
    }

    #[test]
    fn test_oversized_document_is_rejected() {
        let big = "x".repeat(600);
        let result = encode_document("sensor/blob", document(json!({ "data": big })), 512);

        match result {
            Err(ModuleError::PayloadTooLarge { size, capacity }) => {
                assert_eq!(capacity, 512);
                assert!(size > 600);
            }
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_document_exactly_at_capacity_fits() {
        let expected = r#"{"measurement":"a"}"#;
        let bytes = encode_document("x/a", Document::new(), expected.len()).unwrap();
        assert_eq!(bytes, expected.as_bytes());

        let too_small = encode_document("x/a", Document::new(), expected.len() - 1);
        assert!(matches!(too_small, Err(ModuleError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_bounded_buffer_counts_past_capacity() {
        use std::io::Write;

        let mut buffer = BoundedBuffer::with_capacity(4);
        buffer.write_all(b"abc").unwrap();
        assert!(!buffer.overflowed());
        buffer.write_all(b"defg").unwrap();
        assert!(buffer.overflowed());
        assert_eq!(buffer.required(), 7);
        assert!(buffer.flush().is_err());
        assert_eq!(buffer.into_inner(), b"abc");
    }

    #[test]
    fn test_log_document_has_single_field() {
        let doc = log_document("Published messages: 3");
        assert_eq!(doc.len(), 1);
        assert_eq!(doc[LOG_MESSAGE_KEY], "Published messages: 3");
    }

    #[test]
    fn test_inbound_decode_within_limits() {
        let message = InboundMessage::decode(b"cmd/led", b"{\"on\":true}", 128, 4096).unwrap();
        assert_eq!(message.topic, "cmd/led");
        assert_eq!(message.payload, "{\"on\":true}");
    }

    #[test]
    fn test_inbound_decode_rejects_oversized() {
        let payload = vec![b'a'; 33];
        assert_eq!(
            InboundMessage::decode(b"t", &payload, 128, 32),
            Err(InboundError::PayloadTooLarge { size: 33, limit: 32 })
        );

        let topic = vec![b't'; 21];
        assert_eq!(
            InboundMessage::decode(&topic, b"", 20, 32),
            Err(InboundError::TopicTooLong { size: 21, limit: 20 })
        );
    }

    #[test]
    fn test_inbound_decode_replaces_invalid_utf8() {
        let message = InboundMessage::decode(b"t", &[0x66, 0xff, 0x6f], 8, 8).unwrap();
        assert_eq!(message.payload, "f\u{fffd}o");
    }
}
