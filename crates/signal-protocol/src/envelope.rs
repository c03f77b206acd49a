//! Message envelope shared by both directions of the bus.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Error type for envelope encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Message was not valid JSON or did not match any known frame
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Envelope wrapping every frame on the wire.
///
/// The body flattens into the envelope object, so the serialized form is
/// `{"id": ..., "timestamp": ..., "type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Unique message id, assigned by the sender
    pub id: String,
    /// Milliseconds since epoch at send time
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wrap a frame with a fresh id and the current wall-clock timestamp.
    pub fn new(body: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            body,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Encode to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decode from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid envelope for `T`.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::frames::{ClientFrame, HeartbeatPayload, RegisterPayload, ServerFrame};
    use serde_json::json;

    #[test]
    fn test_envelope_flattens_type_and_data() {
        let envelope = Envelope::new(ServerFrame::Heartbeat(HeartbeatPayload {
            timestamp: 42,
        }));
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("id").is_some());
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["data"]["timestamp"], 42);
        // No nested body key
        assert!(value.get("body").is_none());
    }

    #[test]
    fn test_decodes_client_register() {
        let text = json!({
            "id": "m-1",
            "timestamp": 1_700_000_000_000_i64,
            "type": "register",
            "data": {"userId": "u1", "userName": "Ana"},
        })
        .to_string();
        let envelope: Envelope<ClientFrame> = Envelope::decode(&text).unwrap();
        assert_eq!(
            envelope.body,
            ClientFrame::Register(RegisterPayload {
                user_id: "u1".to_owned(),
                user_name: "Ana".to_owned(),
            })
        );
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let text = json!({
            "id": "m-1",
            "timestamp": 0,
            "type": "warp_drive",
            "data": {},
        })
        .to_string();
        let result: Result<Envelope<ClientFrame>, _> = Envelope::decode(&text);
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trip_preserves_body() {
        let envelope = Envelope::new(ClientFrame::Heartbeat(HeartbeatPayload { timestamp: 7 }));
        let decoded: Envelope<ClientFrame> = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
