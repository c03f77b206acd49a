//! Shared payload types used by both client and server frames.

use serde::{Deserialize, Serialize};

/// Per-stream feature toggles chosen by the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Viewers may post comments
    pub allow_comments: bool,
    /// Viewers may post reactions
    pub allow_reactions: bool,
    /// Broadcaster may switch to screen capture
    pub allow_screen_share: bool,
    /// Server-side recording requested
    pub record_stream: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            allow_comments: true,
            allow_reactions: true,
            allow_screen_share: false,
            record_stream: false,
        }
    }
}

/// Public metadata for a broadcast session, as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMeta {
    /// Session identifier
    pub id: String,
    /// Broadcaster user id
    pub streamer_id: String,
    /// Broadcaster display name
    pub streamer_name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_private: bool,
    pub viewer_count: usize,
    pub is_live: bool,
    /// Milliseconds since epoch
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub settings: StreamSettings,
}

/// SDP description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP session description, relayed verbatim between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// A trickled ICE candidate, relayed verbatim between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

/// Peer connection state as reported by clients (RTCPeerConnection values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// True for states that terminate the peer connection.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_default_matches_wire_defaults() {
        let settings = StreamSettings::default();
        assert!(settings.allow_comments);
        assert!(settings.allow_reactions);
        assert!(!settings.allow_screen_share);
        assert!(!settings.record_stream);
    }

    #[test]
    fn test_settings_round_trip_uses_camel_case() {
        let value = serde_json::to_value(StreamSettings::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "allowComments": true,
                "allowReactions": true,
                "allowScreenShare": false,
                "recordStream": false,
            })
        );
    }

    #[test]
    fn test_ice_candidate_uses_webrtc_field_names() {
        let value = serde_json::to_value(IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".to_owned(),
            sdp_mid: Some("0".to_owned()),
            sdp_m_line_index: Some(0),
        })
        .unwrap();
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_session_description_type_field() {
        let desc: SessionDescription =
            serde_json::from_value(json!({"type": "offer", "sdp": "v=0"})).unwrap();
        assert_eq!(desc.sdp_type, SdpType::Offer);
    }

    #[test]
    fn test_stream_meta_omits_absent_optionals() {
        let meta = StreamMeta {
            id: "s1".to_owned(),
            streamer_id: "u1".to_owned(),
            streamer_name: "Ana".to_owned(),
            title: "Morning walk".to_owned(),
            description: None,
            category: None,
            tags: vec![],
            is_private: false,
            viewer_count: 0,
            is_live: true,
            started_at: 1_700_000_000_000,
            ended_at: None,
            settings: StreamSettings::default(),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("description").is_none());
        assert!(value.get("endedAt").is_none());
        assert_eq!(value["streamerId"], "u1");
        assert_eq!(value["viewerCount"], 0);
    }
}
