//! Client and server signaling frames.
//!
//! Frames are adjacently tagged: `type` carries the snake_case frame name
//! and `data` carries the payload object. Payload fields are camelCase to
//! match the JavaScript clients.

use serde::{Deserialize, Serialize};

use crate::types::{IceCandidate, PeerConnectionState, SessionDescription, StreamMeta, StreamSettings};

/// Identity handshake, required as the first frame on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub user_id: String,
    pub user_name: String,
}

/// Server acknowledgement of [`RegisterPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPayload {
    pub user_id: String,
}

/// Broadcaster request to open a session. Sent after local capture succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamPayload {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub settings: StreamSettings,
}

/// Broadcaster request to change stream metadata or settings mid-stream.
/// Absent fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStreamPayload {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<StreamSettings>,
}

/// Payload naming an existing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRef {
    pub stream_id: String,
}

/// Request for the current list of live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadStreamsPayload {}

/// Client comment submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub stream_id: String,
    pub user_id: String,
    pub username: String,
    pub message: String,
}

/// Client reaction submission. `x`/`y` are normalized screen coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub stream_id: String,
    pub user_id: String,
    pub reaction: String,
    pub x: f64,
    pub y: f64,
}

/// Comment event with server-assigned id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEvent {
    pub id: String,
    pub stream_id: String,
    pub user_id: String,
    pub username: String,
    pub message: String,
    pub timestamp: i64,
}

/// Reaction event with server-assigned id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub id: String,
    pub stream_id: String,
    pub user_id: String,
    pub reaction: String,
    pub x: f64,
    pub y: f64,
    pub timestamp: i64,
}

/// SDP offer, addressed to a specific viewer of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferFrame {
    pub stream_id: String,
    pub viewer_id: String,
    pub offer: SessionDescription,
}

/// SDP answer from a viewer. The sender's identity names the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFrame {
    pub stream_id: String,
    pub answer: SessionDescription,
}

/// SDP answer relayed to the broadcaster, tagged with the answering viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRelay {
    pub stream_id: String,
    pub viewer_id: String,
    pub answer: SessionDescription,
}

/// ICE candidate from a client. Broadcasters must set `viewer_id` so the
/// candidate can be routed to the right peer; viewers leave it absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFrame {
    pub stream_id: String,
    pub candidate: IceCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<String>,
}

/// ICE candidate relayed to the other peer of a negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRelay {
    pub stream_id: String,
    pub viewer_id: String,
    pub candidate: IceCandidate,
}

/// Peer connection state report. Broadcasters set `viewer_id` to identify
/// which negotiation the report concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStateFrame {
    pub stream_id: String,
    pub state: PeerConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<String>,
}

/// Application heartbeat, echoed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub timestamp: i64,
}

/// A session has ended; no further events for it will follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndedPayload {
    pub stream_id: String,
    pub ended_at: i64,
}

/// Response to `load_live_streams`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamsPayload {
    pub streams: Vec<StreamMeta>,
}

/// Notification to the broadcaster that a viewer joined and expects an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerJoinedPayload {
    pub stream_id: String,
    pub viewer_id: String,
    pub viewer_name: String,
}

/// Current audience size for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerCountPayload {
    pub stream_id: String,
    pub count: usize,
}

/// Error report with a stable machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Register(RegisterPayload),
    StartStream(StartStreamPayload),
    UpdateStream(UpdateStreamPayload),
    StopStream(StreamRef),
    JoinStream(StreamRef),
    LeaveStream(StreamRef),
    LoadLiveStreams(LoadStreamsPayload),
    StreamComment(CommentRequest),
    StreamReaction(ReactionRequest),
    WebrtcOffer(OfferFrame),
    WebrtcAnswer(AnswerFrame),
    WebrtcIceCandidate(CandidateFrame),
    WebrtcConnectionState(ConnectionStateFrame),
    Heartbeat(HeartbeatPayload),
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    Registered(RegisteredPayload),
    StreamStarted(StreamMeta),
    StreamUpdated(StreamMeta),
    StreamEnded(StreamEndedPayload),
    LiveStreams(LiveStreamsPayload),
    ViewerJoined(ViewerJoinedPayload),
    ViewerCountUpdated(ViewerCountPayload),
    StreamComment(CommentEvent),
    StreamReaction(ReactionEvent),
    WebrtcOffer(OfferFrame),
    WebrtcAnswer(AnswerRelay),
    WebrtcIceCandidate(CandidateRelay),
    Heartbeat(HeartbeatPayload),
    Error(ErrorPayload),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::SdpType;
    use serde_json::json;

    #[test]
    fn test_client_frame_tag_names_are_snake_case() {
        let frame = ClientFrame::WebrtcIceCandidate(CandidateFrame {
            stream_id: "s1".to_owned(),
            candidate: IceCandidate {
                candidate: "candidate:1".to_owned(),
                sdp_mid: None,
                sdp_m_line_index: None,
            },
            viewer_id: Some("v1".to_owned()),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "webrtc_ice_candidate");
        assert_eq!(value["data"]["streamId"], "s1");
        assert_eq!(value["data"]["viewerId"], "v1");
    }

    #[test]
    fn test_start_stream_decodes_with_defaults() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "start_stream",
            "data": {"title": "Dublin Market"},
        }))
        .unwrap();
        match frame {
            ClientFrame::StartStream(payload) => {
                assert_eq!(payload.title, "Dublin Market");
                assert!(!payload.is_private);
                assert!(payload.tags.is_empty());
                assert!(payload.settings.allow_comments);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_update_stream_decodes_partial_fields() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "update_stream",
            "data": {"streamId": "s1", "title": "New title"},
        }))
        .unwrap();
        match frame {
            ClientFrame::UpdateStream(payload) => {
                assert_eq!(payload.stream_id, "s1");
                assert_eq!(payload.title.as_deref(), Some("New title"));
                assert!(payload.description.is_none());
                assert!(payload.settings.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_offer_frame_carries_viewer_id() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "webrtc_offer",
            "data": {
                "streamId": "s1",
                "viewerId": "v1",
                "offer": {"type": "offer", "sdp": "v=0"},
            },
        }))
        .unwrap();
        match frame {
            ClientFrame::WebrtcOffer(offer) => {
                assert_eq!(offer.viewer_id, "v1");
                assert_eq!(offer.offer.sdp_type, SdpType::Offer);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_load_live_streams_accepts_empty_data() {
        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "load_live_streams", "data": {}})).unwrap();
        assert_eq!(frame, ClientFrame::LoadLiveStreams(LoadStreamsPayload {}));
    }

    #[test]
    fn test_server_error_frame_shape() {
        let frame = ServerFrame::Error(ErrorPayload {
            code: "session_not_live".to_owned(),
            message: "Stream is not live".to_owned(),
            stream_id: Some("s1".to_owned()),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "session_not_live");
        assert_eq!(value["data"]["streamId"], "s1");
    }
}
