//! Wire protocol for Livecast signaling.
//!
//! Every message on the signaling bus is a JSON [`Envelope`]: a server- or
//! client-assigned `id`, a millisecond `timestamp`, and a tagged body where
//! `type` names the frame and `data` carries its payload. The frame enums
//! ([`ClientFrame`], [`ServerFrame`]) are the single source of truth for
//! field names on the wire.

pub mod envelope;
pub mod frames;
pub mod types;

pub use envelope::{Envelope, ProtocolError};
pub use frames::{
    AnswerFrame, AnswerRelay, CandidateFrame, CandidateRelay, ClientFrame, CommentEvent,
    CommentRequest, ConnectionStateFrame, ErrorPayload, HeartbeatPayload, LiveStreamsPayload,
    LoadStreamsPayload, OfferFrame, ReactionEvent, ReactionRequest, RegisterPayload,
    RegisteredPayload, ServerFrame, StartStreamPayload, StreamEndedPayload, StreamRef,
    UpdateStreamPayload, ViewerCountPayload, ViewerJoinedPayload,
};
pub use types::{
    IceCandidate, PeerConnectionState, SdpType, SessionDescription, StreamMeta, StreamSettings,
};
