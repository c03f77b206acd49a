//! Per-viewer WebRTC negotiation state.
//!
//! One `NegotiationContext` exists per (session, viewer) pair. It tracks the
//! offer/answer handshake and buffers ICE candidates that arrive before the
//! receiving peer has a remote description, draining them FIFO once the
//! description commits. The context is pure state; the session actor owns
//! the relaying side effects.

use std::collections::VecDeque;

use signal_protocol::{IceCandidate, PeerConnectionState};
use tokio::time::{Duration, Instant};

use crate::errors::LiveError;

/// Candidates buffered per side before the remote description lands.
/// A well-behaved peer trickles far fewer; past this we treat the peer
/// as broken rather than grow without bound.
const MAX_PENDING_CANDIDATES: usize = 64;

/// Handshake progress for one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Viewer joined, no offer relayed yet
    New,
    /// Offer relayed to the viewer
    OfferSent,
    /// Answer relayed back to the broadcaster
    AnswerReceived,
    /// Peers report a working connection
    Connected,
    /// Terminal: peer connection failed or negotiation timed out
    Failed,
    /// Terminal: torn down deliberately (leave, stop, disconnect)
    Closed,
}

impl NegotiationState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }
}

/// Which peer would apply a candidate or description as *remote*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSide {
    /// The broadcaster applies it (it came from the viewer)
    Broadcaster,
    /// The viewer applies it (it came from the broadcaster)
    Viewer,
}

/// What the session actor should do with an incoming candidate.
#[derive(Debug, PartialEq)]
pub enum CandidateDisposition {
    /// Receiving peer has its remote description; relay now.
    Forward,
    /// Held until the remote description commits.
    Buffered,
}

#[derive(Debug, Default)]
struct SideState {
    has_remote_description: bool,
    pending: VecDeque<IceCandidate>,
}

/// Negotiation state for one viewer of one session.
#[derive(Debug)]
pub struct NegotiationContext {
    viewer_id: String,
    state: NegotiationState,
    deadline: Instant,
    broadcaster: SideState,
    viewer: SideState,
}

impl NegotiationContext {
    /// Create a context for a freshly joined viewer.
    #[must_use]
    pub fn new(viewer_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            state: NegotiationState::New,
            deadline: Instant::now() + timeout,
            broadcaster: SideState::default(),
            viewer: SideState::default(),
        }
    }

    #[must_use]
    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    fn side_mut(&mut self, side: PeerSide) -> &mut SideState {
        match side {
            PeerSide::Broadcaster => &mut self.broadcaster,
            PeerSide::Viewer => &mut self.viewer,
        }
    }

    /// Record that `receiver` now has its remote description (the offer for
    /// the viewer side, the answer for the broadcaster side) and drain the
    /// candidates that were waiting on it, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Negotiation` when the description is not legal in
    /// the current state (answer before offer, duplicate descriptions,
    /// anything after the context terminated).
    pub fn commit_remote_description(
        &mut self,
        receiver: PeerSide,
    ) -> Result<Vec<IceCandidate>, LiveError> {
        if self.state.is_terminal() {
            return Err(LiveError::Negotiation(format!(
                "negotiation with {} already ended",
                self.viewer_id
            )));
        }

        self.state = match (receiver, self.state) {
            (PeerSide::Viewer, NegotiationState::New) => NegotiationState::OfferSent,
            (PeerSide::Broadcaster, NegotiationState::OfferSent) => {
                NegotiationState::AnswerReceived
            }
            (receiver, state) => {
                return Err(LiveError::Negotiation(format!(
                    "unexpected {receiver:?} description in state {state:?}"
                )))
            }
        };

        let side = self.side_mut(receiver);
        side.has_remote_description = true;
        Ok(side.pending.drain(..).collect())
    }

    /// Accept a trickled candidate destined for `receiver`.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Negotiation` when the context has terminated or
    /// the pending buffer overflows.
    pub fn add_remote_candidate(
        &mut self,
        receiver: PeerSide,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition, LiveError> {
        if self.state.is_terminal() {
            return Err(LiveError::Negotiation(format!(
                "negotiation with {} already ended",
                self.viewer_id
            )));
        }

        let side = self.side_mut(receiver);
        if side.has_remote_description {
            return Ok(CandidateDisposition::Forward);
        }
        if side.pending.len() >= MAX_PENDING_CANDIDATES {
            return Err(LiveError::Negotiation(format!(
                "too many pending candidates for {}",
                self.viewer_id
            )));
        }
        side.pending.push_back(candidate);
        Ok(CandidateDisposition::Buffered)
    }

    /// Fold a peer-reported connection state into the handshake state.
    /// Returns the state after the report.
    pub fn connection_state_changed(&mut self, reported: PeerConnectionState) -> NegotiationState {
        if self.state.is_terminal() {
            return self.state;
        }
        match reported {
            PeerConnectionState::Connected => self.state = NegotiationState::Connected,
            PeerConnectionState::Failed | PeerConnectionState::Disconnected => {
                self.state = NegotiationState::Failed;
            }
            PeerConnectionState::Closed => self.state = NegotiationState::Closed,
            PeerConnectionState::New | PeerConnectionState::Connecting => {}
        }
        self.state
    }

    /// Tear the context down. Idempotent; pending candidates are dropped.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.state = NegotiationState::Closed;
        }
        self.broadcaster.pending.clear();
        self.viewer.pending.clear();
    }

    /// Mark the negotiation failed (timeout sweep, peer failure).
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = NegotiationState::Failed;
        }
    }

    /// True once the handshake deadline has passed without a working
    /// connection.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.state.is_terminal() && self.state != NegotiationState::Connected && now >= self.deadline
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn candidate(tag: &str) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{tag}"),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    fn ctx() -> NegotiationContext {
        NegotiationContext::new("v1", Duration::from_secs(30))
    }

    #[test]
    fn test_offer_then_answer_advances_state() {
        let mut ctx = ctx();
        assert_eq!(ctx.state(), NegotiationState::New);

        ctx.commit_remote_description(PeerSide::Viewer).unwrap();
        assert_eq!(ctx.state(), NegotiationState::OfferSent);

        ctx.commit_remote_description(PeerSide::Broadcaster).unwrap();
        assert_eq!(ctx.state(), NegotiationState::AnswerReceived);

        assert_eq!(
            ctx.connection_state_changed(PeerConnectionState::Connected),
            NegotiationState::Connected
        );
    }

    #[test]
    fn test_answer_before_offer_is_rejected() {
        let mut ctx = ctx();
        let err = ctx.commit_remote_description(PeerSide::Broadcaster).unwrap_err();
        assert!(matches!(err, LiveError::Negotiation(_)));
        // State is unchanged; offer still possible
        ctx.commit_remote_description(PeerSide::Viewer).unwrap();
    }

    #[test]
    fn test_early_candidates_buffer_and_drain_in_order() {
        let mut ctx = ctx();

        // Viewer trickles candidates before the broadcaster has an answer
        for tag in ["a", "b", "c"] {
            assert_eq!(
                ctx.add_remote_candidate(PeerSide::Broadcaster, candidate(tag))
                    .unwrap(),
                CandidateDisposition::Buffered
            );
        }

        ctx.commit_remote_description(PeerSide::Viewer).unwrap();
        let drained = ctx.commit_remote_description(PeerSide::Broadcaster).unwrap();
        let tags: Vec<_> = drained.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(tags, ["candidate:a", "candidate:b", "candidate:c"]);

        // After the drain, new candidates flow straight through
        assert_eq!(
            ctx.add_remote_candidate(PeerSide::Broadcaster, candidate("d"))
                .unwrap(),
            CandidateDisposition::Forward
        );
    }

    #[test]
    fn test_sides_buffer_independently() {
        let mut ctx = ctx();
        ctx.add_remote_candidate(PeerSide::Viewer, candidate("from-broadcaster"))
            .unwrap();
        ctx.add_remote_candidate(PeerSide::Broadcaster, candidate("from-viewer"))
            .unwrap();

        let for_viewer = ctx.commit_remote_description(PeerSide::Viewer).unwrap();
        assert_eq!(for_viewer.len(), 1);
        assert_eq!(for_viewer[0].candidate, "candidate:from-broadcaster");

        let for_broadcaster = ctx.commit_remote_description(PeerSide::Broadcaster).unwrap();
        assert_eq!(for_broadcaster[0].candidate, "candidate:from-viewer");
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let mut ctx = ctx();
        for i in 0..MAX_PENDING_CANDIDATES {
            ctx.add_remote_candidate(PeerSide::Viewer, candidate(&i.to_string()))
                .unwrap();
        }
        let err = ctx
            .add_remote_candidate(PeerSide::Viewer, candidate("overflow"))
            .unwrap_err();
        assert!(matches!(err, LiveError::Negotiation(_)));
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let mut ctx = ctx();
        ctx.close();
        ctx.close();
        assert_eq!(ctx.state(), NegotiationState::Closed);

        assert!(ctx.commit_remote_description(PeerSide::Viewer).is_err());
        assert!(ctx
            .add_remote_candidate(PeerSide::Viewer, candidate("late"))
            .is_err());
        // A late state report does not resurrect the context
        assert_eq!(
            ctx.connection_state_changed(PeerConnectionState::Connected),
            NegotiationState::Closed
        );
    }

    #[test]
    fn test_disconnect_report_fails_negotiation() {
        let mut ctx = ctx();
        ctx.commit_remote_description(PeerSide::Viewer).unwrap();
        assert_eq!(
            ctx.connection_state_changed(PeerConnectionState::Disconnected),
            NegotiationState::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_only_before_connected() {
        let mut ctx = NegotiationContext::new("v1", Duration::from_secs(30));
        assert!(!ctx.is_expired(Instant::now()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(ctx.is_expired(Instant::now()));

        // A connected context never expires
        let mut connected = NegotiationContext::new("v2", Duration::from_secs(30));
        connected.commit_remote_description(PeerSide::Viewer).unwrap();
        connected
            .commit_remote_description(PeerSide::Broadcaster)
            .unwrap();
        connected.connection_state_changed(PeerConnectionState::Connected);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!connected.is_expired(Instant::now()));
    }
}
