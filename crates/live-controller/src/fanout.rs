//! Per-session event fan-out.
//!
//! Each session owns one `FanoutChannel`: a map from attached client id to
//! that client's outbound frame sink. Publishes happen inside the session
//! actor, so for a fixed session every subscriber observes events in publish
//! order; the sinks themselves are FIFO unbounded channels drained by the
//! connection tasks.

use std::collections::HashMap;

use signal_protocol::{
    CommentEvent, ReactionEvent, ServerFrame, StreamEndedPayload, StreamMeta, ViewerCountPayload,
};
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound frame sink for one connected client.
pub type FrameSink = mpsc::UnboundedSender<ServerFrame>;

/// Events a session publishes to its attached clients.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Session went live
    Started(StreamMeta),
    /// Metadata or settings changed mid-stream
    Updated(StreamMeta),
    /// Session ended; no further events follow
    Ended { ended_at: i64 },
    /// Audience size changed
    ViewerCount { count: usize },
    Comment(CommentEvent),
    Reaction(ReactionEvent),
}

/// Fan-out channel for a single session.
#[derive(Debug)]
pub struct FanoutChannel {
    session_id: String,
    subscribers: HashMap<String, FrameSink>,
}

impl FanoutChannel {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            subscribers: HashMap::new(),
        }
    }

    /// Attach a client. Replaces any previous sink for the same id
    /// (a reconnecting client supersedes its stale registration).
    pub fn subscribe(&mut self, client_id: impl Into<String>, sink: FrameSink) {
        self.subscribers.insert(client_id.into(), sink);
    }

    /// Detach a client. Returns true if it was attached.
    pub fn unsubscribe(&mut self, client_id: &str) -> bool {
        self.subscribers.remove(client_id).is_some()
    }

    #[must_use]
    pub fn is_subscribed(&self, client_id: &str) -> bool {
        self.subscribers.contains_key(client_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Send a frame to one attached client. Returns false if the client is
    /// not attached or its sink is gone (the sink is pruned).
    pub fn send_to(&mut self, client_id: &str, frame: ServerFrame) -> bool {
        match self.subscribers.get(client_id) {
            Some(sink) => {
                if sink.send(frame).is_ok() {
                    true
                } else {
                    debug!(
                        target: "lc.fanout",
                        session_id = %self.session_id,
                        client_id = %client_id,
                        "pruning closed sink"
                    );
                    self.subscribers.remove(client_id);
                    false
                }
            }
            None => false,
        }
    }

    /// Publish an event to every attached client except `exclude`.
    /// Closed sinks are pruned. Returns the number of clients reached.
    pub fn publish(&mut self, event: &ChannelEvent, exclude: Option<&str>) -> usize {
        let frame = self.to_frame(event);
        let mut delivered = 0;
        let mut dead: Vec<String> = Vec::new();

        for (client_id, sink) in &self.subscribers {
            if exclude == Some(client_id.as_str()) {
                continue;
            }
            if sink.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(client_id.clone());
            }
        }

        for client_id in dead {
            debug!(
                target: "lc.fanout",
                session_id = %self.session_id,
                client_id = %client_id,
                "pruning closed sink"
            );
            self.subscribers.remove(&client_id);
        }

        delivered
    }

    /// Drop all subscribers without notifying them.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    fn to_frame(&self, event: &ChannelEvent) -> ServerFrame {
        match event {
            ChannelEvent::Started(meta) => ServerFrame::StreamStarted(meta.clone()),
            ChannelEvent::Updated(meta) => ServerFrame::StreamUpdated(meta.clone()),
            ChannelEvent::Ended { ended_at } => ServerFrame::StreamEnded(StreamEndedPayload {
                stream_id: self.session_id.clone(),
                ended_at: *ended_at,
            }),
            ChannelEvent::ViewerCount { count } => {
                ServerFrame::ViewerCountUpdated(ViewerCountPayload {
                    stream_id: self.session_id.clone(),
                    count: *count,
                })
            }
            ChannelEvent::Comment(comment) => ServerFrame::StreamComment(comment.clone()),
            ChannelEvent::Reaction(reaction) => ServerFrame::StreamReaction(reaction.clone()),
        }
    }
}
