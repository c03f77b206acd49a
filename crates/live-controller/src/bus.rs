//! WebSocket signaling bus.
//!
//! One connection task per client. The task:
//! - Requires a `register` frame before anything else
//! - Decodes client frames and dispatches them to the actor system
//! - Drains the client's outbound sink (fan-out events, relays, acks)
//! - Drops the connection when the client stops heartbeating
//!
//! On disconnect, viewers are detached from every session they watch and a
//! hosting broadcaster starts the session's grace timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use signal_protocol::{
    ClientFrame, Envelope, ErrorPayload, HeartbeatPayload, LiveStreamsPayload, RegisteredPayload,
    ServerFrame,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::actors::metrics::CoordinatorMetrics;
use crate::actors::registry::{NewSessionRequest, RegistryHandle};
use crate::actors::session::SessionActorHandle;
use crate::errors::LiveError;
use crate::fanout::FrameSink;

/// How long a connection may sit unregistered before it is dropped.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat check interval.
const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Shared state for the bus router.
#[derive(Clone)]
pub struct BusState {
    pub registry: RegistryHandle,
    pub metrics: Arc<CoordinatorMetrics>,
    pub heartbeat_timeout: Duration,
}

/// Build the signaling router. `main` wraps it with tracing middleware.
pub fn router(state: BusState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(State(state): State<BusState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Identity and attachments of one registered connection.
struct ConnectionContext {
    user_id: String,
    user_name: String,
    /// Session this connection broadcasts, if any.
    hosting: Option<SessionActorHandle>,
    /// Sessions this connection watches, by session id.
    watching: HashMap<String, SessionActorHandle>,
    /// Sink handed to sessions; the connection task drains the other end.
    outbound: FrameSink,
    last_seen: Instant,
}

async fn handle_socket(socket: WebSocket, state: BusState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerFrame>();

    // First frame must be register
    let Some(mut ctx) =
        register_connection(&mut ws_tx, &mut ws_rx, outbound_tx).await
    else {
        return;
    };

    state.metrics.connection_opened();
    info!(
        target: "lc.bus",
        user_id = %ctx.user_id,
        user_name = %ctx.user_name,
        "Client registered"
    );

    let mut heartbeat_check = tokio::time::interval(HEARTBEAT_CHECK_INTERVAL);

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        ctx.last_seen = Instant::now();
                        handle_text(&state, &mut ctx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(target: "lc.bus", user_id = %ctx.user_id, "Client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        ctx.last_seen = Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {
                        send_error(&ctx.outbound, &LiveError::InvalidRequest(
                            "Binary frames are not supported".to_string(),
                        ), None);
                    }
                    Some(Err(e)) => {
                        debug!(target: "lc.bus", user_id = %ctx.user_id, error = %e, "Socket error");
                        break;
                    }
                }
            }

            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if write_frame(&mut ws_tx, frame).await.is_err() {
                            break;
                        }
                    }
                    // All sinks dropped; nothing left to deliver
                    None => break,
                }
            }

            _ = heartbeat_check.tick() => {
                if ctx.last_seen.elapsed() > state.heartbeat_timeout {
                    warn!(
                        target: "lc.bus",
                        user_id = %ctx.user_id,
                        timeout_secs = state.heartbeat_timeout.as_secs(),
                        "Heartbeat timeout, dropping connection"
                    );
                    break;
                }
            }
        }
    }

    teardown(ctx).await;
    state.metrics.connection_closed();
}

/// Run the register handshake. Returns None when the client never
/// registers (timeout, malformed frame, disconnect).
async fn register_connection(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    outbound: FrameSink,
) -> Option<ConnectionContext> {
    let handshake = async {
        loop {
            match ws_rx.next().await? {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    };

    let text = match tokio::time::timeout(REGISTER_TIMEOUT, handshake).await {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(_) => {
            debug!(target: "lc.bus", "Connection dropped: no register frame in time");
            return None;
        }
    };

    let registered = match Envelope::<ClientFrame>::decode(&text) {
        Ok(envelope) => match envelope.body {
            ClientFrame::Register(payload) => payload,
            other => {
                debug!(target: "lc.bus", frame = ?other, "First frame was not register");
                let error = LiveError::InvalidRequest(
                    "First frame must be register".to_string(),
                );
                let _ = write_frame(ws_tx, error_frame(&error, None)).await;
                return None;
            }
        },
        Err(e) => {
            debug!(target: "lc.bus", error = %e, "Malformed register frame");
            let error = LiveError::InvalidRequest("Malformed message".to_string());
            let _ = write_frame(ws_tx, error_frame(&error, None)).await;
            return None;
        }
    };

    let ack = ServerFrame::Registered(RegisteredPayload {
        user_id: registered.user_id.clone(),
    });
    if write_frame(ws_tx, ack).await.is_err() {
        return None;
    }

    Some(ConnectionContext {
        user_id: registered.user_id,
        user_name: registered.user_name,
        hosting: None,
        watching: HashMap::new(),
        outbound,
        last_seen: Instant::now(),
    })
}

/// Decode and dispatch one inbound text frame, reporting failures to the
/// client as `error` frames.
async fn handle_text(state: &BusState, ctx: &mut ConnectionContext, text: &str) {
    let envelope = match Envelope::<ClientFrame>::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(target: "lc.bus", user_id = %ctx.user_id, error = %e, "Malformed frame");
            send_error(
                &ctx.outbound,
                &LiveError::InvalidRequest("Malformed message".to_string()),
                None,
            );
            return;
        }
    };

    let stream_id = frame_stream_id(&envelope.body);
    if let Err(error) = dispatch(state, ctx, envelope.body).await {
        debug!(
            target: "lc.bus",
            user_id = %ctx.user_id,
            code = error.wire_code(),
            error = %error,
            "Request failed"
        );
        send_error(&ctx.outbound, &error, stream_id);
    }
}

/// Session the error frame should reference, where the request names one.
fn frame_stream_id(frame: &ClientFrame) -> Option<String> {
    match frame {
        ClientFrame::StopStream(r) | ClientFrame::JoinStream(r) | ClientFrame::LeaveStream(r) => {
            Some(r.stream_id.clone())
        }
        ClientFrame::UpdateStream(u) => Some(u.stream_id.clone()),
        ClientFrame::StreamComment(c) => Some(c.stream_id.clone()),
        ClientFrame::StreamReaction(r) => Some(r.stream_id.clone()),
        ClientFrame::WebrtcOffer(o) => Some(o.stream_id.clone()),
        ClientFrame::WebrtcAnswer(a) => Some(a.stream_id.clone()),
        ClientFrame::WebrtcIceCandidate(c) => Some(c.stream_id.clone()),
        ClientFrame::WebrtcConnectionState(s) => Some(s.stream_id.clone()),
        ClientFrame::Register(_)
        | ClientFrame::StartStream(_)
        | ClientFrame::LoadLiveStreams(_)
        | ClientFrame::Heartbeat(_) => None,
    }
}

#[instrument(skip_all, fields(user_id = %ctx.user_id))]
async fn dispatch(
    state: &BusState,
    ctx: &mut ConnectionContext,
    frame: ClientFrame,
) -> Result<(), LiveError> {
    match frame {
        ClientFrame::Register(_) => Err(LiveError::InvalidRequest(
            "Already registered".to_string(),
        )),

        ClientFrame::StartStream(payload) => {
            if ctx.hosting.is_some() {
                return Err(LiveError::SessionConflict(ctx.user_id.clone()));
            }
            let created = state
                .registry
                .create_session(NewSessionRequest {
                    broadcaster_id: ctx.user_id.clone(),
                    broadcaster_name: ctx.user_name.clone(),
                    title: payload.title,
                    description: payload.description,
                    category: payload.category,
                    tags: payload.tags,
                    is_private: payload.is_private,
                    settings: payload.settings,
                    sink: ctx.outbound.clone(),
                })
                .await?;

            if created.resumed {
                // Reattached to a session that is already live; replay the
                // started event so the reconnecting client syncs its state.
                let _ = ctx
                    .outbound
                    .send(ServerFrame::StreamStarted(created.snapshot.to_meta()));
            } else {
                // Clients start the stream only after local capture succeeded,
                // so the session can go live immediately. The stream_started
                // event arriving through the fan-out is the broadcaster's ack.
                created.handle.media_ready().await?;
            }
            ctx.hosting = Some(created.handle);
            Ok(())
        }

        ClientFrame::UpdateStream(u) => {
            let handle = self_session(ctx, state, &u.stream_id).await?;
            handle
                .update_stream(ctx.user_id.clone(), u.title, u.description, u.settings)
                .await
        }

        ClientFrame::StopStream(r) => {
            state
                .registry
                .end_session(r.stream_id.clone(), ctx.user_id.clone())
                .await?;
            if ctx
                .hosting
                .as_ref()
                .is_some_and(|h| h.session_id() == r.stream_id)
            {
                ctx.hosting = None;
            }
            Ok(())
        }

        ClientFrame::JoinStream(r) => {
            let handle = state.registry.resolve(r.stream_id.clone()).await?;
            let ack = handle
                .join(
                    ctx.user_id.clone(),
                    ctx.user_name.clone(),
                    ctx.outbound.clone(),
                )
                .await?;
            ctx.watching.insert(r.stream_id, handle);
            // Deliver the session metadata to the joining viewer
            let _ = ctx.outbound.send(ServerFrame::StreamStarted(ack.meta));
            Ok(())
        }

        ClientFrame::LeaveStream(r) => {
            if let Some(handle) = ctx.watching.remove(&r.stream_id) {
                handle.leave(ctx.user_id.clone()).await?;
            }
            Ok(())
        }

        ClientFrame::LoadLiveStreams(_) => {
            let sessions = state.registry.list_sessions().await?;
            let streams = sessions
                .iter()
                .map(crate::actors::messages::SessionSnapshot::to_meta)
                .collect();
            let _ = ctx
                .outbound
                .send(ServerFrame::LiveStreams(LiveStreamsPayload { streams }));
            Ok(())
        }

        // The registered identity is authoritative; client-supplied sender
        // fields in the payload are ignored.
        ClientFrame::StreamComment(c) => {
            let handle = self_session(ctx, state, &c.stream_id).await?;
            handle
                .publish_comment(ctx.user_id.clone(), ctx.user_name.clone(), c.message)
                .await
        }

        ClientFrame::StreamReaction(r) => {
            let handle = self_session(ctx, state, &r.stream_id).await?;
            handle
                .publish_reaction(ctx.user_id.clone(), r.reaction, r.x, r.y)
                .await
        }

        ClientFrame::WebrtcOffer(o) => {
            let handle = self_session(ctx, state, &o.stream_id).await?;
            handle
                .broadcaster_offer(ctx.user_id.clone(), o.viewer_id, o.offer)
                .await
        }

        ClientFrame::WebrtcAnswer(a) => {
            let handle = self_session(ctx, state, &a.stream_id).await?;
            handle.viewer_answer(ctx.user_id.clone(), a.answer).await
        }

        ClientFrame::WebrtcIceCandidate(c) => {
            let handle = self_session(ctx, state, &c.stream_id).await?;
            if is_hosting(ctx, &c.stream_id) {
                let viewer_id = c.viewer_id.ok_or_else(|| {
                    LiveError::InvalidRequest(
                        "Broadcaster candidates must name a viewer".to_string(),
                    )
                })?;
                handle
                    .broadcaster_candidate(ctx.user_id.clone(), viewer_id, c.candidate)
                    .await
            } else {
                handle
                    .viewer_candidate(ctx.user_id.clone(), c.candidate)
                    .await
            }
        }

        ClientFrame::WebrtcConnectionState(s) => {
            let handle = self_session(ctx, state, &s.stream_id).await?;
            let viewer_id = if is_hosting(ctx, &s.stream_id) {
                s.viewer_id.ok_or_else(|| {
                    LiveError::InvalidRequest(
                        "Broadcaster state reports must name a viewer".to_string(),
                    )
                })?
            } else {
                ctx.user_id.clone()
            };
            handle.connection_state(viewer_id, s.state).await
        }

        ClientFrame::Heartbeat(_) => {
            let _ = ctx.outbound.send(ServerFrame::Heartbeat(HeartbeatPayload {
                timestamp: chrono::Utc::now().timestamp_millis(),
            }));
            Ok(())
        }
    }
}

fn is_hosting(ctx: &ConnectionContext, stream_id: &str) -> bool {
    ctx.hosting
        .as_ref()
        .is_some_and(|h| h.session_id() == stream_id)
}

/// Find the session handle for a stream this connection interacts with.
/// Falls back to a registry lookup; the session actor enforces attachment
/// and authorization.
async fn self_session(
    ctx: &ConnectionContext,
    state: &BusState,
    stream_id: &str,
) -> Result<SessionActorHandle, LiveError> {
    if let Some(handle) = &ctx.hosting {
        if handle.session_id() == stream_id {
            return Ok(handle.clone());
        }
    }
    if let Some(handle) = ctx.watching.get(stream_id) {
        return Ok(handle.clone());
    }
    state.registry.resolve(stream_id.to_string()).await
}

/// Detach from everything this connection touched.
async fn teardown(ctx: ConnectionContext) {
    for (stream_id, handle) in ctx.watching {
        if let Err(e) = handle.leave(ctx.user_id.clone()).await {
            debug!(
                target: "lc.bus",
                user_id = %ctx.user_id,
                stream_id = %stream_id,
                error = %e,
                "Leave on disconnect failed"
            );
        }
    }

    if let Some(handle) = ctx.hosting {
        if let Err(e) = handle.broadcaster_disconnected().await {
            debug!(
                target: "lc.bus",
                user_id = %ctx.user_id,
                session_id = handle.session_id(),
                error = %e,
                "Disconnect notification failed"
            );
        }
    }

    info!(target: "lc.bus", user_id = %ctx.user_id, "Connection closed");
}

fn error_frame(error: &LiveError, stream_id: Option<String>) -> ServerFrame {
    ServerFrame::Error(ErrorPayload {
        code: error.wire_code().to_string(),
        message: error.client_message(),
        stream_id,
    })
}

fn send_error(outbound: &FrameSink, error: &LiveError, stream_id: Option<String>) {
    let _ = outbound.send(error_frame(error, stream_id));
}

async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: ServerFrame,
) -> Result<(), LiveError> {
    let text = Envelope::new(frame)
        .encode()
        .map_err(|e| LiveError::Internal(format!("encode failed: {e}")))?;
    ws_tx
        .send(Message::Text(text))
        .await
        .map_err(|e| LiveError::Transport(format!("socket send failed: {e}")))
}
