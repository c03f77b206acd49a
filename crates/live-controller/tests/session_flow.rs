//! Actor-level integration tests: full broadcast lifecycle through the
//! registry and session actors, without the WebSocket transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use live_controller::actors::metrics::CoordinatorMetrics;
use live_controller::actors::registry::{NewSessionRequest, RegistryHandle};
use live_controller::config::Config;
use live_controller::errors::LiveError;
use live_controller::fanout::FrameSink;
use live_controller::lifecycle::SessionPhase;
use signal_protocol::{
    IceCandidate, SdpType, ServerFrame, SessionDescription, StreamSettings,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

fn test_config() -> Config {
    Config::from_vars(&HashMap::from([
        ("LC_MAX_SESSIONS".to_string(), "8".to_string()),
        ("LC_MAX_VIEWERS_PER_SESSION".to_string(), "16".to_string()),
        ("LC_NEGOTIATION_TIMEOUT_SECONDS".to_string(), "30".to_string()),
        ("LC_BROADCASTER_GRACE_SECONDS".to_string(), "15".to_string()),
    ]))
    .unwrap()
}

fn sink() -> (FrameSink, UnboundedReceiver<ServerFrame>) {
    mpsc::unbounded_channel()
}

fn request(broadcaster_id: &str, name: &str, title: &str, sink: FrameSink) -> NewSessionRequest {
    NewSessionRequest {
        broadcaster_id: broadcaster_id.to_string(),
        broadcaster_name: name.to_string(),
        title: title.to_string(),
        description: Some("Walking through the market".to_string()),
        category: Some("travel".to_string()),
        tags: vec!["city".to_string(), "market".to_string()],
        is_private: false,
        settings: StreamSettings::default(),
        sink,
    }
}

fn description(sdp_type: SdpType) -> SessionDescription {
    SessionDescription {
        sdp_type,
        sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1".to_string(),
    }
}

fn candidate(tag: &str) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{tag} 1 udp 2122260223 192.0.2.1 54400 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    }
}

fn drain(rx: &mut UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// The full happy path: a broadcaster goes live, two viewers join and
/// negotiate, everyone chats, the broadcaster ends the stream.
#[tokio::test]
async fn full_broadcast_lifecycle() {
    let metrics = CoordinatorMetrics::new();
    let (registry, _task) = RegistryHandle::new(&test_config(), Arc::clone(&metrics));

    // Ana goes live
    let (ana_tx, mut ana_rx) = sink();
    let created = registry
        .create_session(request("ana", "Ana", "Dublin Market", ana_tx))
        .await
        .unwrap();
    let session = created.handle;
    let stream_id = created.snapshot.session_id.clone();

    let snapshot = session.media_ready().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Live);
    assert!(matches!(
        ana_rx.recv().await.unwrap(),
        ServerFrame::StreamStarted(meta) if meta.id == stream_id && meta.is_live
    ));

    // Discovery shows the stream
    let listed = registry.list_sessions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "Dublin Market");

    // Bea and Cam join
    let (bea_tx, mut bea_rx) = sink();
    let ack = session
        .join("bea".to_string(), "Bea".to_string(), bea_tx)
        .await
        .unwrap();
    assert_eq!(ack.viewer_count, 1);

    let (cam_tx, mut cam_rx) = sink();
    let ack = session
        .join("cam".to_string(), "Cam".to_string(), cam_tx)
        .await
        .unwrap();
    assert_eq!(ack.viewer_count, 2);
    assert_eq!(metrics.viewer_count(), 2);

    // Ana was prompted once per viewer
    let frames = drain(&mut ana_rx);
    let prompts: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            ServerFrame::ViewerJoined(p) => Some(p.viewer_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(prompts, ["bea", "cam"]);

    // Bea trickles a candidate before Ana's offer reaches her peer
    session
        .viewer_candidate("bea".to_string(), candidate("bea-early"))
        .await
        .unwrap();

    // Ana negotiates with Bea
    session
        .broadcaster_offer("ana".to_string(), "bea".to_string(), description(SdpType::Offer))
        .await
        .unwrap();
    let frames = drain(&mut bea_rx);
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerFrame::WebrtcOffer(o) if o.viewer_id == "bea"
    )));

    session
        .viewer_answer("bea".to_string(), description(SdpType::Answer))
        .await
        .unwrap();
    let frames = drain(&mut ana_rx);
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerFrame::WebrtcAnswer(a) if a.viewer_id == "bea"
    )));
    // The early candidate arrived after the answer, in order
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerFrame::WebrtcIceCandidate(c)
            if c.viewer_id == "bea" && c.candidate.candidate.contains("bea-early")
    )));

    // Ana trickles a candidate for Cam before Cam has the offer: buffered
    session
        .broadcaster_offer("ana".to_string(), "cam".to_string(), description(SdpType::Offer))
        .await
        .unwrap();
    session
        .broadcaster_candidate("ana".to_string(), "cam".to_string(), candidate("ana-for-cam"))
        .await
        .unwrap();
    let frames = drain(&mut cam_rx);
    assert!(frames.iter().any(|f| matches!(f, ServerFrame::WebrtcOffer(_))));
    assert!(frames.iter().any(|f| matches!(
        f,
        ServerFrame::WebrtcIceCandidate(c) if c.candidate.candidate.contains("ana-for-cam")
    )));

    // Cam comments; everyone receives the canonical copy
    session
        .publish_comment("cam".to_string(), "Cam".to_string(), "lovely stalls!".to_string())
        .await
        .unwrap();
    for rx in [&mut ana_rx, &mut bea_rx, &mut cam_rx] {
        let frames = drain(rx);
        let comment = frames
            .iter()
            .find_map(|f| match f {
                ServerFrame::StreamComment(c) => Some(c),
                _ => None,
            })
            .expect("every attached client gets the comment");
        assert_eq!(comment.message, "lovely stalls!");
        assert_eq!(comment.user_id, "cam");
        assert!(!comment.id.is_empty());
    }

    // A viewer cannot end the stream
    let result = registry
        .end_session(stream_id.clone(), "bea".to_string())
        .await;
    assert!(matches!(result, Err(LiveError::Unauthorized(_))));

    // Ana ends it; each attached client gets exactly one ended event
    registry
        .end_session(stream_id.clone(), "ana".to_string())
        .await
        .unwrap();
    for rx in [&mut ana_rx, &mut bea_rx, &mut cam_rx] {
        let ended = drain(rx)
            .iter()
            .filter(|f| matches!(f, ServerFrame::StreamEnded(p) if p.stream_id == stream_id))
            .count();
        assert_eq!(ended, 1);
    }

    // Late joins cannot see the ended session
    let (late_tx, _late_rx) = sink();
    let result = session
        .join("dee".to_string(), "Dee".to_string(), late_tx)
        .await;
    assert!(matches!(result, Err(LiveError::NotFound(_))));

    // Discovery no longer lists it
    assert!(registry.list_sessions().await.unwrap().is_empty());
    assert_eq!(metrics.viewer_count(), 0);

    registry.cancel();
}

/// Viewer counts rise and fall with joins and leaves, and every attached
/// client observes the same sequence.
#[tokio::test]
async fn viewer_counts_are_broadcast_in_order() {
    let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

    let (ana_tx, mut ana_rx) = sink();
    let created = registry
        .create_session(request("ana", "Ana", "Counts", ana_tx))
        .await
        .unwrap();
    created.handle.media_ready().await.unwrap();

    let (bea_tx, _bea_rx) = sink();
    let (cam_tx, _cam_rx) = sink();
    created
        .handle
        .join("bea".to_string(), "Bea".to_string(), bea_tx)
        .await
        .unwrap();
    created
        .handle
        .join("cam".to_string(), "Cam".to_string(), cam_tx)
        .await
        .unwrap();
    created.handle.leave("bea".to_string()).await.unwrap();
    // Synchronize on the mailbox before draining
    let state = created.handle.get_state().await.unwrap();
    assert_eq!(state.viewer_count, 1);

    let counts: Vec<usize> = drain(&mut ana_rx)
        .iter()
        .filter_map(|f| match f {
            ServerFrame::ViewerCountUpdated(p) => Some(p.count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, [1, 2, 1]);

    registry.cancel();
}

/// Concurrent joins: every joiner gets its own negotiation context and the
/// viewer count converges to the number of joiners.
#[tokio::test]
async fn concurrent_joins_converge_to_viewer_count() {
    const JOINERS: usize = 8;

    let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

    let (ana_tx, _ana_rx) = sink();
    let created = registry
        .create_session(request("ana", "Ana", "Rush hour", ana_tx))
        .await
        .unwrap();
    let session = created.handle;
    session.media_ready().await.unwrap();

    let mut tasks = Vec::new();
    for n in 0..JOINERS {
        let handle = session.clone();
        tasks.push(tokio::spawn(async move {
            let (tx, rx) = sink();
            let ack = handle
                .join(format!("v{n}"), format!("Viewer {n}"), tx)
                .await
                .unwrap();
            (ack, rx)
        }));
    }

    // Keep the receivers alive so no sink gets pruned mid-test
    let mut acks = Vec::new();
    let mut receivers = Vec::new();
    for task in tasks {
        let (ack, rx) = task.await.unwrap();
        acks.push(ack);
        receivers.push(rx);
    }

    // Each join observed a distinct, monotonically assigned count
    let mut counts: Vec<usize> = acks.iter().map(|a| a.viewer_count).collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=JOINERS).collect::<Vec<_>>());

    let state = session.get_state().await.unwrap();
    assert_eq!(state.viewer_count, JOINERS);

    // Every joiner got its own negotiation context
    for n in 0..JOINERS {
        session
            .broadcaster_offer("ana".to_string(), format!("v{n}"), description(SdpType::Offer))
            .await
            .unwrap();
    }

    registry.cancel();
}

/// Broadcaster disconnect: the session survives the grace period, then is
/// force-ended and disappears from discovery.
#[tokio::test(start_paused = true)]
async fn broadcaster_disconnect_grace_then_force_end() {
    let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

    let (ana_tx, _ana_rx) = sink();
    let created = registry
        .create_session(request("ana", "Ana", "Fragile", ana_tx))
        .await
        .unwrap();
    created.handle.media_ready().await.unwrap();

    let (bea_tx, mut bea_rx) = sink();
    created
        .handle
        .join("bea".to_string(), "Bea".to_string(), bea_tx)
        .await
        .unwrap();
    drain(&mut bea_rx);

    created.handle.broadcaster_disconnected().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Within the grace period the stream is still live and discoverable
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.list_sessions().await.unwrap().len(), 1);

    // Past the grace period it ends; Bea gets the single ended event
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(registry.list_sessions().await.unwrap().is_empty());

    let ended = drain(&mut bea_rx)
        .iter()
        .filter(|f| matches!(f, ServerFrame::StreamEnded(_)))
        .count();
    assert_eq!(ended, 1);

    registry.cancel();
}

/// Settings gate the social features per stream.
#[tokio::test]
async fn reaction_settings_are_enforced() {
    let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

    let (ana_tx, _ana_rx) = sink();
    let mut req = request("ana", "Ana", "Quiet stream", ana_tx);
    req.settings = StreamSettings {
        allow_reactions: false,
        ..StreamSettings::default()
    };
    let created = registry.create_session(req).await.unwrap();
    created.handle.media_ready().await.unwrap();

    let (bea_tx, _bea_rx) = sink();
    created
        .handle
        .join("bea".to_string(), "Bea".to_string(), bea_tx)
        .await
        .unwrap();

    let result = created
        .handle
        .publish_reaction("bea".to_string(), "❤️".to_string(), 0.5, 0.8)
        .await;
    assert!(matches!(result, Err(LiveError::Forbidden(_))));

    // Comments are still allowed
    created
        .handle
        .publish_comment("bea".to_string(), "Bea".to_string(), "hi".to_string())
        .await
        .unwrap();

    registry.cancel();
}
