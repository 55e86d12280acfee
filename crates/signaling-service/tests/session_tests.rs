//! Connection manager integration tests.
//!
//! Sessions run against the mock media engine; engine callbacks are
//! simulated with `MockMediaEngine::emit`.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::SessionKey;
use serde_json::json;
use signaling_service::errors::SignalingError;
use signaling_service::sessions::{
    CandidateInit, CandidateOutcome, ConnectionState, EngineEvent, PeerState,
};
use signaling_service::signaling::EnvelopeType;
use signaling_service::transport::ReadEnd;
use signaling_test_utils::{
    audio_packet, ChannelRemoteTrack, EngineCall, MockMediaEngine, TestRoom, TEST_STUN_URL,
    TEST_TURN_URL,
};
use std::time::Duration;
use tokio::time::Instant;

const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";
const ANSWER_SDP: &str = "v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

/// Poll until the session for `key` reaches `expected`.
async fn wait_for_state(room: &TestRoom, key: &SessionKey, expected: Option<ConnectionState>) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let state = room.sessions.session_state(key).await;
        if state == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "session {key} stuck in {state:?}, expected {expected:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn host_candidate(port: u16) -> serde_json::Value {
    json!({
        "candidate": format!("candidate:1 1 udp 2130706431 10.0.0.2 {port} typ host"),
        "sdpMid": "0",
        "sdpMLineIndex": 0
    })
}

#[tokio::test]
async fn test_server_offer_then_answer_reaches_connected() {
    let room = TestRoom::builder()
        .engine(MockMediaEngine::builder().auto_connect().build())
        .build();
    let key = SessionKey::new("general", "alice");

    let offer = room.sessions.create_offer(&key).await.unwrap();
    assert!(offer.starts_with("v=0"));
    assert_eq!(
        room.sessions.session_state(&key).await,
        Some(ConnectionState::Negotiating)
    );

    room.sessions.handle_answer(&key, ANSWER_SDP).await.unwrap();

    wait_for_state(&room, &key, Some(ConnectionState::Connected)).await;
    assert_eq!(
        room.engine.calls(),
        vec![
            EngineCall::CreatePeer(key.clone()),
            EngineCall::CreateOffer(key.clone()),
            EngineCall::AcceptAnswer(key.clone()),
        ]
    );

    room.shutdown().await;
}

#[tokio::test]
async fn test_client_offer_returns_answer() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");

    let answer = room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();

    assert!(answer.starts_with("v=0"));
    assert_eq!(
        room.sessions.session_state(&key).await,
        Some(ConnectionState::Negotiating)
    );

    room.engine
        .emit(&key, EngineEvent::StateChanged(PeerState::Connected))
        .await;
    wait_for_state(&room, &key, Some(ConnectionState::Connected)).await;

    room.shutdown().await;
}

#[tokio::test]
async fn test_answer_without_session_is_rejected_and_creates_nothing() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "ghost");

    let result = room.sessions.handle_answer(&key, ANSWER_SDP).await;

    assert!(matches!(result, Err(SignalingError::SessionNotFound(_))));
    assert_eq!(room.sessions.session_count().await, 0);
    assert!(room.engine.calls().is_empty());

    room.shutdown().await;
}

#[tokio::test]
async fn test_rejected_offer_closes_session() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");

    let result = room.sessions.handle_offer(&key, "not sdp").await;

    assert!(matches!(result, Err(SignalingError::Negotiation(_))));
    assert_eq!(room.sessions.session_state(&key).await, None);
    assert!(room.engine.peer(&key).unwrap().is_closed());

    room.shutdown().await;
}

#[tokio::test]
async fn test_engine_setup_failure_leaves_no_session() {
    let room = TestRoom::builder()
        .engine(MockMediaEngine::builder().fail_setup().build())
        .build();
    let key = SessionKey::new("general", "alice");

    let result = room.sessions.handle_offer(&key, OFFER_SDP).await;

    assert!(matches!(result, Err(SignalingError::Internal(_))));
    assert_eq!(room.sessions.session_count().await, 0);

    room.shutdown().await;
}

#[tokio::test]
async fn test_same_key_shares_one_session() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");

    let (first, second) = tokio::join!(
        room.sessions.create_or_get_session(&key),
        room.sessions.create_or_get_session(&key)
    );

    assert!(std::sync::Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    assert_eq!(room.sessions.session_count().await, 1);

    // Same user in another room is a separate session.
    room.sessions
        .create_or_get_session(&SessionKey::new("music", "alice"))
        .await
        .unwrap();
    assert_eq!(room.sessions.session_count().await, 2);

    room.shutdown().await;
}

#[tokio::test]
async fn test_candidates_buffered_until_remote_description() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");
    room.sessions.create_or_get_session(&key).await.unwrap();

    let first = room
        .sessions
        .add_candidate(&key, &host_candidate(5000))
        .await
        .unwrap();
    let second = room
        .sessions
        .add_candidate(&key, &host_candidate(5001))
        .await
        .unwrap();
    assert_eq!(first, CandidateOutcome::Buffered);
    assert_eq!(second, CandidateOutcome::Buffered);
    assert!(room.engine.applied_candidates(&key).is_empty());

    room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();

    let ports: Vec<String> = room
        .engine
        .applied_candidates(&key)
        .iter()
        .filter_map(|candidate| candidate.split(' ').nth(5).map(str::to_string))
        .collect();
    assert_eq!(ports, vec!["5000".to_string(), "5001".to_string()]);

    let third = room
        .sessions
        .add_candidate(&key, &host_candidate(5002))
        .await
        .unwrap();
    assert_eq!(third, CandidateOutcome::Applied);

    room.shutdown().await;
}

#[tokio::test]
async fn test_empty_candidate_marks_end_of_candidates() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");
    room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();

    let outcome = room
        .sessions
        .add_candidate(&key, &json!({"candidate": ""}))
        .await
        .unwrap();

    assert_eq!(outcome, CandidateOutcome::EndOfCandidates);
    assert!(room.engine.applied_candidates(&key).is_empty());

    room.shutdown().await;
}

#[tokio::test]
async fn test_candidate_without_session_is_rejected() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");

    let result = room.sessions.add_candidate(&key, &host_candidate(5000)).await;

    assert!(matches!(result, Err(SignalingError::SessionNotFound(_))));
    assert_eq!(room.sessions.session_count().await, 0);

    room.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_sweep_closes_only_idle_sessions() {
    // The background sweep stays out of the way; the test sweeps by hand.
    let room = TestRoom::builder()
        .idle_timeout(Duration::from_secs(300))
        .cleanup_interval(Duration::from_secs(3600))
        .build();
    let idle = SessionKey::new("general", "alice");
    let active = SessionKey::new("general", "bob");

    room.sessions.create_or_get_session(&idle).await.unwrap();
    room.sessions.handle_offer(&active, OFFER_SDP).await.unwrap();
    room.engine
        .emit(&active, EngineEvent::StateChanged(PeerState::Connected))
        .await;
    wait_for_state(&room, &active, Some(ConnectionState::Connected)).await;

    tokio::time::advance(Duration::from_secs(300)).await;
    let outcome = room
        .sessions
        .add_candidate(&active, &host_candidate(5000))
        .await
        .unwrap();
    assert_eq!(outcome, CandidateOutcome::Applied);
    tokio::time::advance(Duration::from_secs(60)).await;

    // Six minutes idle against one.
    let closed = room.sessions.cleanup_sweep().await;

    assert_eq!(closed, vec![idle.clone()]);
    assert_eq!(room.sessions.session_state(&idle).await, None);
    assert_eq!(
        room.sessions.session_state(&active).await,
        Some(ConnectionState::Connected)
    );
    assert!(room.engine.peer(&idle).unwrap().is_closed());
    assert!(!room.engine.peer(&active).unwrap().is_closed());

    room.shutdown().await;
}

#[tokio::test]
async fn test_late_events_from_replaced_peer_leave_new_session_alone() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");

    room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();
    let old_peer = room.engine.peer(&key).unwrap();
    assert!(room.sessions.close_session(&key, "client_disconnect").await);

    room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();
    let new_peer = room.engine.peer(&key).unwrap();

    old_peer
        .emit(EngineEvent::StateChanged(PeerState::Failed))
        .await;
    old_peer
        .emit(EngineEvent::StateChanged(PeerState::Closed))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        room.sessions.session_state(&key).await,
        Some(ConnectionState::Negotiating)
    );
    assert!(!new_peer.is_closed());

    room.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_then_offer_keeps_new_session() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");

    for _ in 0..100 {
        let _first = room.hub.register(key.clone()).await.unwrap();
        room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();

        let _second = room.hub.register(key.clone()).await.unwrap();
        room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(
            room.sessions.session_state(&key).await,
            Some(ConnectionState::Negotiating)
        );
    }

    room.shutdown().await;
}

#[tokio::test]
async fn test_swept_session_closes_client_socket() {
    let room = TestRoom::new();
    let mut alice = room.connect("general", "alice").await;
    let mut bob = room.connect("general", "bob").await;
    let joined = alice.socket.recv_envelope().await.unwrap();
    assert_eq!(joined.kind, EnvelopeType::UserJoined);

    room.sessions
        .create_or_get_session(&bob.key)
        .await
        .unwrap();
    room.sessions
        .cleanup_sweep_at(Instant::now() + Duration::from_secs(3600))
        .await;

    let left = alice.socket.recv_envelope().await.unwrap();
    assert_eq!(left.kind, EnvelopeType::UserLeft);
    assert_eq!(left.from.as_deref(), Some("bob"));

    assert!(bob.socket.recv_close().await);
    assert_eq!(bob.finished().await, ReadEnd::Cancelled);

    room.shutdown().await;
}

#[tokio::test]
async fn test_unregister_tears_down_session() {
    let room = TestRoom::new();
    let alice = room.connect("general", "alice").await;
    room.sessions.handle_offer(&alice.key, OFFER_SDP).await.unwrap();

    let key = alice.key.clone();
    alice.socket.send_json(&json!({"type": "leave"}));
    assert_eq!(alice.finished().await, ReadEnd::Left);

    wait_for_state(&room, &key, None).await;
    assert!(room.engine.peer(&key).unwrap().is_closed());

    room.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_closes_session_and_socket() {
    let room = TestRoom::new();
    let mut alice = room.connect("general", "alice").await;
    room.sessions.handle_offer(&alice.key, OFFER_SDP).await.unwrap();

    alice.socket.send_json(&json!({"type": "disconnect"}));

    assert!(alice.socket.recv_close().await);
    assert_eq!(room.sessions.session_state(&alice.key).await, None);
    assert_eq!(alice.finished().await, ReadEnd::Left);

    room.shutdown().await;
}

#[tokio::test]
async fn test_websocket_offer_to_server_gets_answer() {
    let room = TestRoom::new();
    let mut alice = room.connect("general", "alice").await;

    alice.socket.send_json(&json!({
        "type": "offer",
        "offer": {"type": "offer", "sdp": OFFER_SDP}
    }));

    let answer = alice.socket.recv_envelope().await.unwrap();
    assert_eq!(answer.kind, EnvelopeType::Answer);
    assert_eq!(answer.from.as_deref(), Some("server"));
    let body = answer.answer.unwrap();
    assert_eq!(body["type"], "answer");
    assert!(body["sdp"].as_str().unwrap().starts_with("v=0"));

    alice
        .socket
        .send_json(&json!({"type": "ice-candidate", "to": "server", "candidate": host_candidate(5000)}));
    let key = alice.key.clone();
    let deadline = Instant::now() + Duration::from_secs(2);
    while room.engine.applied_candidates(&key).is_empty() {
        assert!(Instant::now() < deadline, "candidate never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    room.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_websocket_offer_reports_error_before_close() {
    let room = TestRoom::new();

    for i in 0..20 {
        let mut client = room.connect(&format!("room-{i}"), "alice").await;

        client.socket.send_json(&json!({
            "type": "offer",
            "offer": {"type": "offer", "sdp": "not sdp"}
        }));

        let error = client.socket.recv_envelope().await.unwrap();
        assert_eq!(error.kind, EnvelopeType::Error);
        let payload = error.payload.unwrap();
        assert_eq!(payload["code"], 5);
        assert_eq!(payload["error"], "NEGOTIATION_FAILED");

        assert!(client.socket.recv_close().await);
        let key = client.key.clone();
        assert_eq!(client.finished().await, ReadEnd::Cancelled);
        assert_eq!(room.sessions.session_state(&key).await, None);
    }

    assert_eq!(room.hub.stats().await.unwrap().clients, 0);
    room.shutdown().await;
}

#[tokio::test]
async fn test_server_candidate_forwarded_to_client() {
    let room = TestRoom::new();
    let mut alice = room.connect("general", "alice").await;
    room.sessions.handle_offer(&alice.key, OFFER_SDP).await.unwrap();

    room.engine
        .emit(
            &alice.key,
            EngineEvent::LocalCandidate(CandidateInit {
                candidate: "candidate:9 1 udp 1 192.0.2.10 40000 typ srflx".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }),
        )
        .await;

    let candidate = alice.socket.recv_envelope().await.unwrap();
    assert_eq!(candidate.kind, EnvelopeType::IceCandidate);
    assert_eq!(candidate.from.as_deref(), Some("server"));
    assert_eq!(candidate.to.as_deref(), Some("alice"));
    let body = candidate.candidate.unwrap();
    assert_eq!(body["sdpMid"], "0");
    assert!(body["candidate"].as_str().unwrap().contains("srflx"));

    room.shutdown().await;
}

#[tokio::test]
async fn test_transport_failure_closes_session() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");
    room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();

    room.engine
        .emit(&key, EngineEvent::StateChanged(PeerState::Failed))
        .await;

    wait_for_state(&room, &key, None).await;
    assert!(room.engine.peer(&key).unwrap().is_closed());

    room.shutdown().await;
}

#[tokio::test]
async fn test_audio_fans_out_to_rest_of_room() {
    let room = TestRoom::new();
    let alice = SessionKey::new("general", "alice");
    let bob = SessionKey::new("general", "bob");
    let carol = SessionKey::new("general", "carol");
    let dave = SessionKey::new("music", "dave");
    for key in [&alice, &bob, &carol, &dave] {
        room.sessions.handle_offer(key, OFFER_SDP).await.unwrap();
    }

    let (track, packets) = ChannelRemoteTrack::new("alice-mic");
    room.engine
        .emit(&alice, EngineEvent::RemoteTrack(track))
        .await;
    for seq in 1..=3 {
        packets.send(audio_packet(seq)).await.unwrap();
    }

    let bob_peer = room.engine.peer(&bob).unwrap();
    let carol_peer = room.engine.peer(&carol).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while bob_peer.written_packets().len() < 3 || carol_peer.written_packets().len() < 3 {
        assert!(Instant::now() < deadline, "audio never reached the room");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let sequence: Vec<u16> = bob_peer
        .written_packets()
        .iter()
        .map(|packet| packet.sequence_number)
        .collect();
    assert_eq!(sequence, vec![1, 2, 3]);
    assert!(room.engine.peer(&alice).unwrap().written_packets().is_empty());
    assert!(room.engine.peer(&dave).unwrap().written_packets().is_empty());

    room.shutdown().await;
}

#[tokio::test]
async fn test_ice_servers_include_stun_and_turn_credential() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");
    room.sessions.create_or_get_session(&key).await.unwrap();

    let servers = room.engine.ice_servers(&key).unwrap();
    let [stun, turn] = servers.as_slice() else {
        unreachable!("expected one STUN and one TURN server, got {servers:?}");
    };
    assert_eq!(stun.urls, vec![TEST_STUN_URL.to_string()]);
    assert!(stun.credential.is_none());
    assert_eq!(turn.urls, vec![TEST_TURN_URL.to_string()]);
    assert!(turn.username.as_deref().unwrap().ends_with(":alice"));
    assert!(turn.credential.is_some());

    room.shutdown().await;
}

#[tokio::test]
async fn test_no_turn_urls_means_stun_only() {
    let room = TestRoom::builder().turn_urls(&[]).build();

    let servers = room.sessions.ice_servers_for("alice").unwrap();

    assert_eq!(servers.len(), 1);
    assert!(servers.iter().all(|server| server.username.is_none()));

    room.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_all_sessions_and_refuses_new_ones() {
    let room = TestRoom::new();
    let key = SessionKey::new("general", "alice");
    room.sessions.handle_offer(&key, OFFER_SDP).await.unwrap();

    room.sessions.shutdown().await;

    assert_eq!(room.sessions.session_count().await, 0);
    assert!(room.engine.peer(&key).unwrap().is_closed());
    assert!(matches!(
        room.sessions
            .create_or_get_session(&SessionKey::new("general", "bob"))
            .await,
        Err(SignalingError::Draining)
    ));

    room.shutdown().await;
}
