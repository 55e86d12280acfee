//! Mock media engine for session manager tests.
//!
//! Peers accept any SDP that starts with `v=0`, record every call and can be
//! scripted to fail. Engine callbacks are simulated with
//! [`MockMediaEngine::emit`].
//!
//! # Example
//!
//! ```rust,ignore
//! use signaling_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::builder()
//!     .auto_connect()
//!     .fail_candidates("bad candidate")
//!     .build();
//!
//! // Hand `Arc::new(engine.clone())` to SessionManager::start, keep `engine`
//! // to inspect calls and emit events.
//! ```

use async_trait::async_trait;
use common::types::SessionKey;
use signaling_service::sessions::{
    AudioPacket, CandidateInit, EngineError, EngineEvent, EngineEventSender, IceServer,
    LocalAudioTrack, MediaEngine, PeerConnection, PeerState, RemoteAudioTrack,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A call made against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreatePeer(SessionKey),
    AcceptOffer(SessionKey),
    CreateOffer(SessionKey),
    AcceptAnswer(SessionKey),
    AddCandidate(SessionKey, String),
    Close(SessionKey),
}

#[derive(Debug, Clone, Default)]
struct Script {
    fail_setup: bool,
    fail_offer: Option<String>,
    fail_answer: Option<String>,
    fail_candidates: Option<String>,
    auto_connect: bool,
}

#[derive(Default)]
struct Inner {
    script: Script,
    calls: Mutex<Vec<EngineCall>>,
    peers: Mutex<HashMap<SessionKey, Arc<MockPeer>>>,
    ice_servers: Mutex<HashMap<SessionKey, Vec<IceServer>>>,
}

impl Inner {
    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Scriptable [`MediaEngine`]. Clones share state.
#[derive(Clone, Default)]
pub struct MockMediaEngine {
    inner: Arc<Inner>,
}

impl MockMediaEngine {
    /// Engine whose peers succeed at everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Candidates applied to the peer for `key`, in order.
    #[must_use]
    pub fn applied_candidates(&self, key: &SessionKey) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::AddCandidate(k, candidate) if &k == key => Some(candidate),
                _ => None,
            })
            .collect()
    }

    /// Most recent peer created for `key`.
    #[must_use]
    pub fn peer(&self, key: &SessionKey) -> Option<Arc<MockPeer>> {
        self.inner.peers.lock().unwrap().get(key).cloned()
    }

    /// ICE servers the most recent peer for `key` was built with.
    #[must_use]
    pub fn ice_servers(&self, key: &SessionKey) -> Option<Vec<IceServer>> {
        self.inner.ice_servers.lock().unwrap().get(key).cloned()
    }

    /// Simulate an engine callback for `key`. Returns `false` if no peer
    /// exists.
    pub async fn emit(&self, key: &SessionKey, event: EngineEvent) -> bool {
        let Some(peer) = self.peer(key) else {
            return false;
        };
        peer.events.emit(event).await;
        true
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_peer(
        &self,
        key: &SessionKey,
        ice_servers: Vec<IceServer>,
        events: EngineEventSender,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        self.inner.record(EngineCall::CreatePeer(key.clone()));
        if self.inner.script.fail_setup {
            return Err(EngineError::Setup("scripted setup failure".to_string()));
        }

        let peer = Arc::new(MockPeer {
            key: key.clone(),
            events,
            local: Arc::new(RecordingAudioTrack::default()),
            engine: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        });
        self.inner
            .peers
            .lock()
            .unwrap()
            .insert(key.clone(), Arc::clone(&peer));
        self.inner
            .ice_servers
            .lock()
            .unwrap()
            .insert(key.clone(), ice_servers);

        Ok(peer)
    }
}

#[derive(Debug, Default)]
pub struct MockMediaEngineBuilder {
    script: Script,
}

impl MockMediaEngineBuilder {
    /// `create_peer` fails.
    #[must_use]
    pub fn fail_setup(mut self) -> Self {
        self.script.fail_setup = true;
        self
    }

    /// Every offer is rejected with `reason`.
    #[must_use]
    pub fn fail_offers(mut self, reason: &str) -> Self {
        self.script.fail_offer = Some(reason.to_string());
        self
    }

    /// Every answer is rejected with `reason`.
    #[must_use]
    pub fn fail_answers(mut self, reason: &str) -> Self {
        self.script.fail_answer = Some(reason.to_string());
        self
    }

    /// Every candidate is rejected with `reason`.
    #[must_use]
    pub fn fail_candidates(mut self, reason: &str) -> Self {
        self.script.fail_candidates = Some(reason.to_string());
        self
    }

    /// Accepting an answer reports `Connecting` then `Connected`, as a real
    /// transport would once ICE and DTLS complete.
    #[must_use]
    pub fn auto_connect(mut self) -> Self {
        self.script.auto_connect = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MockMediaEngine {
        MockMediaEngine {
            inner: Arc::new(Inner {
                script: self.script,
                ..Inner::default()
            }),
        }
    }
}

/// Peer connection created by [`MockMediaEngine`].
pub struct MockPeer {
    key: SessionKey,
    events: EngineEventSender,
    local: Arc<RecordingAudioTrack>,
    engine: Arc<Inner>,
    closed: AtomicBool,
}

impl MockPeer {
    /// Packets written to this peer's outbound track.
    #[must_use]
    pub fn written_packets(&self) -> Vec<AudioPacket> {
        self.local.packets()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate a callback from this particular peer, even after a newer
    /// peer has been created for the same key.
    pub async fn emit(&self, event: EngineEvent) {
        self.events.emit(event).await;
    }

    fn check_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

fn check_sdp(sdp: &str) -> Result<(), EngineError> {
    if sdp.starts_with("v=0") {
        Ok(())
    } else {
        Err(EngineError::Description("not a session description".to_string()))
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn accept_offer(&self, sdp: &str) -> Result<String, EngineError> {
        self.engine.record(EngineCall::AcceptOffer(self.key.clone()));
        self.check_open()?;
        if let Some(reason) = &self.engine.script.fail_offer {
            return Err(EngineError::Description(reason.clone()));
        }
        check_sdp(sdp)?;
        Ok(format!("v=0\r\ns=mock-answer {}\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n", self.key))
    }

    async fn create_offer(&self) -> Result<String, EngineError> {
        self.engine.record(EngineCall::CreateOffer(self.key.clone()));
        self.check_open()?;
        Ok(format!("v=0\r\ns=mock-offer {}\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n", self.key))
    }

    async fn accept_answer(&self, sdp: &str) -> Result<(), EngineError> {
        self.engine.record(EngineCall::AcceptAnswer(self.key.clone()));
        self.check_open()?;
        if let Some(reason) = &self.engine.script.fail_answer {
            return Err(EngineError::Description(reason.clone()));
        }
        check_sdp(sdp)?;

        if self.engine.script.auto_connect {
            self.events
                .emit(EngineEvent::StateChanged(PeerState::Connecting))
                .await;
            self.events
                .emit(EngineEvent::StateChanged(PeerState::Connected))
                .await;
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError> {
        self.engine.record(EngineCall::AddCandidate(
            self.key.clone(),
            candidate.candidate.clone(),
        ));
        self.check_open()?;
        if let Some(reason) = &self.engine.script.fail_candidates {
            return Err(EngineError::Candidate(reason.clone()));
        }
        Ok(())
    }

    fn local_track(&self) -> Arc<dyn LocalAudioTrack> {
        Arc::clone(&self.local) as Arc<dyn LocalAudioTrack>
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.engine.record(EngineCall::Close(self.key.clone()));
        // webrtc-rs reports the closed state from close() itself.
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events
                .emit(EngineEvent::StateChanged(PeerState::Closed))
                .await;
        }
        Ok(())
    }
}

/// Local track that keeps every packet written to it.
#[derive(Default)]
pub struct RecordingAudioTrack {
    packets: Mutex<Vec<AudioPacket>>,
}

impl RecordingAudioTrack {
    #[must_use]
    pub fn packets(&self) -> Vec<AudioPacket> {
        self.packets.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalAudioTrack for RecordingAudioTrack {
    async fn write_packet(&self, packet: &AudioPacket) -> Result<(), EngineError> {
        self.packets.lock().unwrap().push(packet.clone());
        Ok(())
    }
}

/// Remote track fed from a channel; dropping the sender ends the track.
pub struct ChannelRemoteTrack {
    id: String,
    packets: tokio::sync::Mutex<mpsc::Receiver<AudioPacket>>,
}

impl ChannelRemoteTrack {
    /// Track plus the sender that feeds it.
    #[must_use]
    pub fn new(id: &str) -> (Arc<Self>, mpsc::Sender<AudioPacket>) {
        let (tx, rx) = mpsc::channel(64);
        let track = Arc::new(Self {
            id: id.to_string(),
            packets: tokio::sync::Mutex::new(rx),
        });
        (track, tx)
    }
}

#[async_trait]
impl RemoteAudioTrack for ChannelRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_packet(&self) -> Option<AudioPacket> {
        self.packets.lock().await.recv().await
    }
}
