//! webrtc-rs implementation of the media engine.
//!
//! One shared `API` (default codecs + interceptors) builds every peer
//! connection. Each peer carries a single Opus send track that the audio
//! router writes other room members' packets into.

use super::engine::{
    AudioPacket, CandidateInit, EngineError, EngineEvent, EngineEventSender, IceServer,
    LocalAudioTrack, MediaEngine, PeerConnection, PeerState, RemoteAudioTrack,
};

use async_trait::async_trait;
use common::types::SessionKey;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as CodecRegistry, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

const ICE_CANDIDATE_POOL_SIZE: u8 = 10;
const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_CHANNELS: u16 = 2;
const RTCP_READ_BUFFER: usize = 1500;

pub struct WebRtcEngine {
    api: API,
}

impl std::fmt::Debug for WebRtcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcEngine").finish_non_exhaustive()
    }
}

impl WebRtcEngine {
    /// Register default codecs and interceptors.
    ///
    /// # Errors
    ///
    /// Returns `Setup` if codec or interceptor registration fails.
    pub fn new() -> Result<Self, EngineError> {
        let mut codecs = CodecRegistry::default();
        codecs
            .register_default_codecs()
            .map_err(|e| EngineError::Setup(format!("codec registration failed: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut codecs)
            .map_err(|e| EngineError::Setup(format!("interceptor registration failed: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

fn rtc_ice_servers(servers: Vec<IceServer>) -> Vec<RTCIceServer> {
    servers
        .into_iter()
        .map(|server| RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_peer(
        &self,
        key: &SessionKey,
        ice_servers: Vec<IceServer>,
        events: EngineEventSender,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers),
            ice_transport_policy: RTCIceTransportPolicy::All,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ice_candidate_pool_size: ICE_CANDIDATE_POOL_SIZE,
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| EngineError::Setup(format!("peer connection: {e}")))?,
        );

        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                ..Default::default()
            },
            format!("audio-{}", key.client_id),
            format!("stream-{}", key.client_id),
        ));

        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Setup(format!("add track: {e}")))?;

        // Interceptors only run while RTCP is being read.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; RTCP_READ_BUFFER];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        events
                            .emit(EngineEvent::LocalCandidate(CandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }))
                            .await;
                    }
                    Err(e) => {
                        debug!(target: "sig.sessions", error = %e, "Local candidate encode failed");
                    }
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let events = state_events.clone();
            Box::pin(async move {
                if let Some(state) = peer_state(state) {
                    events.emit(EngineEvent::StateChanged(state)).await;
                }
            })
        }));

        let track_events = events;
        pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                if remote.kind() != RTPCodecType::Audio {
                    debug!(
                        target: "sig.sessions",
                        session = %events.key(),
                        kind = %remote.kind(),
                        "Ignoring non-audio track"
                    );
                    return;
                }
                events
                    .emit(EngineEvent::RemoteTrack(Arc::new(WebRtcRemoteTrack(remote))))
                    .await;
            })
        }));

        info!(target: "sig.sessions", session = %key, "Peer connection created");

        Ok(Arc::new(WebRtcPeer {
            pc,
            local: Arc::new(WebRtcLocalTrack(track)),
        }))
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    local: Arc<WebRtcLocalTrack>,
}

impl WebRtcPeer {
    async fn local_sdp(&self) -> Result<String, EngineError> {
        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| EngineError::Description("no local description".to_string()))
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn accept_offer(&self, sdp: &str) -> Result<String, EngineError> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())
            .map_err(|e| EngineError::Description(format!("parse offer: {e}")))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| EngineError::Description(format!("set remote offer: {e}")))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Description(format!("create answer: {e}")))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| EngineError::Description(format!("set local answer: {e}")))?;

        self.local_sdp().await
    }

    async fn create_offer(&self) -> Result<String, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Description(format!("create offer: {e}")))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| EngineError::Description(format!("set local offer: {e}")))?;

        self.local_sdp().await
    }

    async fn accept_answer(&self, sdp: &str) -> Result<(), EngineError> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())
            .map_err(|e| EngineError::Description(format!("parse answer: {e}")))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| EngineError::Description(format!("set remote answer: {e}")))
    }

    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| EngineError::Candidate(e.to_string()))
    }

    fn local_track(&self) -> Arc<dyn LocalAudioTrack> {
        Arc::clone(&self.local) as Arc<dyn LocalAudioTrack>
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|e| EngineError::Media(format!("close: {e}")))
    }
}

struct WebRtcLocalTrack(Arc<TrackLocalStaticRTP>);

#[async_trait]
impl LocalAudioTrack for WebRtcLocalTrack {
    async fn write_packet(&self, packet: &AudioPacket) -> Result<(), EngineError> {
        let rtp = Packet {
            header: Header {
                version: 2,
                marker: packet.marker,
                payload_type: packet.payload_type,
                sequence_number: packet.sequence_number,
                timestamp: packet.timestamp,
                ssrc: packet.ssrc,
                ..Default::default()
            },
            payload: packet.payload.clone(),
        };

        self.0
            .write_rtp(&rtp)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Media(e.to_string()))
    }
}

struct WebRtcRemoteTrack(Arc<TrackRemote>);

#[async_trait]
impl RemoteAudioTrack for WebRtcRemoteTrack {
    fn id(&self) -> String {
        self.0.id()
    }

    async fn read_packet(&self) -> Option<AudioPacket> {
        let (packet, _) = self.0.read_rtp().await.ok()?;
        Some(AudioPacket {
            sequence_number: packet.header.sequence_number,
            timestamp: packet.header.timestamp,
            ssrc: packet.header.ssrc,
            payload_type: packet.header.payload_type,
            marker: packet.header.marker,
            payload: packet.payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sessions::engine::SessionEvent;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn peer(
        engine: &WebRtcEngine,
        client: &str,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Arc<dyn PeerConnection> {
        let key = SessionKey::new("general", client);
        engine
            .create_peer(
                &key,
                Vec::new(),
                EngineEventSender::new(key.clone(), Uuid::new_v4(), events.clone()),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_ice_servers_carry_credentials() {
        let servers = rtc_ice_servers(vec![
            IceServer::open("stun:stun.example:3478"),
            IceServer {
                urls: vec!["turn:relay.example:3478".to_string()],
                username: Some("1700000000:alice".to_string()),
                credential: Some("secret".to_string()),
            },
        ]);

        assert_eq!(servers.len(), 2);
        let stun = servers.first().unwrap();
        let turn = servers.get(1).unwrap();
        assert!(stun.username.is_empty());
        assert_eq!(turn.username, "1700000000:alice");
        assert_eq!(turn.credential, "secret");
    }

    #[test]
    fn test_peer_state_mapping() {
        assert_eq!(
            peer_state(RTCPeerConnectionState::Connected),
            Some(PeerState::Connected)
        );
        assert_eq!(
            peer_state(RTCPeerConnectionState::Failed),
            Some(PeerState::Failed)
        );
        assert_eq!(peer_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_engine_peers() {
        let engine = WebRtcEngine::new().unwrap();
        let (tx, _rx) = mpsc::channel(1024);

        let alice = peer(&engine, "alice", &tx).await;
        let server = peer(&engine, "server", &tx).await;

        let offer = alice.create_offer().await.unwrap();
        assert!(offer.contains("m=audio"));

        let answer = server.accept_offer(&offer).await.unwrap();
        assert!(answer.contains("m=audio"));
        alice.accept_answer(&answer).await.unwrap();

        alice.close().await.unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_offer_is_description_error() {
        let engine = WebRtcEngine::new().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let server = peer(&engine, "server", &tx).await;

        let result = server.accept_offer("not an sdp").await;
        assert!(matches!(result, Err(EngineError::Description(_))));

        server.close().await.unwrap();
    }
}
