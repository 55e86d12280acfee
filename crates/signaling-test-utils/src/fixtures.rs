//! Wired-up hub, session manager and router for integration tests.
//!
//! [`TestRoom`] runs the real actors against [`MockMediaEngine`] and
//! in-memory sockets, so a test can connect several clients and observe
//! exactly what each one receives.

use crate::memory_socket::MemorySocket;
use crate::mock_engine::MockMediaEngine;
use async_trait::async_trait;
use bytes::Bytes;
use common::secret::SecretString;
use common::types::{RoomId, SessionKey};
use relay_credentials::CredentialService;
use signaling_service::actors::HubHandle;
use signaling_service::edge::{AppState, MembershipChecker, TokenValidator};
use signaling_service::errors::SignalingError;
use signaling_service::sessions::{
    AudioPacket, MediaEngine, SessionManager, SessionSettings, SessionTeardown,
};
use signaling_service::signaling::Router;
use signaling_service::transport::{run_connection, PumpSettings, ReadEnd};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared secret for test relay credentials (at least 16 bytes).
pub const TEST_TURN_SECRET: &str = "test-turn-shared-secret-0123456789";

pub const TEST_STUN_URL: &str = "stun:stun.test.local:3478";

pub const TEST_TURN_URL: &str = "turn:turn.test.local:3478";

/// Relay credential service keyed with [`TEST_TURN_SECRET`].
#[must_use]
pub fn test_credentials() -> Arc<CredentialService> {
    Arc::new(
        CredentialService::new(
            &SecretString::from(TEST_TURN_SECRET),
            Duration::from_secs(600),
        )
        .unwrap(),
    )
}

/// Pump settings with the production liveness defaults.
#[must_use]
pub fn test_pump_settings() -> PumpSettings {
    PumpSettings {
        pong_wait: Duration::from_secs(60),
        write_wait: Duration::from_secs(10),
        ping_period: Duration::from_secs(54),
        max_message_bytes: 512 * 1024,
    }
}

/// Small Opus-sized packet carrying `seq`.
#[must_use]
pub fn audio_packet(seq: u16) -> AudioPacket {
    AudioPacket {
        sequence_number: seq,
        timestamp: u32::from(seq) * 960,
        ssrc: 0x1234_5678,
        payload_type: 111,
        marker: false,
        payload: Bytes::from(vec![0xAB; 40]),
    }
}

/// Builder for [`TestRoom`].
#[derive(Default)]
pub struct TestRoomBuilder {
    engine: Option<MockMediaEngine>,
    queue_capacity: Option<usize>,
    idle_timeout: Option<Duration>,
    cleanup_interval: Option<Duration>,
    turn_urls: Option<Vec<String>>,
    pump: Option<PumpSettings>,
}

impl TestRoomBuilder {
    #[must_use]
    pub fn engine(mut self, engine: MockMediaEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Outbound queue depth per client.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn turn_urls(mut self, urls: &[&str]) -> Self {
        self.turn_urls = Some(urls.iter().map(|url| (*url).to_string()).collect());
        self
    }

    #[must_use]
    pub fn pump(mut self, settings: PumpSettings) -> Self {
        self.pump = Some(settings);
        self
    }

    /// Start the session manager and hub. Must be called inside a runtime.
    #[must_use]
    pub fn build(self) -> TestRoom {
        let engine = self.engine.unwrap_or_default();
        let settings = SessionSettings {
            stun_urls: vec![TEST_STUN_URL.to_string()],
            turn_urls: self
                .turn_urls
                .unwrap_or_else(|| vec![TEST_TURN_URL.to_string()]),
            credential_ttl: Duration::from_secs(600),
            idle_timeout: self.idle_timeout.unwrap_or(Duration::from_secs(300)),
            cleanup_interval: self.cleanup_interval.unwrap_or(Duration::from_secs(30)),
        };

        let root = CancellationToken::new();
        let (notice_tx, notice_rx) = mpsc::channel(1024);
        let (sessions, mut tasks) = SessionManager::start(
            Arc::new(engine.clone()) as Arc<dyn MediaEngine>,
            test_credentials(),
            settings,
            notice_tx,
            root.child_token(),
        );
        let (hub, hub_task) = HubHandle::spawn(
            self.queue_capacity.unwrap_or(256),
            Arc::clone(&sessions) as Arc<dyn SessionTeardown>,
            notice_rx,
            root.child_token(),
        );
        tasks.push(hub_task);

        let router = Router::new(hub.clone(), Arc::clone(&sessions));
        TestRoom {
            engine,
            sessions,
            hub,
            router,
            pump: self.pump.unwrap_or_else(test_pump_settings),
            root,
            tasks,
        }
    }
}

/// Hub, session manager and router running against a mock engine.
pub struct TestRoom {
    pub engine: MockMediaEngine,
    pub sessions: Arc<SessionManager>,
    pub hub: HubHandle,
    pub router: Router,
    pub pump: PumpSettings,
    root: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TestRoom {
    /// Room with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> TestRoomBuilder {
        TestRoomBuilder::default()
    }

    /// Register `client` in `room` and run its pumps over an in-memory
    /// socket.
    pub async fn connect(&self, room: &str, client: &str) -> TestClient {
        let key = SessionKey::new(room, client);
        let connection = self.hub.register(key.clone()).await.unwrap();
        let connection_id = connection.connection_id;

        let (stream, sink, socket) = MemorySocket::pair();
        let task = tokio::spawn(run_connection(
            stream,
            sink,
            connection,
            self.hub.clone(),
            self.router.clone(),
            self.pump,
        ));

        TestClient {
            key,
            socket,
            connection_id,
            task,
        }
    }

    /// Edge state backed by this room's hub and session manager.
    #[must_use]
    pub fn app_state(
        &self,
        tokens: Arc<dyn TokenValidator>,
        membership: Arc<dyn MembershipChecker>,
    ) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.hub.clone(),
            Arc::clone(&self.sessions),
            tokens,
            membership,
            self.pump,
        ))
    }

    /// Stop the hub and the session manager and wait for their tasks.
    pub async fn shutdown(self) {
        self.hub.shutdown();
        self.sessions.shutdown().await;
        self.root.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl Default for TestRoom {
    fn default() -> Self {
        Self::new()
    }
}

/// One connected client.
pub struct TestClient {
    pub key: SessionKey,
    pub socket: MemorySocket,
    pub connection_id: Uuid,
    pub task: JoinHandle<ReadEnd>,
}

impl TestClient {
    /// Wait for the connection's pumps to finish and return why.
    pub async fn finished(self) -> ReadEnd {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap()
    }
}

/// Token validator where each token is the user id it names, prefixed with
/// `token-`. Anything else is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTokens;

impl StaticTokens {
    /// Token that validates as `user`.
    #[must_use]
    pub fn token_for(user: &str) -> String {
        format!("token-{user}")
    }
}

#[async_trait]
impl TokenValidator for StaticTokens {
    async fn validate(&self, token: &str) -> Result<String, SignalingError> {
        token
            .strip_prefix("token-")
            .filter(|user| !user.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SignalingError::Unauthorized("unknown token".to_string()))
    }
}

/// Membership from a fixed `(room, user)` list.
#[derive(Debug, Clone, Default)]
pub struct FixedMembership {
    members: HashSet<(String, String)>,
}

impl FixedMembership {
    #[must_use]
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            members: pairs
                .iter()
                .map(|(room, user)| ((*room).to_string(), (*user).to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl MembershipChecker for FixedMembership {
    async fn is_member(&self, room_id: &RoomId, user_id: &str) -> Result<bool, SignalingError> {
        Ok(self
            .members
            .contains(&(room_id.as_str().to_string(), user_id.to_string())))
    }
}
