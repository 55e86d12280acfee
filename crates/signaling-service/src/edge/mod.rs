//! Edge adapter: the HTTP and WebSocket surface in front of the hub and the
//! session manager.
//!
//! Authentication and membership are collaborator traits
//! ([`TokenValidator`], [`MembershipChecker`]) so deployments can plug in
//! their own account and membership services.

pub mod auth;
pub mod handlers;

use crate::actors::HubHandle;
use crate::sessions::SessionManager;
use crate::signaling::Router;
use crate::transport::PumpSettings;

use axum::{
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use auth::{AllowAllMembership, Caller, JwtTokenValidator, MembershipChecker, TokenValidator};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub sessions: Arc<SessionManager>,
    pub router: Router,
    pub tokens: Arc<dyn TokenValidator>,
    pub membership: Arc<dyn MembershipChecker>,
    pub pump: PumpSettings,
}

impl AppState {
    #[must_use]
    pub fn new(
        hub: HubHandle,
        sessions: Arc<SessionManager>,
        tokens: Arc<dyn TokenValidator>,
        membership: Arc<dyn MembershipChecker>,
        pump: PumpSettings,
    ) -> Self {
        let router = Router::new(hub.clone(), Arc::clone(&sessions));
        Self {
            hub,
            sessions,
            router,
            tokens,
            membership,
            pump,
        }
    }
}

/// Build the signaling routes.
///
/// Layer order (bottom-to-top execution):
/// 1. `require_auth` - caller token on every route
/// 2. `TimeoutLayer` - 30s for HTTP requests (the WebSocket outlives it once upgraded)
/// 3. `TraceLayer` - request logging
pub fn build_routes(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/ws/rooms/:room_id", get(handlers::ws_handler))
        .route("/webrtc/offer", post(handlers::offer))
        .route("/webrtc/answer", post(handlers::answer))
        .route("/webrtc/ice-candidate", post(handlers::ice_candidate))
        .route("/webrtc/ice-servers", get(handlers::ice_servers))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
}
