//! HTTP transport: REST operations plus the SSE and WebSocket push channels.
//!
//! ```text
//! request ─► CatchPanic ─► CORS ─► Compression ─► Tracing ─► [Auth] ─► handler ─► Router
//! ```
//!
//! `/authn/login`, `/authn/refresh` and `/health` are the only routes outside
//! the auth layer.

pub mod forms;
pub mod handlers;
pub mod sse;
pub mod ws;

pub use forms::FormsDecorator;

use crate::authn::Authenticator;
use crate::domain::{ApiError, ApiResult, HubConfig};
use crate::middleware::{create_cors_layer, AuthLayer, TracingLayer};
use crate::router::Router as HubRouter;
use crate::sessions::Session;
use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::any::Any;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, timeout::TimeoutLayer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<HubRouter>,
    pub authenticator: Arc<dyn Authenticator>,
    pub config: Arc<HubConfig>,
}

pub(crate) fn require_agent(session: &Session) -> ApiResult<()> {
    if session.role().can_act_as_agent() {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "role {} cannot act as agent",
            session.role()
        )))
    }
}

pub(crate) fn require_operator(session: &Session) -> ApiResult<()> {
    if session.role().can_operate() {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "role {} is read-only",
            session.role()
        )))
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::internal(format!("handler panicked: {}", detail)).into_response()
}

/// Build the hub's HTTP router.
pub fn build_router(state: AppState) -> Router {
    use handlers::*;

    let config = Arc::clone(&state.config);
    let auth = AuthLayer::new(
        Arc::clone(&state.authenticator),
        Arc::clone(state.router.sessions()),
    );

    let public = Router::new()
        .route("/authn/login", post(login))
        .route("/authn/refresh", post(refresh))
        .layer(TimeoutLayer::new(config.timeouts.short))
        .route("/health", get(health));

    let directory = Router::new()
        .route("/digitwin/directory", get(read_all_things))
        .route("/digitwin/directory/:thing_id", get(read_thing))
        .layer(TimeoutLayer::new(config.timeouts.short));

    let protected = Router::new()
        .route("/authn/logout", post(logout))
        .merge(directory)
        .route("/digitwin/properties/:thing_id", get(read_all_properties))
        .route(
            "/digitwin/properties/:thing_id/:name",
            get(read_property).post(write_property),
        )
        .route("/digitwin/events/:thing_id", get(read_all_events))
        .route("/digitwin/events/:thing_id/:name", get(read_event))
        .route("/digitwin/actions/:thing_id", get(query_all_actions))
        .route(
            "/digitwin/actions/:thing_id/:name",
            get(query_action).post(invoke_action),
        )
        .route("/digitwin/requests/:request_id", get(query_request))
        .route("/ssesc/digitwin/:op/:thing_id", post(set_thing_interest))
        .route("/ssesc/digitwin/:op/:thing_id/:name", post(set_interest))
        .route("/agent/event/:thing_id/:name", post(agent_event))
        .route("/agent/property/:thing_id/:name", post(agent_property))
        .route("/agent/properties/:thing_id", post(agent_properties))
        .route(
            "/agent/tdd/:thing_id",
            post(agent_update_thing).delete(agent_remove_thing),
        )
        .route("/agent/progress", post(agent_progress))
        .route("/sse", get(sse::connect))
        .route("/ws", get(ws::connect))
        .route_layer(auth);

    Router::new()
        .merge(public)
        .merge(protected)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(create_cors_layer(&config.cors))
                .layer(CompressionLayer::new())
                .layer(TracingLayer::new())
                .layer(DefaultBodyLimit::max(config.limits.max_request_size)),
        )
        .with_state(state)
}
