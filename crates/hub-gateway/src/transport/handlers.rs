//! HTTP operation handlers.

use super::{require_agent, require_operator, AppState};
use crate::domain::{ApiError, ApiResult, RequestId, StatsSnapshot};
use crate::middleware::{AuthContext, AUTH_COOKIE};
use crate::router::{InvokeMode, InvokeReply};
use crate::sessions::SessionOrigin;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hub_types::{
    ActionStatus, AffordanceValue, AgentValue, Operation, ThingDescription, WILDCARD,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Default and maximum page size of the directory listing
pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

fn parse<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    Ok(serde_json::from_slice(body)?)
}

/// Empty bodies carry `null`.
fn parse_value(body: &Bytes) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    parse(body)
}

fn prefers_async(headers: &HeaderMap) -> bool {
    headers
        .get_all("prefer")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim().eq_ignore_ascii_case("respond-async"))
}

// -----------------------------------------------------------------------------
// Authentication
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

/// `POST /authn/login`
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: LoginRequest = parse(&body)?;
    let grant = state
        .authenticator
        .login(&request.client_id, &request.password)
        .await
        .inspect_err(|e| tracing::info!(client_id = %request.client_id, error = %e, "login rejected"))?;

    let session = state.router.sessions().create(
        &request.client_id,
        grant.role,
        SessionOrigin::Login,
        connect_info.map(|ci| ci.0),
        grant.session_id,
    )?;
    tracing::info!(
        client_id = %request.client_id,
        session_id = %session.id(),
        role = %grant.role,
        "login"
    );

    let cookie = HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict",
        AUTH_COOKIE, grant.token
    ))
    .map_err(ApiError::internal)?;
    let body = LoginResponse {
        token: grant.token,
        session_id: session.id().to_string(),
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "oldToken")]
    pub old_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    #[serde(rename = "newToken")]
    pub new_token: String,
}

/// `POST /authn/refresh`
///
/// A session token only refreshes while its session is alive.
pub async fn refresh(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<RefreshResponse>> {
    let request: RefreshRequest = parse(&body)?;
    let info = state.authenticator.validate_token(&request.old_token)?;
    if let Some(session_id) = info.session_id {
        if state.router.sessions().lookup(&session_id).is_none() {
            return Err(ApiError::unauthenticated());
        }
    }
    let new_token = state
        .authenticator
        .refresh_token(&request.client_id, &request.old_token)?;
    Ok(Json(RefreshResponse { new_token }))
}

/// `POST /authn/logout`
pub async fn logout(State(state): State<AppState>, auth: AuthContext) -> StatusCode {
    state.router.sessions().close(&auth.session.id());
    tracing::info!(
        client_id = auth.session.client_id(),
        session_id = %auth.session.id(),
        "logout"
    );
    StatusCode::NO_CONTENT
}

// -----------------------------------------------------------------------------
// Digital twin reads
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

/// `GET /digitwin/directory`
pub async fn read_all_things(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Json<Vec<ThingDescription>> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    Json(state.router.read_all_things(page.offset, limit))
}

/// `GET /digitwin/directory/{thingID}`
pub async fn read_thing(
    State(state): State<AppState>,
    Path(thing_id): Path<String>,
) -> ApiResult<Json<ThingDescription>> {
    Ok(Json(state.router.read_thing(&thing_id)?))
}

pub async fn read_property(
    State(state): State<AppState>,
    Path((thing_id, name)): Path<(String, String)>,
) -> ApiResult<Json<AffordanceValue>> {
    Ok(Json(state.router.read_property(&thing_id, &name)?))
}

pub async fn read_all_properties(
    State(state): State<AppState>,
    Path(thing_id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, AffordanceValue>>> {
    Ok(Json(state.router.read_all_properties(&thing_id)?))
}

pub async fn read_event(
    State(state): State<AppState>,
    Path((thing_id, name)): Path<(String, String)>,
) -> ApiResult<Json<AffordanceValue>> {
    Ok(Json(state.router.read_event(&thing_id, &name)?))
}

pub async fn read_all_events(
    State(state): State<AppState>,
    Path(thing_id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, AffordanceValue>>> {
    Ok(Json(state.router.read_all_events(&thing_id)?))
}

pub async fn query_action(
    State(state): State<AppState>,
    Path((thing_id, name)): Path<(String, String)>,
) -> ApiResult<Json<ActionStatus>> {
    Ok(Json(state.router.query_action(&thing_id, &name)?))
}

pub async fn query_all_actions(
    State(state): State<AppState>,
    Path(thing_id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, ActionStatus>>> {
    Ok(Json(state.router.query_all_actions(&thing_id)?))
}

/// `GET /digitwin/requests/{requestID}`
pub async fn query_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<ActionStatus>> {
    let request_id = RequestId::parse(&request_id)
        .map_err(|_| ApiError::bad_request(format!("invalid requestID '{}'", request_id)))?;
    Ok(Json(state.router.query_request(&request_id)?))
}

// -----------------------------------------------------------------------------
// Forwarded to agents
// -----------------------------------------------------------------------------

fn reply_response(reply: InvokeReply) -> Response {
    match reply {
        InvokeReply::Completed(status) => {
            Json(status.output.unwrap_or(Value::Null)).into_response()
        }
        InvokeReply::Failed(status) | InvokeReply::Delivered(status) => {
            Json(status).into_response()
        }
        InvokeReply::Unavailable(status) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
        }
    }
}

/// An object whose only key is `input` is unwrapped to its value.
fn action_input(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("input") => {
            map.remove("input").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// `POST /digitwin/actions/{thingID}/{name}`
pub async fn invoke_action(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((thing_id, name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    require_operator(&auth.session)?;
    let input = action_input(parse_value(&body)?);
    let mode = if prefers_async(&headers) {
        InvokeMode::Async
    } else {
        InvokeMode::Sync
    };
    let reply = state
        .router
        .invoke_action(&auth.session, &thing_id, &name, input, mode)
        .await?;
    Ok(reply_response(reply))
}

/// `POST /digitwin/properties/{thingID}/{name}`
///
/// Writes are forwarded asynchronously; the agent confirms by reporting the
/// new value.
pub async fn write_property(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((thing_id, name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    require_operator(&auth.session)?;
    let value = parse_value(&body)?;
    let reply = state
        .router
        .write_property(&auth.session, &thing_id, &name, value, InvokeMode::Async)
        .await?;
    Ok(reply_response(reply))
}

// -----------------------------------------------------------------------------
// Subscriptions
// -----------------------------------------------------------------------------

fn interest_op(op: &str) -> ApiResult<Operation> {
    match op {
        "subscribe" => Ok(Operation::Subscribe),
        "unsubscribe" => Ok(Operation::Unsubscribe),
        "observe" => Ok(Operation::Observe),
        "unobserve" => Ok(Operation::Unobserve),
        other => Err(ApiError::not_found(format!("unknown subscription operation '{}'", other))),
    }
}

/// `POST /ssesc/digitwin/{op}/{thingID}/{name}`
pub async fn set_interest(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((op, thing_id, name)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    state
        .router
        .set_interest(interest_op(&op)?, &auth.session, &thing_id, &name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /ssesc/digitwin/{op}/{thingID}`, every name of the Thing.
pub async fn set_thing_interest(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((op, thing_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .router
        .set_interest(interest_op(&op)?, &auth.session, &thing_id, WILDCARD)?;
    Ok(StatusCode::NO_CONTENT)
}

// -----------------------------------------------------------------------------
// Agent notifications
// -----------------------------------------------------------------------------

/// `POST /agent/event/{thingID}/{name}`
pub async fn agent_event(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((thing_id, name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    require_agent(&auth.session)?;
    let value = AgentValue::from_body(parse_value(&body)?);
    state
        .router
        .publish_event(&auth.session, &thing_id, &name, value)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /agent/property/{thingID}/{name}`
pub async fn agent_property(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((thing_id, name)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    require_agent(&auth.session)?;
    let value = AgentValue::from_body(parse_value(&body)?);
    state
        .router
        .update_property(&auth.session, &thing_id, &name, value)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /agent/properties/{thingID}`
pub async fn agent_properties(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(thing_id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    require_agent(&auth.session)?;
    let values: BTreeMap<String, Value> = parse(&body)?;
    state
        .router
        .update_properties(&auth.session, &thing_id, values)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /agent/tdd/{thingID}`
pub async fn agent_update_thing(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(thing_id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    require_agent(&auth.session)?;
    let td: ThingDescription = parse(&body)?;
    if td.id != thing_id {
        return Err(ApiError::bad_request(format!(
            "TD id '{}' does not match path '{}'",
            td.id, thing_id
        )));
    }
    state.router.update_thing(&auth.session, td)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /agent/tdd/{thingID}`
pub async fn agent_remove_thing(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(thing_id): Path<String>,
) -> ApiResult<StatusCode> {
    require_agent(&auth.session)?;
    state.router.remove_thing(&auth.session, &thing_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /agent/progress`
pub async fn agent_progress(
    State(state): State<AppState>,
    auth: AuthContext,
    body: Bytes,
) -> ApiResult<StatusCode> {
    require_agent(&auth.session)?;
    let status: ActionStatus = parse(&body)?;
    state.router.handle_action_status(&auth.session, status)?;
    Ok(StatusCode::NO_CONTENT)
}

// -----------------------------------------------------------------------------
// Health
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub channels: usize,
    pub things: usize,
    pub pending_actions: usize,
    pub stats: StatsSnapshot,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let router = &state.router;
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
        sessions: router.sessions().session_count(),
        channels: router.sessions().channel_count(),
        things: router.digitwin().len(),
        pending_actions: router.actions().pending_count(),
        stats: router.stats().snapshot(),
    })
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefer_respond_async() {
        let mut headers = HeaderMap::new();
        assert!(!prefers_async(&headers));
        headers.insert("prefer", HeaderValue::from_static("wait=10, Respond-Async"));
        assert!(prefers_async(&headers));
    }

    #[test]
    fn test_action_input_unwraps_single_input_key() {
        assert_eq!(action_input(json!({"input": true})), json!(true));
        assert_eq!(action_input(json!({"input": 1, "x": 2})), json!({"input": 1, "x": 2}));
        assert_eq!(action_input(json!(5)), json!(5));
    }

    #[test]
    fn test_empty_body_is_null() {
        assert_eq!(parse_value(&Bytes::from_static(b"  ")).unwrap(), Value::Null);
        assert!(parse_value(&Bytes::from_static(b"{oops")).is_err());
    }

    #[test]
    fn test_interest_ops() {
        assert_eq!(interest_op("observe").unwrap(), Operation::Observe);
        assert!(interest_op("listen").is_err());
    }
}
