//! Bearer token authentication.
//!
//! Resolves the token to a live session and attaches an [`AuthContext`] to
//! the request. Session tokens must name a session that still exists
//! (logout and restart invalidate them); agent tokens reuse or create a
//! token session for the client.

use crate::authn::{Authenticator, TokenInfo};
use crate::domain::ApiError;
use crate::sessions::{Session, SessionManager};
use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderValue, Request, StatusCode},
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, Span};

/// Cookie carrying the token for browser clients.
pub const AUTH_COOKIE: &str = "authToken";

/// Authenticated caller, available to handlers.
#[derive(Clone)]
pub struct AuthContext {
    pub session: Arc<Session>,
    pub token: TokenInfo,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(ApiError::unauthenticated)
    }
}

/// Authentication layer
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionManager>,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<dyn Authenticator>, sessions: Arc<SessionManager>) -> Self {
        Self {
            authenticator,
            sessions,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionManager>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let authenticator = Arc::clone(&self.authenticator);
        let sessions = Arc::clone(&self.sessions);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(token) = extract_token(&req) else {
                debug!(path = %req.uri().path(), "request without token");
                return Ok(unauthorized_response());
            };
            let remote_addr = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0);

            let context = match resolve(&*authenticator, &sessions, &token, remote_addr) {
                Some(context) => context,
                None => return Ok(unauthorized_response()),
            };
            context.session.touch();
            Span::current().record("client_id", context.token.client_id.as_str());
            req.extensions_mut().insert(context);

            inner.call(req).await
        })
    }
}

fn resolve(
    authenticator: &dyn Authenticator,
    sessions: &SessionManager,
    token: &str,
    remote_addr: Option<SocketAddr>,
) -> Option<AuthContext> {
    let info = match authenticator.validate_token(token) {
        Ok(info) => info,
        Err(e) => {
            debug!(error = %e, "token rejected");
            return None;
        }
    };
    let session = match info.session_id {
        Some(session_id) => {
            let session = sessions.lookup(&session_id)?;
            if session.client_id() != info.client_id {
                debug!(session_id = %session_id, "session belongs to another client");
                return None;
            }
            session
        }
        None => match sessions.agent_session(&info.client_id, info.role, remote_addr) {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "agent session unavailable");
                return None;
            }
        },
    };
    Some(AuthContext {
        session,
        token: info,
    })
}

/// Bearer token from the `Authorization` header, or the auth cookie.
pub fn extract_token<B>(req: &Request<B>) -> Option<String> {
    if let Some(auth) = req.headers().get(header::AUTHORIZATION) {
        let auth = auth.to_str().ok()?;
        let (scheme, token) = auth.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
            return Some(token.trim().to_string());
        }
        return None;
    }

    let cookies = req.headers().get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// 401 with a fixed, minimal body.
fn unauthorized_response() -> Response {
    let mut response = Response::new(Body::from(r#"{"error":"unauthenticated"}"#));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(header_name: &str, value: &str) -> Request<Body> {
        Request::builder()
            .uri("/digitwin/directory")
            .header(header_name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        assert_eq!(extract_token(&request("authorization", "bearer abc")).as_deref(), Some("abc"));
        assert_eq!(extract_token(&request("authorization", "Bearer abc")).as_deref(), Some("abc"));
        assert_eq!(extract_token(&request("authorization", "Basic abc")), None);
        assert_eq!(extract_token(&request("authorization", "Bearer ")), None);
    }

    #[test]
    fn test_cookie_token() {
        let req = request("cookie", "theme=dark; authToken=xyz");
        assert_eq!(extract_token(&req).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_missing_token() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(extract_token(&req), None);
    }

    #[tokio::test]
    async fn test_unauthorized_body_is_minimal() {
        let response = unauthorized_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"unauthenticated"}"#);
    }
}
