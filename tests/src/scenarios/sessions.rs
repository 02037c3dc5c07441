//! # Session Scenarios
//!
//! Login, token refresh, logout and what each does to open push channels.

#[cfg(test)]
mod tests {
    use crate::harness::{TestHub, PUSH_WAIT};
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[tokio::test]
    async fn test_login_read_logout() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;

        let response = hub.get("/digitwin/directory", &token).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<Value>().await.unwrap(), json!([]));

        let response = hub.post_empty("/authn/logout", &token).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = hub.get("/digitwin/directory", &token).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.json::<Value>().await.unwrap(),
            json!({"error": "unauthenticated"})
        );
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_logout_ends_push_channel() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let mut sse = hub.sse(&token).await;

        let response = hub.post_empty("/authn/logout", &token).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(sse.next_within(PUSH_WAIT).await.is_none());
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_keeps_session() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;

        let response = hub
            .post(
                "/authn/refresh",
                &token,
                &json!({"clientID": "u1", "oldToken": token}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        let fresh = body["newToken"].as_str().unwrap().to_string();

        let response = hub.get("/digitwin/directory", &fresh).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Both tokens name the same session, so logging out kills both.
        hub.post_empty("/authn/logout", &fresh).await;
        let response = hub.get("/digitwin/directory", &token).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_for_other_client_rejected() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let response = hub
            .post(
                "/authn/refresh",
                &token,
                &json!({"clientID": "viewer", "oldToken": token}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let _sse = hub.sse(&token).await;

        let response = reqwest::get(hub.url("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["channels"], 1);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_streams() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let mut sse = hub.sse(&token).await;
        let agent_token = hub.agent_token("A");
        let mut ws = hub.ws(&agent_token).await;

        hub.stop().await;
        assert!(sse.next_within(Duration::from_secs(2)).await.is_none());
        assert!(ws.next_within(Duration::from_secs(2)).await.is_none());
    }
}
