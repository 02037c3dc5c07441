//! # Publishing Scenarios
//!
//! Agent notifications reaching subscribers and observers over both push
//! sub-protocols.

#[cfg(test)]
mod tests {
    use crate::harness::{thermometer, TestHub, PUSH_WAIT};
    use hub_types::{WsMessage, WsMessageType};
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscriber_receives_event_once() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let mut sse = hub.sse(&token).await;

        let response = hub
            .post_empty("/ssesc/digitwin/subscribe/T1/temperature", &token)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let agent = hub.agent_token("A");
        hub.publish_thermometer(&agent).await;
        let response = hub
            .post(
                "/agent/event/T1/temperature",
                &agent,
                &json!({"value": 21.5, "timestamp": "2026-01-01T00:00:00Z"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let event = sse.next_within(PUSH_WAIT).await.expect("event push");
        assert_eq!(event.event, "event");
        assert_eq!(event.id, "T1/temperature/A/");
        assert_eq!(event.json(), json!(21.5));
        assert!(sse.next_within(Duration::from_millis(300)).await.is_none());

        let response = hub.get("/digitwin/events/T1/temperature", &token).await;
        let latest: serde_json::Value = response.json().await.unwrap();
        assert_eq!(latest["value"], 21.5);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_unsubscribed_session_gets_nothing() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let mut sse = hub.sse(&token).await;
        hub.post_empty("/ssesc/digitwin/subscribe/T1/temperature", &token)
            .await;
        hub.post_empty("/ssesc/digitwin/unsubscribe/T1/temperature", &token)
            .await;

        let agent = hub.agent_token("A");
        hub.publish_thermometer(&agent).await;
        hub.post("/agent/event/T1/temperature", &agent, &json!(20.0))
            .await;
        assert!(sse.next_within(Duration::from_millis(300)).await.is_none());
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_ws_observer_receives_property() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let mut ws = hub.ws(&token).await;

        ws.send(&WsMessage::new(WsMessageType::Observe, "T1", "x")).await;
        // Frames are handled in order, so the pong means the observe landed.
        ws.send(&WsMessage::new(WsMessageType::Ping, "", "")).await;
        let pong = ws.next_within(PUSH_WAIT).await.expect("pong");
        assert_eq!(pong.message_type, WsMessageType::Ping);

        let agent = hub.agent_token("A");
        hub.publish_thermometer(&agent).await;
        let response = hub.post("/agent/property/T1/x", &agent, &json!(7)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let frame = ws.next_within(PUSH_WAIT).await.expect("property push");
        assert_eq!(frame.message_type, WsMessageType::Property);
        assert_eq!(frame.thing_id, "T1");
        assert_eq!(frame.name, "x");
        assert_eq!(frame.sender_id.as_deref(), Some("A"));
        assert_eq!(frame.data, Some(json!(7)));
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_td_update_reaches_td_subscribers() {
        let hub = TestHub::start().await;
        let token = hub.login("u1", "p").await;
        let mut sse = hub.sse(&token).await;
        hub.post_empty("/ssesc/digitwin/subscribe/T1/$td", &token).await;

        let agent = hub.agent_token("A");
        hub.publish_thermometer(&agent).await;
        let event = sse.next_within(PUSH_WAIT).await.expect("td push");
        assert_eq!(event.event, "event");
        assert!(event.id.starts_with("T1/$td/A/"));
        assert_eq!(event.json()["title"], "Thermometer");

        // Consumers see the TD with hub forms injected.
        let td: serde_json::Value = hub
            .get("/digitwin/directory/T1", &token)
            .await
            .json()
            .await
            .unwrap();
        let forms = td["actions"]["toggle"]["forms"].as_array().unwrap();
        assert!(forms
            .iter()
            .any(|f| f["href"].as_str().unwrap().ends_with("/digitwin/actions/T1/toggle")));
        assert_ne!(td, thermometer("Thermometer"));
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_agent_sse_receives_write_request() {
        let hub = TestHub::start().await;
        let agent = hub.agent_token("A");
        hub.publish_thermometer(&agent).await;
        let mut agent_sse = hub.sse(&agent).await;

        let token = hub.login("u1", "p").await;
        let response = hub.post("/digitwin/properties/T1/x", &token, &json!(3)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = response.json().await.unwrap();
        assert_eq!(status["progressState"], "delivered");

        let request = agent_sse.next_within(PUSH_WAIT).await.expect("write request");
        assert_eq!(request.event, "writeProperty");
        assert_eq!(request.json(), json!(3));
        assert_eq!(request.request_id(), status["requestID"].as_str().unwrap());
        hub.stop().await;
    }
}
