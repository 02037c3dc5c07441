//! # Action Scenarios
//!
//! Consumer invokes forwarded to the owning agent and correlated back:
//! synchronous replies, timeouts, late completions and WS-initiated
//! invokes.

#[cfg(test)]
mod tests {
    use crate::harness::{SseClient, SseEvent, TestHub, PUSH_WAIT};
    use hub_types::{ProgressState, WsMessage, WsMessageType};
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Skip pushes until one of `kind` arrives.
    async fn next_of(sse: &mut SseClient, kind: &str) -> SseEvent {
        loop {
            let event = sse.next_within(PUSH_WAIT).await.expect("push");
            if event.event == kind {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_sync_invoke_returns_agent_output() {
        let hub = TestHub::start().await;
        let agent_token = hub.agent_token("A");
        hub.publish_thermometer(&agent_token).await;
        let mut agent = hub.ws(&agent_token).await;
        let token = hub.login("u1", "p").await;

        let body = json!({"input": true});
        let invoke = hub.post("/digitwin/actions/T1/toggle", &token, &body);
        let respond = async {
            let request = agent.next_within(PUSH_WAIT).await.expect("invokeAction");
            assert_eq!(request.message_type, WsMessageType::Action);
            assert_eq!(request.name, "toggle");
            assert_eq!(request.sender_id.as_deref(), Some("u1"));
            assert_eq!(request.input, Some(json!(true)));

            let mut reply = WsMessage::new(WsMessageType::ActionStatus, "T1", "toggle");
            reply.request_id = request.request_id.clone();
            reply.progress_state = Some(ProgressState::Completed);
            reply.output = Some(json!("on"));
            agent.send(&reply).await;
            request.request_id
        };
        let (response, request_id) = tokio::join!(invoke, respond);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<Value>().await.unwrap(), json!("on"));

        let request_id = request_id.unwrap();
        let status: Value = hub
            .get(&format!("/digitwin/requests/{request_id}"), &token)
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(status["progressState"], "completed");
        assert_eq!(status["output"], "on");
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_then_late_completion() {
        let hub = TestHub::start_with(|config| {
            config.timeouts.request = Duration::from_millis(300);
        })
        .await;
        let agent_token = hub.agent_token("A");
        hub.publish_thermometer(&agent_token).await;
        let mut agent = hub.sse(&agent_token).await;
        let token = hub.login("u1", "p").await;
        let mut consumer = hub.sse(&token).await;

        let response = hub
            .post("/digitwin/actions/T1/toggle", &token, &json!({"input": true}))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let envelope: Value = response.json().await.unwrap();
        assert_eq!(envelope["progressState"], "failed");
        assert_eq!(envelope["error"], "timeout");

        let request = next_of(&mut agent, "invokeAction").await;
        assert_eq!(request.request_id(), envelope["requestID"].as_str().unwrap());

        let late = json!({
            "requestID": request.request_id(),
            "progressState": "completed",
            "output": "on"
        });
        let response = hub.post("/agent/progress", &agent_token, &late).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let push = next_of(&mut consumer, "actionStatus").await;
        assert_eq!(push.id, format!("T1/toggle/A/{}", request.request_id()));
        let status = push.json();
        assert_eq!(status["progressState"], "completed");
        assert_eq!(status["output"], "on");

        let health: Value = reqwest::get(hub.url("/health")).await.unwrap().json().await.unwrap();
        assert_eq!(health["stats"]["correlationTimeouts"], 1);
        assert_eq!(health["stats"]["lateDeliveries"], 1);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_invoke_without_agent_channel_unavailable() {
        let hub = TestHub::start().await;
        let agent_token = hub.agent_token("A");
        hub.publish_thermometer(&agent_token).await;
        let token = hub.login("u1", "p").await;

        let response = hub
            .post("/digitwin/actions/T1/toggle", &token, &json!(true))
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let envelope: Value = response.json().await.unwrap();
        assert_eq!(envelope["progressState"], "failed");
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_ws_consumer_invoke_gets_status_pushes() {
        let hub = TestHub::start().await;
        let agent_token = hub.agent_token("A");
        hub.publish_thermometer(&agent_token).await;
        let mut agent = hub.sse(&agent_token).await;
        let token = hub.login("u1", "p").await;
        let mut consumer = hub.ws(&token).await;

        let mut invoke = WsMessage::new(WsMessageType::Action, "T1", "toggle");
        invoke.input = Some(json!(false));
        consumer.send(&invoke).await;

        let request = next_of(&mut agent, "invokeAction").await;
        assert_eq!(request.json(), json!(false));

        let delivered = consumer.next_within(PUSH_WAIT).await.expect("delivered");
        assert_eq!(delivered.message_type, WsMessageType::ActionStatus);
        assert_eq!(delivered.progress_state, Some(ProgressState::Delivered));
        assert_eq!(delivered.request_id.as_deref(), Some(request.request_id()));

        let done = json!({
            "requestID": request.request_id(),
            "progressState": "completed",
            "output": "off"
        });
        hub.post("/agent/progress", &agent_token, &done).await;

        let completed = consumer.next_within(PUSH_WAIT).await.expect("completed");
        assert_eq!(completed.progress_state, Some(ProgressState::Completed));
        assert_eq!(completed.output, Some(json!("off")));
        hub.stop().await;
    }
}
