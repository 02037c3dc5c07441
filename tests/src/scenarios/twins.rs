//! # Digital Twin Scenarios
//!
//! Latest-value ordering, TD ownership and directory paging as seen by
//! consumers over HTTP.

#[cfg(test)]
mod tests {
    use crate::harness::{thermometer, TestHub};
    use reqwest::StatusCode;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_out_of_order_value_ignored() {
        let hub = TestHub::start().await;
        let agent = hub.agent_token("A");
        hub.publish_thermometer(&agent).await;
        let token = hub.login("u1", "p").await;

        let response = hub
            .post("/agent/property/T1/x", &agent, &json!({"value": 5, "timestamp": 10}))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let first: Value = hub.get("/digitwin/properties/T1/x", &token).await.json().await.unwrap();
        assert_eq!(first["value"], 5);

        let response = hub
            .post("/agent/property/T1/x", &agent, &json!({"value": 4, "timestamp": 9}))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let after: Value = hub.get("/digitwin/properties/T1/x", &token).await.json().await.unwrap();
        assert_eq!(after, first);

        let all: Value = hub.get("/digitwin/properties/T1", &token).await.json().await.unwrap();
        assert_eq!(all["x"]["value"], 5);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_ownership_conflict_changes_nothing() {
        let hub = TestHub::start().await;
        let agent_a = hub.agent_token("A");
        let agent_b = hub.agent_token("B");
        hub.publish_thermometer(&agent_a).await;
        hub.post("/agent/property/T1/x", &agent_a, &json!(1)).await;

        let response = hub
            .post("/agent/tdd/T1", &agent_b, &thermometer("Hijacked"))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "conflict");

        // B cannot publish values for A's Thing either.
        let response = hub.post("/agent/property/T1/x", &agent_b, &json!(2)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let token = hub.login("u1", "p").await;
        let td: Value = hub.get("/digitwin/directory/T1", &token).await.json().await.unwrap();
        assert_eq!(td["title"], "Thermometer");
        let x: Value = hub.get("/digitwin/properties/T1/x", &token).await.json().await.unwrap();
        assert_eq!(x["value"], 1);
        assert_eq!(x["senderID"], "A");
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_owner_replaces_and_removes_td() {
        let hub = TestHub::start().await;
        let agent = hub.agent_token("A");
        hub.publish_thermometer(&agent).await;
        let response = hub
            .post("/agent/tdd/T1", &agent, &thermometer("Renamed"))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let token = hub.login("u1", "p").await;
        let td: Value = hub.get("/digitwin/directory/T1", &token).await.json().await.unwrap();
        assert_eq!(td["title"], "Renamed");

        let response = reqwest::Client::new()
            .delete(hub.url("/agent/tdd/T1"))
            .bearer_auth(&agent)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = hub.get("/digitwin/directory/T1", &token).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_directory_paging() {
        let hub = TestHub::start().await;
        let agent = hub.agent_token("A");
        for id in ["T1", "T2", "T3"] {
            let mut td = thermometer(id);
            td["id"] = json!(id);
            let response = hub.post(&format!("/agent/tdd/{id}"), &agent, &td).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        let token = hub.login("u1", "p").await;

        let page: Vec<Value> = hub
            .get("/digitwin/directory?offset=1&limit=1", &token)
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], "T2");

        let all: Vec<Value> = hub.get("/digitwin/directory", &token).await.json().await.unwrap();
        assert_eq!(all.len(), 3);
        hub.stop().await;
    }
}
