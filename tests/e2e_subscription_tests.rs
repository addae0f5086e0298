//! End-to-end tests for the client-facing subscription operations

mod common;

use broadcaster_server::notifications::{NotificationLedger, NotificationStatus};
use broadcaster_server::token_store::TokenStore;
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_register_token_is_an_upsert() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let first = client.register_token(USER_1, SYSTEM_1, "tok-1").await;
    assert_eq!(first["status"], true);
    assert_eq!(first["data"]["isNewRegistration"], true);
    assert_eq!(first["data"]["token"], "tok-1");
    let id = first["data"]["id"].as_str().unwrap().to_string();

    let second = client.register_token(USER_2, SYSTEM_1, "tok-1").await;
    assert_eq!(second["data"]["isNewRegistration"], false);
    assert_eq!(second["data"]["id"], id.as_str());
    assert_eq!(second["data"]["userId"], USER_2);

    assert_eq!(server.token_store.get_all_tokens().unwrap(), vec!["tok-1"]);
}

#[tokio::test]
async fn test_register_token_validates_input() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .call("register-token", json!({"userId": USER_1, "systemId": SYSTEM_1}))
        .await;
    assert_eq!(response["status"], false);
    assert_eq!(response["message"], "token is required");
}

#[tokio::test]
async fn test_unregister_token() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    client.register_token(USER_1, SYSTEM_1, "tok-1").await;

    let missing_ids = client.call("unregister-token", json!({})).await;
    assert_eq!(missing_ids["status"], false);

    let removed = client
        .call("unregister-token", json!({"token": "tok-1"}))
        .await;
    assert_eq!(removed["status"], true);
    assert!(server.token_store.get_all_tokens().unwrap().is_empty());

    let again = client
        .call("unregister-token", json!({"token": "tok-1"}))
        .await;
    assert_eq!(again["status"], true);
}

#[tokio::test]
async fn test_send_notification_without_tokens_fails() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.send_notification(USER_1, SYSTEM_1, "Hello").await;

    assert_eq!(response["status"], false);
    assert_eq!(response["data"]["sent"], 0);
    assert_eq!(response["data"]["totalTokens"], 0);
    assert!(server.transport.sent_tokens().is_empty());

    let id = response["data"]["notificationId"].as_str().unwrap();
    let stored = server.ledger.get(id).unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Failed);
}

#[tokio::test]
async fn test_send_notification_prunes_rejected_tokens() {
    let server = TestServer::spawn_with_transport(RecordingTransport::rejecting(&["stale"])).await;
    let client = TestClient::new(server.base_url.clone());
    client.register_token(USER_1, SYSTEM_1, "fresh").await;
    client.register_token(USER_1, SYSTEM_1, "stale").await;
    client.register_token(USER_1, "other-system", "elsewhere").await;

    let response = client.send_notification(USER_1, SYSTEM_1, "Hello").await;

    assert_eq!(response["status"], true);
    assert_eq!(response["message"], "Notification sent to 1 of 2 devices");
    assert_eq!(response["data"]["sent"], 1);
    assert_eq!(response["data"]["failed"], 1);
    assert_eq!(response["data"]["totalTokens"], 2);

    let mut sent = server.transport.sent_tokens();
    sent.sort();
    assert_eq!(sent, vec!["fresh", "stale"]);
    let message = &server.transport.sent_messages()[0];
    assert_eq!(message.data.get("count").map(String::as_str), Some("3"));

    assert_eq!(
        server.token_store.get_user_tokens(USER_1, SYSTEM_1).unwrap(),
        vec!["fresh"]
    );

    let id = response["data"]["notificationId"].as_str().unwrap();
    let stored = server.ledger.get(id).unwrap().unwrap();
    assert_eq!(stored.status, NotificationStatus::Sent);
    assert_eq!(
        (stored.tokens_count, stored.success_count, stored.failure_count),
        (2, 1, 1)
    );
}

#[tokio::test]
async fn test_user_notifications_list_unread_first() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let mut ids = Vec::new();
    for title in ["one", "two", "three", "four", "five"] {
        let response = client.send_notification(USER_1, SYSTEM_1, title).await;
        ids.push(response["data"]["notificationId"].as_str().unwrap().to_string());
    }
    for id in &ids[3..] {
        let response = client.update_status(id, "READ").await;
        assert_eq!(response["status"], true);
    }

    let response = client
        .call(
            "get-user-notifications",
            json!({"userId": USER_1, "systemId": SYSTEM_1, "page": 1, "limit": 10, "daysBack": 7}),
        )
        .await;

    assert_eq!(response["status"], true);
    assert_eq!(
        response["pagination"],
        json!({"total": 5, "page": 1, "limit": 10, "totalPages": 1})
    );
    let statuses: Vec<&str> = response["data"]["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["FAILED", "FAILED", "FAILED", "READ", "READ"]);
}

#[tokio::test]
async fn test_user_notifications_paginate_and_filter() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    for title in ["a", "b", "c"] {
        client.send_notification(USER_1, SYSTEM_1, title).await;
    }

    let page = client
        .call(
            "get-user-notifications",
            json!({"userId": USER_1, "systemId": SYSTEM_1, "page": 2, "limit": 2}),
        )
        .await;
    assert_eq!(page["data"]["notifications"].as_array().unwrap().len(), 1);
    assert_eq!(page["pagination"]["totalPages"], 2);

    let filtered = client
        .call(
            "get-user-notifications",
            json!({"userId": USER_1, "systemId": SYSTEM_1, "status": "READ"}),
        )
        .await;
    assert_eq!(filtered["pagination"]["total"], 0);
    assert_eq!(filtered["pagination"]["limit"], 10);
}

#[tokio::test]
async fn test_status_updates_and_history() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    client.register_token(USER_1, SYSTEM_1, "tok-1").await;
    let sent = client.send_notification(USER_1, SYSTEM_1, "Hello").await;
    let id = sent["data"]["notificationId"].as_str().unwrap();

    let response = client
        .call(
            "update-notification-status",
            json!({"notificationId": id, "status": "DELIVERED", "metadata": {"device": "web"}}),
        )
        .await;
    assert_eq!(response["status"], true);
    assert_eq!(response["data"]["previousStatus"], "SENT");
    assert_eq!(response["data"]["newStatus"], "DELIVERED");

    let history = client.history(id).await;
    let entries = history["data"]["history"].as_array().unwrap();
    let transitions: Vec<(serde_json::Value, serde_json::Value)> = entries
        .iter()
        .map(|e| (e["previousStatus"].clone(), e["newStatus"].clone()))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (serde_json::Value::Null, json!("PENDING")),
            (json!("PENDING"), json!("SENT")),
            (json!("SENT"), json!("DELIVERED")),
        ]
    );
    assert_eq!(entries[2]["metadata"]["device"], "web");
}

#[tokio::test]
async fn test_status_update_of_unknown_notification_fails() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.update_status("missing", "READ").await;
    assert_eq!(response["status"], false);
    assert_eq!(response["message"], "Notification not found");

    let response = client.update_status("missing", "ARCHIVED").await;
    assert_eq!(response["status"], false);
}

#[tokio::test]
async fn test_group_membership_drives_group_push() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    client.register_token(USER_1, SYSTEM_1, "tok-1").await;
    client.register_token(USER_2, SYSTEM_1, "tok-2").await;

    let saved = client
        .call(
            "save-group",
            json!({"groupId": "ops", "userIds": [USER_1], "name": "Operations"}),
        )
        .await;
    assert_eq!(saved["status"], true);
    assert_eq!(saved["data"]["name"], "Operations");

    let added = client
        .call("add-group-member", json!({"groupId": "ops", "userId": USER_2}))
        .await;
    assert_eq!(added["data"]["userIds"], json!([USER_1, USER_2]));

    let ack = client
        .post_plain(&json!({
            "messageId": "ops-1",
            "recipient": {"type": "group", "id": "ops"},
            "notification": {"title": "Page"}
        }))
        .await;
    assert_eq!(ack, "OK");
    let mut sent = server.transport.sent_tokens();
    sent.sort();
    assert_eq!(sent, vec!["tok-1", "tok-2"]);

    let removed = client
        .call("remove-group-member", json!({"groupId": "ops", "userId": USER_1}))
        .await;
    assert_eq!(removed["data"]["userIds"], json!([USER_2]));

    let not_member = client
        .call("remove-group-member", json!({"groupId": "ops", "userId": USER_1}))
        .await;
    assert_eq!(not_member["status"], false);
}

#[tokio::test]
async fn test_malformed_body_returns_failure_envelope() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .client
        .post(format!(
            "{}/api/v1/subscription/send-notification",
            server.base_url
        ))
        .header("content-type", "application/json")
        .body("{\"userId\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().contains_key("x-tracking-id"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], false);
}
