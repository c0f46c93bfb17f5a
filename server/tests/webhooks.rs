mod common;

use axum::http::StatusCode;
use common::{inbound_event, Harness, TENANT};
use crm_messaging::types::{MatchType, MessageKind, MessageStatus};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn health_reports_ok() {
    let harness = Harness::new().await;
    let response = tower::ServiceExt::oneshot(
        harness.router(),
        axum::http::Request::get("/health")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn recorder_deduplicates_redelivered_events() {
    let harness = Harness::new().await;
    let event = inbound_event("3EB0C767D26A", "oi, tudo bem?");

    let (status, body) = harness.post("/webhooks/evolution", event.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Message saved");

    let (status, body) = harness.post("/webhooks/evolution", event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Message updated");

    let messages = harness.store.messages().await;
    assert_eq!(messages.len(), 1);
    let row = &messages[0];
    assert_eq!(row.tenant_id, TENANT);
    assert_eq!(row.kind, MessageKind::Text);
    assert_eq!(row.content.as_deref(), Some("oi, tudo bem?"));
    assert_eq!(row.status, MessageStatus::Received);
    assert!(!row.from_me);
    assert_eq!(row.raw["pushName"], "Maria");
}

#[tokio::test]
async fn recorder_answers_404_for_unknown_instance() {
    let harness = Harness::new().await;
    let mut event = inbound_event("A1", "oi");
    event["instance"] = json!("someone-else");

    let (status, body) = harness.post("/webhooks/evolution", event).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Instance not found");
}

#[tokio::test]
async fn recorder_acknowledges_non_message_events() {
    let harness = Harness::new().await;
    let (status, body) = harness
        .post(
            "/webhooks/evolution",
            json!({ "event": "connection.update", "instance": "acme-sales", "data": { "state": "open" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(harness.store.messages().await.is_empty());
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let harness = Harness::new().await;
    let (status, body) = harness
        .post_raw("/webhooks/evolution", "not json".to_string())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn chatbot_replies_through_provider_with_tenant_credentials() {
    let harness = Harness::new().await;
    let chatbot = harness.enable_chatbot(None).await;
    harness
        .add_rule(chatbot, &["oi", "olá"], "Olá! Como posso ajudar?", MatchType::Contains, 0)
        .await;

    Mock::given(method("POST"))
        .and(path("/message/sendText/acme-sales"))
        .and(header("apikey", "tenant-key"))
        .and(body_json(json!({ "number": "5511988887777", "text": "Olá! Como posso ajudar?" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": { "id": "BOT1" } })))
        .expect(1)
        .mount(&harness.provider)
        .await;

    let (status, body) = harness
        .post("/webhooks/chatbot", inbound_event("IN1", "olá, bom dia"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Olá! Como posso ajudar?");

    let messages = harness.store.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_id, "BOT1");
    assert!(messages[0].from_me);
    assert_eq!(messages[0].status, MessageStatus::Sent);
}

#[tokio::test]
async fn chatbot_answers_a_redelivered_event_once() {
    let harness = Harness::new().await;
    harness.enable_chatbot(None).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(1)
        .mount(&harness.provider)
        .await;

    let event = inbound_event("IN-DUP", "preciso de ajuda");
    let (_, first) = harness.post("/webhooks/chatbot", event.clone()).await;
    let (status, second) = harness.post("/webhooks/chatbot", event).await;

    assert_eq!(first["message"], "Reply sent");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["message"], "Message already answered");
}

#[tokio::test]
async fn chatbot_provider_failure_is_500_and_retry_can_succeed() {
    let harness = Harness::new().await;
    harness.enable_chatbot(None).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("instance offline"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&harness.provider)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(1)
        .mount(&harness.provider)
        .await;

    let event = inbound_event("IN-RETRY", "alguém aí?");
    let (status, body) = harness.post("/webhooks/chatbot", event.clone()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("502"));

    let (status, body) = harness.post("/webhooks/chatbot", event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Obrigado pelo contato!");
}

#[tokio::test]
async fn chatbot_ignores_own_media_and_disabled_cases() {
    let harness = Harness::new().await;

    // No config yet.
    let (status, body) = harness
        .post("/webhooks/chatbot", inbound_event("A", "oi"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Chatbot disabled");

    harness.enable_chatbot(None).await;

    let mut own = inbound_event("B", "oi");
    own["data"]["key"]["fromMe"] = json!(true);
    let (_, body) = harness.post("/webhooks/chatbot", own).await;
    assert_eq!(body["message"], "Own message ignored");

    let mut media = inbound_event("C", "");
    media["data"]["message"] = json!({ "audioMessage": { "seconds": 4 } });
    let (_, body) = harness.post("/webhooks/chatbot", media).await;
    assert_eq!(body["message"], "No text to answer");

    let mut unknown = inbound_event("D", "oi");
    unknown["instance"] = json!("nobody");
    let (status, body) = harness.post("/webhooks/chatbot", unknown).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Instance not found");

    let mut broadcast = inbound_event("E", "oi");
    broadcast["data"]["key"]["remoteJid"] = json!("status@broadcast");
    let (status, body) = harness.post("/webhooks/chatbot", broadcast).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No phone in remoteJid");

    assert_eq!(harness.provider.received_requests().await.unwrap().len(), 0);
}
