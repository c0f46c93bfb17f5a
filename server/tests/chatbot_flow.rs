mod common;

use chrono::{NaiveTime, Utc};
use common::{inbound_event, Harness, TENANT};
use crm_messaging::{
    chatbot::{respond, ReplySource, ResponderOutcome},
    types::{MatchType, ScheduledMessage, ScheduledStatus},
    webhook::WebhookEnvelope,
};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

fn envelope(value: Value) -> WebhookEnvelope {
    serde_json::from_value(value).unwrap()
}

fn clock(value: &str) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M:%S").unwrap()
}

async fn mount_ok(harness: &Harness) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&harness.provider)
        .await;
}

fn reply_text(outcome: ResponderOutcome) -> String {
    match outcome {
        ResponderOutcome::Replied { reply, .. } => reply.text,
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[tokio::test]
async fn greeting_fallback_and_after_hours() {
    let harness = Harness::new().await;
    mount_ok(&harness).await;
    let chatbot = harness.enable_chatbot(Some(("09:00", "18:00"))).await;
    harness
        .add_rule(chatbot, &["oi", "olá"], "Olá! Como posso ajudar?", MatchType::Contains, 0)
        .await;

    let greeting = respond(
        &harness.state,
        &envelope(inbound_event("M1", "olá, bom dia")),
        clock("10:00:00"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(greeting), "Olá! Como posso ajudar?");

    let info = respond(
        &harness.state,
        &envelope(inbound_event("M2", "informações")),
        clock("10:00:00"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(info), "Obrigado pelo contato!");

    let late = respond(
        &harness.state,
        &envelope(inbound_event("M3", "informações")),
        clock("20:00:00"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(late), "Nosso horário é das 9h às 18h.");

    let late_greeting = respond(
        &harness.state,
        &envelope(inbound_event("M4", "olá")),
        clock("20:00:00"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(late_greeting), "Nosso horário é das 9h às 18h.");
}

#[tokio::test]
async fn closing_time_boundary() {
    let harness = Harness::new().await;
    mount_ok(&harness).await;
    harness.enable_chatbot(Some(("09:00", "18:00"))).await;

    let at_close = respond(
        &harness.state,
        &envelope(inbound_event("B1", "oi")),
        clock("18:00:00"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(at_close), "Obrigado pelo contato!");

    let after_close = respond(
        &harness.state,
        &envelope(inbound_event("B2", "oi")),
        clock("18:00:01"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(after_close), "Nosso horário é das 9h às 18h.");
}

#[tokio::test]
async fn priority_beats_insertion_order() {
    let harness = Harness::new().await;
    mount_ok(&harness).await;
    let chatbot = harness.enable_chatbot(None).await;
    harness
        .add_rule(chatbot, &["preço"], "Tabela básica", MatchType::Contains, 1)
        .await;
    harness
        .add_rule(chatbot, &["preço", "valor"], "Tabela completa", MatchType::Contains, 5)
        .await;

    let outcome = respond(
        &harness.state,
        &envelope(inbound_event("P1", "qual o valor?")),
        clock("12:00:00"),
    )
    .await
    .unwrap();
    match outcome {
        ResponderOutcome::Replied { to, reply } => {
            assert_eq!(to, "5511988887777");
            assert_eq!(reply.text, "Tabela completa");
            assert!(matches!(reply.source, ReplySource::Rule(_)));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn exact_rule_needs_the_whole_message() {
    let harness = Harness::new().await;
    mount_ok(&harness).await;
    let chatbot = harness.enable_chatbot(None).await;
    harness
        .add_rule(chatbot, &["ajuda"], "Menu de ajuda", MatchType::Exact, 0)
        .await;

    let partial = respond(
        &harness.state,
        &envelope(inbound_event("E1", "preciso de ajuda")),
        clock("12:00:00"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(partial), "Obrigado pelo contato!");

    let whole = respond(
        &harness.state,
        &envelope(inbound_event("E2", "Ajuda")),
        clock("12:00:00"),
    )
    .await
    .unwrap();
    assert_eq!(reply_text(whole), "Menu de ajuda");
}

fn scheduled(status: ScheduledStatus, minutes_ago: i64) -> ScheduledMessage {
    ScheduledMessage {
        id: Uuid::new_v4(),
        tenant_id: TENANT.to_string(),
        lead_id: None,
        phone: "5511977776666".to_string(),
        message: "Sua proposta está pronta".to_string(),
        template_id: Some("proposal-ready".to_string()),
        scheduled_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        status,
        sent_at: None,
        error_message: None,
        locked_until: None,
        claimed_by: None,
    }
}

#[tokio::test]
async fn dispatch_endpoint_only_sends_pending_rows_once() {
    let harness = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": { "id": "S1" } })))
        .expect(1)
        .mount(&harness.provider)
        .await;

    let pending = scheduled(ScheduledStatus::Pending, 5);
    let cancelled = scheduled(ScheduledStatus::Cancelled, 5);
    let sent = scheduled(ScheduledStatus::Sent, 5);
    for m in [&pending, &cancelled, &sent] {
        harness.store.add_scheduled(m.clone()).await;
    }

    let (status, body) = harness
        .post("/jobs/process-scheduled-messages", json!({}))
        .await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["processed"], 1);
    assert_eq!(body["results"][0]["id"], pending.id.to_string());
    assert_eq!(body["results"][0]["status"], "sent");
    assert!(body["results"][0].get("error").is_none());

    let (_, body) = harness
        .post("/jobs/process-scheduled-messages", json!({}))
        .await;
    assert_eq!(body["processed"], 0);

    assert_eq!(
        harness.store.scheduled(cancelled.id).await.unwrap().status,
        ScheduledStatus::Cancelled
    );
    assert_eq!(
        harness.store.scheduled(pending.id).await.unwrap().status,
        ScheduledStatus::Sent
    );
}
