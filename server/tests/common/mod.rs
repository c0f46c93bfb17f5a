#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use crm_messaging::{
    config::Config,
    handlers,
    provider::EvolutionClient,
    store::MemoryStore,
    types::{AppState, ChatbotConfig, ChatbotRule, MatchType, ProviderConfig},
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

pub const TENANT: &str = "tenant-1";
pub const INSTANCE: &str = "acme-sales";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
    pub provider: MockServer,
}

impl Harness {
    pub async fn new() -> Self {
        let provider = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        store
            .put_provider(ProviderConfig {
                id: Uuid::new_v4(),
                tenant_id: TENANT.to_string(),
                base_url: provider.uri(),
                api_key: "tenant-key".to_string(),
                instance_name: INSTANCE.to_string(),
            })
            .await;
        let state = Arc::new(AppState {
            store: store.clone(),
            provider: EvolutionClient::new(Duration::from_secs(5)).unwrap(),
            config: Config::default(),
        });
        Self {
            store,
            state,
            provider,
        }
    }

    pub fn router(&self) -> Router {
        handlers::router(self.state.clone())
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body.to_string()).await
    }

    pub async fn post_raw(&self, uri: &str, body: String) -> (StatusCode, Value) {
        let response = self
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn enable_chatbot(&self, hours: Option<(&str, &str)>) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .put_chatbot(ChatbotConfig {
                id,
                tenant_id: TENANT.to_string(),
                enabled: true,
                welcome_message: Some("Bem-vindo!".to_string()),
                fallback_message: "Obrigado pelo contato!".to_string(),
                business_hours_start: hours.map(|(start, _)| start.to_string()),
                business_hours_end: hours.map(|(_, end)| end.to_string()),
                out_of_hours_message: "Nosso horário é das 9h às 18h.".to_string(),
            })
            .await;
        id
    }

    pub async fn add_rule(
        &self,
        chatbot_id: Uuid,
        keywords: &[&str],
        response: &str,
        match_type: MatchType,
        priority: i32,
    ) {
        self.store
            .add_rule(ChatbotRule {
                id: Uuid::new_v4(),
                chatbot_id,
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                response: response.to_string(),
                match_type,
                priority,
                active: true,
                created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            })
            .await;
    }
}

pub fn inbound_event(message_id: &str, text: &str) -> Value {
    json!({
        "event": "messages.upsert",
        "instance": INSTANCE,
        "data": {
            "key": {
                "remoteJid": "5511988887777@s.whatsapp.net",
                "fromMe": false,
                "id": message_id
            },
            "pushName": "Maria",
            "message": { "conversation": text },
            "messageTimestamp": 1_700_000_123
        }
    })
}
