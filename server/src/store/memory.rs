use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Store;
use crate::{
    error::StoreError,
    types::{ChatbotConfig, ChatbotRule, Message, ProviderConfig, ScheduledMessage, ScheduledStatus},
};

#[derive(Default)]
struct Tables {
    providers: Vec<ProviderConfig>,
    messages: Vec<Message>,
    chatbots: Vec<ChatbotConfig>,
    rules: Vec<ChatbotRule>,
    replies: HashSet<(String, String)>,
    scheduled: Vec<ScheduledMessage>,
}

impl Tables {
    /// A `processing` row whose lease is held by `claim`.
    fn owned_by(&mut self, id: Uuid, claim: Uuid) -> Option<&mut ScheduledMessage> {
        self.scheduled.iter_mut().find(|m| {
            m.id == id && m.status == ScheduledStatus::Processing && m.claimed_by == Some(claim)
        })
    }
}

/// In-process store with the same keys and conditional updates as the
/// Postgres schema. Backs the test suites.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any config with the same tenant or instance name.
    pub async fn put_provider(&self, config: ProviderConfig) {
        let mut tables = self.tables.lock().await;
        tables.providers.retain(|p| {
            p.tenant_id != config.tenant_id && p.instance_name != config.instance_name
        });
        tables.providers.push(config);
    }

    /// Replaces the tenant's existing config, if any.
    pub async fn put_chatbot(&self, config: ChatbotConfig) {
        let mut tables = self.tables.lock().await;
        tables.chatbots.retain(|c| c.tenant_id != config.tenant_id);
        tables.chatbots.push(config);
    }

    pub async fn add_rule(&self, rule: ChatbotRule) {
        self.tables.lock().await.rules.push(rule);
    }

    pub async fn add_scheduled(&self, message: ScheduledMessage) {
        self.tables.lock().await.scheduled.push(message);
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.tables.lock().await.messages.clone()
    }

    pub async fn scheduled(&self, id: Uuid) -> Option<ScheduledMessage> {
        self.tables
            .lock()
            .await
            .scheduled
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn provider_by_instance(
        &self,
        instance_name: &str,
    ) -> Result<Option<ProviderConfig>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .providers
            .iter()
            .find(|p| p.instance_name == instance_name)
            .cloned())
    }

    async fn provider_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<ProviderConfig>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .providers
            .iter()
            .find(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn upsert_message(&self, message: &Message) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .messages
            .iter_mut()
            .find(|m| m.tenant_id == message.tenant_id && m.message_id == message.message_id);
        match existing {
            Some(row) => {
                row.status = message.status;
                if message.lead_id.is_some() {
                    row.lead_id = message.lead_id.clone();
                }
                row.raw = message.raw.clone();
                Ok(false)
            }
            None => {
                tables.messages.push(message.clone());
                Ok(true)
            }
        }
    }

    async fn chatbot_config(&self, tenant_id: &str) -> Result<Option<ChatbotConfig>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .chatbots
            .iter()
            .find(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn chatbot_rules(&self, chatbot_id: Uuid) -> Result<Vec<ChatbotRule>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rules = tables
            .rules
            .iter()
            .filter(|r| r.chatbot_id == chatbot_id)
            .cloned()
            .collect::<Vec<_>>();
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(rules)
    }

    async fn claim_reply(&self, tenant_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .replies
            .insert((tenant_id.to_string(), message_id.to_string())))
    }

    async fn release_reply(&self, tenant_id: &str, message_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables
            .replies
            .remove(&(tenant_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn release_expired_claims(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut released = 0;
        for row in tables.scheduled.iter_mut() {
            let expired = row.locked_until.map(|until| until < now).unwrap_or(false);
            if expired && row.status.can_transition_to(ScheduledStatus::Pending) {
                row.status = ScheduledStatus::Pending;
                row.locked_until = None;
                row.claimed_by = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn claim_due_scheduled(
        &self,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        limit: i64,
        claim: Uuid,
    ) -> Result<Vec<ScheduledMessage>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut due = tables
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.status.can_transition_to(ScheduledStatus::Processing) && m.scheduled_at <= now
            })
            .map(|(idx, m)| (m.scheduled_at, idx))
            .collect::<Vec<_>>();
        due.sort();
        due.truncate(usize::try_from(limit).unwrap_or(0));

        let mut claimed = Vec::with_capacity(due.len());
        for (_, idx) in due {
            let row = &mut tables.scheduled[idx];
            row.status = ScheduledStatus::Processing;
            row.locked_until = Some(locked_until);
            row.claimed_by = Some(claim);
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claim: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.owned_by(id, claim) else {
            return Ok(false);
        };
        row.locked_until = Some(locked_until);
        Ok(true)
    }

    async fn mark_scheduled_sent(
        &self,
        id: Uuid,
        claim: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.owned_by(id, claim) else {
            return Ok(false);
        };
        row.status = ScheduledStatus::Sent;
        row.sent_at = Some(sent_at);
        row.error_message = None;
        row.locked_until = None;
        Ok(true)
    }

    async fn mark_scheduled_failed(
        &self,
        id: Uuid,
        claim: Uuid,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.owned_by(id, claim) else {
            return Ok(false);
        };
        row.status = ScheduledStatus::Failed;
        row.error_message = Some(error.to_string());
        row.locked_until = None;
        Ok(true)
    }

    async fn cancel_scheduled(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables
            .scheduled
            .iter_mut()
            .find(|m| m.id == id && m.status.can_transition_to(ScheduledStatus::Cancelled))
        else {
            return Ok(false);
        };
        row.status = ScheduledStatus::Cancelled;
        Ok(true)
    }
}
