use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use uuid::Uuid;

use super::Store;
use crate::{
    error::StoreError,
    types::{
        ChatbotConfig, ChatbotRule, MatchType, Message, ProviderConfig, ScheduledMessage,
        ScheduledStatus,
    },
};

const SCHEDULED_COLUMNS: &str = "id, tenant_id, lead_id, phone, message, template_id, \
     scheduled_at, status, sent_at, error_message, locked_until, claimed_by";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn parse_row_enum<T>(
    table: &'static str,
    column: &'static str,
    raw: String,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    match parse(&raw) {
        Some(value) => Ok(value),
        None => Err(StoreError::InvalidRow {
            table,
            column,
            value: raw,
        }),
    }
}

fn provider_from_row(row: &PgRow) -> Result<ProviderConfig, StoreError> {
    Ok(ProviderConfig {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        base_url: row.try_get("base_url")?,
        api_key: row.try_get("api_key")?,
        instance_name: row.try_get("instance_name")?,
    })
}

fn chatbot_from_row(row: &PgRow) -> Result<ChatbotConfig, StoreError> {
    Ok(ChatbotConfig {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        enabled: row.try_get("enabled")?,
        welcome_message: row.try_get("welcome_message")?,
        fallback_message: row.try_get("fallback_message")?,
        business_hours_start: row.try_get("business_hours_start")?,
        business_hours_end: row.try_get("business_hours_end")?,
        out_of_hours_message: row.try_get("out_of_hours_message")?,
    })
}

fn rule_from_row(row: &PgRow) -> Result<ChatbotRule, StoreError> {
    Ok(ChatbotRule {
        id: row.try_get("id")?,
        chatbot_id: row.try_get("chatbot_id")?,
        keywords: row.try_get("keywords")?,
        response: row.try_get("response")?,
        match_type: parse_row_enum(
            "whatsapp_chatbot_rules",
            "match_type",
            row.try_get("match_type")?,
            MatchType::parse,
        )?,
        priority: row.try_get("priority")?,
        active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn scheduled_from_row(row: &PgRow) -> Result<ScheduledMessage, StoreError> {
    Ok(ScheduledMessage {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        lead_id: row.try_get("lead_id")?,
        phone: row.try_get("phone")?,
        message: row.try_get("message")?,
        template_id: row.try_get("template_id")?,
        scheduled_at: row.try_get("scheduled_at")?,
        status: parse_row_enum(
            "whatsapp_scheduled",
            "status",
            row.try_get("status")?,
            ScheduledStatus::parse,
        )?,
        sent_at: row.try_get("sent_at")?,
        error_message: row.try_get("error_message")?,
        locked_until: row.try_get("locked_until")?,
        claimed_by: row.try_get("claimed_by")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn provider_by_instance(
        &self,
        instance_name: &str,
    ) -> Result<Option<ProviderConfig>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, base_url, api_key, instance_name \
             FROM evolution_config WHERE instance_name = $1 LIMIT 1",
        )
        .bind(instance_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(provider_from_row).transpose()
    }

    async fn provider_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<ProviderConfig>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, base_url, api_key, instance_name \
             FROM evolution_config WHERE tenant_id = $1 LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(provider_from_row).transpose()
    }

    async fn upsert_message(&self, message: &Message) -> Result<bool, StoreError> {
        // xmax is zero only for a freshly inserted tuple.
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO whatsapp_messages \
             (id, tenant_id, instance_name, remote_jid, message_id, message_type, content, \
              is_from_me, status, timestamp, lead_id, raw_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (tenant_id, message_id) DO UPDATE SET \
               status = EXCLUDED.status, \
               lead_id = COALESCE(EXCLUDED.lead_id, whatsapp_messages.lead_id), \
               raw_data = EXCLUDED.raw_data, \
               updated_at = now() \
             RETURNING (xmax = 0)",
        )
        .bind(message.id)
        .bind(&message.tenant_id)
        .bind(&message.instance_name)
        .bind(&message.remote_jid)
        .bind(&message.message_id)
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(message.from_me)
        .bind(message.status.as_str())
        .bind(message.timestamp)
        .bind(&message.lead_id)
        .bind(&message.raw)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn chatbot_config(&self, tenant_id: &str) -> Result<Option<ChatbotConfig>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, enabled, welcome_message, fallback_message, \
             business_hours_start, business_hours_end, out_of_hours_message \
             FROM whatsapp_chatbot WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(chatbot_from_row).transpose()
    }

    async fn chatbot_rules(&self, chatbot_id: Uuid) -> Result<Vec<ChatbotRule>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, chatbot_id, keywords, response, match_type, priority, is_active, created_at \
             FROM whatsapp_chatbot_rules WHERE chatbot_id = $1 \
             ORDER BY priority DESC, created_at ASC, id ASC",
        )
        .bind(chatbot_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn claim_reply(&self, tenant_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO whatsapp_chatbot_replies (tenant_id, message_id) VALUES ($1, $2) \
             ON CONFLICT (tenant_id, message_id) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_reply(&self, tenant_id: &str, message_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM whatsapp_chatbot_replies WHERE tenant_id = $1 AND message_id = $2")
            .bind(tenant_id)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_expired_claims(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE whatsapp_scheduled \
             SET status = 'pending', locked_until = NULL, claimed_by = NULL, updated_at = now() \
             WHERE status = 'processing' AND locked_until < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn claim_due_scheduled(
        &self,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        limit: i64,
        claim: Uuid,
    ) -> Result<Vec<ScheduledMessage>, StoreError> {
        let sql = format!(
            "UPDATE whatsapp_scheduled \
             SET status = 'processing', locked_until = $2, claimed_by = $4, updated_at = now() \
             WHERE id IN ( \
                 SELECT id FROM whatsapp_scheduled \
                 WHERE status = 'pending' AND scheduled_at <= $1 \
                 ORDER BY scheduled_at ASC, created_at ASC \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING {SCHEDULED_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(locked_until)
            .bind(limit)
            .bind(claim)
            .fetch_all(&self.pool)
            .await?;
        let mut claimed = rows
            .iter()
            .map(scheduled_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the subquery order.
        claimed.sort_by_key(|m| m.scheduled_at);
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        id: Uuid,
        claim: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE whatsapp_scheduled SET locked_until = $3, updated_at = now() \
             WHERE id = $1 AND claimed_by = $2 AND status = 'processing'",
        )
        .bind(id)
        .bind(claim)
        .bind(locked_until)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_scheduled_sent(
        &self,
        id: Uuid,
        claim: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE whatsapp_scheduled \
             SET status = 'sent', sent_at = $3, error_message = NULL, locked_until = NULL, \
                 updated_at = now() \
             WHERE id = $1 AND claimed_by = $2 AND status = 'processing'",
        )
        .bind(id)
        .bind(claim)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_scheduled_failed(
        &self,
        id: Uuid,
        claim: Uuid,
        error: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE whatsapp_scheduled \
             SET status = 'failed', error_message = $3, locked_until = NULL, updated_at = now() \
             WHERE id = $1 AND claimed_by = $2 AND status = 'processing'",
        )
        .bind(id)
        .bind(claim)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_scheduled(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE whatsapp_scheduled SET status = 'cancelled', updated_at = now() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
