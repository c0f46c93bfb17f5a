//! Persistence seam for the automation core.
//!
//! Every operation is a single conditional statement against the backing
//! store, so overlapping webhook deliveries and dispatcher runs never need
//! an explicit transaction.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::StoreError,
    types::{ChatbotConfig, ChatbotRule, Message, ProviderConfig, ScheduledMessage},
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn provider_by_instance(
        &self,
        instance_name: &str,
    ) -> Result<Option<ProviderConfig>, StoreError>;

    async fn provider_by_tenant(&self, tenant_id: &str)
        -> Result<Option<ProviderConfig>, StoreError>;

    /// Inserts or refreshes a message keyed on `(tenant_id, message_id)`.
    /// Returns `true` when a new row was created.
    async fn upsert_message(&self, message: &Message) -> Result<bool, StoreError>;

    async fn chatbot_config(&self, tenant_id: &str) -> Result<Option<ChatbotConfig>, StoreError>;

    /// Rules ordered by priority descending, then stored order.
    async fn chatbot_rules(&self, chatbot_id: Uuid) -> Result<Vec<ChatbotRule>, StoreError>;

    /// Records that an inbound message is being answered. `false` means some
    /// earlier delivery of the same message already claimed it.
    async fn claim_reply(&self, tenant_id: &str, message_id: &str) -> Result<bool, StoreError>;

    async fn release_reply(&self, tenant_id: &str, message_id: &str) -> Result<(), StoreError>;

    /// Puts `processing` rows whose lease ended before `now` back to `pending`.
    async fn release_expired_claims(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Moves up to `limit` due `pending` rows to `processing`, oldest first,
    /// owned by `claim` and leased until `locked_until`.
    async fn claim_due_scheduled(
        &self,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        limit: i64,
        claim: Uuid,
    ) -> Result<Vec<ScheduledMessage>, StoreError>;

    /// Extends the lease of a row still owned by `claim`. `false` means the
    /// claim expired and the row may belong to another run.
    async fn renew_claim(
        &self,
        id: Uuid,
        claim: Uuid,
        locked_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// The mark operations only apply while `claim` still owns the row.
    async fn mark_scheduled_sent(
        &self,
        id: Uuid,
        claim: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_scheduled_failed(
        &self,
        id: Uuid,
        claim: Uuid,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// Cancels a row that has not been claimed yet.
    async fn cancel_scheduled(&self, id: Uuid) -> Result<bool, StoreError>;
}
