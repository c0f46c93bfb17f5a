//! Inbound message recorder for Evolution `messages.upsert` webhooks.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, StoreError},
    provider::SendReceipt,
    store::Store,
    types::{Message, MessageKind, MessageStatus, ProviderConfig},
    webhook::WebhookEnvelope,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Ignored,
    Recorded { message_id: String, inserted: bool },
}

/// Upserts the message carried by `envelope`. Unknown instances are an error
/// so the caller can answer 404; everything else that is not a message is a
/// no-op.
pub async fn record_inbound(
    store: &dyn Store,
    envelope: &WebhookEnvelope,
) -> Result<RecordOutcome, AppError> {
    let Some(inbound) = envelope.inbound_message() else {
        return Ok(RecordOutcome::Ignored);
    };
    let Some(provider) = store.provider_by_instance(&envelope.instance).await? else {
        tracing::warn!(instance = %envelope.instance, "webhook for unknown instance");
        return Err(AppError::InstanceNotFound);
    };

    let message = Message {
        id: Uuid::new_v4(),
        tenant_id: provider.tenant_id.clone(),
        instance_name: envelope.instance.clone(),
        remote_jid: inbound.remote_jid.clone(),
        message_id: inbound.message_id.clone(),
        kind: inbound.content.kind(),
        content: inbound.content.stored_content(),
        from_me: inbound.from_me,
        status: MessageStatus::Received,
        timestamp: inbound.timestamp.unwrap_or_else(Utc::now),
        lead_id: None,
        raw: envelope.data.clone(),
    };
    let inserted = store.upsert_message(&message).await?;
    tracing::debug!(
        tenant = %message.tenant_id,
        message_id = %message.message_id,
        contact = inbound.push_name.as_deref().unwrap_or(""),
        inserted,
        "inbound message recorded"
    );

    Ok(RecordOutcome::Recorded {
        message_id: message.message_id,
        inserted,
    })
}

/// Stores a message we just sent through the provider.
pub async fn record_outbound(
    store: &dyn Store,
    provider: &ProviderConfig,
    remote_jid: &str,
    text: &str,
    receipt: &SendReceipt,
    lead_id: Option<String>,
) -> Result<bool, StoreError> {
    let message = Message {
        id: Uuid::new_v4(),
        tenant_id: provider.tenant_id.clone(),
        instance_name: provider.instance_name.clone(),
        remote_jid: remote_jid.to_string(),
        message_id: receipt
            .message_id
            .clone()
            .unwrap_or_else(|| format!("local-{}", Uuid::new_v4())),
        kind: MessageKind::Text,
        content: Some(text.to_string()),
        from_me: true,
        status: MessageStatus::Sent,
        timestamp: Utc::now(),
        lead_id,
        raw: receipt.body.clone(),
    };
    store.upsert_message(&message).await
}
