//! Scheduled-message dispatcher.
//!
//! Each run releases expired claims, claims a batch of due `pending` rows under
//! a fresh claim token and sends them one by one. The lease of each row is
//! renewed right before its send, and status updates only apply while the run
//! still owns the row. A failure is recorded on that row only.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use uuid::Uuid;

use crate::{
    error::{ProviderError, StoreError},
    provider::SendReceipt,
    recorder::record_outbound,
    types::{AppState, ProviderConfig, ScheduledMessage, ScheduledStatus},
    webhook::normalize_phone,
};

#[derive(Debug, Error)]
enum SendError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub id: Uuid,
    /// `processing` when the outcome could not be stored on the row.
    pub status: ScheduledStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    fn unrecorded(id: Uuid, error: String) -> Self {
        Self {
            id,
            status: ScheduledStatus::Processing,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub processed: usize,
    pub results: Vec<DispatchResult>,
}

impl DispatchReport {
    /// Messages whose final status could not be written back.
    pub fn unrecorded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ScheduledStatus::Processing)
            .count()
    }
}

pub async fn dispatch_due(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<DispatchReport, StoreError> {
    let released = state.store.release_expired_claims(now).await?;
    if released > 0 {
        tracing::warn!(released, "re-queued scheduled messages with expired claims");
    }

    let lease = chrono::Duration::from_std(state.config.dispatch_claim_timeout)
        .unwrap_or_else(|_| chrono::Duration::minutes(5));
    let claim = Uuid::new_v4();
    let batch = state
        .store
        .claim_due_scheduled(now, now + lease, state.config.dispatch_batch_size, claim)
        .await?;
    if batch.is_empty() {
        return Ok(DispatchReport::default());
    }

    let mut results = Vec::with_capacity(batch.len());
    for message in &batch {
        if let Some(result) = dispatch_one(state, message, claim, lease).await {
            results.push(result);
        }
    }
    let report = DispatchReport {
        processed: results.len(),
        results,
    };
    let failed = report
        .results
        .iter()
        .filter(|r| r.status == ScheduledStatus::Failed)
        .count();
    tracing::info!(
        %claim,
        processed = report.processed,
        failed,
        unrecorded = report.unrecorded(),
        "scheduled dispatch finished"
    );
    Ok(report)
}

/// Sends one claimed message. `None` when the claim was lost to another run
/// before the send started.
async fn dispatch_one(
    state: &AppState,
    message: &ScheduledMessage,
    claim: Uuid,
    lease: chrono::Duration,
) -> Option<DispatchResult> {
    match state
        .store
        .renew_claim(message.id, claim, Utc::now() + lease)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(id = %message.id, %claim, "claim expired before send, skipping");
            return None;
        }
        Err(err) => {
            tracing::error!(id = %message.id, error = %err, "failed to renew claim");
            return Some(DispatchResult::unrecorded(
                message.id,
                format!("claim renewal failed: {err}"),
            ));
        }
    }

    let result = match send_scheduled(state, message).await {
        Ok((provider, phone, receipt)) => {
            let marked = state
                .store
                .mark_scheduled_sent(message.id, claim, Utc::now())
                .await;
            let jid = format!("{phone}@s.whatsapp.net");
            if let Err(err) = record_outbound(
                state.store.as_ref(),
                &provider,
                &jid,
                &message.message,
                &receipt,
                message.lead_id.clone(),
            )
            .await
            {
                tracing::warn!(id = %message.id, error = %err, "failed to record sent message");
            }
            match marked {
                Ok(true) => DispatchResult {
                    id: message.id,
                    status: ScheduledStatus::Sent,
                    error: None,
                },
                Ok(false) => DispatchResult::unrecorded(
                    message.id,
                    "sent, but the claim was lost before the status update".to_string(),
                ),
                Err(err) => DispatchResult::unrecorded(
                    message.id,
                    format!("sent, but the status update failed: {err}"),
                ),
            }
        }
        Err(err) => {
            let error = err.to_string();
            tracing::warn!(id = %message.id, tenant = %message.tenant_id, error = %error, "scheduled send failed");
            match state
                .store
                .mark_scheduled_failed(message.id, claim, &error)
                .await
            {
                Ok(true) => DispatchResult {
                    id: message.id,
                    status: ScheduledStatus::Failed,
                    error: Some(error),
                },
                Ok(false) => DispatchResult::unrecorded(
                    message.id,
                    format!("{error}; claim lost before the status update"),
                ),
                Err(store_err) => DispatchResult::unrecorded(
                    message.id,
                    format!("{error}; status update failed: {store_err}"),
                ),
            }
        }
    };
    if result.status == ScheduledStatus::Processing {
        tracing::error!(
            id = %message.id,
            error = result.error.as_deref().unwrap_or_default(),
            "scheduled message outcome not stored"
        );
    }
    Some(result)
}

async fn send_scheduled(
    state: &AppState,
    message: &ScheduledMessage,
) -> Result<(ProviderConfig, String, SendReceipt), SendError> {
    let provider = state
        .store
        .provider_by_tenant(&message.tenant_id)
        .await?
        .ok_or_else(|| ProviderError::MissingConfig {
            tenant_id: message.tenant_id.clone(),
        })?;
    let phone = normalize_phone(&message.phone)
        .ok_or_else(|| ProviderError::InvalidPhone(message.phone.clone()))?;
    let receipt = state
        .provider
        .send_text(&provider, &phone, &message.message)
        .await?;
    Ok((provider, phone, receipt))
}

/// Runs [`dispatch_due`] every `dispatch_interval`. `None` when the interval is zero.
pub fn spawn_ticker(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let period = state.config.dispatch_interval;
    if period == Duration::ZERO {
        return None;
    }
    tracing::info!(every_secs = period.as_secs(), "scheduled dispatch ticker enabled");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = dispatch_due(&state, Utc::now()).await {
                tracing::error!(error = %err, "scheduled dispatch run failed");
            }
        }
    }))
}
