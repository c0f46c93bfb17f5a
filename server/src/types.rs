use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{config::Config, provider::EvolutionClient, store::Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// Delivery status stored on a message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Received,
    Sent,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
        }
    }
}

/// One inbound or outbound WhatsApp message. Unique per `(tenant_id, message_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub tenant_id: String,
    pub instance_name: String,
    pub remote_jid: String,
    pub message_id: String,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub from_me: bool,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub lead_id: Option<String>,
    #[serde(default)]
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotConfig {
    pub id: Uuid,
    pub tenant_id: String,
    pub enabled: bool,
    pub welcome_message: Option<String>,
    pub fallback_message: String,
    /// `HH:MM`, server local time.
    pub business_hours_start: Option<String>,
    pub business_hours_end: Option<String>,
    pub out_of_hours_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Contains,
    Exact,
    StartsWith,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Exact => "exact",
            Self::StartsWith => "starts_with",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contains" => Some(Self::Contains),
            "exact" => Some(Self::Exact),
            "starts_with" | "starts-with" | "startswith" => Some(Self::StartsWith),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotRule {
    pub id: Uuid,
    pub chatbot_id: Uuid,
    pub keywords: Vec<String>,
    pub response: String,
    pub match_type: MatchType,
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl ScheduledStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    /// `processing -> pending` is only taken when a claim lease expires.
    pub fn can_transition_to(&self, next: ScheduledStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Sent)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Pending)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub tenant_id: String,
    pub lead_id: Option<String>,
    pub phone: String,
    pub message: String,
    pub template_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduledStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    /// Token of the dispatcher run holding the `processing` lease.
    pub claimed_by: Option<Uuid>,
}

/// Evolution API credentials for one tenant. `instance_name` is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: Uuid,
    pub tenant_id: String,
    pub base_url: String,
    pub api_key: String,
    pub instance_name: String,
}

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub provider: EvolutionClient,
    pub config: Config,
}
