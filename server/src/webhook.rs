//! Evolution API webhook envelope and message payload decoding.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::types::MessageKind;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub data: Value,
}

impl WebhookEnvelope {
    /// Evolution emits `messages.upsert`; some versions use `MESSAGES_UPSERT`.
    pub fn is_message_event(&self) -> bool {
        self.event.trim().to_ascii_lowercase().replace('_', ".") == "messages.upsert"
    }

    /// Decodes `data` into an inbound message. `None` when this is not a message
    /// event or the payload carries no message body or id.
    pub fn inbound_message(&self) -> Option<InboundMessage> {
        if !self.is_message_event() {
            return None;
        }
        InboundMessage::from_data(&self.data)
    }
}

/// Mutually exclusive payload shapes of `data.message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Conversation(String),
    ExtendedText(String),
    Image,
    Video,
    Audio,
    Document,
    Unsupported,
}

impl MessageContent {
    pub fn decode(message: &Value) -> Self {
        let field = |key: &str| message.get(key).filter(|v| !v.is_null());

        if let Some(text) = field("conversation").and_then(Value::as_str) {
            return Self::Conversation(text.to_string());
        }
        if let Some(ext) = field("extendedTextMessage") {
            return Self::ExtendedText(
                ext.get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            );
        }
        if field("imageMessage").is_some() {
            return Self::Image;
        }
        if field("videoMessage").is_some() {
            return Self::Video;
        }
        if field("audioMessage").is_some() {
            return Self::Audio;
        }
        if field("documentMessage").is_some() {
            return Self::Document;
        }
        Self::Unsupported
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Conversation(_) | Self::ExtendedText(_) | Self::Unsupported => MessageKind::Text,
            Self::Image => MessageKind::Image,
            Self::Video => MessageKind::Video,
            Self::Audio => MessageKind::Audio,
            Self::Document => MessageKind::Document,
        }
    }

    /// Text the chatbot can match against. Media captions are not considered.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Conversation(text) | Self::ExtendedText(text) => {
                Some(text.trim()).filter(|t| !t.is_empty())
            }
            _ => None,
        }
    }

    /// Content stored on the message row: the text itself or a media label.
    pub fn stored_content(&self) -> Option<String> {
        match self {
            Self::Conversation(text) | Self::ExtendedText(text) => Some(text.clone()),
            Self::Image => Some("[Image]".to_string()),
            Self::Video => Some("[Video]".to_string()),
            Self::Audio => Some("[Audio]".to_string()),
            Self::Document => Some("[Document]".to_string()),
            Self::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub remote_jid: String,
    pub from_me: bool,
    pub message_id: String,
    pub content: MessageContent,
    pub timestamp: Option<DateTime<Utc>>,
    pub push_name: Option<String>,
}

impl InboundMessage {
    fn from_data(data: &Value) -> Option<Self> {
        let message = data.get("message").filter(|m| m.is_object())?;
        let key = data.get("key")?;
        let message_id = key
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())?
            .to_string();

        Some(Self {
            remote_jid: key
                .get("remoteJid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            from_me: key.get("fromMe").and_then(Value::as_bool).unwrap_or(false),
            message_id,
            content: MessageContent::decode(message),
            timestamp: data.get("messageTimestamp").and_then(epoch_seconds),
            push_name: data
                .get("pushName")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Accepts epoch seconds as a JSON number or a numeric string.
fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// `5511999990000:12@s.whatsapp.net` -> `5511999990000`.
pub fn phone_from_jid(jid: &str) -> Option<String> {
    let user = jid.split('@').next().unwrap_or_default();
    let user = user.split(':').next().unwrap_or_default();
    normalize_phone(user)
}
