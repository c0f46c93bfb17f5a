//! Keyword chatbot: business-hours gate, prioritized rule matching, and the
//! responder flow that answers inbound WhatsApp messages.

use chrono::{NaiveTime, Timelike};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    recorder::record_outbound,
    types::{AppState, ChatbotConfig, ChatbotRule, MatchType},
    webhook::{phone_from_jid, WebhookEnvelope},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl BusinessHours {
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: parse_clock(start)?,
            end: parse_clock(end)?,
        })
    }

    /// Inclusive on both ends at second precision. A window with
    /// `end < start` contains nothing; overnight windows are not supported.
    pub fn contains(&self, now: NaiveTime) -> bool {
        let now = now.with_nanosecond(0).unwrap_or(now);
        self.start <= now && now <= self.end
    }
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// No configured hours means always open. Unparseable hours mean closed.
pub fn within_business_hours(config: &ChatbotConfig, now: NaiveTime) -> bool {
    let (start, end) = match (&config.business_hours_start, &config.business_hours_end) {
        (None, None) => return true,
        (Some(start), Some(end)) => (start.as_str(), end.as_str()),
        (start, end) => {
            tracing::warn!(tenant = %config.tenant_id, ?start, ?end, "incomplete business hours");
            return false;
        }
    };
    match BusinessHours::parse(start, end) {
        Some(hours) => {
            if hours.end < hours.start {
                tracing::warn!(
                    tenant = %config.tenant_id,
                    start,
                    end,
                    "business hours end before start; window is empty"
                );
            }
            hours.contains(now)
        }
        None => {
            tracing::warn!(tenant = %config.tenant_id, start, end, "unparseable business hours");
            false
        }
    }
}

pub fn keyword_matches(match_type: MatchType, text: &str, keyword: &str) -> bool {
    let text = text.trim().to_lowercase();
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    match match_type {
        MatchType::Contains => text.contains(&keyword),
        MatchType::Exact => text == keyword,
        MatchType::StartsWith => text.starts_with(&keyword),
    }
}

/// Highest priority active rule with any matching keyword. Equal priorities
/// keep their stored order.
pub fn match_rule<'a>(rules: &'a [ChatbotRule], text: &str) -> Option<&'a ChatbotRule> {
    let mut ordered = rules.iter().filter(|r| r.active).collect::<Vec<_>>();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered.into_iter().find(|rule| {
        rule.keywords
            .iter()
            .any(|keyword| keyword_matches(rule.match_type, text, keyword))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ruleId")]
pub enum ReplySource {
    OutOfHours,
    Rule(Uuid),
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

/// Picks the reply for `text`. Rules are consulted only inside business hours.
pub fn select_reply(
    config: &ChatbotConfig,
    rules: &[ChatbotRule],
    text: &str,
    now: NaiveTime,
) -> Reply {
    if !within_business_hours(config, now) {
        return Reply {
            text: config.out_of_hours_message.clone(),
            source: ReplySource::OutOfHours,
        };
    }
    match match_rule(rules, text) {
        Some(rule) => Reply {
            text: rule.response.clone(),
            source: ReplySource::Rule(rule.id),
        },
        None => Reply {
            text: config.fallback_message.clone(),
            source: ReplySource::Fallback,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderOutcome {
    Ignored(&'static str),
    UnknownInstance,
    Disabled,
    AlreadyAnswered,
    Replied { to: String, reply: Reply },
}

impl ResponderOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Ignored(reason) => *reason,
            Self::UnknownInstance => "Instance not found",
            Self::Disabled => "Chatbot disabled",
            Self::AlreadyAnswered => "Message already answered",
            Self::Replied { .. } => "Reply sent",
        }
    }
}

/// Answers one inbound webhook event. `now` is the local wall-clock time used
/// for the business-hours check.
pub async fn respond(
    state: &AppState,
    envelope: &WebhookEnvelope,
    now: NaiveTime,
) -> Result<ResponderOutcome, AppError> {
    let Some(inbound) = envelope.inbound_message() else {
        return Ok(ResponderOutcome::Ignored("Event ignored"));
    };
    if inbound.from_me {
        return Ok(ResponderOutcome::Ignored("Own message ignored"));
    }
    let Some(text) = inbound.content.text() else {
        return Ok(ResponderOutcome::Ignored("No text to answer"));
    };

    let Some(provider) = state.store.provider_by_instance(&envelope.instance).await? else {
        tracing::debug!(instance = %envelope.instance, "chatbot event for unknown instance");
        return Ok(ResponderOutcome::UnknownInstance);
    };
    let config = match state.store.chatbot_config(&provider.tenant_id).await? {
        Some(config) if config.enabled => config,
        _ => return Ok(ResponderOutcome::Disabled),
    };
    let Some(phone) = phone_from_jid(&inbound.remote_jid) else {
        return Ok(ResponderOutcome::Ignored("No phone in remoteJid"));
    };

    let rules = if within_business_hours(&config, now) {
        state.store.chatbot_rules(config.id).await?
    } else {
        Vec::new()
    };
    let reply = select_reply(&config, &rules, text, now);

    if !state
        .store
        .claim_reply(&provider.tenant_id, &inbound.message_id)
        .await?
    {
        tracing::info!(
            tenant = %provider.tenant_id,
            message_id = %inbound.message_id,
            "duplicate delivery, reply already sent"
        );
        return Ok(ResponderOutcome::AlreadyAnswered);
    }

    let receipt = match state.provider.send_text(&provider, &phone, &reply.text).await {
        Ok(receipt) => receipt,
        Err(err) => {
            if let Err(release_err) = state
                .store
                .release_reply(&provider.tenant_id, &inbound.message_id)
                .await
            {
                tracing::warn!(error = %release_err, "failed to release reply claim");
            }
            return Err(err.into());
        }
    };

    tracing::info!(
        tenant = %provider.tenant_id,
        to = %phone,
        source = ?reply.source,
        "chatbot reply sent"
    );
    if let Err(err) = record_outbound(
        state.store.as_ref(),
        &provider,
        &inbound.remote_jid,
        &reply.text,
        &receipt,
        None,
    )
    .await
    {
        tracing::warn!(error = %err, "failed to record chatbot reply");
    }

    Ok(ResponderOutcome::Replied { to: phone, reply })
}
