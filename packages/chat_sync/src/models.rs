//! Wire and timeline types shared by every part of the sync core.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

pub type ConversationId = i64;
pub type DocumentId = i64;

/// Identifier of a message inside one conversation's timeline.
///
/// Server-issued identifiers are integers. Locally minted identifiers are
/// strings with a kind prefix (`temp-`, `error-`, `rt-`, `reply-`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Server(i64),
    Local(String),
}

impl MessageId {
    pub fn optimistic(clock: &LocalClock) -> Self {
        Self::Local(format!("temp-{}", clock.tick()))
    }

    pub fn error(clock: &LocalClock) -> Self {
        Self::Local(format!("error-{}", clock.tick()))
    }

    pub fn realtime(clock: &LocalClock) -> Self {
        Self::Local(format!("rt-{}", clock.tick()))
    }

    /// Deterministic id for a realtime reply that echoes the request token
    /// of the send it answers.
    pub fn reply_to(token: &str) -> Self {
        Self::Local(format!("reply-{token}"))
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Local(s) if s.starts_with("temp-"))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(id) => write!(f, "{id}"),
            MessageId::Local(id) => f.write_str(id),
        }
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self::Server(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    #[serde(default, deserialize_with = "lenient_timestamp_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub original_filename: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub chunk_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient_timestamp_opt")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed: bool,
}

/// Server acknowledgement of a user message sent over the direct request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedMessage {
    pub id: i64,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: ConfirmedMessage,
    pub answer: String,
}

/// Millisecond wall clock that never repeats a value within the process.
#[derive(Debug, Default)]
pub struct LocalClock {
    last: AtomicI64,
}

impl LocalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

/// Parse RFC 3339 timestamps, or naive ISO-8601 timestamps interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn lenient_timestamp_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
    }
}
