use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,

    pub conversation_id: String,

    pub role: MessageRole,

    pub content: String,

    #[serde(
        default,
        alias = "metadata_json",
        deserialize_with = "lenient_metadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<MessageMetadata>,

    #[serde(deserialize_with = "utc_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_status(&self) -> bool {
        matches!(self.metadata, Some(MessageMetadata::Status { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Structured payload attached to a message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageMetadata {
    Questions {
        #[serde(default)]
        questions: Vec<Question>,
    },
    QuestionAnswers {
        #[serde(default)]
        answers: Vec<QuestionAnswer>,
    },
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Completion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        goal_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opportunities_count: Option<u64>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Catch-all for unknown or untagged metadata
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(rename = "type", default)]
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    #[default]
    Text,
    Select,
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// Metadata is advisory: a payload we cannot make sense of becomes
/// `Unknown` instead of rejecting the whole message.
fn lenient_metadata<'de, D>(deserializer: D) -> Result<Option<MessageMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(value) => Some(serde_json::from_value(value).unwrap_or(MessageMetadata::Unknown)),
    })
}

/// RFC 3339, or a naive ISO 8601 timestamp (no offset) taken as UTC. The
/// server writes naive UTC datetimes with `isoformat()`.
fn utc_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid timestamp {raw:?}"))
    })
}

pub fn parse_utc_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Clarifying,
    Processing,
    Completed,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Clarifying => write!(f, "clarifying"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Summary row returned by the conversation listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: ConversationStatus,
    #[serde(deserialize_with = "utc_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "utc_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time history of one conversation, replaced wholesale on refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: ConversationStatus,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationSnapshot {
    pub fn new(id: impl Into<String>, status: ConversationStatus) -> Self {
        Self {
            id: id.into(),
            goal_id: None,
            title: None,
            status,
            messages: Vec::new(),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.status == ConversationStatus::Processing
    }

    pub fn is_completed(&self) -> bool {
        self.status == ConversationStatus::Completed
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
