use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Classification attached to failed assistant turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "ratelimit")]
    RateLimit,
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "no_api_key")]
    NoApiKey,
    #[serde(rename = "validation")]
    Validation,
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "ratelimit",
            ErrorKind::Server => "server",
            ErrorKind::NoApiKey => "no_api_key",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    /// Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            error: false,
            error_type: None,
            timestamp: Some(Utc::now().timestamp_millis()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn failure(kind: ErrorKind, content: impl Into<String>) -> Self {
        Self {
            error: true,
            error_type: Some(kind),
            ..Self::assistant(content)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(title: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            messages,
            created_at: None,
            last_updated: None,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        system_prompt(&self.messages)
    }
}

pub fn system_prompt(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .first()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
}

/// Rewrites the head system message in place, or prepends one.
pub fn upsert_system_message(messages: &mut Vec<ChatMessage>, prompt: &str) {
    match messages.first_mut() {
        Some(head) if head.role == Role::System => {
            head.content = prompt.to_string();
        }
        _ => messages.insert(0, ChatMessage::system(prompt)),
    }
}

/// Moves the first system message to the head and drops any others.
pub fn normalize_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut system = None;
    let mut rest = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == Role::System {
            if system.is_none() {
                system = Some(msg);
            }
        } else {
            rest.push(msg);
        }
    }
    match system {
        Some(head) => {
            rest.insert(0, head);
            rest
        }
        None => rest,
    }
}
