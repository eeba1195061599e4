mod file;
mod memory;
pub mod preferences;

pub use self::file::FileStorage;
pub use self::memory::MemoryStorage;

use chrono::Utc;
use log::{ error, info, warn };
use rand::Rng;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::Args;
use crate::models::chat::{ normalize_messages, Conversation };

pub const DEFAULT_MAX_CONVERSATIONS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded {
        needed: usize,
        quota: usize,
    },
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// String key-value bucket with local-storage semantics.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid =
        !key.is_empty() &&
        key.chars().all(|c| (c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')) &&
        !key.starts_with('.');
    if valid { Ok(()) } else { Err(StorageError::InvalidKey(key.to_string())) }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("mini-chat-bot"))
        .unwrap_or_else(|| PathBuf::from(".mini-chat-bot"))
}

pub fn create_storage(
    args: &Args
) -> Result<Arc<dyn KeyValueStorage>, Box<dyn Error + Send + Sync>> {
    // every stored key starts with the prefix
    validate_key(&format!("{}conversations", args.history_prefix))?;
    match args.history_type.to_lowercase().as_str() {
        "file" => {
            let dir = args.history_dir.clone().map(PathBuf::from).unwrap_or_else(default_data_dir);
            let storage = FileStorage::new(dir)?;
            Ok(Arc::new(storage))
        }
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_storage(
    args: &Args
) -> Result<Arc<dyn KeyValueStorage>, Box<dyn Error + Send + Sync>> {
    match args.history_dir.as_deref() {
        Some(dir) => info!("Conversations will be stored in: {} at {}", args.history_type, dir),
        None => info!("Conversations will be stored in: {}", args.history_type),
    }
    create_storage(args)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Base-36 millisecond timestamp followed by a base-36 random suffix.
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random: u64 = rand::thread_rng().gen();
    let suffix = to_base36(random);
    format!("{}{}", to_base36(millis), &suffix[..suffix.len().min(9)])
}

/// Conversation records in one namespaced bucket plus a separate
/// current-conversation pointer.
///
/// Storage failures never escape: they are logged and the caller gets the
/// same default it would get for missing data.
#[derive(Clone)]
pub struct ConversationStore {
    storage: Arc<dyn KeyValueStorage>,
    conversations_key: String,
    current_key: String,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, prefix: &str, max_conversations: usize) -> Self {
        Self {
            storage,
            conversations_key: format!("{}conversations", prefix),
            current_key: format!("{}current_conversation", prefix),
            max_conversations: max_conversations.max(1),
        }
    }

    pub fn max_conversations(&self) -> usize {
        self.max_conversations
    }

    fn load(&self) -> Vec<Conversation> {
        let raw = match self.storage.get_item(&self.conversations_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return Vec::new();
            }
            Err(e) => {
                error!("Failed to read conversations: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Conversation>>(&raw) {
            Ok(list) =>
                list
                    .into_iter()
                    .map(|mut c| {
                        c.messages = normalize_messages(std::mem::take(&mut c.messages));
                        c
                    })
                    .collect(),
            Err(e) => {
                error!("Stored conversations are corrupt, ignoring them: {}", e);
                Vec::new()
            }
        }
    }

    fn persist(&self, list: &[Conversation]) -> bool {
        let result = serde_json
            ::to_string(list)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.set_item(&self.conversations_key, &json));
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to persist {} conversation(s): {}", list.len(), e);
                false
            }
        }
    }

    /// Newest `last_updated` first.
    pub fn get_all(&self) -> Vec<Conversation> {
        let mut list = self.load();
        list.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        list
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.load()
            .into_iter()
            .find(|c| c.id == id)
    }

    /// Upserts by id and returns the resolved id.
    pub fn save(&self, mut conversation: Conversation) -> String {
        let mut list = self.load();
        if conversation.id.is_empty() {
            conversation.id = generate_id();
        }
        let id = conversation.id.clone();
        let now = Utc::now();

        let position = list.iter().position(|c| c.id == id);
        let previous = position.map(|i| list.remove(i));
        conversation.created_at = conversation.created_at
            .or_else(|| previous.and_then(|p| p.created_at))
            .or(Some(now));
        conversation.last_updated = Some(now);

        list.insert(0, conversation);
        list.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

        if list.len() > self.max_conversations {
            let evicted = list.split_off(self.max_conversations);
            let current = self.get_current_id();
            for gone in &evicted {
                info!("Evicting conversation {} ('{}') past retention cap", gone.id, gone.title);
                if current.as_deref() == Some(gone.id.as_str()) {
                    self.clear_current_id();
                }
            }
        }

        self.persist(&list);
        id
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut list = self.load();
        let before = list.len();
        list.retain(|c| c.id != id);
        let removed = list.len() != before;
        if removed {
            self.persist(&list);
        } else {
            warn!("Delete requested for unknown conversation {}", id);
        }
        if self.get_current_id().as_deref() == Some(id) {
            self.clear_current_id();
        }
        removed
    }

    pub fn set_current_id(&self, id: &str) {
        if let Err(e) = self.storage.set_item(&self.current_key, id) {
            error!("Failed to store current conversation id: {}", e);
        }
    }

    pub fn get_current_id(&self) -> Option<String> {
        match self.storage.get_item(&self.current_key) {
            Ok(id) => id.filter(|s| !s.trim().is_empty()),
            Err(e) => {
                error!("Failed to read current conversation id: {}", e);
                None
            }
        }
    }

    pub fn clear_current_id(&self) {
        if let Err(e) = self.storage.remove_item(&self.current_key) {
            error!("Failed to clear current conversation id: {}", e);
        }
    }
}
