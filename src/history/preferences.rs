use log::error;
use serde::{ de::DeserializeOwned, Serialize };
use std::sync::Arc;

use super::{ KeyValueStorage, StorageError };

/// User settings, each under its own namespaced key.
#[derive(Clone)]
pub struct Preferences {
    storage: Arc<dyn KeyValueStorage>,
    prefix: String,
}

impl Preferences {
    pub fn new(storage: Arc<dyn KeyValueStorage>, prefix: &str) -> Self {
        Self {
            storage,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let key = self.key(name);
        let raw = match self.storage.get_item(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                error!("Failed to read preference '{}': {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Ignoring malformed preference '{}': {}", key, e);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) {
        let key = self.key(name);
        let result = serde_json
            ::to_string(value)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.set_item(&key, &json));
        if let Err(e) = result {
            error!("Failed to store preference '{}': {}", key, e);
        }
    }

    fn remove(&self, name: &str) {
        let key = self.key(name);
        if let Err(e) = self.storage.remove_item(&key) {
            error!("Failed to remove preference '{}': {}", key, e);
        }
    }

    pub fn model(&self) -> Option<String> {
        self.read::<String>("model").filter(|m| !m.trim().is_empty())
    }

    pub fn set_model(&self, model: &str) {
        self.write("model", &model);
    }

    pub fn voice_enabled(&self) -> bool {
        self.read("voice_enabled").unwrap_or(false)
    }

    pub fn set_voice_enabled(&self, enabled: bool) {
        self.write("voice_enabled", &enabled);
    }

    pub fn dark_mode(&self) -> bool {
        self.read("dark_mode").unwrap_or(false)
    }

    pub fn set_dark_mode(&self, enabled: bool) {
        self.write("dark_mode", &enabled);
    }

    pub fn api_key(&self) -> Option<String> {
        self.read::<String>("api_key").filter(|k| !k.trim().is_empty())
    }

    pub fn set_api_key(&self, api_key: &str) {
        if api_key.trim().is_empty() {
            self.remove("api_key");
        } else {
            self.write("api_key", &api_key.trim());
        }
    }
}
