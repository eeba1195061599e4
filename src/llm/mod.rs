pub mod chat;
pub mod error;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use self::chat::ChatClient;
use self::chat::openai::OpenAIChatClient;
use self::error::CompletionError;
use self::retry::RetryPolicy;
use crate::cli::Args;

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub const AVAILABLE_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-3.5-turbo",
];

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl LlmConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            base_url: args.chat_base_url.clone().filter(|u| !u.trim().is_empty()),
            retry: RetryPolicy::new(
                args.max_retries,
                Duration::from_millis(args.retry_base_delay_ms),
                Duration::from_millis(args.retry_max_delay_ms)
            ),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            ..Self::default()
        }
    }
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, CompletionError> {
    let client = OpenAIChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
