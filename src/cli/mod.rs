use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Completion Provider Args ---
    /// API key for the completion endpoint. Takes precedence over a key saved with /key.
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Full chat completions URL (default: https://api.openai.com/v1/chat/completions)
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// Model name (e.g., gpt-4o, gpt-4o-mini). Overrides the saved preference.
    #[arg(long, env = "CHAT_MODEL")]
    pub chat_model: Option<String>,

    /// Stream replies token by token instead of waiting for the whole answer
    #[arg(long, env = "CHAT_STREAM", default_value = "true", action = clap::ArgAction::Set)]
    pub stream: bool,

    // --- Retry Args ---
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "1000")]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "30000")]
    pub retry_max_delay_ms: u64,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "60")]
    pub request_timeout_secs: u64,

    // --- History Store Args ---
    /// History store type (file, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "file")]
    pub history_type: String,

    /// Directory for the file history store (default: the platform data dir)
    #[arg(long, env = "HISTORY_DIR")]
    pub history_dir: Option<String>,

    /// Prefix applied to every stored key
    #[arg(long, env = "HISTORY_PREFIX", default_value = "chatbot_")]
    pub history_prefix: String,

    /// Most recently updated conversations to keep
    #[arg(long, env = "MAX_CONVERSATIONS", default_value = "50")]
    pub max_conversations: usize,

    // --- General App Args ---
    /// System prompt for new conversations
    #[arg(long, env = "SYSTEM_PROMPT", default_value = "You are a helpful assistant.")]
    pub system_prompt: String,

    /// Bytes of an attachment included before truncation
    #[arg(long, env = "MAX_ATTACHMENT_BYTES", default_value = "102400")]
    pub max_attachment_bytes: usize,

    /// Command that reads reply text on stdin and speaks it (e.g., "espeak")
    #[arg(long, env = "SPEECH_COMMAND")]
    pub speech_command: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
