pub mod attachments;
pub mod cli;
pub mod console;
pub mod history;
pub mod llm;
pub mod models;
pub mod session;

use cli::Args;
use console::{ Console, ConsoleOptions };
use history::preferences::Preferences;
use history::ConversationStore;
use llm::LlmConfig;
use log::info;
use session::{ SessionManager, SessionSettings };
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Completion Endpoint: {}", args.chat_base_url.as_deref().unwrap_or(llm::chat::openai::DEFAULT_ENDPOINT));
    info!("Model Override: {}", args.chat_model.as_deref().unwrap_or("(saved preference)"));
    info!("Streaming: {}", args.stream);
    info!("History Store Type: {}", args.history_type);
    info!("History Key Prefix: {}", args.history_prefix);
    info!("Max Conversations: {}", args.max_conversations);
    info!("Max Retries: {}", args.max_retries);
    info!("Request Timeout: {}s", args.request_timeout_secs);
    info!("Speech Command: {}", args.speech_command.as_deref().unwrap_or("(none)"));
    info!("-------------------------");

    let storage = history::initialize_storage(&args)?;
    let store = ConversationStore::new(storage.clone(), &args.history_prefix, args.max_conversations);
    let preferences = Preferences::new(storage, &args.history_prefix);
    let client = llm::new_client(&LlmConfig::from_args(&args))?;

    let settings = SessionSettings {
        streaming: args.stream,
        default_system_prompt: args.system_prompt.clone(),
        model: args.chat_model.clone(),
        api_key: Some(args.chat_api_key.clone()),
    };
    let mut session = SessionManager::new(client, store, preferences, settings);
    session.init();

    let console = Console::new(session, ConsoleOptions {
        max_attachment_bytes: args.max_attachment_bytes,
        speech_command: args.speech_command.clone().filter(|c| !c.trim().is_empty()),
    });
    console.run().await
}
