use async_trait::async_trait;
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use mini_chat_bot::attachments::Attachment;
use mini_chat_bot::history::preferences::Preferences;
use mini_chat_bot::history::{ ConversationStore, MemoryStorage };
use mini_chat_bot::llm::chat::openai::OpenAIChatClient;
use mini_chat_bot::llm::chat::{ ChatClient, ChunkStream, CompletionRequest };
use mini_chat_bot::llm::error::CompletionError;
use mini_chat_bot::llm::retry::RetryPolicy;
use mini_chat_bot::models::chat::{ ChatMessage, Conversation, ErrorKind, Role };
use mini_chat_bot::session::{ SendOutcome, SessionError, SessionManager, SessionSettings };

/// Streams fixed chunks, optionally followed by a failure.
struct Scripted {
    chunks: Vec<&'static str>,
    error: Option<ErrorKind>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Scripted {
    fn reply(chunks: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self { chunks, error: None, requests: Mutex::new(Vec::new()) })
    }

    fn failing(chunks: Vec<&'static str>, kind: ErrorKind) -> Arc<Self> {
        Arc::new(Self { chunks, error: Some(kind), requests: Mutex::new(Vec::new()) })
    }

    fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }
}

#[async_trait]
impl ChatClient for Scripted {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.error {
            Some(kind) => Err(CompletionError::new(kind, "scripted failure")),
            None => Ok(ChatMessage::assistant(self.chunks.concat())),
        }
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<ChunkStream, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut items: Vec<Result<String, CompletionError>> = self.chunks
            .iter()
            .map(|c| Ok(c.to_string()))
            .collect();
        if let Some(kind) = self.error {
            if self.chunks.is_empty() {
                return Err(CompletionError::new(kind, "scripted failure"));
            }
            items.push(Err(CompletionError::new(kind, "scripted failure")));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Cancels the request after `after` chunks but keeps delivering, like a
/// transport that has not noticed the abort yet.
struct CancelMidStream {
    chunks: Vec<&'static str>,
    after: usize,
}

#[async_trait]
impl ChatClient for CancelMidStream {
    async fn complete(&self, _request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        Ok(ChatMessage::assistant(self.chunks.concat()))
    }

    async fn complete_stream(
        &self,
        _request: &CompletionRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send + '_),
        cancel: &CancellationToken
    ) -> Result<ChatMessage, CompletionError> {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i == self.after {
                cancel.cancel();
            }
            on_chunk(chunk);
        }
        Ok(ChatMessage::assistant(self.chunks.concat()))
    }
}

/// Never produces a token.
struct Silent;

#[async_trait]
impl ChatClient for Silent {
    async fn complete(&self, _request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        futures::future::pending().await
    }

    async fn stream_completion(&self, _request: &CompletionRequest) -> Result<ChunkStream, CompletionError> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

/// Reads the stored current conversation while the request is outstanding.
struct Snooping {
    store: ConversationStore,
    stored: Mutex<Option<Conversation>>,
}

impl Snooping {
    fn snapshot(&self) {
        let current = self.store.get_current_id().and_then(|id| self.store.get(&id));
        *self.stored.lock().unwrap() = current;
    }
}

#[async_trait]
impl ChatClient for Snooping {
    async fn complete(&self, _request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        self.snapshot();
        Ok(ChatMessage::assistant("noted"))
    }

    async fn stream_completion(&self, _request: &CompletionRequest) -> Result<ChunkStream, CompletionError> {
        self.snapshot();
        Ok(Box::pin(futures::stream::iter(vec![Ok("noted".to_string())])))
    }
}

fn settings(streaming: bool) -> SessionSettings {
    SessionSettings {
        streaming,
        default_system_prompt: "You are a helpful assistant.".into(),
        model: None,
        api_key: Some("sk-test".into()),
    }
}

fn manager_on(storage: Arc<MemoryStorage>, client: Arc<dyn ChatClient>, settings: SessionSettings) -> SessionManager {
    let store = ConversationStore::new(storage.clone(), "chatbot_", 50);
    let preferences = Preferences::new(storage, "chatbot_");
    let mut manager = SessionManager::new(client, store, preferences, settings);
    manager.init();
    manager
}

fn manager(client: Arc<dyn ChatClient>) -> (SessionManager, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    (manager_on(storage.clone(), client, settings(true)), storage)
}

fn roles(manager: &SessionManager) -> Vec<Role> {
    manager
        .messages()
        .iter()
        .map(|m| m.role)
        .collect()
}

#[tokio::test]
async fn init_provisions_conversation_with_system_prompt() {
    let (manager, _) = manager(Scripted::reply(vec![]));
    let state = manager.state();
    assert!(state.active_conversation_id.is_some());
    assert_eq!(state.title, "New Conversation");
    assert_eq!(state.model, "gpt-4o");
    assert_eq!(roles(&manager), vec![Role::System]);
    assert_eq!(manager.conversations().len(), 1);
}

#[tokio::test]
async fn streamed_reply_fills_a_single_placeholder() {
    let client = Scripted::reply(vec!["Hel", "lo", " world"]);
    let (mut manager, storage) = manager(client.clone());

    let mut seen = Vec::new();
    let outcome = manager.send_message("say hello", &[], |d| seen.push(d.to_string())).await.unwrap();

    assert_eq!(seen, vec!["Hel", "lo", " world"]);
    match outcome {
        SendOutcome::Replied(reply) => assert_eq!(reply.content, "Hello world"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(roles(&manager), vec![Role::System, Role::User, Role::Assistant]);
    assert!(!manager.state().loading);
    assert_eq!(manager.state().title, "say hello");

    // the placeholder is never part of the outgoing history
    let sent = client.last_request();
    assert_eq!(sent.messages.last().map(|m| m.role), Some(Role::User));
    assert_eq!(sent.model, "gpt-4o");

    let reopened = manager_on(storage, Scripted::reply(vec![]), settings(true));
    assert_eq!(reopened.messages(), manager.messages());
    assert_eq!(reopened.state().title, "say hello");
}

#[tokio::test]
async fn non_streaming_reply_is_appended() {
    let storage = Arc::new(MemoryStorage::new());
    let mut manager = manager_on(storage, Scripted::reply(vec!["all ", "at once"]), settings(false));

    let mut chunks = 0;
    let outcome = manager.send_message("hi", &[], |_| chunks += 1).await.unwrap();

    assert_eq!(chunks, 0);
    assert!(matches!(outcome, SendOutcome::Replied(ref m) if m.content == "all at once"));
    assert_eq!(roles(&manager), vec![Role::System, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn abort_mid_stream_keeps_partial_and_ignores_late_chunks() {
    let client = Arc::new(CancelMidStream { chunks: vec!["1 ", "2 ", "3 ", "4 ", "5 "], after: 2 });
    let (mut manager, _) = manager(client);

    let mut echoed = String::new();
    let outcome = manager.send_message("count", &[], |d| echoed.push_str(d)).await.unwrap();

    assert_eq!(outcome, SendOutcome::Aborted { partial: Some("1 2 ".into()) });
    assert_eq!(echoed, "1 2 ");
    let last = manager.messages().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "1 2 ");
    assert!(!manager.state().loading);
    assert!(manager.state().in_flight.is_none());
}

#[tokio::test]
async fn abort_before_first_token_drops_placeholder() {
    let (mut manager, _) = manager(Arc::new(Silent));
    let handle = manager.abort_handle();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort()
    });

    let outcome = manager.send_message("anyone there?", &[], |_| {}).await.unwrap();

    assert!(trigger.await.unwrap());
    assert_eq!(outcome, SendOutcome::Aborted { partial: None });
    assert_eq!(roles(&manager), vec![Role::System, Role::User]);
    assert!(!manager.abort());
}

#[tokio::test]
async fn failure_rolls_back_partial_reply() {
    let client = Scripted::failing(vec!["par", "tial"], ErrorKind::Server);
    let (mut manager, _) = manager(client);

    let outcome = manager.send_message("explain", &[], |_| {}).await.unwrap();

    match outcome {
        SendOutcome::Failed { message, needs_credentials } => {
            assert!(!needs_credentials);
            assert_eq!(message.error_type, Some(ErrorKind::Server));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let messages = manager.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].content, "explain");
    assert!(messages[2].error);
    assert!(!messages.iter().any(|m| m.content.contains("partial")));
}

#[tokio::test]
async fn auth_failure_asks_for_credentials() {
    let (mut manager, _) = manager(Scripted::failing(vec![], ErrorKind::Auth));
    let outcome = manager.send_message("hi", &[], |_| {}).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Failed { needs_credentials: true, .. }));
}

#[tokio::test]
async fn missing_key_fails_without_network() {
    let client = OpenAIChatClient::new(
        Some("http://127.0.0.1:9/v1/chat/completions".into()),
        RetryPolicy::none(),
        Duration::from_secs(1),
        Duration::from_secs(1)
    ).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let mut settings = settings(true);
    settings.api_key = None;
    let mut manager = manager_on(storage, Arc::new(client), settings);
    assert!(!manager.has_api_key());

    let outcome = manager.send_message("hi", &[], |_| {}).await.unwrap();

    match outcome {
        SendOutcome::Failed { message, needs_credentials } => {
            assert!(needs_credentials);
            assert_eq!(message.error_type, Some(ErrorKind::NoApiKey));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn stored_key_is_used_when_none_is_configured() {
    let storage = Arc::new(MemoryStorage::new());
    Preferences::new(storage.clone(), "chatbot_").set_api_key("sk-stored");
    let client = Scripted::reply(vec!["ok"]);
    let mut settings = settings(true);
    settings.api_key = Some(String::new());
    let mut manager = manager_on(storage, client.clone(), settings);

    manager.send_message("hi", &[], |_| {}).await.unwrap();
    assert_eq!(client.last_request().api_key, "sk-stored");
}

#[tokio::test]
async fn empty_input_is_rejected() {
    let (mut manager, _) = manager(Scripted::reply(vec!["unused"]));
    let err = manager.send_message("   ", &[], |_| {}).await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyMessage));
    assert_eq!(roles(&manager), vec![Role::System]);
}

#[tokio::test]
async fn attachment_only_turn_gets_fallback_title() {
    let (mut manager, _) = manager(Scripted::reply(vec!["read it"]));
    let files = [Attachment::new("notes.txt", "line one")];
    manager.send_message("", &files, |_| {}).await.unwrap();

    assert_eq!(manager.state().title, "File Upload");
    assert!(manager.messages()[1].content.starts_with("--- CONTENT OF FILE: notes.txt ---"));
}

#[tokio::test]
async fn long_first_message_is_truncated_into_title() {
    let (mut manager, _) = manager(Scripted::reply(vec!["sure"]));
    manager.send_message("Please explain how the borrow checker works", &[], |_| {}).await.unwrap();
    manager.send_message("and lifetimes?", &[], |_| {}).await.unwrap();
    assert_eq!(manager.state().title, "Please explain how the borr...");
}

#[tokio::test]
async fn system_prompt_updates_are_idempotent() {
    let (mut manager, _) = manager(Scripted::reply(vec![]));
    manager.update_system_prompt("Be terse.");
    manager.update_system_prompt("Be terse.");

    let systems: Vec<_> = manager
        .messages()
        .iter()
        .filter(|m| m.role == Role::System)
        .collect();
    assert_eq!(systems.len(), 1);
    assert_eq!(systems[0].content, "Be terse.");
    assert_eq!(manager.state().system_prompt, "Be terse.");
}

#[tokio::test]
async fn clear_keeps_only_the_system_prompt() {
    let (mut manager, _) = manager(Scripted::reply(vec!["ok"]));
    manager.update_system_prompt("Answer in French.");
    manager.send_message("hello", &[], |_| {}).await.unwrap();
    let before = manager.state().active_conversation_id.clone();

    manager.clear_conversation();

    assert_ne!(manager.state().active_conversation_id, before);
    assert_eq!(roles(&manager), vec![Role::System]);
    assert_eq!(manager.messages()[0].content, "Answer in French.");
    assert_eq!(manager.conversations().len(), 2);
}

#[tokio::test]
async fn switching_restores_each_conversation() {
    let (mut manager, _) = manager(Scripted::reply(vec!["reply"]));
    manager.send_message("first topic", &[], |_| {}).await.unwrap();
    let first = manager.state().active_conversation_id.clone().unwrap();

    manager.new_conversation();
    manager.send_message("second topic", &[], |_| {}).await.unwrap();
    assert_eq!(manager.state().title, "second topic");

    manager.switch_conversation(&first).unwrap();
    assert_eq!(manager.state().title, "first topic");
    assert_eq!(manager.messages()[1].content, "first topic");

    assert!(matches!(manager.switch_conversation("missing"), Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn deleting_active_conversation_falls_back() {
    let (mut manager, _) = manager(Scripted::reply(vec!["reply"]));
    manager.send_message("keep me", &[], |_| {}).await.unwrap();
    let kept = manager.state().active_conversation_id.clone().unwrap();
    let doomed = manager.new_conversation();

    manager.delete_conversation(&doomed).unwrap();
    assert_eq!(manager.state().active_conversation_id.as_deref(), Some(kept.as_str()));

    manager.delete_conversation(&kept).unwrap();
    let fresh = manager.state().active_conversation_id.clone().unwrap();
    assert_ne!(fresh, kept);
    assert_eq!(roles(&manager), vec![Role::System]);

    assert!(matches!(manager.delete_conversation(&kept), Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn retention_cap_applies_through_the_manager() {
    let storage = Arc::new(MemoryStorage::new());
    let store = ConversationStore::new(storage.clone(), "chatbot_", 2);
    let preferences = Preferences::new(storage, "chatbot_");
    let mut manager = SessionManager::new(Scripted::reply(vec!["ok"]), store, preferences, settings(true));
    manager.init();

    for topic in ["one", "two", "three"] {
        manager.new_conversation();
        manager.send_message(topic, &[], |_| {}).await.unwrap();
    }

    let titles: Vec<_> = manager
        .conversations()
        .into_iter()
        .map(|c| c.title)
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"three".to_string()));
}

#[tokio::test]
async fn model_and_rename_are_persisted() {
    let (mut manager, storage) = manager(Scripted::reply(vec!["ok"]));
    manager.set_model("gpt-4o-mini");
    manager.rename_conversation("  Trip planning ");

    let prefs = Preferences::new(storage.clone(), "chatbot_");
    assert_eq!(prefs.model().as_deref(), Some("gpt-4o-mini"));

    let reopened = manager_on(storage, Scripted::reply(vec![]), settings(true));
    assert_eq!(reopened.state().model, "gpt-4o-mini");
    assert_eq!(reopened.state().title, "Trip planning");
}

#[tokio::test]
async fn export_names_file_after_title() {
    let (mut manager, _) = manager(Scripted::reply(vec!["Hi!"]));
    manager.send_message("Hello there", &[], |_| {}).await.unwrap();

    let export = manager.export_conversation();
    assert!(export.file_name.starts_with("hello_there_"));
    assert!(export.file_name.ends_with(".txt"));
    assert_eq!(export.content, "You: Hello there\n\nAssistant: Hi!");
}

#[tokio::test]
async fn user_turn_is_stored_before_the_reply_arrives() {
    for streaming in [true, false] {
        let storage = Arc::new(MemoryStorage::new());
        let client = Arc::new(Snooping {
            store: ConversationStore::new(storage.clone(), "chatbot_", 50),
            stored: Mutex::new(None),
        });
        let mut manager = manager_on(storage, client.clone(), settings(streaming));

        manager.send_message("remember me", &[], |_| {}).await.unwrap();

        let stored = client.stored.lock().unwrap().clone().expect("nothing stored mid-request");
        let roles: Vec<Role> = stored.messages
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(stored.messages[1].content, "remember me");
        assert_eq!(stored.title, "remember me");
    }
}
