pub mod compose;
pub mod state;

use chrono::Local;
use log::{ error, info, warn };
use std::sync::{ Arc, Mutex };
use tokio_util::sync::CancellationToken;

use self::compose::{ compose_user_content, derive_title, export_transcript, ExportedTranscript, NEW_CONVERSATION_TITLE };
use self::state::{ reduce, Action, SessionState };
use crate::attachments::Attachment;
use crate::history::preferences::Preferences;
use crate::history::ConversationStore;
use crate::llm::chat::{ ChatClient, CompletionRequest };
use crate::llm::error::CompletionError;
use crate::llm::DEFAULT_MODEL;
use crate::models::chat::{ system_prompt, ChatMessage, Conversation, ErrorKind, Role };

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a request is already in flight for this conversation")]
    Busy,
    #[error("nothing to send")]
    EmptyMessage,
    #[error("conversation '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub streaming: bool,
    pub default_system_prompt: String,
    /// Overrides the stored model preference when set.
    pub model: Option<String>,
    /// Overrides the stored API key when set.
    pub api_key: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            streaming: true,
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Replied(ChatMessage),
    Failed {
        message: ChatMessage,
        needs_credentials: bool,
    },
    Aborted {
        partial: Option<String>,
    },
}

/// Cancels whichever request the owning session has in flight.
#[derive(Clone, Default)]
pub struct AbortHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl AbortHandle {
    fn arm(&self, token: CancellationToken) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(token);
        }
    }

    fn disarm(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    /// Returns false when nothing was in flight.
    pub fn abort(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) =>
                match slot.as_ref() {
                    Some(token) => {
                        token.cancel();
                        true
                    }
                    None => false,
                }
            Err(_) => false,
        }
    }
}

/// The single authority over what the user sees.
///
/// Every visible mutation goes through [`reduce`]; this type adds the I/O
/// around it: completion requests, persistence and preference updates.
pub struct SessionManager {
    state: SessionState,
    store: ConversationStore,
    preferences: Preferences,
    client: Arc<dyn ChatClient>,
    settings: SessionSettings,
    api_key: String,
    abort: AbortHandle,
    next_request_id: u64,
}

impl SessionManager {
    pub fn new(
        client: Arc<dyn ChatClient>,
        store: ConversationStore,
        preferences: Preferences,
        settings: SessionSettings
    ) -> Self {
        let model = settings.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| preferences.model())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_key = settings.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| preferences.api_key())
            .unwrap_or_default();

        let state = SessionState {
            model,
            system_prompt: settings.default_system_prompt.clone(),
            ..SessionState::default()
        };

        Self {
            state,
            store,
            preferences,
            client,
            settings,
            api_key,
            abort: AbortHandle::default(),
            next_request_id: 0,
        }
    }

    /// Restores the current conversation, the most recent one, or a new one.
    pub fn init(&mut self) {
        let restored = self.store
            .get_current_id()
            .and_then(|id| self.store.get(&id))
            .or_else(|| self.store.get_all().into_iter().next());

        match restored {
            Some(conversation) => {
                info!("Restored conversation {} ('{}')", conversation.id, conversation.title);
                self.store.set_current_id(&conversation.id);
                self.dispatch(Action::Load(conversation));
            }
            None => {
                let id = self.provision(self.fresh_messages());
                info!("No stored conversations, started {}", id);
            }
        }
    }

    pub fn teardown(&mut self) {
        self.abort();
        self.persist_if_needed();
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.state.messages
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.get_all()
    }

    fn dispatch(&mut self, action: Action) {
        let current = std::mem::take(&mut self.state);
        self.state = reduce(current, action);
    }

    fn fresh_messages(&self) -> Vec<ChatMessage> {
        let prompt = if self.state.system_prompt.trim().is_empty() {
            self.settings.default_system_prompt.clone()
        } else {
            self.state.system_prompt.clone()
        };
        vec![ChatMessage::system(prompt)]
    }

    /// Saves a new record, makes it current and shows it.
    fn provision(&mut self, messages: Vec<ChatMessage>) -> String {
        let id = self.store.save(Conversation::new(NEW_CONVERSATION_TITLE, messages));
        self.store.set_current_id(&id);
        let conversation = self.store
            .get(&id)
            .unwrap_or_else(|| {
                warn!("Conversation {} could not be read back, continuing in memory", id);
                Conversation { id: id.clone(), ..Conversation::new(NEW_CONVERSATION_TITLE, self.fresh_messages()) }
            });
        self.dispatch(Action::Load(conversation));
        id
    }

    fn save_now(&mut self) {
        if self.state.active_conversation_id.is_some() {
            self.store.save(self.state.to_conversation());
        }
    }

    fn persist_if_needed(&mut self) {
        if self.state.messages.len() > 1 {
            self.save_now();
        }
    }

    /// Stores the user's turn while the reply is still outstanding, without
    /// the empty streaming placeholder.
    fn persist_pending_turn(&mut self) {
        if self.state.active_conversation_id.is_none() {
            return;
        }
        let target = self.state.in_flight.as_ref().and_then(|f| f.target_id.clone());
        let mut conversation = self.state.to_conversation();
        conversation.messages.retain(|m| Some(&m.id) != target.as_ref());
        self.store.save(conversation);
    }

    fn outgoing_messages(&self) -> Vec<ChatMessage> {
        let target = self.state.in_flight.as_ref().and_then(|f| f.target_id.as_deref());
        self.state.messages
            .iter()
            .filter(|m| !m.error && Some(m.id.as_str()) != target)
            .cloned()
            .collect()
    }

    pub async fn send_message<F>(
        &mut self,
        text: &str,
        attachments: &[Attachment],
        mut on_chunk: F
    ) -> Result<SendOutcome, SessionError>
        where F: FnMut(&str) + Send
    {
        if self.state.loading {
            return Err(SessionError::Busy);
        }
        let content = compose_user_content(text, attachments);
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.state.active_conversation_id.is_none() {
            self.provision(self.fresh_messages());
        }

        let title = if self.state.has_user_message() { None } else { Some(derive_title(text)) };
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let streaming = self.settings.streaming;
        let placeholder = if streaming { Some(ChatMessage::assistant("")) } else { None };
        let target_id = placeholder.as_ref().map(|p| p.id.clone());

        self.dispatch(Action::SendStarted {
            request_id,
            user: ChatMessage::user(content),
            placeholder,
            title,
        });
        self.persist_pending_turn();

        let request = CompletionRequest::new(
            self.outgoing_messages(),
            self.state.model.clone(),
            self.api_key.clone()
        );
        let token = CancellationToken::new();
        self.abort.arm(token.clone());
        info!(
            "Sending turn {} ({} messages, model={}, streaming={})",
            request_id,
            request.messages.len(),
            request.model,
            streaming
        );

        let result = if streaming {
            let client = Arc::clone(&self.client);
            let state = &mut self.state;
            let guard = token.clone();
            let mut acc = String::new();
            let mut forward = |delta: &str| {
                if guard.is_cancelled() {
                    return;
                }
                acc.push_str(delta);
                let current = std::mem::take(state);
                *state = reduce(current, Action::StreamChunk { request_id, content: acc.clone() });
                on_chunk(delta);
            };
            client.complete_stream(&request, &mut forward, &token).await
        } else {
            tokio::select! {
                _ = token.cancelled() => Err(CompletionError::cancelled()),
                reply = self.client.complete(&request) => reply,
            }
        };
        self.abort.disarm();

        let outcome = match result {
            Ok(_) if token.is_cancelled() => self.settle_aborted(request_id, target_id.as_deref()),
            Ok(reply) => {
                self.dispatch(Action::Settled { request_id, reply: reply.clone() });
                let settled = target_id
                    .as_deref()
                    .and_then(|t| self.state.messages.iter().find(|m| m.id == t))
                    .or_else(|| self.state.messages.last())
                    .cloned()
                    .unwrap_or(reply);
                SendOutcome::Replied(settled)
            }
            Err(e) if e.kind == ErrorKind::Cancelled => self.settle_aborted(request_id, target_id.as_deref()),
            Err(e) => {
                error!("Completion failed ({}): {}", e.kind, e);
                let message = ChatMessage::failure(e.kind, format!("Error: {}", e.message));
                self.dispatch(Action::Failed { request_id, error: message.clone() });
                SendOutcome::Failed {
                    message,
                    needs_credentials: e.needs_credentials(),
                }
            }
        };

        self.persist_if_needed();
        Ok(outcome)
    }

    fn settle_aborted(&mut self, request_id: u64, target_id: Option<&str>) -> SendOutcome {
        let partial = target_id
            .and_then(|t| self.state.messages.iter().find(|m| m.id == t))
            .map(|m| m.content.clone())
            .filter(|c| !c.is_empty());
        info!("Turn {} aborted{}", request_id, if partial.is_some() { " with partial reply" } else { "" });
        self.dispatch(Action::Aborted { request_id });
        SendOutcome::Aborted { partial }
    }

    pub fn update_system_prompt(&mut self, prompt: &str) {
        self.dispatch(Action::SetSystemPrompt(prompt.to_string()));
        self.save_now();
    }

    pub fn set_model(&mut self, model: &str) {
        self.dispatch(Action::SetModel(model.to_string()));
        self.preferences.set_model(model);
    }

    pub fn set_api_key(&mut self, api_key: &str) {
        self.api_key = api_key.trim().to_string();
        self.preferences.set_api_key(api_key);
    }

    pub fn rename_conversation(&mut self, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        self.dispatch(Action::Rename(title.to_string()));
        self.save_now();
    }

    pub fn new_conversation(&mut self) -> String {
        self.abort();
        self.persist_if_needed();
        self.provision(self.fresh_messages())
    }

    pub fn switch_conversation(&mut self, id: &str) -> Result<(), SessionError> {
        if self.state.loading {
            return Err(SessionError::Busy);
        }
        let conversation = self.store.get(id).ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        self.persist_if_needed();
        self.store.set_current_id(&conversation.id);
        self.dispatch(Action::Load(conversation));
        Ok(())
    }

    /// Deleting the visible conversation falls back to the most recently
    /// updated one, or a fresh one when none remain.
    pub fn delete_conversation(&mut self, id: &str) -> Result<(), SessionError> {
        if !self.store.delete(id) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        if self.state.active_conversation_id.as_deref() != Some(id) {
            return Ok(());
        }
        self.abort();
        match self.store.get_all().into_iter().next() {
            Some(next) => {
                self.store.set_current_id(&next.id);
                self.dispatch(Action::Load(next));
            }
            None => {
                self.provision(self.fresh_messages());
            }
        }
        Ok(())
    }

    /// Starts over with only the system message, as a new record.
    pub fn clear_conversation(&mut self) -> String {
        self.abort();
        self.persist_if_needed();
        let system = match system_prompt(&self.state.messages) {
            Some(prompt) => ChatMessage::system(prompt),
            None => self.fresh_messages().remove(0),
        };
        self.provision(vec![system])
    }

    pub fn export_conversation(&self) -> ExportedTranscript {
        export_transcript(&self.state.to_conversation(), Local::now().date_naive())
    }

    pub fn last_reply(&self) -> Option<&ChatMessage> {
        self.state.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.error)
    }
}
