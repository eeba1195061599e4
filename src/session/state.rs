//! Pure session transitions.
//!
//! `reduce` owns every mutation of the visible message list. It performs no
//! I/O, so the manager can be tested through it and stale events can be
//! rejected in one place.

use crate::models::chat::{ normalize_messages, upsert_system_message, ChatMessage, Conversation, Role };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingFirstToken,
    Streaming,
    Settled,
}

/// Bookkeeping for the one request allowed in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub request_id: u64,
    /// Placeholder message receiving streamed content, if streaming.
    pub target_id: Option<String>,
    /// List length before the user turn was appended.
    pub snapshot_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub messages: Vec<ChatMessage>,
    pub phase: Phase,
    pub loading: bool,
    pub is_streaming: bool,
    pub active_conversation_id: Option<String>,
    pub title: String,
    pub model: String,
    pub system_prompt: String,
    pub in_flight: Option<InFlight>,
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Replace the visible conversation.
    Load(Conversation),
    SendStarted {
        request_id: u64,
        user: ChatMessage,
        /// Empty assistant message for the streaming path.
        placeholder: Option<ChatMessage>,
        title: Option<String>,
    },
    /// Cumulative text decoded so far.
    StreamChunk {
        request_id: u64,
        content: String,
    },
    Settled {
        request_id: u64,
        reply: ChatMessage,
    },
    Failed {
        request_id: u64,
        error: ChatMessage,
    },
    Aborted {
        request_id: u64,
    },
    SetSystemPrompt(String),
    SetModel(String),
    Rename(String),
}

impl SessionState {
    pub fn is_current(&self, request_id: u64) -> bool {
        self.in_flight.as_ref().map(|f| f.request_id) == Some(request_id)
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }

    /// Snapshot of the visible state as a storable record.
    pub fn to_conversation(&self) -> Conversation {
        Conversation {
            id: self.active_conversation_id.clone().unwrap_or_default(),
            title: self.title.clone(),
            messages: self.messages.clone(),
            created_at: None,
            last_updated: None,
        }
    }

    fn finish_request(&mut self) {
        self.in_flight = None;
        self.loading = false;
        self.is_streaming = false;
        self.phase = Phase::Settled;
    }
}

pub fn reduce(mut state: SessionState, action: Action) -> SessionState {
    match action {
        Action::Load(conversation) => {
            state.messages = normalize_messages(conversation.messages);
            if let Some(prompt) = crate::models::chat::system_prompt(&state.messages) {
                state.system_prompt = prompt.to_string();
            }
            state.active_conversation_id = Some(conversation.id).filter(|id| !id.is_empty());
            state.title = conversation.title;
            state.in_flight = None;
            state.loading = false;
            state.is_streaming = false;
            state.phase = Phase::Idle;
        }
        Action::SendStarted { request_id, user, placeholder, title } => {
            if state.loading {
                return state;
            }
            let snapshot_len = state.messages.len();
            state.messages.push(user);
            let target_id = placeholder.as_ref().map(|p| p.id.clone());
            if let Some(placeholder) = placeholder {
                state.messages.push(placeholder);
            }
            if let Some(title) = title {
                state.title = title;
            }
            state.is_streaming = target_id.is_some();
            state.in_flight = Some(InFlight { request_id, target_id, snapshot_len });
            state.loading = true;
            state.phase = Phase::AwaitingFirstToken;
        }
        Action::StreamChunk { request_id, content } => {
            if !state.is_current(request_id) {
                return state;
            }
            let target = state.in_flight.as_ref().and_then(|f| f.target_id.clone());
            if let Some(target) = target {
                if let Some(msg) = state.messages.iter_mut().find(|m| m.id == target) {
                    msg.content = content;
                    state.phase = Phase::Streaming;
                }
            }
        }
        Action::Settled { request_id, reply } => {
            if !state.is_current(request_id) {
                return state;
            }
            let target = state.in_flight.as_ref().and_then(|f| f.target_id.clone());
            let slot = target.and_then(|t| state.messages.iter_mut().find(|m| m.id == t));
            match slot {
                Some(msg) => {
                    msg.content = reply.content;
                }
                None => state.messages.push(reply),
            }
            state.finish_request();
        }
        Action::Failed { request_id, error } => {
            if !state.is_current(request_id) {
                return state;
            }
            if let Some(flight) = &state.in_flight {
                // keep the user's turn, drop anything after it
                let keep = (flight.snapshot_len + 1).min(state.messages.len());
                state.messages.truncate(keep);
            }
            state.messages.push(error);
            state.finish_request();
        }
        Action::Aborted { request_id } => {
            if !state.is_current(request_id) {
                return state;
            }
            if let Some(target) = state.in_flight.as_ref().and_then(|f| f.target_id.clone()) {
                state.messages.retain(|m| m.id != target || !m.content.is_empty());
            }
            state.finish_request();
        }
        Action::SetSystemPrompt(prompt) => {
            let had_head = crate::models::chat::system_prompt(&state.messages).is_some();
            upsert_system_message(&mut state.messages, &prompt);
            if !had_head {
                // a prepended head shifts the rollback point
                if let Some(flight) = state.in_flight.as_mut() {
                    flight.snapshot_len += 1;
                }
            }
            state.system_prompt = prompt;
        }
        Action::SetModel(model) => {
            state.model = model;
        }
        Action::Rename(title) => {
            state.title = title;
        }
    }
    state
}
