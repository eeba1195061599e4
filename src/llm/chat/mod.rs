pub mod openai;
pub mod sse;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use super::error::CompletionError;
use crate::models::chat::{ ChatMessage, Role };

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub api_key: String,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn ensure_api_key(&self) -> Result<&str, CompletionError> {
        let key = self.api_key.trim();
        if key.is_empty() { Err(CompletionError::no_api_key()) } else { Ok(key) }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError>;

    /// Incremental content deltas. Clients without native streaming yield the
    /// whole reply as a single chunk.
    async fn stream_completion(
        &self,
        request: &CompletionRequest
    ) -> Result<ChunkStream, CompletionError> {
        let reply = self.complete(request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(reply.content) })))
    }

    /// Drives [`stream_completion`](Self::stream_completion), handing every
    /// delta to `on_chunk` and returning the accumulated reply.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send + '_),
        cancel: &CancellationToken
    ) -> Result<ChatMessage, CompletionError> {
        request.ensure_api_key()?;
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(CompletionError::cancelled()),
            opened = self.stream_completion(request) => opened?,
        };
        drain_stream(stream, on_chunk, cancel).await
    }

    fn supports_native_streaming(&self) -> bool {
        false
    }
}

pub async fn drain_stream(
    mut stream: ChunkStream,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send + '_),
    cancel: &CancellationToken
) -> Result<ChatMessage, CompletionError> {
    let mut full = String::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CompletionError::cancelled());
            }
            next = stream.next() => {
                match next {
                    Some(Ok(delta)) => {
                        full.push_str(&delta);
                        on_chunk(&delta);
                    }
                    Some(Err(e)) => {
                        return Err(e);
                    }
                    None => {
                        break;
                    }
                }
            }
        }
    }
    Ok(ChatMessage::new(Role::Assistant, full))
}
