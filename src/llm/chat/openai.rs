use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, Response, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION, ACCEPT } };
use serde::{ Deserialize, Serialize };
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::sse::{ SseDecoder, SseEvent };
use super::{ ChatClient, ChunkStream, CompletionRequest };
use crate::llm::error::CompletionError;
use crate::llm::retry::RetryPolicy;
use crate::llm::LlmConfig;
use crate::models::chat::{ ChatMessage, ErrorKind, Role };

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIChatClient {
    http: HttpClient,
    url: String,
    retry: RetryPolicy,
    request_timeout: Duration,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

impl OpenAIChatClient {
    pub fn new(
        base_url: Option<String>,
        retry: RetryPolicy,
        request_timeout: Duration,
        connect_timeout: Duration
    ) -> Result<Self, CompletionError> {
        let url = base_url.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                CompletionError::new(ErrorKind::Unknown, format!("Failed to build HTTP client: {}", e)).with_source(e)
            })?;

        Ok(Self {
            http,
            url,
            retry,
            request_timeout,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        Self::new(
            config.base_url.clone(),
            config.retry.clone(),
            config.request_timeout,
            config.connect_timeout
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload<'a>(request: &'a CompletionRequest, stream: bool) -> OpenAIChatRequest<'a> {
        let messages = request.messages
            .iter()
            .filter(|m| !m.error)
            .filter(|m| !(m.role == Role::Assistant && m.content.is_empty()))
            .map(|m| OpenAIMessage {
                role: m.role,
                content: Some(m.content.clone()),
            })
            .collect();
        OpenAIChatRequest {
            model: &request.model,
            messages,
            stream: if stream { Some(true) } else { None },
        }
    }

    /// One attempt up to response headers. Non-2xx statuses are classified.
    async fn post(&self, request: &CompletionRequest, stream: bool) -> Result<Response, CompletionError> {
        let api_key = request.ensure_api_key()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
            CompletionError::new(ErrorKind::Auth, format!("Invalid API key format: {}", e))
        })?;

        let mut req = self.http.post(&self.url).header(AUTHORIZATION, auth).json(&Self::payload(request, stream));
        if stream {
            req = req.header(ACCEPT, "text/event-stream");
        }

        let resp = tokio::time
            ::timeout(self.request_timeout, req.send()).await
            .map_err(|_| CompletionError::timeout(self.request_timeout))??;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status, &body));
        }
        Ok(resp)
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        let attempt = async {
            let resp = self.post(request, false).await?;
            let parsed = resp.json::<OpenAIResponse>().await?;
            let content = parsed.choices
                .into_iter()
                .next()
                .ok_or_else(|| CompletionError::new(ErrorKind::Unknown, "No response from completion API"))?
                .message.content
                .unwrap_or_default();
            Ok::<_, CompletionError>(ChatMessage::assistant(content))
        };
        tokio::time
            ::timeout(self.request_timeout, attempt).await
            .map_err(|_| CompletionError::timeout(self.request_timeout))?
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatMessage, CompletionError> {
        request.ensure_api_key()?;
        debug!("POST {} (model={}, messages={})", self.url, request.model, request.messages.len());
        self.retry.execute(|_| self.complete_once(request)).await
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest
    ) -> Result<ChunkStream, CompletionError> {
        request.ensure_api_key()?;
        debug!("POST {} stream (model={}, messages={})", self.url, request.model, request.messages.len());
        let resp = self.retry.execute(|_| self.post(request, true)).await?;
        info!("Completion stream opened ({})", resp.status());

        let (tx, rx) = mpsc::channel(32);
        let idle_timeout = self.request_timeout;
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut bytes = resp.bytes_stream();
            loop {
                let chunk = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Stream reader dropped, closing connection");
                        return;
                    }
                    next = tokio::time::timeout(idle_timeout, bytes.next()) => match next {
                        Ok(chunk) => chunk,
                        Err(_) => {
                            warn!("Completion stream idle for {:?}, giving up", idle_timeout);
                            let _ = tx.send(Err(CompletionError::timeout(idle_timeout))).await;
                            return;
                        }
                    },
                };
                match chunk {
                    Some(Ok(buf)) => {
                        for event in decoder.push(&buf) {
                            match event {
                                SseEvent::Delta(text) => {
                                    if tx.send(Ok(text)).await.is_err() {
                                        return;
                                    }
                                }
                                SseEvent::Done => {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(CompletionError::from(e))).await;
                        return;
                    }
                    None => {
                        break;
                    }
                }
            }
            for event in decoder.finish() {
                if let SseEvent::Delta(text) = event {
                    let _ = tx.send(Ok(text)).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn supports_native_streaming(&self) -> bool {
        true
    }
}
