//! Dialogue wrapper: turn history and chat-model backends

mod openai;
mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

pub use openai::OpenAiChat;
pub use prompt::{DEFAULT_SYSTEM_PROMPT, TITLE_CHARS, build_messages, title_from};

use crate::{Error, Result};

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a stored role name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
    pub top_k: Option<u32>,
    pub repetition_penalty: Option<f32>,
}

impl GenerationParams {
    /// Preset for the hosted chat API
    #[must_use]
    pub const fn remote() -> Self {
        Self {
            temperature: 1.9,
            top_p: 1.0,
            max_tokens: None,
            top_k: None,
            repetition_penalty: None,
        }
    }

    /// Preset for the self-hosted quantized model
    #[must_use]
    pub const fn local() -> Self {
        Self {
            temperature: 0.6,
            top_p: 0.8,
            max_tokens: Some(512),
            top_k: Some(10),
            repetition_penalty: Some(1.2),
        }
    }
}

/// A chat model that can stream or complete a reply
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream content deltas of the reply
    async fn stream(&self, messages: &[ChatMessage]) -> Result<BoxStream<'static, Result<String>>>;

    /// Produce the whole reply in one call
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

async fn drain_stream(
    backend: &dyn ChatBackend,
    messages: &[ChatMessage],
    on_token: &mut (dyn FnMut(&str) + Send),
    emitted: &mut bool,
) -> Result<String> {
    let mut stream = backend.stream(messages).await?;
    let mut reply = String::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        on_token(&delta);
        *emitted = true;
        reply.push_str(&delta);
    }
    Ok(reply)
}

/// Stream a reply, falling back to a single non-streaming call
///
/// If the fallback fails too, the original streaming error is returned.
///
/// # Errors
///
/// Returns the streaming error when both attempts fail
pub async fn stream_reply(
    backend: &dyn ChatBackend,
    messages: &[ChatMessage],
    on_token: &mut (dyn FnMut(&str) + Send),
) -> Result<String> {
    let mut emitted = false;
    let stream_err = match drain_stream(backend, messages, on_token, &mut emitted).await {
        Ok(reply) => return Ok(reply.trim().to_string()),
        Err(e) => e,
    };

    tracing::warn!(error = %stream_err, "streaming reply failed, retrying without streaming");
    match backend.complete(messages).await {
        Ok(reply) => {
            if !emitted {
                on_token(&reply);
            }
            Ok(reply.trim().to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "non-streaming retry failed");
            Err(stream_err)
        }
    }
}

/// Collect a full reply without observing tokens
///
/// # Errors
///
/// Returns the streaming error when both attempts fail
pub async fn collect_reply(backend: &dyn ChatBackend, messages: &[ChatMessage]) -> Result<String> {
    stream_reply(backend, messages, &mut |_| {}).await
}

/// In-memory conversation with a chat backend
pub struct Dialogue {
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
    history: Vec<ChatMessage>,
}

impl Dialogue {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: impl Into<String>) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.into(),
            history: Vec::new(),
        }
    }

    /// Send a user turn and stream the reply through `on_token`
    ///
    /// The turn is recorded only when the reply is non-empty.
    ///
    /// # Errors
    ///
    /// Returns error if the query is empty or the model fails
    pub async fn infer(
        &mut self,
        query: &str,
        on_token: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::BadRequest("empty query".to_string()));
        }

        let messages = build_messages(&self.system_prompt, &self.history, query);
        let reply = stream_reply(self.backend.as_ref(), &messages, on_token).await?;

        if reply.is_empty() {
            tracing::warn!("model returned an empty reply, turn not recorded");
        } else {
            self.history.push(ChatMessage::user(query));
            self.history.push(ChatMessage::assistant(reply.clone()));
        }
        Ok(reply)
    }

    /// Replace the last assistant turn, or append one
    pub fn add_assistant_response(&mut self, content: impl Into<String>) {
        let content = content.into();
        match self.history.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content = content,
            _ => self.history.push(ChatMessage::assistant(content)),
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}
