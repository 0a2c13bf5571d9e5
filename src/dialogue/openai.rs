//! Client for OpenAI-compatible chat-completion endpoints
//!
//! Works against hosted APIs (`DeepSeek`) and self-hosted servers (llama.cpp,
//! vLLM) that speak the same wire format.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{ChatBackend, ChatMessage, GenerationParams};
use crate::config::LlmConfig;
use crate::{Error, Result};

/// Chat backend over `/chat/completions`
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    params: GenerationParams,
}

impl OpenAiChat {
    /// Create a client for the given base URL
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        params: GenerationParams,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
            params,
        })
    }

    /// Create a client from the dialogue configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            config.model.clone(),
            config.params(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "temperature": self.params.temperature,
            "top_p": self.params.top_p,
        });
        if let Some(max_tokens) = self.params.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(top_k) = self.params.top_k {
            body["top_k"] = top_k.into();
        }
        if let Some(penalty) = self.params.repetition_penalty {
            body["repetition_penalty"] = penalty.into();
        }
        body
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let mut req = self.client.post(&self.endpoint).json(&self.body(messages, stream));

        // Local servers usually run without a key
        if let Some(key) = self
            .api_key
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|k| !k.is_empty())
        {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn stream(&self, messages: &[ChatMessage]) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.send(messages, true).await?;
        tracing::debug!(model = %self.model, "chat stream opened");
        Ok(sse_deltas(response))
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response: CompletionResponse = self.send(messages, false).await?.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| Error::Llm("chat API returned no choices".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// One parsed line of a server-sent event stream
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
}

/// Parse a single SSE line
///
/// Comments, blank lines, non-data fields and empty deltas yield `None`.
pub(crate) fn parse_sse_line(line: &str) -> Result<Option<SseEvent>> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: StreamChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(Error::Llm(format!("chat stream error: {error}")));
    }

    let delta: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    Ok((!delta.is_empty()).then_some(SseEvent::Delta(delta)))
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl SseState {
    fn drain_lines(&mut self) -> Result<()> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match parse_sse_line(&String::from_utf8_lossy(&line))? {
                Some(SseEvent::Delta(delta)) => self.pending.push_back(delta),
                Some(SseEvent::Done) => {
                    self.done = true;
                    self.buffer.clear();
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn sse_deltas(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let state = SseState {
        bytes: response.bytes_stream().map(|c| c.map(|b| b.to_vec())).boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::try_unfold(state, next_delta).boxed()
}

async fn next_delta(mut state: SseState) -> Result<Option<(String, SseState)>> {
    loop {
        if let Some(delta) = state.pending.pop_front() {
            return Ok(Some((delta, state)));
        }
        if state.done {
            return Ok(None);
        }
        match state.bytes.next().await {
            Some(chunk) => {
                state.buffer.extend_from_slice(&chunk?);
                state.drain_lines()?;
            }
            None => {
                // Servers may omit the final newline
                state.buffer.push(b'\n');
                state.drain_lines()?;
                state.done = true;
            }
        }
    }
}
