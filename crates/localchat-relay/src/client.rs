//! HTTP client for llama-server's OpenAI-compatible streaming API.

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::{debug, trace};

use crate::conversation::Turn;
use crate::error::RelayError;
use crate::params::SamplingParams;
use crate::{DEFAULT_MODEL_NAME, DEFAULT_SERVER_PORT, DEFAULT_STOP};

/// Payload that marks the end of an OpenAI-style event stream.
const DONE_MARKER: &str = "[DONE]";

/// Fragments of one streamed completion, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, RelayError>> + Send>>;

/// Client for the chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    stop: Vec<String>,
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: &'a [Turn],
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    temperature: f32,
    stop: &'a [String],
}

/// One `data:` payload of the streamed response.
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// An incremental piece of generated text.
///
/// llama-server sends chunks with no content, typically the first (role
/// only) and the last (finish reason only).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

impl Fragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: None,
        }
    }

    /// The fragment's text, if it carries any.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref().filter(|text| !text.is_empty())
    }

    fn from_chunk(chunk: ChatCompletionChunk) -> Self {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Self::default();
        };
        Self {
            content: choice.delta.and_then(|delta| delta.content),
            finish_reason: choice.finish_reason,
        }
    }
}

impl ChatClient {
    /// Create a client for a server on the given localhost port.
    pub fn with_port(port: u16) -> Self {
        Self::with_url(format!("http://localhost:{}/v1", port))
    }

    /// Create a client with a custom base URL (including the `/v1` prefix).
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: DEFAULT_MODEL_NAME.to_string(),
            stop: vec![DEFAULT_STOP.to_string()],
        }
    }

    /// Set the model name sent with requests.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the stop markers.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Open a streaming chat completion for the given turns.
    ///
    /// Fails up front if the server is unreachable or rejects the request.
    /// The returned stream ends when the server closes the response or
    /// sends `[DONE]`; there is no timeout on it.
    pub async fn stream_chat(
        &self,
        turns: &[Turn],
        params: &SamplingParams,
    ) -> Result<FragmentStream, RelayError> {
        let request = ChatCompletionRequest {
            messages: turns,
            model: &self.model,
            max_tokens: params.max_tokens(),
            stream: true,
            temperature: params.temperature(),
            stop: &self.stop,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} ({} turns)", url, turns.len());

        let response = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RelayError::ServerNotRunning(self.base_url.clone())
                } else {
                    RelayError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RelayError::Api(format!("{}: {}", status, text)));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());

        let fragments = async_stream::stream! {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(RelayError::Stream(e.to_string()));
                        break;
                    }
                };
                let data = event.data.trim();
                trace!("SSE event: {}", data);

                if data.is_empty() {
                    continue;
                }
                if data == DONE_MARKER {
                    break;
                }

                match serde_json::from_str::<ChatCompletionChunk>(data) {
                    Ok(chunk) => {
                        yield Ok(Fragment::from_chunk(chunk));
                    }
                    Err(e) => debug!("Skipping malformed chunk: {}, data: {}", e, data),
                }
            }
        };

        Ok(Box::pin(fragments))
    }
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::with_port(DEFAULT_SERVER_PORT)
    }
}
