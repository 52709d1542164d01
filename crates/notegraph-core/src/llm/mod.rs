//! Local LLM Client
//!
//! Thin client for an OpenAI-compatible chat endpoint served by a local
//! runtime (Ollama, llama.cpp server, vLLM). One process-wide HTTP client,
//! constructed lazily; the per-call timeout comes from configuration and
//! every caller has a documented fallback when a call fails.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use futures::stream::{Stream, TryStreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// LLM invocation error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Endpoint answered with a non-success status
    #[error("LLM endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
    /// Response body did not match the expected shape
    #[error("Unexpected LLM response: {0}")]
    Malformed(String),
    /// The call did not complete within the configured timeout
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),
}

/// LLM result type
pub type Result<T> = std::result::Result<T, LlmError>;

// ============================================================================
// SHARED HTTP CLIENT
// ============================================================================

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Process-wide HTTP client shared by the LLM and embedding modules
pub(crate) fn http_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default()
    })
}

// ============================================================================
// CLIENT
// ============================================================================

/// Result of one chat completion
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Assistant message content
    pub content: String,
    /// Prompt token count when the endpoint reports usage
    pub tokens_in: Option<i64>,
    /// Completion token count when the endpoint reports usage
    pub tokens_out: Option<i64>,
    /// Wall-clock duration of the call
    pub duration_ms: i64,
}

/// Client for a local OpenAI-compatible chat endpoint
#[derive(Debug, Clone)]
pub struct LlmClient {
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<i64>,
    #[serde(default)]
    completion_tokens: Option<i64>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.llm_endpoint, &config.llm_model, config.llm_timeout())
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.endpoint)
    }

    /// One chat completion. `json_mode` asks the endpoint for a JSON object
    /// response; callers still parse defensively because not every local
    /// runtime honors it.
    pub async fn chat(&self, system: &str, user: &str, json_mode: bool) -> Result<ChatOutcome> {
        let started = Instant::now();
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.2,
            "stream": false,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = http_client()
            .post(self.chat_url())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Endpoint {
                status: status.as_u16(),
                body: truncate_for_log(&body),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;

        let usage = parsed.usage;
        Ok(ChatOutcome {
            content,
            tokens_in: usage.as_ref().and_then(|u| u.prompt_tokens),
            tokens_out: usage.as_ref().and_then(|u| u.completion_tokens),
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }

    /// Streaming chat completion. Yields content deltas as they arrive.
    /// Dropping the stream aborts the underlying request, which cancels
    /// generation on runtimes that watch for disconnects.
    pub async fn chat_stream(
        &self,
        system: &str,
        user: &str,
    ) -> Result<impl Stream<Item = Result<String>> + Send + Unpin + use<>> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.4,
            "stream": true,
        });

        // The configured timeout bounds the connect + response-header phase;
        // token generation itself may legitimately outlast it.
        let send = http_client().post(self.chat_url()).json(&body).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Endpoint {
                status: status.as_u16(),
                body: truncate_for_log(&body),
            });
        }

        // The endpoint emits `data: {...}` lines with a `data: [DONE]`
        // terminator. Chunks can split mid-line, so carry a buffer across
        // reads and only parse completed lines.
        struct StreamState<S> {
            bytes: S,
            buffer: String,
            pending: std::collections::VecDeque<String>,
            done: bool,
        }

        let state = StreamState {
            bytes: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            pending: std::collections::VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(delta) = state.pending.pop_front() {
                    return Ok(Some((delta, state)));
                }
                if state.done {
                    return Ok(None);
                }
                match state.bytes.try_next().await? {
                    Some(chunk) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = state.buffer.find('\n') {
                            let line: String = state.buffer.drain(..=pos).collect();
                            let line = line.trim();
                            let Some(payload) = line.strip_prefix("data:") else {
                                continue;
                            };
                            let payload = payload.trim();
                            if payload == "[DONE]" {
                                state.done = true;
                                break;
                            }
                            if let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) {
                                for choice in chunk.choices {
                                    if let Some(content) = choice.delta.content {
                                        if !content.is_empty() {
                                            state.pending.push_back(content);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    None => state.done = true,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

// ============================================================================
// DEFENSIVE JSON PARSING
// ============================================================================

/// Pull the first JSON object out of an LLM reply: strips ``` fences and any
/// prose before/after the outermost braces.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_fence = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = without_fence.find('{')?;
    let end = without_fence.rfind('}')?;
    if end < start {
        return None;
    }
    Some(without_fence[start..=end].to_string())
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 500;
    if s.len() <= MAX {
        s.to_string()
    } else {
        let mut end = MAX;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ============================================================================
// TESTS
// ============================================================================
