use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tracing::debug;

use crate::api::{ChatRequest, ChatResponse, UnloadRequest};
use crate::utils::url::construct_api_url;

/// Incremental text fragments of one reply. Ends after the final fragment;
/// an `Err` item is terminal.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Failure talking to the model server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent or no response head arrived.
    Request(String),
    /// The server answered with a non-success status.
    Status { status: u16, message: String },
    /// The response body broke off mid-stream.
    Stream(String),
    /// The server sent something that is not a chat chunk, or an error line.
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Request(message) => write!(f, "Request failed: {message}"),
            TransportError::Status { status, message } => {
                write!(f, "Server returned {status}: {message}")
            }
            TransportError::Stream(message) => write!(f, "Stream interrupted: {message}"),
            TransportError::Protocol(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for TransportError {}

/// The remote language-model capability.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Submits the conversation and returns the reply as a fragment stream.
    /// Dropping the stream must release the underlying connection.
    async fn chat(&self, request: ChatRequest) -> Result<FragmentStream, TransportError>;

    /// Asks the server to release `model` from memory.
    async fn unload(&self, model: &str) -> Result<(), TransportError>;
}

/// [`ChatBackend`] speaking the Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<reqwest::Response, TransportError> {
        let url = construct_api_url(&self.base_url, endpoint);
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(TransportError::Status {
                status,
                message: format_api_error(&error_text),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, request: ChatRequest) -> Result<FragmentStream, TransportError> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            seed = request.options.seed,
            "sending chat request"
        );
        let response = self.post_json("api/chat", &request).await?;
        Ok(Box::pin(ndjson_fragments(response.bytes_stream())))
    }

    async fn unload(&self, model: &str) -> Result<(), TransportError> {
        self.post_json("api/generate", &UnloadRequest::new(model))
            .await
            .map(|_| ())
    }
}

enum LineOutcome {
    Continue(Option<String>),
    Finish(Option<String>),
    Fail(String),
}

fn parse_chat_line(line: &[u8]) -> LineOutcome {
    let line = match std::str::from_utf8(line) {
        Ok(s) => s.trim(),
        Err(e) => {
            debug!("Invalid UTF-8 in stream: {e}");
            return LineOutcome::Continue(None);
        }
    };
    if line.is_empty() {
        return LineOutcome::Continue(None);
    }

    match serde_json::from_str::<ChatResponse>(line) {
        Ok(response) => {
            if let Some(error) = response.error {
                return LineOutcome::Fail(format_api_error(&error));
            }
            let fragment = response
                .message
                .map(|message| message.content)
                .filter(|content| !content.is_empty());
            if response.done {
                LineOutcome::Finish(fragment)
            } else {
                LineOutcome::Continue(fragment)
            }
        }
        Err(_) => LineOutcome::Fail(format_api_error(line)),
    }
}

/// Splits a newline-delimited JSON body into text fragments.
fn ndjson_fragments<S, B, E>(body: S) -> impl Stream<Item = Result<String, TransportError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let at_eof = match body.next().await {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(chunk.as_ref());
                    false
                }
                Some(Err(e)) => {
                    yield Err(TransportError::Stream(e.to_string()));
                    return;
                }
                None => {
                    if !buffer.is_empty() && buffer.last() != Some(&b'\n') {
                        buffer.push(b'\n');
                    }
                    true
                }
            };

            while let Some(newline_pos) = memchr(b'\n', &buffer) {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                match parse_chat_line(&line) {
                    LineOutcome::Continue(fragment) => {
                        if let Some(text) = fragment {
                            yield Ok(text);
                        }
                    }
                    LineOutcome::Finish(fragment) => {
                        if let Some(text) = fragment {
                            yield Ok(text);
                        }
                        return;
                    }
                    LineOutcome::Fail(message) => {
                        yield Err(TransportError::Protocol(message));
                        return;
                    }
                }
            }

            if at_eof {
                debug!("chat stream ended without a done marker");
                return;
            }
        }
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .get("error")
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.to_string()),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|message| message.as_str().map(str::to_owned)),
            _ => None,
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Reduces a server error body to a one-line description.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error: <empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return format!("API Error: {summary}");
            }
        }
        return format!("API Error: {json_value}");
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("API Error: {collapsed}")
}
