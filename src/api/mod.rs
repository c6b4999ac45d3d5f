//! Wire types for the Ollama chat API.

use serde::{Deserialize, Serialize};

use crate::core::config::SamplingConfig;
use crate::core::message::Message;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

/// Sampling options in the server's naming.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct ChatOptions {
    pub temperature: f64,
    pub num_ctx: u32,
    pub top_k: u32,
    pub top_p: f64,
    pub repeat_penalty: f64,
    pub seed: i64,
}

impl ChatOptions {
    /// `seed` must already be resolved to a concrete, non-negative value.
    pub fn from_config(config: &SamplingConfig, seed: i64) -> Self {
        Self {
            temperature: config.temperature,
            num_ctx: config.context_size,
            top_k: config.top_k,
            top_p: config.top_p,
            repeat_penalty: config.repeat_penalty,
            seed,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: String,
}

/// One NDJSON line of a streaming chat response.
#[derive(Deserialize, Debug, Default)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<ChatResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Asks the server to evict a model from memory.
#[derive(Serialize, Debug)]
pub struct UnloadRequest {
    pub model: String,
    pub keep_alive: u32,
}

impl UnloadRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            keep_alive: 0,
        }
    }
}
