use crate::core::config::data::{ConfigPaths, Prompts, SamplingConfig, Settings};
use directories::ProjectDirs;
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 11434;
pub const DEFAULT_UI_PORT: u16 = 7866;
pub const DEFAULT_MODEL: &str = "qwq-7b";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
## Role
You are a helpful assistant fluent in many languages, well versed in science, \
literature, history, mathematics, philosophy and the arts.
## Goal
Combine what you know with the context the user provides to answer questions \
or produce text. Explain jargon in plain language when it helps.
## Constraints
Reply in the user's language. Avoid repeating yourself and format answers with \
Markdown where it aids reading.";

pub const DEFAULT_GREETING: &str = "I'm your assistant. What can I help you with today?";

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            context_size: 4096,
            top_k: 50,
            top_p: 0.9,
            repeat_penalty: 1.2,
            seed: -1,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ui_port: DEFAULT_UI_PORT,
            model_name: DEFAULT_MODEL.to_string(),
            options: SamplingConfig::default(),
        }
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

impl ConfigPaths {
    /// Platform config directory, or the working directory when the platform
    /// has none.
    pub fn default_root() -> PathBuf {
        ProjectDirs::from("org", "ollama-chat", "ollama-chat")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}
